//! nvf_postprocessor CLI
//!
//! Writes OctoPrint SpoolManager spool names into the `sm_name` tokens of a
//! sliced gcode file's filament notes. Slicers can run it as a post-processing
//! script: `nvf_postprocessor apply` receives the gcode path as last argument.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use nvf::{
    about,
    octoprint::SpoolManagerClient,
    settings::{default_settings_path, Settings},
    spool_data::{SpoolAssignments, MAX_EXTRUDERS},
    inspect_file, process_file, PostprocessConfig,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nvf_postprocessor")]
#[command(about = "Nozzle Filament Validator gcode post-processor")]
#[command(disable_version_flag = true)]
struct Cli {
    /// Settings file (default: NVF_SETTINGS or nvfsettings.json beside the executable)
    #[arg(long, global = true, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Number of trailing lines searched for the filament comments
    #[arg(long, global = true, value_name = "N")]
    tail_lines: Option<usize>,

    /// Overwrite the gcode file directly instead of via a temporary file
    #[arg(long, global = true)]
    no_atomic: bool,

    /// Log debug events to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print version and build information
    #[arg(short = 'V', long)]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite the spool names of a gcode file in place
    Apply {
        /// Gcode file to edit
        gcode: PathBuf,

        /// Spool JSON file ({"1": {"sm_name": "..."}, ...}) instead of the saved spools
        #[arg(long, value_name = "FILE", conflicts_with = "octoprint")]
        spool_json: Option<PathBuf>,

        /// Use the spools currently loaded in OctoPrint
        #[arg(long)]
        octoprint: bool,

        /// Override one extruder, e.g. --spool 2="Galaxy Black"
        #[arg(long = "spool", value_name = "N=NAME", value_parser = parse_spool_arg)]
        spools: Vec<(usize, String)>,

        /// Store the names that were applied as the saved spools
        #[arg(long)]
        remember: bool,
    },

    /// Show the extruder and spool information recorded in a gcode file
    Inspect {
        gcode: PathBuf,
    },

    /// Edit the saved per-extruder spool names
    Spools {
        #[command(subcommand)]
        action: SpoolAction,
    },

    /// Configure the OctoPrint connection
    Octoprint {
        #[command(subcommand)]
        action: OctoprintAction,
    },
}

#[derive(Subcommand)]
enum SpoolAction {
    /// Print the saved spools
    List,
    /// Set the spool name of one extruder
    Set { extruder: usize, name: String },
    /// Add an extruder after the last one
    Add {
        #[arg(default_value = "")]
        name: String,
    },
    /// Remove one extruder
    Remove { extruder: usize },
    /// Replace the saved spools with those loaded in OctoPrint
    Load,
    /// Replace the saved spools with the names recorded in a gcode file
    Import { gcode: PathBuf },
}

#[derive(Subcommand)]
enum OctoprintAction {
    /// Check a URL against SpoolManager and save it
    SetUrl { url: String },
    /// Check the saved URL
    Check,
}

#[derive(Serialize)]
struct SpoolListing<'a> {
    extruder: usize,
    sm_name: Option<&'a str>,
}

fn parse_spool_arg(value: &str) -> std::result::Result<(usize, String), String> {
    let (extruder, name) = value
        .split_once('=')
        .ok_or_else(|| format!("expected N=NAME, got '{value}'"))?;
    let extruder = extruder
        .trim()
        .parse::<usize>()
        .ok()
        .filter(|n| (1..=MAX_EXTRUDERS).contains(n))
        .ok_or_else(|| format!("invalid extruder number '{extruder}'"))?;
    Ok((extruder, name.to_string()))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Could not serialize JSON output")?;
    println!("{text}");
    Ok(())
}

fn octoprint_client(settings: &Settings) -> Result<SpoolManagerClient> {
    let url = settings
        .effective_octoprint_url()
        .ok_or_else(|| anyhow!("No OctoPrint URL configured; run 'octoprint set-url URL' first"))?;
    Ok(SpoolManagerClient::new(&url)?)
}

fn load_settings(path: &Path) -> Result<Settings> {
    Settings::load_from_path(path)
        .with_context(|| format!("Could not load settings from '{}'", path.display()))
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.version {
        println!("{}", about::version_cli_text());
        return Ok(());
    }
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        bail!("Missing command");
    };

    let settings_path = cli.settings.unwrap_or_else(default_settings_path);
    let mut config = PostprocessConfig::from_env();
    if let Some(lines) = cli.tail_lines {
        config.tail_lines = lines;
    }
    if cli.no_atomic {
        config.atomic_write = false;
    }

    match command {
        Commands::Apply {
            gcode,
            spool_json,
            octoprint,
            spools,
            remember,
        } => {
            let mut settings = load_settings(&settings_path)?;
            let mut assignments = if octoprint {
                let names = octoprint_client(&settings)?.loaded_spools()?;
                SpoolAssignments::from_names(&names)
            } else if let Some(path) = spool_json {
                SpoolAssignments::from_json_file(&path)?
            } else {
                settings.spool_data.clone()
            };
            for (extruder, name) in spools {
                assignments.set(extruder, &name);
            }

            let report = process_file(&gcode, &assignments.to_replacements(), &config)
                .with_context(|| format!("Could not post-process '{}'", gcode.display()))?;
            if remember {
                settings.spool_data = assignments;
                settings.save_to_path(&settings_path)?;
            }
            print_json(&report)
        }
        Commands::Inspect { gcode } => print_json(&inspect_file(&gcode, &config)?),
        Commands::Spools { action } => {
            let mut settings = load_settings(&settings_path)?;
            match action {
                SpoolAction::List => {}
                SpoolAction::Set { extruder, name } => {
                    if !(1..=MAX_EXTRUDERS).contains(&extruder) {
                        bail!("Extruder numbers run from 1 to {MAX_EXTRUDERS}");
                    }
                    settings.spool_data.set(extruder, &name);
                }
                SpoolAction::Add { name } => {
                    let extruder = settings.spool_data.push(&name);
                    eprintln!("Added extruder {extruder}");
                }
                SpoolAction::Remove { extruder } => {
                    if !settings.spool_data.remove(extruder) {
                        bail!("Extruder {extruder} has no saved spool");
                    }
                }
                SpoolAction::Load => {
                    let names = octoprint_client(&settings)?
                        .loaded_spools()
                        .context("Could not load the spools")?;
                    settings.spool_data.assign_in_order(&names);
                }
                SpoolAction::Import { gcode } => {
                    let inspection = inspect_file(&gcode, &config)?;
                    if inspection.spools.is_empty() {
                        bail!(
                            "Could not load the spools from '{}', file may not have been sliced correctly",
                            gcode.display()
                        );
                    }
                    settings.spool_data = SpoolAssignments::from_spool_map(&inspection.spools);
                }
            }
            settings.save_to_path(&settings_path)?;
            let listing: Vec<SpoolListing> = settings
                .spool_data
                .ordered()
                .into_iter()
                .map(|(extruder, sm_name)| SpoolListing { extruder, sm_name })
                .collect();
            print_json(&listing)
        }
        Commands::Octoprint { action } => {
            let mut settings = load_settings(&settings_path)?;
            match action {
                OctoprintAction::SetUrl { url } => {
                    SpoolManagerClient::new(&url)?.check_connection()?;
                    settings.octoprint_url = Some(url);
                    settings.save_to_path(&settings_path)?;
                    eprintln!("Octoprint url saved successfully");
                }
                OctoprintAction::Check => {
                    octoprint_client(&settings)?.check_connection()?;
                    eprintln!("OctoPrint SpoolManager is reachable");
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spool_arg_parsing() {
        assert_eq!(parse_spool_arg("2=Galaxy Black"), Ok((2, "Galaxy Black".to_string())));
        assert_eq!(parse_spool_arg("1="), Ok((1, String::new())));
        assert!(parse_spool_arg("0=x").is_err());
        assert!(parse_spool_arg("100000000000=x").is_err());
        assert!(parse_spool_arg("Galaxy").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn apply_accepts_slicer_style_invocation() {
        let cli = Cli::try_parse_from([
            "nvf_postprocessor",
            "apply",
            "--spool",
            "1=Red",
            "/tmp/print.gcode",
        ])
        .unwrap();
        let Some(Commands::Apply { gcode, spools, .. }) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(gcode, PathBuf::from("/tmp/print.gcode"));
        assert_eq!(spools, vec![(1, "Red".to_string())]);
    }
}
