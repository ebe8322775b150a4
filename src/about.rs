pub const NVF_DISPLAY_VERSION: &str = env!("NVF_DISPLAY_VERSION");
pub const NVF_BUILD_N: &str = env!("NVF_BUILD_N");

pub fn version_cli_text() -> String {
    format!(
        "NVF Postprocessor {}\nBuild {}\nSpool name rewriting for sliced gcode",
        NVF_DISPLAY_VERSION, NVF_BUILD_N
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_text_names_build() {
        let text = version_cli_text();
        assert!(text.starts_with("NVF Postprocessor "));
        assert!(text.contains(&format!("Build {NVF_BUILD_N}")));
    }
}
