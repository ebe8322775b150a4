//! Minimal client for the OctoPrint SpoolManager plugin: which spools are
//! currently loaded, in extruder order.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::{PostprocessError, Result};

const SPOOL_QUERY_PATH: &str = "/plugin/SpoolManager/loadSpoolsByQuery";
const SPOOL_QUERY_PARAMS: &str = "selectedPageSize=100000&from=0&to=100000&sortColumn=displayName\
&sortOrder=desc&filterName=&materialFilter=all&vendorFilter=all&colorFilter=all";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

pub fn spool_query_url(base_url: &str) -> String {
    format!(
        "{}{SPOOL_QUERY_PATH}?{SPOOL_QUERY_PARAMS}",
        base_url.trim().trim_end_matches('/')
    )
}

/// Display names of the loaded spools; "" for entries without one.
pub fn extract_loaded_spool_names(payload: &Value) -> Result<Vec<String>> {
    let selected = payload
        .get("selectedSpools")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            PostprocessError::Octoprint("response has no 'selectedSpools' list".to_string())
        })?;
    Ok(selected
        .iter()
        .map(|spool| {
            spool
                .get("displayName")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        })
        .collect())
}

pub struct SpoolManagerClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl SpoolManagerClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PostprocessError::Octoprint(format!("could not build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.to_string(),
            client,
        })
    }

    fn query(&self) -> Result<reqwest::blocking::Response> {
        let url = spool_query_url(&self.base_url);
        debug!(url = %url, "querying SpoolManager");
        let response = self.client.get(&url).send().map_err(|e| {
            PostprocessError::Octoprint(format!(
                "Could not connect to the octoprint server: \"{e}\""
            ))
        })?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(PostprocessError::Octoprint(format!(
                "Could not connect to the octoprint server: \"{}\"",
                status.as_u16()
            )));
        }
        Ok(response)
    }

    /// Succeeds when the SpoolManager endpoint answers with HTTP 200.
    pub fn check_connection(&self) -> Result<()> {
        self.query().map(|_| ())
    }

    pub fn loaded_spools(&self) -> Result<Vec<String>> {
        let body = self
            .query()?
            .text()
            .map_err(|e| PostprocessError::Octoprint(format!("could not read response: {e}")))?;
        let payload: Value = serde_json::from_str(&body).map_err(|e| {
            PostprocessError::Octoprint(format!("response is not valid JSON: {e}"))
        })?;
        extract_loaded_spool_names(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_url_trims_trailing_slash() {
        let url = spool_query_url("http://octopi.local/ ");
        assert!(url.starts_with("http://octopi.local/plugin/SpoolManager/loadSpoolsByQuery?"));
        assert!(url.ends_with("sortColumn=displayName&sortOrder=desc&filterName=&materialFilter=all&vendorFilter=all&colorFilter=all"));
    }

    #[test]
    fn loaded_spool_names_in_order() {
        let payload = json!({
            "allSpools": [{"displayName": "unused"}],
            "selectedSpools": [
                {"displayName": "Prusament Galaxy Black", "material": "PLA"},
                null,
                {"material": "PETG"},
                {"displayName": "Jessie Blue"}
            ]
        });
        let names = extract_loaded_spool_names(&payload).unwrap();
        assert_eq!(names, vec!["Prusament Galaxy Black", "", "", "Jessie Blue"]);
    }

    #[test]
    fn missing_selected_spools_is_an_error() {
        let err = extract_loaded_spool_names(&json!({"allSpools": []})).unwrap_err();
        assert!(err.to_string().contains("selectedSpools"));
    }

    #[test]
    fn unreachable_server_reports_connection_error() {
        let client = SpoolManagerClient::new("http://127.0.0.1:9").unwrap();
        let err = client.check_connection().unwrap_err();
        assert!(err.to_string().contains("Could not connect to the octoprint server"));
    }
}
