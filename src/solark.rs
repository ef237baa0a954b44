//! Pull source for the Sol-Ark board: GET /solark_data, optionally with
//! basic auth, expecting a JSON object carrying `battery_soc_pptt`.

use crate::prelude::*;

use serde_json::Value;

pub const SOC_FIELD: &str = "battery_soc_pptt";

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Extract the SOC field, shared with the MQTT push path. Absent or
/// out-of-range values are not a reading.
pub fn soc_from_payload(payload: &Value) -> Option<u16> {
    payload
        .get(SOC_FIELD)
        .and_then(Value::as_i64)
        .and_then(|raw| u16::try_from(raw).ok())
}

#[derive(Clone)]
pub struct SolarkClient {
    http: reqwest::Client,
    config: ConfigWrapper,
}

impl SolarkClient {
    pub fn new(config: ConfigWrapper) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Fetch the current board JSON and its SOC. `None` when no board is
    /// configured; the error string otherwise feeds the external cache.
    pub async fn fetch(&self) -> Option<Result<(Value, u16), String>> {
        let solark = self.config.solark()?;
        Some(self.fetch_from(&solark).await)
    }

    async fn fetch_from(&self, solark: &config::Solark) -> Result<(Value, u16), String> {
        let url = solark.endpoint();
        let mut request = self.http.get(&url).timeout(FETCH_TIMEOUT);
        if let (Some(user), Some(password)) = (solark.username(), solark.password()) {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("{} returned {}", url, response.status()));
        }

        let payload: Value = response.json().await.map_err(|e| e.to_string())?;
        match soc_from_payload(&payload) {
            Some(soc) => Ok((payload, soc)),
            None => Err(format!("no {} in response", SOC_FIELD)),
        }
    }
}
