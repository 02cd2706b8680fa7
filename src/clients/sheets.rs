use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use crate::config::SheetConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::publish::SheetWriter;

const SHEETS_TIMEOUT_S: u64 = 10;

/// Bearer credentials for the spreadsheet API. Token exchange is handled
/// outside this process; the blob only has to carry the resulting token.
#[derive(Debug, Clone)]
pub struct SheetCredentials {
    token: String,
}

impl SheetCredentials {
    pub fn from_json(blob: &str) -> TrackerResult<Self> {
        let parsed: Value = serde_json::from_str(blob).map_err(|e| {
            TrackerError::Config(format!("sheet.credentials_json is not valid JSON: {e}"))
        })?;
        let token = parsed
            .get("token")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                TrackerError::Config(
                    "sheet.credentials_json must carry a non-empty 'token' field".to_string(),
                )
            })?;
        Ok(Self {
            token: token.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SheetsClient {
    base_url: String,
    spreadsheet: String,
    credentials: SheetCredentials,
    http: reqwest::Client,
}

impl SheetsClient {
    pub fn from_config(cfg: &SheetConfig) -> TrackerResult<Self> {
        let blob = cfg.credentials_json.as_deref().ok_or_else(|| {
            TrackerError::Config("missing required sheet.credentials_json".to_string())
        })?;
        let credentials = SheetCredentials::from_json(blob)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(SHEETS_TIMEOUT_S))
            .build()?;

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            spreadsheet: cfg.spreadsheet_name.clone(),
            credentials,
            http,
        })
    }
}

#[async_trait]
impl SheetWriter for SheetsClient {
    async fn write_range(&self, range: &str, values: &[Vec<Value>]) -> TrackerResult<()> {
        let url = format!(
            "{}/spreadsheets/{}/values/{}?valueInputOption=RAW",
            self.base_url, self.spreadsheet, range
        );

        let resp = self
            .http
            .put(url)
            .bearer_auth(&self.credentials.token)
            .json(&serde_json::json!({
                "range": range,
                "majorDimension": "ROWS",
                "values": values,
            }))
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TrackerError::RateLimited { retry_after: None });
        }
        let body = resp.text().await.unwrap_or_default();
        Err(TrackerError::Status {
            status: status.as_u16(),
            body: body.chars().take(256).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_parse_token_field() {
        let creds = SheetCredentials::from_json(r#"{"token":"tok-123","project":"p"}"#).unwrap();
        assert_eq!(creds.token, "tok-123");
    }

    #[test]
    fn credentials_without_token_are_rejected() {
        let err = SheetCredentials::from_json(r#"{"project":"p"}"#).unwrap_err();
        assert!(matches!(err, TrackerError::Config(_)));
        assert!(err.to_string().contains("token"), "{err}");
    }

    #[test]
    fn credentials_must_be_valid_json() {
        let err = SheetCredentials::from_json("not-json").unwrap_err();
        assert!(matches!(err, TrackerError::Config(_)));
    }

    #[test]
    fn client_builds_from_config_with_credentials() {
        let cfg = SheetConfig {
            credentials_json: Some(r#"{"token":"tok"}"#.to_string()),
            ..SheetConfig::default()
        };
        let client = SheetsClient::from_config(&cfg).unwrap();
        assert_eq!(client.base_url, "https://sheets.googleapis.com/v4");
        assert_eq!(client.spreadsheet, "Crypto_Tracker");
    }

    #[test]
    fn client_requires_credentials() {
        let err = SheetsClient::from_config(&SheetConfig::default()).unwrap_err();
        assert!(matches!(err, TrackerError::Config(_)));
    }
}
