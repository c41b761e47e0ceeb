use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::AgsError;

pub type QueryParams = Vec<(&'static str, String)>;

// Non-success statuses, including ArcGIS error bodies sent with HTTP 200,
// come back as `AgsError::ServiceStatus`.
pub trait FeatureService: Send + Sync {
    fn get_json(&self, url: &str, params: &QueryParams) -> Result<Value, AgsError>;
}

#[derive(Debug, Clone, Copy)]
pub struct HttpOptions {
    pub timeout: Duration,
    pub retries: usize,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            retries: 3,
        }
    }
}

#[derive(Clone)]
pub struct ArcGisHttpClient {
    client: Client,
    retries: usize,
}

impl ArcGisHttpClient {
    pub fn new(options: HttpOptions) -> Result<Self, AgsError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ags-export/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| AgsError::Transport(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(options.timeout)
            .build()
            .map_err(|err| AgsError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            retries: options.retries,
        })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, AgsError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "ArcGIS request failed".to_string());
        Err(AgsError::ServiceStatus { status, message })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<reqwest::blocking::Response, AgsError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < self.retries && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        warn!(status, attempt, delay_ms = delay, "retrying request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < self.retries && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        warn!(error = %err, attempt, delay_ms = delay, "retrying request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(AgsError::Transport(err.to_string()));
                }
            }
        }
    }
}

impl FeatureService for ArcGisHttpClient {
    fn get_json(&self, url: &str, params: &QueryParams) -> Result<Value, AgsError> {
        debug!(url, ?params, "GET");
        let response = self.send_with_retries(|| self.client.get(url).query(params))?;
        let response = Self::handle_status(response)?;
        let body: Value = response
            .json()
            .map_err(|err| AgsError::Transport(err.to_string()))?;
        check_service_error(body)
    }
}

// ArcGIS reports most failures as {"error": {...}} with HTTP 200.
pub fn check_service_error(body: Value) -> Result<Value, AgsError> {
    let Some(error) = body.get("error") else {
        return Ok(body);
    };
    let status = error
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
        .unwrap_or(500);
    let mut message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("ArcGIS request failed")
        .to_string();
    if let Some(details) = error.get("details").and_then(Value::as_array) {
        let details = details
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>();
        if !details.is_empty() {
            message = format!("{message} ({})", details.join("; "));
        }
    }
    Err(AgsError::ServiceStatus { status, message })
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn error_body_becomes_status() {
        let body = json!({
            "error": {"code": 400, "message": "Unable to complete operation.", "details": ["Invalid query"]}
        });
        let err = check_service_error(body).unwrap_err();
        assert_matches!(
            err,
            AgsError::ServiceStatus { status: 400, ref message } if message.contains("Invalid query")
        );
    }

    #[test]
    fn regular_body_passes_through() {
        let body = json!({"features": []});
        assert_eq!(check_service_error(body.clone()).unwrap(), body);
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
    }
}
