//! EP-032: Blocking JSON-over-HTTP client.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// POST `body` as JSON and decode a JSON reply.
/// Non-2xx replies are errors carrying the status and body text.
pub fn post_json<T: Serialize, R: DeserializeOwned>(
    url: &str,
    body: &T,
    timeout: Duration,
) -> Result<R, String> {
    let request = ureq::post(url)
        .timeout(timeout)
        .set("Content-Type", "application/json");
    match request.send_json(body) {
        Ok(response) => response
            .into_json::<R>()
            .map_err(|e| format!("invalid response from {}: {}", url, e)),
        Err(ureq::Error::Status(code, response)) => {
            let text = response.into_string().unwrap_or_default();
            Err(format!("HTTP {} from {}: {}", code, url, text.trim()))
        }
        Err(e) => Err(format!("HTTP error from {}: {}", url, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ep032_unreachable_host() {
        let r: Result<serde_json::Value, String> = post_json(
            "http://127.0.0.1:9/compile",
            &serde_json::json!({"x": 1}),
            Duration::from_millis(500),
        );
        let err = r.unwrap_err();
        assert!(err.contains("127.0.0.1:9"));
    }
}
