//! Request signing for authenticated venue calls

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::Credentials;
use crate::error::{Result, TraderError};

type HmacSha256 = Hmac<Sha256>;

/// Sorted `key=value` pairs joined with `&`
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    sorted
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Hex HMAC-SHA256 of `payload` keyed by `secret`
pub fn hmac_hex(secret: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| TraderError::ConfigError(format!("invalid signing key: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Adds `api_key`, `timestamp`, `recvWindow` and `sign` to a parameter set
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credentials: Credentials,
    recv_window: u64,
}

impl RequestSigner {
    pub fn new(credentials: Credentials, recv_window: u64) -> Self {
        Self {
            credentials,
            recv_window,
        }
    }

    pub fn api_key(&self) -> &str {
        &self.credentials.api_key
    }

    /// Sign with the given millisecond timestamp; `sign` is computed over
    /// every other field, sorted by key.
    pub fn sign(
        &self,
        mut params: Vec<(String, String)>,
        timestamp_ms: i64,
    ) -> Result<Vec<(String, String)>> {
        params.retain(|(k, _)| k != "sign");
        params.push(("api_key".to_string(), self.credentials.api_key.clone()));
        params.push(("timestamp".to_string(), timestamp_ms.to_string()));
        params.push(("recvWindow".to_string(), self.recv_window.to_string()));

        let signature = hmac_hex(&self.credentials.api_secret, &canonical_query(&params))?;
        params.push(("sign".to_string(), signature));
        Ok(params)
    }

    pub fn sign_now(&self, params: Vec<(String, String)>) -> Result<Vec<(String, String)>> {
        self.sign(params, chrono::Utc::now().timestamp_millis())
    }
}
