//! HMAC-SHA256 signing of authenticated requests.
//!
//! The signature covers the query string exactly as it will be transmitted:
//! parameters in insertion order (never sorted), then `recvWindow`, then
//! `timestamp`. `signature` is appended after signing.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::Path;

use crate::error::ConfigError;

type HmacSha256 = Hmac<Sha256>;

/// Upper bound the exchange accepts for `recvWindow`
pub const MAX_RECV_WINDOW_MS: u64 = 60_000;

/// API key + secret, loaded once at start-up and kept for the process lifetime
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            api_key,
            secret_key,
        }
    }

    /// Read `BINANCE_API_KEY` / `BINANCE_SECRET_KEY`
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("BINANCE_API_KEY")
            .map_err(|_| ConfigError::MissingCredentials("BINANCE_API_KEY".into()))?;
        let secret_key = std::env::var("BINANCE_SECRET_KEY")
            .map_err(|_| ConfigError::MissingCredentials("BINANCE_SECRET_KEY".into()))?;

        Ok(Self::new(api_key, secret_key))
    }

    /// Two-line credentials file: API key on the first line, secret on the second
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::MissingCredentials(format!("{}: {}", path.display(), e))
        })?;
        Self::parse(&contents).ok_or_else(|| {
            ConfigError::MissingCredentials(format!(
                "{} must contain the API key and the secret on two lines",
                path.display()
            ))
        })
    }

    fn parse(contents: &str) -> Option<Self> {
        let mut lines = contents.lines().map(str::trim).filter(|l| !l.is_empty());
        let api_key = lines.next()?;
        let secret_key = lines.next()?;
        Some(Self::new(api_key.to_string(), secret_key.to_string()))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    fn secret(&self) -> &[u8] {
        self.secret_key.as_bytes()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// Signed-request validity window in milliseconds (1..=60000)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvWindow(u64);

impl RecvWindow {
    pub fn new(ms: u64) -> Result<Self, ConfigError> {
        if ms == 0 || ms > MAX_RECV_WINDOW_MS {
            return Err(ConfigError::InvalidRecvWindow(ms));
        }
        Ok(Self(ms))
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl Default for RecvWindow {
    fn default() -> Self {
        Self(MAX_RECV_WINDOW_MS)
    }
}

/// Ordered request parameters. The order of `push` calls is the wire order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.pairs.push((key.to_string(), value.into()));
        self
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// `k1=v1&k2=v2`, insertion order
    pub fn to_query_string(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl From<Vec<(&'static str, String)>> for QueryParams {
    fn from(pairs: Vec<(&'static str, String)>) -> Self {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }
}

pub struct RequestSigner<'a> {
    credentials: &'a Credentials,
}

impl<'a> RequestSigner<'a> {
    pub fn new(credentials: &'a Credentials) -> Self {
        Self { credentials }
    }

    /// Lowercase hex HMAC-SHA256 of `message` keyed by the secret
    pub fn sign(&self, message: &str) -> String {
        // HMAC accepts keys of any length, so this never fails.
        let mut mac = match HmacSha256::new_from_slice(self.credentials.secret()) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC can take a key of any size"),
        };
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Final query string: params, `recvWindow`, `timestamp`, then `signature`.
    pub fn sign_params(
        &self,
        params: &QueryParams,
        recv_window: RecvWindow,
        timestamp_ms: i64,
    ) -> String {
        let mut signed = params.clone();
        signed
            .push("recvWindow", recv_window.as_millis().to_string())
            .push("timestamp", timestamp_ms.to_string());

        let query = signed.to_query_string();
        let signature = self.sign(&query);
        format!("{}&signature={}", query, signature)
    }
}
