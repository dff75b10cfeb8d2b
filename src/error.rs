use thiserror::Error;

/// Errors raised while talking to the exchange or preparing a request for it.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Transport-level failure (connection reset, TLS, DNS, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Well-formed response carrying an exchange error code.
    #[error("exchange error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("failed to decode exchange response: {0}")]
    Decode(String),

    #[error("{filter} not found for {symbol}")]
    FilterNotFound { symbol: String, filter: &'static str },

    #[error("invalid {filter} for {symbol}: {value}")]
    InvalidFilter {
        symbol: String,
        filter: &'static str,
        value: String,
    },

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Exchange code for "Order does not exist."
pub const UNKNOWN_ORDER_CODE: i64 = -2013;

impl ExchangeError {
    pub fn unknown_order() -> Self {
        Self::Api {
            code: UNKNOWN_ORDER_CODE,
            msg: "Order does not exist.".to_string(),
        }
    }

    /// The exchange has no order under the queried id
    pub fn is_unknown_order(&self) -> bool {
        self.api_code() == Some(UNKNOWN_ORDER_CODE)
    }

    /// Network-class failures are tolerated per fan-out; everything else is
    /// an exchange-level or local validation failure.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }

    pub fn api_code(&self) -> Option<i64> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Rejected bot parameters or settings. Raised at creation/start-up, never defaulted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not a valid kline interval")]
    InvalidInterval(String),

    #[error("trade allocation must be in (0, 1], got {0}")]
    InvalidAllocation(String),

    #[error("profit target must be greater than 1, got {0}")]
    InvalidProfitTarget(String),

    #[error("recvWindow must be in 1..=60000 ms, got {0}")]
    InvalidRecvWindow(u64),

    #[error("entry discount must be in (0, 1], got {0}")]
    InvalidEntryDiscount(String),

    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),

    #[error("symbol {0} is not tradable on the exchange")]
    UnknownSymbol(String),

    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_classification() {
        let timeout = ExchangeError::Timeout(std::time::Duration::from_secs(1));
        assert!(timeout.is_network());

        let api = ExchangeError::Api {
            code: -2010,
            msg: "Account has insufficient balance".to_string(),
        };
        assert!(!api.is_network());
        assert_eq!(api.api_code(), Some(-2010));
        assert!(!api.is_unknown_order());
        assert!(ExchangeError::unknown_order().is_unknown_order());
    }

    #[test]
    fn test_filter_not_found_message() {
        let err = ExchangeError::FilterNotFound {
            symbol: "ETHUSDT".to_string(),
            filter: "PRICE_FILTER",
        };
        assert_eq!(err.to_string(), "PRICE_FILTER not found for ETHUSDT");
    }
}
