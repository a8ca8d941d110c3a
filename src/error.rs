//! Error taxonomy for the NAV pipeline.
//!
//! Every stage returns [`NavError`]; [`NavError::retry_class`] decides whether
//! a local retry loop may try again.

use std::path::PathBuf;

use thiserror::Error;

/// Whether an error is worth retrying.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Terminal: bad input, bad credentials, reverted call.
    Never,
    /// Transient: timeouts, connection resets, 429s and 5xx responses.
    WithBackoff,
}

/// Why a call to the portfolio or price provider failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderErrorKind {
    #[error("rate limited")]
    RateLimited,

    #[error("service unavailable (HTTP {0})")]
    Unavailable(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("request rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Why a JSON-RPC read against the vault contract failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcErrorKind {
    #[error("node unreachable: {0}")]
    Unreachable(String),

    #[error("call reverted: {0}")]
    Reverted(String),

    #[error("contract does not expose {0}()")]
    MissingAccessor(&'static str),

    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum NavError {
    #[error("{provider} rejected credentials: {message}")]
    Auth { provider: String, message: String },

    #[error("{provider} request failed: {kind}")]
    Provider {
        provider: String,
        kind: ProviderErrorKind,
    },

    #[error("RPC read failed: {0}")]
    Rpc(RpcErrorKind),

    #[error("incomplete valuation: {} leg(s) without a price: {}", .legs.len(), .legs.join(", "))]
    IncompleteValuation { legs: Vec<String> },

    #[error("cannot compute NAV per share: {0}")]
    Division(String),

    #[error("arithmetic overflow: {0}")]
    Overflow(String),

    #[error("persistence failed: local artifact: {local}; document store: {remote}")]
    Persistence { local: String, remote: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("artifact {path}: {message}")]
    Artifact { path: PathBuf, message: String },
}

impl NavError {
    pub fn provider(provider: impl Into<String>, kind: ProviderErrorKind) -> Self {
        Self::Provider {
            provider: provider.into(),
            kind,
        }
    }

    pub fn malformed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::provider(provider, ProviderErrorKind::Malformed(message.into()))
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Provider { kind, .. } => match kind {
                ProviderErrorKind::RateLimited
                | ProviderErrorKind::Unavailable(_)
                | ProviderErrorKind::Network(_) => RetryClass::WithBackoff,
                ProviderErrorKind::Rejected { .. } | ProviderErrorKind::Malformed(_) => {
                    RetryClass::Never
                }
            },
            Self::Rpc(RpcErrorKind::Unreachable(_)) => RetryClass::WithBackoff,
            _ => RetryClass::Never,
        }
    }

    /// Maps an HTTP status from a provider into the taxonomy.
    ///
    /// 401/403 become [`NavError::Auth`]; 429 and 5xx are transient.
    pub fn from_status(provider: &str, status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => Self::Auth {
                provider: provider.to_string(),
                message: if body.is_empty() {
                    status.to_string()
                } else {
                    body
                },
            },
            429 => Self::provider(provider, ProviderErrorKind::RateLimited),
            code if status.is_server_error() => {
                Self::provider(provider, ProviderErrorKind::Unavailable(code))
            }
            code => Self::provider(provider, ProviderErrorKind::Rejected { status: code, body }),
        }
    }

    /// Maps a transport-level reqwest failure from a provider.
    pub fn from_transport(provider: &str, err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::malformed(provider, err.to_string())
        } else {
            Self::provider(provider, ProviderErrorKind::Network(err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn auth_statuses_are_terminal() {
        let err = NavError::from_status("debank", StatusCode::UNAUTHORIZED, String::new());
        assert!(matches!(err, NavError::Auth { .. }));
        assert_eq!(err.retry_class(), RetryClass::Never);

        let err = NavError::from_status("debank", StatusCode::FORBIDDEN, "bad key".into());
        assert!(err.to_string().contains("bad key"));
    }

    #[test]
    fn rate_limits_and_server_errors_retry() {
        let err = NavError::from_status("debank", StatusCode::TOO_MANY_REQUESTS, String::new());
        assert_eq!(err.retry_class(), RetryClass::WithBackoff);

        let err = NavError::from_status("debank", StatusCode::BAD_GATEWAY, String::new());
        assert_eq!(err.retry_class(), RetryClass::WithBackoff);
    }

    #[test]
    fn client_errors_do_not_retry() {
        let err = NavError::from_status("debank", StatusCode::BAD_REQUEST, "id".into());
        assert_eq!(err.retry_class(), RetryClass::Never);
        assert!(matches!(
            err,
            NavError::Provider {
                kind: ProviderErrorKind::Rejected { status: 400, .. },
                ..
            }
        ));
    }

    #[test]
    fn rpc_retry_classes() {
        assert_eq!(
            NavError::Rpc(RpcErrorKind::Unreachable("timeout".into())).retry_class(),
            RetryClass::WithBackoff
        );
        assert_eq!(
            NavError::Rpc(RpcErrorKind::MissingAccessor("decimals")).retry_class(),
            RetryClass::Never
        );
        assert_eq!(
            NavError::Rpc(RpcErrorKind::Reverted("execution reverted".into())).retry_class(),
            RetryClass::Never
        );
    }

    #[test]
    fn incomplete_valuation_lists_legs() {
        let err = NavError::IncompleteValuation {
            legs: vec!["spot.eth.FOO".into(), "aave.base.BAR".into()],
        };
        assert_eq!(
            err.to_string(),
            "incomplete valuation: 2 leg(s) without a price: spot.eth.FOO, aave.base.BAR"
        );
    }
}
