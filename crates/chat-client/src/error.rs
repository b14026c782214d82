//! Client errors

use chat_cache::CacheError;
use chat_common::{Categorize, ConfigError, ErrorCategory};
use chat_dispatch::DispatchError;
use chat_gateway::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Request failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Already logged in")]
    AlreadyLoggedIn,
}

impl Categorize for ClientError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Dispatch(err) => err.category(),
            Self::Gateway(err) => err.category(),
            Self::Cache(err) => err.category(),
            Self::Config(_) | Self::NotLoggedIn | Self::AlreadyLoggedIn => ErrorCategory::Request,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
