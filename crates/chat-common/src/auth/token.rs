//! Bot credentials and Authorization header construction

use std::env;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::config::ConfigError;

/// How the token is presented to the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// `Bot {app_id}.{token}`
    #[default]
    Bot,
    /// `Bearer {token}` (OAuth access token)
    Bearer,
}

impl TokenKind {
    /// Authorization header value for this kind
    #[must_use]
    pub fn authorization(self, app_id: &str, token: &str) -> String {
        match self {
            Self::Bot => format!("Bot {app_id}.{token}"),
            Self::Bearer => format!("Bearer {token}"),
        }
    }
}

impl FromStr for TokenKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bot" => Ok(Self::Bot),
            "bearer" => Ok(Self::Bearer),
            _ => Err(()),
        }
    }
}

/// Application id and secret token used for login
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub app_id: String,
    pub token: String,
    pub kind: TokenKind,
}

impl Credentials {
    pub fn new(app_id: impl Into<String>, kind: TokenKind, token: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            token: token.into(),
            kind,
        }
    }

    /// Load from `BOT_APP_ID`, `BOT_TOKEN` and optional `BOT_TOKEN_KIND`
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let app_id = env::var("BOT_APP_ID").map_err(|_| ConfigError::MissingVar("BOT_APP_ID"))?;
        let token = env::var("BOT_TOKEN").map_err(|_| ConfigError::MissingVar("BOT_TOKEN"))?;
        let kind = match env::var("BOT_TOKEN_KIND") {
            Ok(raw) => raw
                .parse()
                .map_err(|()| ConfigError::InvalidValue("BOT_TOKEN_KIND", raw))?,
            Err(_) => TokenKind::default(),
        };

        Ok(Self { app_id, token, kind })
    }

    /// Authorization header value
    #[must_use]
    pub fn authorization(&self) -> String {
        self.kind.authorization(&self.app_id, &self.token)
    }
}

// Never print the secret
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &self.app_id)
            .field("kind", &self.kind)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_formats() {
        assert_eq!(TokenKind::Bot.authorization("101", "abc"), "Bot 101.abc");
        assert_eq!(TokenKind::Bearer.authorization("101", "abc"), "Bearer abc");
    }

    #[test]
    fn test_token_kind_from_str() {
        assert_eq!("BOT".parse(), Ok(TokenKind::Bot));
        assert_eq!("bearer".parse(), Ok(TokenKind::Bearer));
        assert!("basic".parse::<TokenKind>().is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let creds = Credentials::new("101", TokenKind::Bot, "supersecret");
        let debug = format!("{creds:?}");
        assert!(debug.contains("101"));
        assert!(!debug.contains("supersecret"));
        assert_eq!(creds.authorization(), "Bot 101.supersecret");
    }
}
