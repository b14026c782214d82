//! Quota domains
//!
//! Two requests share a bucket exactly when the platform throttles them
//! together: same verb, same endpoint template, same major parameters.

use std::fmt;

/// HTTP verb of a unary call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucket key of a unary route
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub method: Method,
    /// Endpoint with placeholders left in, e.g. `/channels/{channel_id}/messages`
    pub template: String,
    /// Values of the major parameters (guild / channel id) in template order
    pub major: Vec<String>,
}

/// A quota domain
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Unary call route
    Route(RouteKey),
    /// Identify frames of every shard mapped to `slot`
    GatewayIdentify { slot: u32 },
    /// Every other outbound frame of one shard
    Gateway { shard_id: u32 },
}

impl Bucket {
    /// Route bucket from its parts
    pub fn route<S: ToString>(method: Method, template: impl Into<String>, major: &[S]) -> Self {
        Self::Route(RouteKey {
            method,
            template: template.into(),
            major: major.iter().map(ToString::to_string).collect(),
        })
    }

    /// Shard whose frames live in this bucket
    #[must_use]
    pub fn shard_id(&self) -> Option<u32> {
        match self {
            Self::Gateway { shard_id } => Some(*shard_id),
            _ => None,
        }
    }

    /// Subject to the process-wide unary block set by a global 429
    #[must_use]
    pub fn is_route(&self) -> bool {
        matches!(self, Self::Route(_))
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Route(key) => {
                write!(f, "{} {}", key.method, key.template)?;
                if !key.major.is_empty() {
                    write!(f, " [{}]", key.major.join(","))?;
                }
                Ok(())
            }
            Self::GatewayIdentify { slot } => write!(f, "gateway:identify:{slot}"),
            Self::Gateway { shard_id } => write!(f, "gateway:shard:{shard_id}"),
        }
    }
}
