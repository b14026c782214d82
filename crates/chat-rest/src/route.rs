//! Endpoint templates

use chat_dispatch::{Bucket, Method};

/// Parameters the platform buckets on separately
pub const MAJOR_PARAMS: [&str; 2] = ["guild_id", "channel_id"];

/// A unary endpoint with its path parameters
#[derive(Debug, Clone)]
pub struct Route<'a> {
    pub method: Method,
    pub template: &'a str,
    pub params: Vec<(&'a str, String)>,
}

impl<'a> Route<'a> {
    pub fn new(method: Method, template: &'a str) -> Self {
        Self {
            method,
            template,
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn param(mut self, name: &'a str, value: impl ToString) -> Self {
        self.params.push((name, value.to_string()));
        self
    }

    /// Quota bucket of this call
    pub fn bucket(&self) -> Bucket {
        let major: Vec<&str> = self
            .params
            .iter()
            .filter(|(name, _)| MAJOR_PARAMS.contains(name))
            .map(|(_, value)| value.as_str())
            .collect();
        Bucket::route(self.method, self.template, &major)
    }

    /// Path with every `{name}` replaced
    pub fn path(&self) -> String {
        let mut path = self.template.to_string();
        for (name, value) in &self.params {
            path = path.replace(&format!("{{{name}}}"), value);
        }
        path
    }
}
