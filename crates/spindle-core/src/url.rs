//! The url-like parameter bag read by activation and adaptive dispatch.
//!
//! Every extension point receives its call-time configuration through a
//! [`Url`]: a protocol, an optional address, and a flat string parameter
//! map. The loader itself only ever reads from it; producing and mutating
//! urls is the caller's business.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ExtensionError;

/// An invocation-scoped view onto a call, used by adaptive methods that
/// resolve parameters per target method (`<method>.<key>` lookups).
pub trait Invocation {
    /// Name of the method being invoked.
    fn method_name(&self) -> &str;
}

/// Url-like parameter bag.
///
/// Parameters are kept in a sorted map so that rendering and iteration are
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Url {
    protocol: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    parameters: BTreeMap<String, String>,
}

impl Url {
    /// Create an empty url.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the protocol.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Set host and port.
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    /// Set the path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Add one parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Protocol, when set.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Host, when set.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Port, when set.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Path, when set.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Raw parameter lookup. Returns the stored value even when empty.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Parameter lookup with a default. An absent or empty value yields the
    /// default.
    pub fn parameter_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.parameter(key) {
            Some(value) if !value.is_empty() => value,
            _ => default,
        }
    }

    /// Method-scoped parameter lookup: `<method>.<key>` first, then `<key>`.
    pub fn method_parameter(&self, method: &str, key: &str) -> Option<&str> {
        let scoped = format!("{method}.{key}");
        match self.parameters.get(&scoped) {
            Some(value) if !value.is_empty() => Some(value.as_str()),
            _ => self.parameter(key),
        }
    }

    /// All parameters in sorted key order.
    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(protocol) = &self.protocol {
            write!(f, "{protocol}://")?;
        }
        if let Some(host) = &self.host {
            write!(f, "{host}")?;
            if let Some(port) = self.port {
                write!(f, ":{port}")?;
            }
        }
        if let Some(path) = &self.path {
            write!(f, "/{}", path.trim_start_matches('/'))?;
        }
        let mut first = true;
        for (key, value) in &self.parameters {
            write!(f, "{}{key}={value}", if first { "?" } else { "&" })?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Url {
    type Err = ExtensionError;

    /// Parse `protocol://host:port/path?k=v&k2=v2`. Every component is
    /// optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ExtensionError::InvalidUrl {
            url: s.to_string(),
            reason: reason.to_string(),
        };

        let mut url = Url::new();
        let mut rest = s;

        if let Some((protocol, tail)) = rest.split_once("://") {
            if !protocol.is_empty() {
                url.protocol = Some(protocol.to_string());
            }
            rest = tail;
        }

        let (body, query) = match rest.split_once('?') {
            Some((body, query)) => (body, Some(query)),
            None => (rest, None),
        };

        let (address, path) = match body.split_once('/') {
            Some((address, path)) => (address, Some(path)),
            None => (body, None),
        };

        if !address.is_empty() {
            match address.split_once(':') {
                Some((host, port)) => {
                    url.host = Some(host.to_string());
                    url.port = Some(port.parse().map_err(|_| invalid("invalid port"))?);
                }
                None => url.host = Some(address.to_string()),
            }
        }
        if let Some(path) = path {
            if !path.is_empty() {
                url.path = Some(path.to_string());
            }
        }

        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                match pair.split_once('=') {
                    Some((key, value)) if !key.is_empty() => {
                        url.parameters.insert(key.to_string(), value.to_string());
                    }
                    _ => return Err(invalid("malformed query parameter")),
                }
            }
        }

        Ok(url)
    }
}
