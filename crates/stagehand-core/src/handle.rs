use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};

pub const APP_HANDLE: &str = "app";

/// What an update targets: the application itself or one named plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Handle {
    App,
    Plugin(String),
}

impl Handle {
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(anyhow!("handle must not be empty"));
        }
        if value.eq_ignore_ascii_case(APP_HANDLE) {
            return Ok(Self::App);
        }
        if !value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err(anyhow!(
                "plugin handle may only contain ASCII letters, digits, '-' or '_': {value}"
            ));
        }
        Ok(Self::Plugin(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::App => APP_HANDLE,
            Self::Plugin(name) => name,
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Handle {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}
