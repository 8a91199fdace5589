//! Incident categories
//!
//! Six categories are built in. Further categories can be onboarded at
//! runtime through a category upsert; they are carried as validated
//! [`CustomCategory`] keys.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Incident category
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Category {
    Network,
    Database,
    Application,
    Security,
    Infrastructure,
    UserAccess,
    /// Onboarded at runtime
    Custom(CustomCategory),
}

/// Key of an onboarded category (`[a-z0-9_]+`, never a built-in name)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CustomCategory(String);

impl CustomCategory {
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Category {
    /// The built-in categories
    #[must_use]
    pub fn built_in() -> [Category; 6] {
        [
            Self::Network,
            Self::Database,
            Self::Application,
            Self::Security,
            Self::Infrastructure,
            Self::UserAccess,
        ]
    }

    /// Stable key
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Network => "network",
            Self::Database => "database",
            Self::Application => "application",
            Self::Security => "security",
            Self::Infrastructure => "infrastructure",
            Self::UserAccess => "user_access",
            Self::Custom(custom) => custom.as_str(),
        }
    }

    /// Whether this is one of the built-in categories
    #[inline]
    #[must_use]
    pub fn is_built_in(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }

    /// Audit subject for this category's configuration
    #[must_use]
    pub fn config_subject(&self) -> String {
        format!("category:{}", self.key())
    }
}

impl FromStr for Category {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        if let Some(known) = Self::built_in().into_iter().find(|c| c.key() == key) {
            return Ok(known);
        }
        let valid = !key.is_empty()
            && key.len() <= 64
            && key
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if valid {
            Ok(Self::Custom(CustomCategory(key)))
        } else {
            Err(ConfigError::InvalidCategory(s.to_string()))
        }
    }
}

impl TryFrom<String> for Category {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        value.key().to_string()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
