//! Declarative extraction rules for a directory source.

use serde::{Deserialize, Serialize};

/// Selectors for contact fields inside a company block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSelectors {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Matched element's `href` is used as the website.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

/// CSS selectors describing one site's listing markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorSet {
    /// Selects each company block on the page.
    pub company: String,
    /// Selects the name inside a block.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Narrows the text used for service classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<String>,
    /// Narrows the text used for price parsing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prices: Option<String>,
    #[serde(default)]
    pub contact: ContactSelectors,
}

/// A configured listing page. Read-only for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapingSource {
    pub name: String,
    pub url: String,
    pub selectors: SelectorSet,
}

impl ScrapingSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, selectors: SelectorSet) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            selectors,
        }
    }
}

impl SelectorSet {
    pub fn new(company: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            company: company.into(),
            name: name.into(),
            address: None,
            services: None,
            prices: None,
            contact: ContactSelectors::default(),
        }
    }
}
