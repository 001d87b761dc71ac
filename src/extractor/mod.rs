//! Rule-driven listing extraction.
//!
//! One generic engine interprets a source's `SelectorSet`. Extraction is
//! total: unmatched selectors produce empty results, never errors.

mod prices;
mod services;

pub use prices::parse_prices;
pub use services::{classify_services, SERVICE_TAXONOMY};

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::models::{Contact, PartialCompanyRecord, ScrapingSource, SelectorSet};

/// Compiled form of a `SelectorSet`.
struct CompiledSelectors {
    company: Selector,
    name: Selector,
    address: Option<Selector>,
    services: Option<Selector>,
    prices: Option<Selector>,
    phone: Option<Selector>,
    email: Option<Selector>,
    website: Option<Selector>,
}

fn parse_selector(selector: &str) -> Result<Selector, String> {
    Selector::parse(selector).map_err(|e| format!("invalid selector '{}': {}", selector, e))
}

fn parse_optional(selector: &Option<String>) -> Result<Option<Selector>, String> {
    selector.as_deref().map(parse_selector).transpose()
}

impl CompiledSelectors {
    fn compile(set: &SelectorSet) -> Result<Self, String> {
        Ok(Self {
            company: parse_selector(&set.company)?,
            name: parse_selector(&set.name)?,
            address: parse_optional(&set.address)?,
            services: parse_optional(&set.services)?,
            prices: parse_optional(&set.prices)?,
            phone: parse_optional(&set.contact.phone)?,
            email: parse_optional(&set.contact.email)?,
            website: parse_optional(&set.contact.website)?,
        })
    }
}

/// Check that every selector in a source parses.
pub fn validate_selectors(source: &ScrapingSource) -> Result<(), String> {
    CompiledSelectors::compile(&source.selectors).map(|_| ())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace-collapsed text of all matches inside `block`. Text nodes of one
/// element are concatenated as-is, separate matches are joined by a space.
fn text_of(block: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    let text = block
        .select(selector)
        .map(|el| el.text().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ");
    let text = collapse_whitespace(&text);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn block_text(block: &ElementRef<'_>) -> String {
    collapse_whitespace(&block.text().collect::<String>())
}

/// Resolve a link against the page URL.
fn resolve_href(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    url::Url::parse(base_url)
        .and_then(|base| base.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

fn website_of(block: &ElementRef<'_>, selector: &Selector, base_url: &str) -> Option<String> {
    block
        .select(selector)
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        .find(|href| !href.is_empty() && !href.starts_with('#') && !href.starts_with("javascript:"))
        .map(|href| resolve_href(base_url, href))
}

/// Text for classification: the narrowing selector's text if it matched,
/// otherwise the whole block.
fn scoped_text(block: &ElementRef<'_>, selector: Option<&Selector>) -> String {
    selector
        .and_then(|s| text_of(block, s))
        .unwrap_or_else(|| block_text(block))
}

/// Extract every named listing from `page`.
pub fn extract(source: &ScrapingSource, page: &str) -> Vec<PartialCompanyRecord> {
    let selectors = match CompiledSelectors::compile(&source.selectors) {
        Ok(s) => s,
        Err(e) => {
            warn!("Source {}: {}", source.name, e);
            return Vec::new();
        }
    };

    let document = Html::parse_document(page);
    let mut records = Vec::new();
    let mut dropped = 0usize;

    for block in document.select(&selectors.company) {
        let Some(name) = text_of(&block, &selectors.name) else {
            dropped += 1;
            continue;
        };

        let services_text = scoped_text(&block, selectors.services.as_ref());
        let prices_text = scoped_text(&block, selectors.prices.as_ref());

        records.push(PartialCompanyRecord {
            name,
            address: selectors.address.as_ref().and_then(|s| text_of(&block, s)),
            services: classify_services(&services_text),
            prices: parse_prices(&prices_text),
            contact: Contact {
                phone: selectors.phone.as_ref().and_then(|s| text_of(&block, s)),
                email: selectors.email.as_ref().and_then(|s| text_of(&block, s)),
                website: selectors
                    .website
                    .as_ref()
                    .and_then(|s| website_of(&block, s, &source.url)),
            },
        });
    }

    debug!(
        "Source {}: extracted {} records ({} blocks without a name)",
        source.name,
        records.len(),
        dropped
    );
    records
}
