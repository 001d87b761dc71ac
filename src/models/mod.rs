//! Data models for dirharvest.

mod company;
mod proxy;
mod source;

pub use company::{Company, CompanyChanges, Contact, Coordinates, PartialCompanyRecord, Prices};
pub use proxy::{
    parse_proxy_list, Proxy, ProxyCredentials, ProxyProtocol, DEFAULT_MAX_REQUESTS_PER_DAY,
    DEFAULT_MAX_REQUESTS_PER_MINUTE,
};
pub use source::{ContactSelectors, ScrapingSource, SelectorSet};
