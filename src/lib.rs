//! DirHarvest - business directory harvesting.
//!
//! Fetches listing pages from configured directories through a rotating
//! proxy pool, extracts company records with per-source selectors, geocodes
//! addresses under a daily quota, and upserts the results by company name.

pub mod cli;
pub mod config;
pub mod extractor;
pub mod geocoding;
pub mod http_client;
pub mod models;
pub mod pipeline;
pub mod proxy_pool;
pub mod repository;
pub mod service;
pub mod store;
