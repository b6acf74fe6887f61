//! feedpump: multi-tenant feed ingestion.
//!
//! Polls every user's feeds, turns their items into stored articles and keeps
//! a per-user retrieval cache so already seen items are skipped cheaply.

pub mod cache;
pub mod config;
pub mod content;
pub mod feed;
pub mod ingest;
pub mod storage;
pub mod util;
