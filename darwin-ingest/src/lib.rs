//! Darwin Push Port ingester.
//!
//! Reads the national rail real-time feed from Kafka, decodes each
//! message's XML document, and stores it as relational records exactly once
//! per message.

pub mod config;
pub mod darwin;
pub mod domain;
pub mod feed;
pub mod files;
pub mod interpret;
pub mod pipeline;
pub mod store;
