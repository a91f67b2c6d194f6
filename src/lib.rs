//! Core of a local RSS/Atom/RDF reader that learns which articles its user likes.
//!
//! Feeds are downloaded in batches, weighted with per-feed TF-IDF keywords and
//! ranked against a rotating preference model built from up/down votes.

pub mod app;
pub mod config;
pub mod curation;
pub mod db;
pub mod error;
pub mod feed;
pub mod models;
pub mod services;
pub mod topics;

#[cfg(test)]
mod test_support;

pub use app::App;
pub use config::Config;
pub use error::{AppError, Result};
