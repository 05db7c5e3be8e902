//! Batch acquisition of satellite scenes through a search-and-order web API.
//!
//! A run searches the catalog, splits the matching scene ids into
//! deterministically named batches, places one order per batch unless an
//! order with that name already exists, waits for each order to finish and
//! downloads its results.
pub mod batch;
pub mod config;
pub mod download;
mod error;
pub mod filter;
pub mod orders;
pub mod pipeline;
pub mod poll;
pub mod search;
pub mod session;

pub use error::{Error, Result};
