//! Client-side live-data synchronization for the ethbot dashboard backend.

pub mod api;
pub mod cli;
pub mod detail;
pub mod error;
pub mod feeds;
pub mod metrics;
pub mod normalize;
pub mod poller;
pub mod query;
pub mod session;
pub mod watchlist;

#[cfg(test)]
pub(crate) mod testing;

pub use error::SyncError;
