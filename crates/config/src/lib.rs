//! Configuration for services embedding the transaction tracker.

mod config;
pub mod logging;
pub mod tracker;

pub use config::*;
