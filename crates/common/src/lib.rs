//! Crate includes reusable utils for services that drive the tracker, such
//! as initializing the tracing framework.

pub mod env;
pub mod logging;
