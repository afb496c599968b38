//! Collection of identifier and record types that are shared by the tracker
//! and whatever drives it.

#[macro_use]
mod macros;

pub mod event;
pub mod ids;
pub mod settlement;

pub mod prelude;
