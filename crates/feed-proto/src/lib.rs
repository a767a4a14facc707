//! Shared model, session state, control protocol and configuration for the
//! tastefeed daemon.

pub mod catalog;
pub mod config;
pub mod model;
pub mod platform;
pub mod protocol;
pub mod state;
