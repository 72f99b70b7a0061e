//! Internal modules for the terminal client.
//!
//! This library provides command parsing, logging setup and the
//! line-oriented front end used by the ts_client binary.

pub mod app;
pub mod commands;
pub mod logging;
