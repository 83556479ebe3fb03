//! Build configuration front-end.
//!
//! Loads `buildconf` documents (JSON, YAML with variable substitution, or
//! maps built in memory), validates them against a schema, expands shorthand
//! declarations into overlay rules and resolves the params of every task
//! for a selected buildtype and platform.

pub mod cli;
pub mod config;
pub mod error;
pub mod expression;
pub mod logging;
pub mod paths;
pub mod platform;
pub mod toolchains;
