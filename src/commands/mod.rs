//! CLI command handlers
//!
//! Thin layers between the clap definitions in main.rs and the library.

pub mod ci;
pub mod target;
