//! Command-line interface for archivist.

mod commands;

pub use commands::{is_verbose, run};
