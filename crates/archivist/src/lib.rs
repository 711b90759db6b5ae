//! archivist - redundant multi-method URL archiving engine.
//!
//! A submitted URL becomes a [`models::Link`]; the link schedules one
//! [`models::Job`] per enabled extractor, and worker pools advance both
//! through their state machines until the link seals.

// Status types use `from_str` methods that return Option<Self>,
// not Result<Self, Error> as std::str::FromStr requires.
#![allow(clippy::should_implement_trait)]

pub mod abid;
pub mod binaries;
pub mod config;
pub mod error;
pub mod extractors;
pub mod lifecycle;
pub mod migrations;
pub mod models;
pub mod orchestrator;
pub mod output;
pub mod repository;
pub mod runner;
pub mod schema;
pub mod service;
pub mod work_queue;

pub use abid::Abid;
pub use error::{ArchiveError, ArchiveResult, ExtractorError};
pub use orchestrator::{Orchestrator, RunReport};
pub use service::{Archivist, LinkEdit, LinkSnapshot};
