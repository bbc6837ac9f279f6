//! Catalog pipeline and configuration compiler for espforge.
//!
//! This crate ties the extractor and the catalog store together and holds the
//! configuration-side logic:
//! - [`normalizer`]: raw page records → canonical components
//! - [`ingest`] / [`jobs`]: scrape → normalize → store, in the background
//! - [`validator`]: configuration checks against the catalog
//! - [`generator`]: configuration → ESPHome YAML

pub mod generator;
pub mod ingest;
pub mod jobs;
pub mod normalizer;
pub mod validator;

#[cfg(test)]
mod test_support;

pub use generator::{GenerateError, generate, secrets_template};
pub use ingest::{IngestError, IngestOutcome, Ingestor};
pub use jobs::{Canceller, JobOutcome, KeyLocks, ScrapeHandle, Scheduler};
pub use normalizer::{NormalizeOutcome, canonical_key, normalize};
pub use validator::{ErrorCode, Scope, ValidationError, ValidationReport, validate};
