//! Per-instance JSONL logging.
//!
//! Every engine instance appends its `tracing` events to its own file, so
//! several engines on one machine (a test network, a demo) never interleave
//! writes:
//!
//! ```text
//! logs/
//! └── raw/
//!     ├── 2026-10-17_reef.jsonl
//!     └── 2026-10-17_lagoon.jsonl
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use shoal_core::logging::LoggingBuilder;
//!
//! let log_file = LoggingBuilder::new("./logs", "reef")
//!     .with_filter("shoal_core=debug")
//!     .init()?;
//! ```
//!
//! Entries can be queried with jq:
//!
//! ```bash
//! # Addresses skipped during dispatch
//! jq 'select(.msg == "Skipping address")' logs/raw/*.jsonl
//! ```

pub mod entry;
pub mod layer;
pub mod writer;

pub use entry::JsonLogEntry;
pub use layer::{JsonlLayer, LoggingBuilder};
pub use writer::{read_all_entries, InstanceLogWriter};
