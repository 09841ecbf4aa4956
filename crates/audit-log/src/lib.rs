//! Decision audit trail for rulegate.
//!
//! [`AuditRecorder`] keeps a bounded, in-memory log of every decision and
//! answers window queries and aggregate statistics over it. Entries can also
//! be mirrored to disk through [`JsonLinesSink`], which serialises each record
//! as a single newline-terminated JSON object on a background task, producing
//! a [JSON Lines](https://jsonlines.org/) stream that is easy to ship and
//! replay.
//!
//! Terminal denials by critical rules are reported as [`ViolationRecord`]s to
//! a [`ViolationSink`].
//!
//! # Quick start
//!
//! ```rust,no_run
//! use audit_log::{AuditEntry, AuditRecorder, JsonLinesSink};
//! use policy_engine::{Decision, DecisionMetadata, DecisionRequest, DecisionSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let recorder = AuditRecorder::new(10_000);
//! let (mirror, _handle) = JsonLinesSink::<AuditEntry>::start("/var/log/rulegate/audit.jsonl").await?;
//!
//! let request = DecisionRequest::new("u1", "read", "docs.readme");
//! let decision = Decision::default_deny(DecisionMetadata::new("user", "docs", DecisionSource::DefaultDeny));
//! let entry = AuditEntry::new(request, decision);
//!
//! mirror.log(entry.clone()).await;
//! recorder.record(entry);
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod recorder;
pub mod sink;
pub mod violation;

// Re-export primary public types at the crate root for convenience.
pub use entry::AuditEntry;
pub use recorder::{AuditRecorder, AuditStats, ResourceCount, DEFAULT_MAX_ENTRIES, DEFAULT_TOP_DENIED};
pub use sink::{JsonLinesError, JsonLinesSink, SinkClosed};
pub use violation::{JsonLinesViolationSink, ViolationError, ViolationRecord, ViolationSink};
