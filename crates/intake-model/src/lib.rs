//! Intake data model
//!
//! Shared types for every stage of the document intake pipeline:
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Schema     │──►│  Extraction  │──►│  Validation  │──►│  Change Set  │
//! │  Registry    │   │ (fields, fam,│   │   issues     │   │ (reviewable) │
//! │ (immutable)  │   │  history)    │   │              │   │              │
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                                                 │
//!                                                           snapshot (JSON)
//! ```
//!
//! - [`schema`]: per-document-type field definitions, relationship and
//!   history tables. Built once and shared behind an `Arc`.
//! - [`extraction`]: what the oracle read out of a document, with confidences.
//! - [`normalize`]: type-aware value normalization used when diffing.
//! - [`validation`]: severity-tagged findings produced by the rule engine.
//! - [`change_set`]: the aggregate a human reviews before anything is written.
//! - [`persistence`]: lossless JSON snapshots for resumable review.

pub mod change_set;
pub mod error;
pub mod extraction;
pub mod normalize;
pub mod persistence;
pub mod schema;
pub mod validation;

pub use change_set::{
    ChangeSet, ChangeSetBuilder, Classification, DocumentProvenance, FamilyAction,
    FamilyMemberCandidate, FieldChange, HistoryDisposition, HistoryRecord, HistorySet,
    MatchMethod, RecordIdentity, RecordMatch, ReviewDecision,
};
pub use error::ModelError;
pub use extraction::{
    Attributes, Correction, ExtractedField, Extraction, ExtractionMetrics, FamilyExtraction,
    HistoryEntry,
};
pub use schema::{
    DocumentType, FieldDefinition, FieldGroup, HistoryType, RelationshipType, SchemaRegistry,
    StructuredKind, ValueType,
};
pub use validation::{Severity, ValidationIssue, ValidationReport};
