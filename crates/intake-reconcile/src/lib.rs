//! Record Store reconciliation
//!
//! Turns a final [`intake_model::Extraction`] into a reviewable
//! [`intake_model::ChangeSet`], and writes a reviewed one back.
//!
//! ```text
//!                 ┌─────────────────┐
//!  Extraction ───►│   DiffEngine    │───► ChangeSet ──► (review) ──┐
//!                 │  Matcher+cache  │                              │
//!                 └────────┬────────┘                              ▼
//!                          │ reads                        ┌─────────────────┐
//!                          ▼                              │   ApplyEngine   │
//!                 ┌─────────────────┐       writes        │ primary/family/ │
//!                 │   RecordStore   │◄────────────────────│     history     │
//!                 │ (HTTP | memory) │                     └─────────────────┘
//!                 └─────────────────┘
//! ```

pub mod apply;
pub mod cache;
pub mod diff;
#[cfg(feature = "http")]
pub mod http;
pub mod matcher;
pub mod memory;
pub mod notes;
pub mod store;

pub use apply::{AppliedItem, ApplyEngine, ApplyIssue, ApplyReport, Phase};
pub use cache::{CacheError, IdentifierCache};
pub use diff::{DiffConfig, DiffEngine, DEFAULT_FAMILY_MATCH_THRESHOLD};
#[cfg(feature = "http")]
pub use http::{HttpRecordStore, HttpStoreConfig};
pub use matcher::{MatchedRecord, Matcher, PersonQuery};
pub use memory::{InMemoryRecordStore, Operation, StoreState};
pub use store::{Biographic, LinkMetadata, Note, Record, RecordStore, StoreError, StoreFields};
