//! Intake extraction
//!
//! Turns page images into a validated [`Extraction`](intake_model::Extraction)
//! by driving a vision-capable model through several passes:
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────────────────────────────────────┐
//! │  Document  │   │                     PIPELINE                         │
//! │  Loader    │──►│                                                      │
//! │ (png/jpg/  │   │  strategies ──► consensus ──► critique ──► validate  │
//! │  dir/pdf)  │   │                                               │      │
//! └────────────┘   │        ┌── refine ◄── verify family ◄── retry ┘      │
//!                  │        ▼                                             │
//!                  │    validate ──► best state + metrics                 │
//!                  └──────────────────────────┬───────────────────────────┘
//!                                             │ complete(images, prompt)
//!                                      ┌──────▼──────┐
//!                                      │   Oracle    │ Anthropic / OpenAI /
//!                                      │   (trait)   │ scripted
//!                                      └─────────────┘
//! ```
//!
//! The [`validator`] is pure and also usable on its own, e.g. to re-check a
//! hand-corrected extraction.

pub mod config;
pub mod consensus;
pub mod critique;
pub mod document;
pub mod family;
pub mod oracle;
pub mod pipeline;
pub mod prompts;
#[cfg(feature = "providers")]
pub mod providers;
pub mod reply;
pub mod retry;
pub mod strategy;
pub mod validator;

pub use config::{ConfigError, ExtractionMode, PipelineConfig};
pub use document::{DocumentFormat, DocumentLoader, FileLoader, LoadError, LoadedDocument, PageRenderer, PdfToPpm};
pub use oracle::{ExtractionOracle, OracleError, PageImage, ScriptedOracle};
pub use pipeline::{Pipeline, PipelineOutcome, Stage, UNKNOWN_DOCUMENT_TYPE};
#[cfg(feature = "providers")]
pub use providers::{OracleConfig, Provider, UnifiedOracle};
pub use strategy::Strategy;
pub use validator::Validator;
