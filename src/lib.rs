//! # edgequake-docscan
//!
//! Analyse scanned documents (PDF, DOCX, legacy Word, images) with a Vision
//! Language Model and get back a strict, validated schema: document type,
//! title, transcription and named entities.
//!
//! ## Why this crate?
//!
//! Archive material arrives in every format and a VLM only reads images. This
//! crate turns any supported file into exactly one image, asks the model for
//! JSON, refuses answers that do not fit the schema, and caches the result so
//! the same file is never paid for twice within the cache TTL.
//!
//! ## Pipeline Overview
//!
//! ```text
//! file id
//!  │
//!  ├─ 0. Cache     TTL + LRU, hit returns immediately
//!  ├─ 1. Fetch     FileSource (local directory or HTTP)
//!  ├─ 2. Convert   PDF page 1 / DOCX text canvas / placeholder / raster passthrough
//!  ├─ 3. Analyse   VLM call with retry, backoff and per-attempt timeout
//!  ├─ 4. Validate  first JSON object → schema check → normalized dates
//!  ├─ 5. Save      optional DocumentStore
//!  └─ 6. Cache     write back, return AnalysisEnvelope
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docscan::{
//!     CacheConfig, CacheEngine, DocumentAnalyzer, LocalDirSource, PipelineConfig, PipelineOptions,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = PipelineConfig::default();
//!     let cache = Arc::new(CacheEngine::new(CacheConfig::default()));
//!     let source = Arc::new(LocalDirSource::from_config("./archive", &config));
//!     let analyzer = DocumentAnalyzer::from_config(&config, cache, source)?;
//!     analyzer.cache().start_sweeper();
//!
//!     let envelope = analyzer.process("letter-1944.pdf", PipelineOptions::default()).await?;
//!     println!("{} ({})", envelope.analysis.title, envelope.analysis.document_type);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docscan` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-docscan = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyzer;
pub mod cache;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod source;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyzer::DocumentAnalyzer;
pub use cache::{CacheConfig, CacheEngine, CacheStats};
pub use config::{CanvasLayout, PipelineConfig, PipelineConfigBuilder};
pub use error::{BackendError, DocScanError, ErrorKind, Violation};
pub use output::{
    AnalysisEnvelope, AnalysisResult, DocumentFields, DocumentType, Entity, EntityType,
    ImagePayload, PipelineOptions, RetrievedFile, SavedRecord,
};
pub use pipeline::dispatch::{ConversionDispatcher, FormatFamily};
pub use pipeline::llm::{AnalysisClient, InferenceRequest, LlmBackend, VisionBackend};
pub use pipeline::validate::validate_response;
pub use source::{FileSource, HttpSource, LocalDirSource};
pub use store::{DocumentStore, JsonDirStore, StoreError};
