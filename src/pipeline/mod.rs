//! Pipeline stages for document analysis.
//!
//! Each submodule implements exactly one transformation step and is tested on
//! its own; [`crate::DocumentAnalyzer`] strings them together.
//!
//! ## Data Flow
//!
//! ```text
//! RetrievedFile ──▶ dispatch ──▶ llm ──▶ validate ──▶ AnalysisResult
//!                  (1 image)   (VLM)   (schema)
//! ```
//!
//! 1. [`dispatch`] — pick a conversion by media type; uses
//!    [`render`] (pdfium, `spawn_blocking`), [`docx`] (text extraction) and
//!    [`encode`] (PNG / base64)
//! 2. [`llm`] — the vision call with retry, backoff and per-attempt timeout;
//!    the only stage with network I/O
//! 3. [`validate`] — recover the JSON object, check it, normalize it

pub mod dispatch;
pub mod docx;
pub mod encode;
pub mod llm;
pub mod render;
pub mod validate;
