//! Configuration types for document analysis.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Cache sizing lives separately in
//! [`crate::cache::CacheConfig`] because one cache may be shared by several
//! analyzers.

use crate::error::DocScanError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default size bound for retrieved files: 50 MB.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;

/// Configuration for a [`crate::DocumentAnalyzer`].
///
/// # Example
/// ```rust
/// use edgequake_docscan::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .dpi(200)
///     .max_attempts(5)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_attempts, 5);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rendering DPI for the first page of a PDF. Range: 72–600. Default: 300.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2480.
    ///
    /// 2480 px is an A4 page at 300 DPI. Larger pages are scaled down so
    /// neither edge exceeds this.
    pub max_rendered_pixels: u32,

    /// Layout used when drawing extracted text or placeholders.
    pub canvas: CanvasLayout,

    /// LLM model identifier. If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// The validator depends on the output shape, so decoding stays close to
    /// deterministic.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 2048.
    pub max_tokens: usize,

    /// Total attempts against the vision endpoint, first call included. Default: 3.
    pub max_attempts: u32,

    /// Backoff base in milliseconds. Attempt `n` waits `base * 2^n`. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Per-attempt timeout for the vision call in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Custom instruction prompt. If None, uses [`crate::prompts::ANALYSIS_PROMPT`].
    pub system_prompt: Option<String>,

    /// TTL for cached analysis envelopes in seconds. Default: 3600.
    pub cache_ttl_secs: u64,

    /// Files above this size are rejected by the sources. Default: 50 MB.
    pub max_file_bytes: u64,

    /// Download timeout for [`crate::source::HttpSource`] in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Directory or file path of a pdfium shared library.
    ///
    /// When None, the working directory and then the system library path are tried.
    pub pdfium_lib_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_rendered_pixels: 2480,
            canvas: CanvasLayout::default(),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 2048,
            max_attempts: 3,
            retry_backoff_ms: 1000,
            api_timeout_secs: 120,
            system_prompt: None,
            cache_ttl_secs: 3600,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            download_timeout_secs: 120,
            pdfium_lib_path: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("canvas", &self.canvas)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("max_file_bytes", &self.max_file_bytes)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn canvas(mut self, canvas: CanvasLayout) -> Self {
        self.config.canvas = canvas;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.config.cache_ttl_secs = secs;
        self
    }

    pub fn max_file_bytes(mut self, bytes: u64) -> Self {
        self.config.max_file_bytes = bytes;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, DocScanError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(DocScanError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.max_attempts == 0 {
            return Err(DocScanError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(DocScanError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(DocScanError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        c.canvas.validate()?;
        Ok(self.config)
    }
}

/// Fixed page layout for text rendered onto an image.
///
/// All measurements are PDF points (1/72 inch). Width per character is
/// estimated at `char_width_em * font_size_pt`, which is close enough for
/// Helvetica body text; it is not a real glyph metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasLayout {
    pub width_pt: f32,
    pub height_pt: f32,
    pub margin_pt: f32,
    pub font_size_pt: f32,
    pub line_height_pt: f32,
    pub char_width_em: f32,
}

impl Default for CanvasLayout {
    fn default() -> Self {
        Self {
            width_pt: 612.0,
            height_pt: 792.0,
            margin_pt: 50.0,
            font_size_pt: 12.0,
            line_height_pt: 16.0,
            char_width_em: 0.5,
        }
    }
}

impl CanvasLayout {
    /// Characters that fit on one line.
    pub fn chars_per_line(&self) -> usize {
        let usable = self.width_pt - 2.0 * self.margin_pt;
        ((usable / (self.font_size_pt * self.char_width_em)).floor() as usize).max(1)
    }

    /// Lines that fit on the page.
    pub fn lines_per_page(&self) -> usize {
        let usable = self.height_pt - 2.0 * self.margin_pt;
        ((usable / self.line_height_pt).floor() as usize).max(1)
    }

    fn validate(&self) -> Result<(), DocScanError> {
        if self.width_pt <= 2.0 * self.margin_pt || self.height_pt <= 2.0 * self.margin_pt {
            return Err(DocScanError::InvalidConfig(
                "canvas margins leave no drawable area".into(),
            ));
        }
        if self.font_size_pt <= 0.0 || self.line_height_pt <= 0.0 || self.char_width_em <= 0.0 {
            return Err(DocScanError::InvalidConfig(
                "canvas font metrics must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.dpi, 300);
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.retry_backoff_ms, 1000);
        assert_eq!(c.cache_ttl_secs, 3600);
        assert_eq!(c.max_file_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn builder_clamps_dpi() {
        let c = PipelineConfig::builder().dpi(10_000).build().unwrap();
        assert_eq!(c.dpi, 600);
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = PipelineConfig::builder().max_attempts(0).build().unwrap_err();
        assert!(matches!(err, DocScanError::InvalidConfig(_)));
    }

    #[test]
    fn canvas_without_drawable_area_rejected() {
        let canvas = CanvasLayout {
            margin_pt: 400.0,
            ..CanvasLayout::default()
        };
        assert!(PipelineConfig::builder().canvas(canvas).build().is_err());
    }

    #[test]
    fn default_canvas_capacity() {
        let canvas = CanvasLayout::default();
        // (612 - 100) / 6 = 85.3
        assert_eq!(canvas.chars_per_line(), 85);
        // (792 - 100) / 16 = 43.25
        assert_eq!(canvas.lines_per_page(), 43);
    }

    #[test]
    fn debug_hides_provider() {
        let dbg = format!("{:?}", PipelineConfig::default());
        assert!(dbg.contains("PipelineConfig"));
        assert!(dbg.contains("provider: None"));
    }
}
