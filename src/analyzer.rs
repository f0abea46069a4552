//! The cache-aside orchestrator.
//!
//! ```text
//! process(file_id)
//!   │
//!   ├─ cache hit? ──────────────────────────────▶ return cached envelope
//!   │
//!   ├─ 1. FileSource::fetch        bytes + media type
//!   ├─ 2. ConversionDispatcher     one image
//!   ├─ 3. AnalysisClient           raw model text (retries)
//!   ├─ 4. validate_response        AnalysisResult
//!   ├─ 5. DocumentStore::save      (auto_save only)
//!   └─ 6. cache write ──────────────────────────▶ return envelope
//! ```
//!
//! Steps run strictly in order for one call. Nothing is cached unless every
//! step up to and including the save succeeded, so a failed call leaves the
//! cache as it was.

use crate::cache::CacheEngine;
use crate::config::PipelineConfig;
use crate::error::DocScanError;
use crate::output::{AnalysisEnvelope, PipelineOptions};
use crate::pipeline::dispatch::ConversionDispatcher;
use crate::pipeline::llm::{AnalysisClient, LlmBackend, VisionBackend};
use crate::pipeline::validate::validate_response;
use crate::source::FileSource;
use crate::store::DocumentStore;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const KEY_PREFIX: &str = "analysis:";

/// Analyses documents by id, caching the results.
pub struct DocumentAnalyzer {
    cache: Arc<CacheEngine<AnalysisEnvelope>>,
    source: Arc<dyn FileSource>,
    dispatcher: ConversionDispatcher,
    client: AnalysisClient,
    store: Option<Arc<dyn DocumentStore>>,
    cache_ttl: Duration,
}

impl fmt::Debug for DocumentAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentAnalyzer")
            .field("dispatcher", &self.dispatcher)
            .field("has_store", &self.store.is_some())
            .field("cache_ttl", &self.cache_ttl)
            .field("cached_entries", &self.cache.len())
            .finish()
    }
}

impl DocumentAnalyzer {
    /// Assemble an analyzer from explicit collaborators.
    pub fn new(
        config: &PipelineConfig,
        cache: Arc<CacheEngine<AnalysisEnvelope>>,
        source: Arc<dyn FileSource>,
        backend: Arc<dyn VisionBackend>,
    ) -> Self {
        Self {
            cache,
            source,
            dispatcher: ConversionDispatcher::new(config),
            client: AnalysisClient::new(backend, config),
            store: None,
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
        }
    }

    /// Like [`DocumentAnalyzer::new`], with the vision backend resolved from
    /// `config` and the environment.
    ///
    /// # Errors
    /// [`DocScanError::ProviderNotConfigured`] if no provider can be built.
    pub fn from_config(
        config: &PipelineConfig,
        cache: Arc<CacheEngine<AnalysisEnvelope>>,
        source: Arc<dyn FileSource>,
    ) -> Result<Self, DocScanError> {
        let backend = LlmBackend::from_config(config)?;
        Ok(Self::new(config, cache, source, Arc::new(backend)))
    }

    /// Attach the store used when [`PipelineOptions::auto_save`] is set.
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Cache key for a file id.
    pub fn cache_key(file_id: &str) -> String {
        format!("{KEY_PREFIX}{file_id}")
    }

    pub fn cache(&self) -> &Arc<CacheEngine<AnalysisEnvelope>> {
        &self.cache
    }

    /// Analyse `file_id`, serving from cache unless `options.force_refresh`.
    ///
    /// # Errors
    /// Any stage error is returned unchanged. A failed save after a
    /// successful analysis is [`DocScanError::Persistence`], which carries
    /// the computed envelope.
    pub async fn process(
        &self,
        file_id: &str,
        options: PipelineOptions,
    ) -> Result<AnalysisEnvelope, DocScanError> {
        let key = Self::cache_key(file_id);

        if !options.force_refresh {
            if let Some(envelope) = self.cache.get(&key) {
                debug!("Cache hit for '{}'", file_id);
                return Ok(envelope);
            }
        }

        let start = Instant::now();
        info!("Analysing '{}'", file_id);

        let file = self.source.fetch(file_id).await?;
        debug!("Fetched {:?} in {:?}", file, start.elapsed());

        let image = self.dispatcher.convert(&file).await?;
        let raw = self.client.analyze(&image).await?;
        let analysis = validate_response(&raw)?;

        let mut envelope = AnalysisEnvelope {
            file_id: file_id.to_string(),
            file_name: file.name,
            analysis,
            image,
            processed_at: Utc::now(),
            saved_record: None,
        };

        if options.auto_save {
            let saved = match &self.store {
                Some(store) => store
                    .save(&envelope.document_fields())
                    .await
                    .map_err(|e| e.to_string()),
                None => Err("auto_save requested but no document store is configured".to_string()),
            };
            match saved {
                Ok(record) => {
                    debug!("Saved '{}' as record {}", file_id, record.id);
                    envelope.saved_record = Some(record);
                }
                Err(detail) => {
                    warn!("Saving '{}' failed: {}", file_id, detail);
                    return Err(DocScanError::Persistence {
                        detail,
                        envelope: Box::new(envelope),
                    });
                }
            }
        }

        self.cache.set(key, envelope.clone(), self.cache_ttl);
        info!(
            "Analysed '{}' as {} with {} entities in {:?}",
            file_id,
            envelope.analysis.document_type,
            envelope.analysis.entities.len(),
            start.elapsed()
        );
        Ok(envelope)
    }

    /// Drop the cached analysis of one file.
    pub fn invalidate(&self, file_id: &str) -> bool {
        self.cache.delete(&Self::cache_key(file_id))
    }

    /// Drop every cached analysis; returns how many were removed.
    pub fn invalidate_all(&self) -> usize {
        self.cache.delete_matching(&format!("{KEY_PREFIX}*"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_prefixed_file_id() {
        assert_eq!(DocumentAnalyzer::cache_key("abc123"), "analysis:abc123");
        assert_ne!(
            DocumentAnalyzer::cache_key("a"),
            DocumentAnalyzer::cache_key("b")
        );
    }
}
