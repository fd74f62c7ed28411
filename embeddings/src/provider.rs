use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::backend::EmbeddingBackend;
use crate::config::{EmbeddingConfig, ProviderKind};
use crate::error::{EmbeddingError, Result};
use crate::local::LocalEmbedder;
use crate::remote::RemoteEmbedder;

/// Produces fixed-dimension vectors from text.
///
/// The primary backend is chosen once from configuration. When fallback is
/// allowed, the first failure of the primary switches every later call to
/// the secondary backend for the rest of the provider's lifetime.
pub struct EmbeddingProvider {
    dimension: usize,
    primary: Arc<dyn EmbeddingBackend>,
    secondary: Option<Arc<dyn EmbeddingBackend>>,
    using_secondary: AtomicBool,
}

impl EmbeddingProvider {
    /// Assemble a provider from explicit backends
    pub fn new(
        dimension: usize,
        primary: Arc<dyn EmbeddingBackend>,
        secondary: Option<Arc<dyn EmbeddingBackend>>,
    ) -> Self {
        Self {
            dimension,
            primary,
            secondary,
            using_secondary: AtomicBool::new(false),
        }
    }

    /// Build the configured backends and initialize the primary one.
    ///
    /// Without `allow_fallback` an initialization failure of the primary
    /// is returned as is.
    pub async fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        config.validate().map_err(EmbeddingError::InvalidConfig)?;

        info!(
            "Initializing {:?} embedding provider (dimension {}, fallback {})",
            config.provider,
            config.dimension,
            if config.allow_fallback { "allowed" } else { "disabled" }
        );

        let primary = build_backend(config.provider, config);
        if !config.allow_fallback {
            let primary = primary?;
            primary.warm_up().await?;
            return Ok(Self::new(config.dimension, primary, None));
        }

        let secondary = match build_backend(config.provider.other(), config) {
            Ok(backend) => Some(backend),
            Err(err) => {
                warn!(
                    "Fallback embedding backend {:?} unavailable: {err}",
                    config.provider.other()
                );
                None
            }
        };

        let (primary, init_error) = match primary {
            Ok(backend) => match backend.warm_up().await {
                Ok(()) => return Ok(Self::new(config.dimension, backend, secondary)),
                Err(err) => (Some(backend), err),
            },
            Err(err) => (None, err),
        };
        let Some(secondary) = secondary else {
            return Err(init_error);
        };

        warn!(
            "Primary embedding backend failed to initialize ({init_error}), using {}",
            secondary.name()
        );
        secondary.warm_up().await?;
        let primary = primary.unwrap_or_else(|| Arc::clone(&secondary));
        Ok(Self::on_secondary(config.dimension, primary, secondary))
    }

    /// A provider that starts out already switched to `secondary`
    fn on_secondary(
        dimension: usize,
        primary: Arc<dyn EmbeddingBackend>,
        secondary: Arc<dyn EmbeddingBackend>,
    ) -> Self {
        Self {
            dimension,
            primary,
            secondary: Some(secondary),
            using_secondary: AtomicBool::new(true),
        }
    }

    /// Dimension of every vector this provider returns
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Name of the backend currently serving calls
    pub fn active_backend(&self) -> &'static str {
        self.active().name()
    }

    /// Whether the provider has switched to its fallback backend
    pub fn is_degraded(&self) -> bool {
        self.using_secondary.load(Ordering::Acquire)
    }

    fn active(&self) -> &Arc<dyn EmbeddingBackend> {
        match &self.secondary {
            Some(secondary) if self.is_degraded() => secondary,
            _ => &self.primary,
        }
    }

    /// Embed a list of texts, one vector per text in order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let backend = Arc::clone(self.active());
        match self.embed_with(backend.as_ref(), texts).await {
            Ok(vectors) => Ok(vectors),
            Err(err) if err.is_validation() => Err(err),
            Err(err) => match self.switch_to_secondary(backend.as_ref(), &err) {
                Some(secondary) => self.embed_with(secondary.as_ref(), texts).await,
                None => Err(err),
            },
        }
    }

    /// Embed a single query text
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "cannot embed empty text".to_string(),
            ));
        }

        self.embed(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| EmbeddingError::EmbeddingGeneration("No embedding generated".into()))
    }

    fn switch_to_secondary(
        &self,
        failed: &dyn EmbeddingBackend,
        err: &EmbeddingError,
    ) -> Option<Arc<dyn EmbeddingBackend>> {
        let secondary = self.secondary.as_ref()?;
        if failed.name() == secondary.name() {
            return None;
        }
        if !self.using_secondary.swap(true, Ordering::AcqRel) {
            warn!(
                "Embedding backend {} failed ({err}); switching to {} for the rest of the process",
                failed.name(),
                secondary.name()
            );
        }
        Some(Arc::clone(secondary))
    }

    async fn embed_with(
        &self,
        backend: &dyn EmbeddingBackend,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        let batch_size = backend.max_batch_size().max(1);
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(batch_size) {
            let embedded = backend.embed_batch(batch).await?;
            if embedded.len() != batch.len() {
                return Err(EmbeddingError::EmbeddingGeneration(format!(
                    "{} returned {} vectors for {} texts",
                    backend.name(),
                    embedded.len(),
                    batch.len()
                )));
            }
            for vector in embedded {
                if vector.len() != self.dimension {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: self.dimension,
                        actual: vector.len(),
                    });
                }
                vectors.push(vector);
            }
        }

        debug!("{} embedded {} texts", backend.name(), vectors.len());
        Ok(vectors)
    }
}

fn build_backend(kind: ProviderKind, config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingBackend>> {
    Ok(match kind {
        ProviderKind::Local => Arc::new(LocalEmbedder::new(config.local.clone(), config.dimension)?),
        ProviderKind::Remote => {
            Arc::new(RemoteEmbedder::new(config.remote.clone(), config.dimension)?)
        }
    })
}
