use async_trait::async_trait;
use fastembed::{InitOptions, TextEmbedding};
use log::{debug, info};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

use crate::backend::EmbeddingBackend;
use crate::config::{EmbeddingModelType, LocalModelConfig};
use crate::error::{EmbeddingError, Result};

/// The process-wide model. Loaded by the first caller; concurrent first
/// callers wait on the same initialization.
static MODEL: OnceCell<LoadedModel> = OnceCell::const_new();

struct LoadedModel {
    model_type: EmbeddingModelType,
    // Inference calls are serialized through this lock.
    model: Arc<Mutex<TextEmbedding>>,
}

/// Embeddings from an in-process ONNX model via fastembed
pub struct LocalEmbedder {
    config: LocalModelConfig,
}

impl LocalEmbedder {
    /// Create the backend. The model itself is loaded lazily, once per
    /// process, on `warm_up` or the first embedding call.
    pub fn new(config: LocalModelConfig, dimension: usize) -> Result<Self> {
        let native = config.model.native_dimension();
        if native != dimension {
            return Err(EmbeddingError::ModelInitialization(format!(
                "{:?} produces {native}-dimensional vectors but {dimension} are configured",
                config.model
            )));
        }
        Ok(Self { config })
    }

    async fn model(&self) -> Result<Arc<Mutex<TextEmbedding>>> {
        let loaded = MODEL
            .get_or_try_init(|| load_model(self.config.clone()))
            .await?;

        if loaded.model_type != self.config.model {
            return Err(EmbeddingError::ModelInitialization(format!(
                "process already loaded {:?}, cannot switch to {:?}",
                loaded.model_type, self.config.model
            )));
        }

        Ok(Arc::clone(&loaded.model))
    }
}

async fn load_model(config: LocalModelConfig) -> Result<LoadedModel> {
    info!("Loading local embedding model {:?}", config.model);

    let model_type = config.model;
    let model = tokio::task::spawn_blocking(move || {
        let mut options = InitOptions::new(config.model.to_fastembed_model())
            .with_show_download_progress(config.show_download_progress);
        if let Some(cache_dir) = config.cache_dir {
            options = options.with_cache_dir(cache_dir);
        }
        TextEmbedding::try_new(options)
    })
    .await
    .map_err(|e| EmbeddingError::ModelInitialization(format!("model loader panicked: {e}")))?
    .map_err(|e| EmbeddingError::ModelInitialization(format!("Failed to initialize model: {e}")))?;

    info!("Local embedding model {model_type:?} ready");

    Ok(LoadedModel {
        model_type,
        model: Arc::new(Mutex::new(model)),
    })
}

#[async_trait]
impl EmbeddingBackend for LocalEmbedder {
    fn name(&self) -> &'static str {
        "local"
    }

    fn max_batch_size(&self) -> usize {
        self.config.batch_size
    }

    async fn warm_up(&self) -> Result<()> {
        self.model().await.map(|_| ())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model().await?;
        let texts = texts.to_vec();
        let batch_size = self.config.batch_size;

        debug!("Running local inference on {} texts", texts.len());

        tokio::task::spawn_blocking(move || {
            let model = model.lock().map_err(|_| {
                EmbeddingError::EmbeddingGeneration("local model lock poisoned".into())
            })?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| EmbeddingError::EmbeddingGeneration(e.to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::EmbeddingGeneration(format!("inference task failed: {e}")))?
    }
}
