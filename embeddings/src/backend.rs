use async_trait::async_trait;

use crate::error::Result;

/// A source of embedding vectors.
///
/// Implementations receive at most `max_batch_size()` texts per call; the
/// provider splits larger inputs.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Largest number of texts accepted by one `embed_batch` call
    fn max_batch_size(&self) -> usize;

    /// Acquire whatever the backend needs before the first call.
    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    /// Embed `texts`, returning one vector per input in the same order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
