//! Page extraction seam.
//!
//! Turning document bytes into page texts is the job of an external
//! collaborator; the pipeline consumes it through this trait. The in-tree
//! implementation handles plain UTF-8 files, with form feeds as page
//! breaks.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{RetrievalError, RetrievalResult};

#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// Page texts in page order. Table explanations and image descriptions
    /// belong inline with their page's text.
    async fn extract_pages(&self, path: &Path) -> RetrievalResult<Vec<String>>;
}

/// UTF-8 text files, split into pages on form feeds.
pub struct TextPages;

#[async_trait]
impl PageExtractor for TextPages {
    async fn extract_pages(&self, path: &Path) -> RetrievalResult<Vec<String>> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RetrievalError::PageExtractionFailed(format!("{}: {e}", path.display())))?;
        Ok(raw.split('\u{c}').map(str::to_string).collect())
    }
}

/// Fixed page list, for tests and canned demos.
pub struct FixedPages(pub Vec<String>);

#[async_trait]
impl PageExtractor for FixedPages {
    async fn extract_pages(&self, _path: &Path) -> RetrievalResult<Vec<String>> {
        Ok(self.0.clone())
    }
}
