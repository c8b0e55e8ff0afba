//! The external document-rendering capability.
//!
//! The real renderer (PDF/PNG layout) is an external collaborator; the trait
//! is the seam. [`FileRenderer`] stands in for it by materializing the
//! structured document data on disk, which keeps the download endpoints and
//! the post-commit pipeline fully exercisable.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::invoice::InvoiceData;
use crate::receipt::ReceiptData;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("renderer serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Paths of the rendered artifacts, relative to the document directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub png_path: String,
    pub pdf_path: String,
}

/// Turns structured invoice/receipt data into document files.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render_invoice(&self, data: &InvoiceData) -> Result<RenderedDocument, RenderError>;
    async fn render_receipt(&self, data: &ReceiptData) -> Result<RenderedDocument, RenderError>;
}

/// Filesystem-backed stand-in for the external renderer.
#[derive(Debug, Clone)]
pub struct FileRenderer {
    base_dir: PathBuf,
}

impl FileRenderer {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Absolute path for a stored relative document path.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.base_dir.join(relative)
    }

    async fn write_pair<T: Serialize + Sync>(
        &self,
        subdir: &str,
        stem: &str,
        data: &T,
    ) -> Result<RenderedDocument, RenderError> {
        let dir = self.base_dir.join(subdir);
        tokio::fs::create_dir_all(&dir).await?;

        let bytes = serde_json::to_vec_pretty(data)?;
        let pdf_rel = format!("{subdir}/{stem}.pdf");
        let png_rel = format!("{subdir}/{stem}.png");
        tokio::fs::write(self.base_dir.join(&pdf_rel), &bytes).await?;
        tokio::fs::write(self.base_dir.join(&png_rel), &bytes).await?;

        Ok(RenderedDocument {
            png_path: png_rel,
            pdf_path: pdf_rel,
        })
    }
}

#[async_trait]
impl DocumentRenderer for FileRenderer {
    async fn render_invoice(&self, data: &InvoiceData) -> Result<RenderedDocument, RenderError> {
        let stem = format!("facture-{}", data.number);
        self.write_pair("invoices", &stem, data).await
    }

    async fn render_receipt(&self, data: &ReceiptData) -> Result<RenderedDocument, RenderError> {
        let stem = format!("recu-{}", data.number);
        self.write_pair("receipts", &stem, data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("comptoir-render-{}", Uuid::now_v7()))
    }

    #[tokio::test]
    async fn renders_an_invoice_pair_on_disk() {
        let dir = scratch_dir();
        let renderer = FileRenderer::new(&dir);
        let data = InvoiceData {
            number: "F000001".into(),
            code: "FAC-1".into(),
            date: Utc::now(),
            client: None,
            lines: vec![],
            total: 0.0,
            note: None,
        };

        let doc = renderer.render_invoice(&data).await.unwrap();
        assert!(renderer.resolve(&doc.pdf_path).is_file());
        assert!(renderer.resolve(&doc.png_path).is_file());

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
