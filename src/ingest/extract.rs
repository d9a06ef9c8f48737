//! Text extraction from uploaded files
use crate::error::{BodhiError, Result};

/// Pulls plain text out of an uploaded file
pub trait TextExtractor: Send + Sync {
    /// Text of all pages concatenated in page order
    fn extract(&self, name: &str, bytes: &[u8]) -> Result<String>;
}

/// PDF text extraction via `pdf-extract`
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract(&self, name: &str, bytes: &[u8]) -> Result<String> {
        if !bytes.starts_with(b"%PDF") {
            return Err(BodhiError::Extraction {
                name: name.to_string(),
                reason: "not a PDF file".to_string(),
            });
        }

        // pdf-extract panics on some malformed files; contain it to this upload
        let extracted = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes));

        match extracted {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(BodhiError::Extraction {
                name: name.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(BodhiError::Extraction {
                name: name.to_string(),
                reason: "PDF parser crashed on this file".to_string(),
            }),
        }
    }
}
