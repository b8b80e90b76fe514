//! Text recognition for image-only messages

use async_trait::async_trait;
use sdk::errors::EngineError;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::OcrConfig;

/// Image-to-text provider
#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Recognize text in an encoded image (PNG, JPEG, ...)
    async fn recognize(&self, image: &[u8]) -> Result<String, EngineError>;

    /// Like [`OcrProvider::recognize`], with failures logged and flattened to `""`
    async fn recognize_or_empty(&self, image: &[u8]) -> String {
        match self.recognize(image).await {
            Ok(text) => text,
            Err(e) => {
                warn!("OCR failed: {}", e);
                String::new()
            }
        }
    }
}

/// `tesseract` CLI, fed over stdin and read from stdout
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: String,
    language: String,
    timeout: Duration,
}

impl TesseractOcr {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            binary: config.tesseract.clone(),
            language: config.language.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn run(&self, image: &[u8]) -> Result<String, EngineError> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", &self.language])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Ocr(format!("Failed to execute {}: {}", self.binary, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(image)
                .await
                .map_err(|e| EngineError::Ocr(format!("Failed to feed image: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| EngineError::Ocr(e.to_string()))?;

        if !output.status.success() {
            let err = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Ocr(format!(
                "tesseract exited with {}: {}",
                output.status,
                err.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!("OCR recognized {} chars", text.chars().count());
        Ok(text)
    }
}

#[async_trait]
impl OcrProvider for TesseractOcr {
    async fn recognize(&self, image: &[u8]) -> Result<String, EngineError> {
        tokio::time::timeout(self.timeout, self.run(image))
            .await
            .map_err(|_| EngineError::Timeout {
                operation: "ocr".to_string(),
                secs: self.timeout.as_secs(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_yields_empty() {
        let ocr = TesseractOcr::new(&OcrConfig {
            tesseract: "definitely-not-tesseract-xyz".to_string(),
            ..OcrConfig::default()
        });

        assert!(matches!(ocr.recognize(b"png").await, Err(EngineError::Ocr(_))));
        assert_eq!(ocr.recognize_or_empty(b"png").await, "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reads_trimmed_stdout() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let bin = dir.path().join("fake-tesseract");
        std::fs::write(&bin, "#!/bin/sh\ncat\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let ocr = TesseractOcr::new(&OcrConfig {
            tesseract: bin.to_string_lossy().into_owned(),
            ..OcrConfig::default()
        });
        assert_eq!(ocr.recognize(b"  see you at 5\n").await.unwrap(), "see you at 5");
    }
}
