// src/ocr.rs

use crate::config::OcrSection;
use crate::image::ReportImage;
use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{binary} exited with status {code:?}: {stderr}")]
    Exit {
        binary: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("recognized text is not valid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// "Turn this image into raw text."
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &ReportImage) -> Result<String, OcrError>;
}

/// Minimum number of non-whitespace characters before recognized text is
/// worth parsing. Below this the engine most likely saw nothing.
const MIN_TEXT_CHARS: usize = 3;

/// The `tesseract` command-line engine.
pub struct TesseractCli {
    binary: String,
    lang: String,
    psm: u8,
}

impl TesseractCli {
    pub fn from_config(cfg: &OcrSection) -> Self {
        Self {
            binary: cfg.binary.clone(),
            lang: cfg.lang.clone(),
            psm: cfg.psm,
        }
    }

    fn command(&self, image: &ReportImage) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(image.path())
            .arg("stdout")
            .args(["-l", self.lang.as_str()])
            .arg("--psm")
            .arg(self.psm.to_string())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TextRecognizer for TesseractCli {
    async fn recognize(&self, image: &ReportImage) -> Result<String, OcrError> {
        if !image.exists() {
            return Err(OcrError::ImageNotFound(image.path().display().to_string()));
        }

        let output = self
            .command(image)
            .output()
            .await
            .map_err(|source| OcrError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(OcrError::Exit {
                binary: self.binary.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8(output.stdout)?;
        let meaningful = text.chars().filter(|c| !c.is_whitespace()).count();
        if meaningful < MIN_TEXT_CHARS {
            warn!(
                path = %image.path().display(),
                chars = meaningful,
                "Text recognition produced almost nothing"
            );
        } else {
            info!(path = %image.path().display(), chars = meaningful, "Text recognized");
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(binary: &str) -> TesseractCli {
        TesseractCli {
            binary: binary.to_string(),
            lang: "eng".to_string(),
            psm: 6,
        }
    }

    #[test]
    fn test_command_line() {
        let cmd = cli("tesseract").command(&ReportImage::new("Others/batch_report.jpg"));
        let std_cmd = cmd.as_std();
        let args: Vec<_> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(std_cmd.get_program(), "tesseract");
        assert_eq!(
            args,
            ["Others/batch_report.jpg", "stdout", "-l", "eng", "--psm", "6"]
        );
    }

    #[tokio::test]
    async fn test_missing_image() {
        let err = cli("tesseract")
            .recognize(&ReportImage::new("/definitely/not/here.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::ImageNotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shift.jpg");
        std::fs::write(&path, b"jpeg").unwrap();

        let err = cli("daybook-no-such-ocr-binary")
            .recognize(&ReportImage::new(&path))
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::Spawn { .. }));
    }
}
