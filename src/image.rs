use std::path::{Path, PathBuf};

/// A report photograph on disk. Only the path is held; bytes are read when a
/// service needs them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportImage {
    path: PathBuf,
}

impl ReportImage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }

    /// MIME type from the file extension; phone photos default to JPEG.
    pub fn mime_type(&self) -> &'static str {
        let ext = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("png") => "image/png",
            Some("webp") => "image/webp",
            Some("heic") => "image/heic",
            Some("heif") => "image/heif",
            _ => "image/jpeg",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_type() {
        assert_eq!(ReportImage::new("Others/Day_Report1.jpg").mime_type(), "image/jpeg");
        assert_eq!(ReportImage::new("scan.PNG").mime_type(), "image/png");
        assert_eq!(ReportImage::new("noext").mime_type(), "image/jpeg");
    }

    #[tokio::test]
    async fn test_exists_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch_report.jpg");
        let image = ReportImage::new(&path);
        assert!(!image.exists());

        std::fs::write(&path, b"\xff\xd8jpeg").unwrap();
        assert!(image.exists());
        assert_eq!(image.read().await.unwrap(), b"\xff\xd8jpeg");
    }
}
