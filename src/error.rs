use serde::Serialize;
use thiserror::Error;

/// Why a strategy run did not succeed. Captured into the run outcome, never
/// raised past the orchestrator.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A required report image does not exist.
    #[error("image_missing")]
    ImageMissing,
    /// The vision service failed after retries and nothing else recovered.
    #[error("vision_service_error")]
    VisionServiceError,
    /// Text recognition failed, leaving every field absent.
    #[error("fallback_service_error")]
    FallbackServiceError,
    /// Both paths ran but no declared field could be read.
    #[error("parse_failure")]
    ParseFailure,
    /// Template missing/corrupt or the day sheet does not exist.
    #[error("template_load_failure")]
    TemplateLoadFailure,
    /// The workbook could not be saved, not even under a fallback name.
    #[error("persist_failure")]
    PersistFailure,
}
