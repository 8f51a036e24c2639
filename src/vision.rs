// src/vision.rs

use crate::config::VisionSection;
use crate::image::ReportImage;
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum VisionError {
    /// Quota or rate limit hit; the only error class that is retried.
    #[error("vision service rate limited: {0}")]
    RateLimited(String),

    #[error("vision API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("vision request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("could not read image: {0}")]
    Image(#[from] std::io::Error),

    #[error("vision service returned no text")]
    EmptyResponse,
}

impl VisionError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, VisionError::RateLimited(_))
    }
}

/// "Describe this image given a prompt."
#[async_trait]
pub trait VisionService: Send + Sync {
    async fn generate(&self, prompt: &str, image: &ReportImage) -> Result<String, VisionError>;
}

/// Bounded exponential backoff for rate-limit errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &VisionSection) -> Self {
        Self {
            max_retries: cfg.max_retries,
            initial_backoff: Duration::from_millis(cfg.initial_backoff_ms),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Call the vision service, retrying only on rate limits.
pub async fn generate_with_retry(
    service: &dyn VisionService,
    prompt: &str,
    image: &ReportImage,
    policy: RetryPolicy,
) -> Result<String, VisionError> {
    let mut attempt = 0;
    loop {
        match service.generate(prompt, image).await {
            Err(e) if e.is_rate_limited() && attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Vision service rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

// ---------------------------------------------------------------------------
// Gemini REST client
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

/// Gemini `generateContent` over plain HTTPS.
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    /// Build the client from config; fails if the API key variable is unset.
    pub fn from_config(cfg: &VisionSection) -> Result<Self, Box<dyn std::error::Error>> {
        let api_key = std::env::var(&cfg.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| format!("{} environment variable not set", cfg.api_key_env))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;

        info!(url = %cfg.base_url, model = %cfg.model, "Using Gemini vision backend");
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl VisionService for GeminiClient {
    async fn generate(&self, prompt: &str, image: &ReportImage) -> Result<String, VisionError> {
        let bytes = image.read().await?;
        let data = base64::engine::general_purpose::STANDARD.encode(&bytes);

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part {
                        text: Some(prompt.to_string()),
                        inline_data: None,
                    },
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: image.mime_type().to_string(),
                            data,
                        }),
                    },
                ],
            }],
            generation_config: GenerationConfig { temperature: 0.0 },
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, body));
        }

        let parsed: GenerateResponse = response.json().await?;
        response_text(parsed)
    }
}

fn classify_failure(status: StatusCode, body: String) -> VisionError {
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
        VisionError::RateLimited(format!("{status}: {body}"))
    } else {
        VisionError::Api {
            status: status.as_u16(),
            body,
        }
    }
}

/// Concatenate the text parts of the first candidate.
fn response_text(response: GenerateResponse) -> Result<String, VisionError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        Err(VisionError::EmptyResponse)
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays canned results in order.
    struct Scripted {
        results: Mutex<Vec<Result<String, VisionError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(mut results: Vec<Result<String, VisionError>>) -> Self {
            results.reverse();
            Self {
                results: Mutex::new(results),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl VisionService for Scripted {
        async fn generate(&self, _prompt: &str, _image: &ReportImage) -> Result<String, VisionError> {
            *self.calls.lock().unwrap() += 1;
            self.results
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(VisionError::EmptyResponse))
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::ZERO,
        }
    }

    fn quota() -> Result<String, VisionError> {
        Err(VisionError::RateLimited("429: quota".into()))
    }

    #[tokio::test]
    async fn test_retries_rate_limit_then_succeeds() {
        let svc = Scripted::new(vec![quota(), quota(), Ok("EBT: 12.00".into())]);
        let image = ReportImage::new("batch_report.jpg");
        let text = generate_with_retry(&svc, "p", &image, policy(3)).await.unwrap();
        assert_eq!(text, "EBT: 12.00");
        assert_eq!(svc.calls(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_cap() {
        let svc = Scripted::new(vec![quota(), quota(), quota(), quota(), quota()]);
        let image = ReportImage::new("batch_report.jpg");
        let err = generate_with_retry(&svc, "p", &image, policy(3)).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(svc.calls(), 4, "one call plus three retries");
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let svc = Scripted::new(vec![
            Err(VisionError::Api {
                status: 401,
                body: "bad key".into(),
            }),
            Ok("never reached".into()),
        ]);
        let image = ReportImage::new("batch_report.jpg");
        let err = generate_with_retry(&svc, "p", &image, policy(3)).await.unwrap_err();
        assert!(matches!(err, VisionError::Api { status: 401, .. }));
        assert_eq!(svc.calls(), 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let p = RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
        };
        assert_eq!(p.delay(0), Duration::from_millis(500));
        assert_eq!(p.delay(2), Duration::from_millis(2000));
    }

    #[test]
    fn test_classify_failure() {
        assert!(classify_failure(StatusCode::TOO_MANY_REQUESTS, String::new()).is_rate_limited());
        assert!(
            classify_failure(
                StatusCode::FORBIDDEN,
                r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#.into()
            )
            .is_rate_limited()
        );
        assert!(!classify_failure(StatusCode::BAD_REQUEST, "bad".into()).is_rate_limited());
    }

    #[test]
    fn test_response_text() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"{\"ebt\": "},{"text":"12.5}"}],"role":"model"}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response_text(parsed).unwrap(), r#"{"ebt": 12.5}"#);

        let parsed: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(matches!(response_text(parsed), Err(VisionError::EmptyResponse)));
    }

    #[test]
    fn test_request_shape() {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: None,
                    inline_data: Some(InlineData {
                        mime_type: "image/jpeg".into(),
                        data: "AAAA".into(),
                    }),
                }],
            }],
            generation_config: GenerationConfig { temperature: 0.0 },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(json["generationConfig"]["temperature"], 0.0);
    }
}
