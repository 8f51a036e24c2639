// src/orchestrator.rs

use crate::config::{Config, FallbackTrigger};
use crate::error::ErrorKind;
use crate::ocr::TextRecognizer;
use crate::strategy::{ExtractionStrategy, RunContext};
use crate::vision::{RetryPolicy, VisionService};
use crate::workbook::{SpreadsheetGateway, WorkbookError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::{info, warn};

/// What happened to one strategy. Serialised as-is into the run report.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    pub details: Map<String, Value>,
}

impl RunOutcome {
    pub fn succeeded(name: &str, details: Map<String, Value>) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            error: None,
            details,
        }
    }

    pub fn failed(name: &str, kind: ErrorKind, details: Map<String, Value>) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            error: Some(kind),
            details,
        }
    }
}

/// Runs the configured strategies one after another against one day sheet.
///
/// Owns the workbook for the whole run; each strategy borrows it only while
/// writing and has persisted before the next one starts.
pub struct Orchestrator {
    strategies: Vec<ExtractionStrategy>,
    vision: Box<dyn VisionService>,
    ocr: Option<Box<dyn TextRecognizer>>,
    retry: RetryPolicy,
    trigger: FallbackTrigger,
    make_backup: bool,
    template_path: PathBuf,
    gateway: Option<SpreadsheetGateway>,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        strategies: Vec<ExtractionStrategy>,
        vision: Box<dyn VisionService>,
        ocr: Option<Box<dyn TextRecognizer>>,
    ) -> Self {
        Self {
            strategies,
            vision,
            ocr,
            retry: RetryPolicy::from_config(&config.vision),
            trigger: config.fallback_trigger,
            make_backup: config.make_backup,
            template_path: config.template_path.clone(),
            gateway: None,
        }
    }

    /// Run every strategy and collect their outcomes in run order.
    ///
    /// Outside a dry run the template is opened first; if it is missing or
    /// unreadable nothing runs and the error is returned instead.
    pub async fn run(&mut self, day: &str, dry_run: bool) -> Result<Vec<RunOutcome>, WorkbookError> {
        if !dry_run && self.gateway.is_none() {
            self.gateway = Some(SpreadsheetGateway::open(&self.template_path)?);
        }

        let ctx = RunContext {
            vision: self.vision.as_ref(),
            ocr: self.ocr.as_deref(),
            retry: self.retry,
            trigger: self.trigger,
            make_backup: self.make_backup,
        };

        info!(day = %day, dry_run, strategies = self.strategies.len(), "Starting run");
        let mut outcomes = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            let outcome = strategy
                .run(&ctx, day, dry_run, self.gateway.as_mut())
                .await;
            match outcome.error {
                None => info!(strategy = %outcome.name, "Strategy succeeded"),
                Some(kind) => warn!(strategy = %outcome.name, error = %kind, "Strategy failed"),
            }
            outcomes.push(outcome);
        }

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        info!(succeeded, failed = outcomes.len() - succeeded, "Run finished");
        Ok(outcomes)
    }
}
