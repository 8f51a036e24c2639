// src/strategy/mod.rs

pub mod reports;

use crate::config::{Config, FallbackTrigger};
use crate::error::ErrorKind;
use crate::heuristics::{self, TextRule};
use crate::image::ReportImage;
use crate::ocr::TextRecognizer;
use crate::orchestrator::RunOutcome;
use crate::record::{DerivedRule, FieldRecord, Source};
use crate::structured;
use crate::vision::{self, RetryPolicy, VisionService};
use crate::workbook::SpreadsheetGateway;
use serde_json::{Map, Value, json};
use tracing::{Instrument, info, info_span, warn};

/// How an extracted value lands in its cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Overwrite the cell.
    Set,
    /// Add to whatever number the cell already holds.
    Accumulate,
}

/// One scalar field of a report.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    /// Keys the model may use for this field in its JSON reply.
    pub aliases: &'static [&'static str],
    /// Text rules tried when the JSON reply does not supply the field.
    pub rules: &'static [TextRule],
    /// Whole counts; rounded before they are recorded.
    pub integer: bool,
    pub cells: &'static [&'static str],
    pub mode: WriteMode,
}

impl FieldSpec {
    pub const fn amount(
        name: &'static str,
        aliases: &'static [&'static str],
        rules: &'static [TextRule],
        cells: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            aliases,
            rules,
            integer: false,
            cells,
            mode: WriteMode::Set,
        }
    }

    pub const fn count(
        name: &'static str,
        aliases: &'static [&'static str],
        rules: &'static [TextRule],
        cells: &'static [&'static str],
    ) -> Self {
        Self {
            integer: true,
            ..Self::amount(name, aliases, rules, cells)
        }
    }

    pub const fn accumulating(self) -> Self {
        Self {
            mode: WriteMode::Accumulate,
            ..self
        }
    }
}

/// A fixed-width row of values read top to bottom from a handwritten column
/// and written left to right along one spreadsheet row.
#[derive(Debug, Clone, Copy)]
pub struct RowSpec {
    /// Field names are `<prefix>_01`, `<prefix>_02`, ...
    pub prefix: &'static str,
    /// JSON keys that may hold the row as an array.
    pub aliases: &'static [&'static str],
    pub width: usize,
    pub row: u32,
    /// 1-based index of the first column (I = 9).
    pub first_column: u32,
}

impl RowSpec {
    pub fn field_name(&self, i: usize) -> String {
        format!("{}_{:02}", self.prefix, i + 1)
    }

    pub fn cell(&self, i: usize) -> String {
        format!("{}{}", column_letters(self.first_column + i as u32), self.row)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SlotFields {
    Scalars(&'static [FieldSpec]),
    Row(RowSpec),
}

/// One photograph a report reads, and what is read from it.
#[derive(Debug, Clone, Copy)]
pub struct ImageSlot {
    /// Key under `[images]` in the config.
    pub key: &'static str,
    pub default_file: &'static str,
    pub required: bool,
    pub prompt: &'static str,
    pub fields: SlotFields,
}

impl ImageSlot {
    fn field_names(&self) -> Vec<String> {
        match self.fields {
            SlotFields::Scalars(specs) => specs.iter().map(|s| s.name.to_string()).collect(),
            SlotFields::Row(row) => (0..row.width).map(|i| row.field_name(i)).collect(),
        }
    }
}

/// A report layout: its photos, fields, cells and derived totals.
#[derive(Debug)]
pub struct Report {
    pub name: &'static str,
    pub slots: &'static [ImageSlot],
    pub derived: &'static [DerivedRule],
}

/// Where one field is written.
#[derive(Debug, Clone)]
struct Binding {
    field: String,
    cells: Vec<String>,
    mode: WriteMode,
}

/// Everything a strategy borrows from the orchestrator for one run.
pub struct RunContext<'a> {
    pub vision: &'a dyn VisionService,
    /// `None` when text recognition is disabled.
    pub ocr: Option<&'a dyn TextRecognizer>,
    pub retry: RetryPolicy,
    pub trigger: FallbackTrigger,
    pub make_backup: bool,
}

/// Result of the read-only half of a run.
struct Extraction {
    record: FieldRecord,
    details: Map<String, Value>,
    vision_failed: bool,
    ocr_failed: bool,
}

/// Runs one report layout against its photos.
pub struct ExtractionStrategy {
    report: &'static Report,
    images: Vec<ReportImage>,
    bindings: Vec<Binding>,
}

impl ExtractionStrategy {
    /// Resolve the report's photos through the config.
    pub fn new(report: &'static Report, config: &Config) -> Self {
        let images = report
            .slots
            .iter()
            .map(|slot| ReportImage::new(config.image_path(slot.key, slot.default_file)))
            .collect();
        Self::with_images(report, images)
    }

    /// Use explicit photos, one per slot in slot order.
    pub fn with_images(report: &'static Report, images: Vec<ReportImage>) -> Self {
        Self {
            report,
            images,
            bindings: bindings(report),
        }
    }

    pub fn name(&self) -> &'static str {
        self.report.name
    }

    /// Extract, then write into the day sheet unless `dry_run`.
    ///
    /// Never fails outright: every problem ends up in the returned outcome.
    pub async fn run(
        &self,
        ctx: &RunContext<'_>,
        day: &str,
        dry_run: bool,
        gateway: Option<&mut SpreadsheetGateway>,
    ) -> RunOutcome {
        let span = info_span!("strategy", name = self.name());
        self.run_inner(ctx, day, dry_run, gateway)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        ctx: &RunContext<'_>,
        day: &str,
        dry_run: bool,
        gateway: Option<&mut SpreadsheetGateway>,
    ) -> RunOutcome {
        if let Some(details) = self.missing_images() {
            warn!("Required image missing, skipping");
            return RunOutcome::failed(self.name(), ErrorKind::ImageMissing, details);
        }

        let Extraction {
            record,
            mut details,
            vision_failed,
            ocr_failed,
        } = self.extract(ctx).await;
        details.insert("fields".into(), serde_json::to_value(&record).unwrap_or_default());

        if !record.has_any() {
            let kind = if ocr_failed {
                ErrorKind::FallbackServiceError
            } else if vision_failed && ctx.ocr.is_none() {
                ErrorKind::VisionServiceError
            } else {
                ErrorKind::ParseFailure
            };
            tracing::error!(kind = %kind, "No field could be extracted");
            return RunOutcome::failed(self.name(), kind, details);
        }

        if dry_run {
            info!(found = record.present_count(), of = record.len(), "Dry run, workbook untouched");
            return RunOutcome::succeeded(self.name(), details);
        }

        let Some(gateway) = gateway else {
            details.insert("error".into(), json!("no workbook open"));
            return RunOutcome::failed(self.name(), ErrorKind::TemplateLoadFailure, details);
        };

        match self.write(&record, gateway, day, ctx.make_backup, &mut details) {
            Ok(()) => RunOutcome::succeeded(self.name(), details),
            Err(kind) => RunOutcome::failed(self.name(), kind, details),
        }
    }

    /// Failure details if any required photo (or every optional one) is absent.
    fn missing_images(&self) -> Option<Map<String, Value>> {
        let slots = self.report.slots.iter().zip(&self.images);
        let missing: Vec<String> = slots
            .clone()
            .filter(|(slot, image)| slot.required && !image.exists())
            .map(|(_, image)| image.path().display().to_string())
            .collect();
        let none_present = !self.images.iter().any(ReportImage::exists);

        if missing.is_empty() && !none_present {
            return None;
        }

        let paths: Vec<String> = if missing.is_empty() {
            slots.map(|(_, image)| image.path().display().to_string()).collect()
        } else {
            missing
        };
        let mut details = Map::new();
        details.insert("error".into(), json!("required image missing"));
        details.insert("image_path".into(), json!(paths));
        Some(details)
    }

    async fn extract(&self, ctx: &RunContext<'_>) -> Extraction {
        let names = self.report.slots.iter().flat_map(ImageSlot::field_names);
        let mut record = FieldRecord::new(names);
        let mut details = Map::new();
        let mut vision_failed = false;
        let mut ocr_failed = false;
        let single = self.report.slots.len() == 1;

        for (slot, image) in self.report.slots.iter().zip(&self.images) {
            let mut diag = Map::new();
            diag.insert("image_path".into(), json!(image.path().display().to_string()));

            if !image.exists() {
                info!(slot = slot.key, "Optional image not present");
                diag.insert("skipped".into(), json!(true));
            } else {
                let mut found = FieldRecord::new(slot.field_names());

                match vision::generate_with_retry(ctx.vision, slot.prompt, image, ctx.retry).await {
                    Ok(text) => {
                        info!(slot = slot.key, chars = text.len(), "Vision reply received");
                        read_fields(&slot.fields, &text, &mut found, Source::Primary);
                        diag.insert("vision_text".into(), json!(text));
                    }
                    Err(e) => {
                        warn!(slot = slot.key, error = %e, "Vision service failed");
                        vision_failed = true;
                        diag.insert("vision_error".into(), json!(e.to_string()));
                    }
                }

                if self.needs_fallback(ctx.trigger, &found) {
                    match ctx.ocr {
                        Some(ocr) => match ocr.recognize(image).await {
                            Ok(text) => {
                                info!(slot = slot.key, "Parsing text recognition output");
                                let mut fallback = FieldRecord::new(slot.field_names());
                                read_fields(&slot.fields, &text, &mut fallback, Source::Fallback);
                                found.merge_fallback(&fallback);
                                diag.insert("ocr_text".into(), json!(text));
                            }
                            Err(e) => {
                                warn!(slot = slot.key, error = %e, "Text recognition failed");
                                ocr_failed = true;
                                diag.insert("ocr_error".into(), json!(e.to_string()));
                            }
                        },
                        None => {
                            diag.insert("ocr_error".into(), json!("text recognition disabled"));
                        }
                    }
                }

                for (name, value) in found.iter() {
                    if value.is_present() {
                        info!(field = %name, value = value.value, source = ?value.source, "Field extracted");
                    }
                    record.set(name, value.value, value.source);
                }
            }

            if single {
                details.extend(diag);
            } else {
                details.insert(slot.key.into(), Value::Object(diag));
            }
        }

        record.apply_derived(self.report.derived);

        Extraction {
            record,
            details,
            vision_failed,
            ocr_failed,
        }
    }

    fn needs_fallback(&self, trigger: FallbackTrigger, found: &FieldRecord) -> bool {
        match trigger {
            FallbackTrigger::NoFields => !found.has_any(),
            FallbackTrigger::AnyMissing => found.iter().any(|(name, value)| {
                !value.is_present() && !self.report.derived.iter().any(|d| d.target == name)
            }),
        }
    }

    fn write(
        &self,
        record: &FieldRecord,
        gateway: &mut SpreadsheetGateway,
        day: &str,
        make_backup: bool,
        details: &mut Map<String, Value>,
    ) -> Result<(), ErrorKind> {
        let sheet = gateway.select_sheet(day).map_err(|e| {
            tracing::error!(error = %e, "Day sheet not available");
            details.insert("error".into(), json!(e.to_string()));
            ErrorKind::TemplateLoadFailure
        })?;
        details.insert("sheet".into(), json!(sheet));

        let mut written = Vec::new();
        for binding in &self.bindings {
            let Some(value) = record.value(&binding.field) else {
                continue;
            };
            for cell in &binding.cells {
                let stored = match binding.mode {
                    WriteMode::Set => value,
                    WriteMode::Accumulate => {
                        let previous = gateway.read(cell).ok().flatten();
                        let total = previous.unwrap_or(0.0) + value;
                        details.insert("previous_value".into(), json!(previous));
                        details.insert("new_value".into(), json!(total));
                        total
                    }
                };
                if let Err(e) = gateway.write(cell, stored) {
                    tracing::error!(cell = %cell, error = %e, "Cell write failed");
                    details.insert("error".into(), json!(e.to_string()));
                    return Err(ErrorKind::TemplateLoadFailure);
                }
                info!(field = %binding.field, cell = %cell, value = stored, "Cell written");
                written.push(json!({ "field": binding.field, "cell": cell, "value": stored }));
            }
        }
        details.insert("cells_written".into(), Value::Array(written));

        let target = gateway.template_path().to_path_buf();
        match gateway.persist(&target, make_backup) {
            Ok(outcome) => {
                details.insert("saved_to".into(), json!(outcome.saved_to.display().to_string()));
                details.insert("save_mode".into(), json!(outcome.mode));
                if let Some(backup) = outcome.backup {
                    details.insert("backup".into(), json!(backup.display().to_string()));
                }
                if let Some(reason) = outcome.reason {
                    details.insert("save_note".into(), json!(reason));
                }
                Ok(())
            }
            Err(e) => {
                details.insert("error".into(), json!(e.to_string()));
                Err(ErrorKind::PersistFailure)
            }
        }
    }
}

/// Fill `record` from one reply or recognized text.
///
/// A JSON object in the text is authoritative for the fields it supplies.
/// Fields it omits or leaves null are matched by label over the prose outside
/// the object; without an object, over the whole text.
fn read_fields(fields: &SlotFields, text: &str, record: &mut FieldRecord, source: Source) {
    let located = structured::locate(text);
    let prose = match &located {
        Some((_, span)) => structured::residual_text(text, span),
        None => text.to_string(),
    };
    let object = located.map(|(record, _)| record);

    match fields {
        SlotFields::Scalars(specs) => {
            for spec in specs.iter() {
                let value = object
                    .as_ref()
                    .and_then(|r| structured::lookup_number(r, spec.aliases))
                    .or_else(|| heuristics::first_match(spec.rules, &prose))
                    .map(|v| if spec.integer { v.round() } else { v });
                record.set(spec.name, value, source);
            }
        }
        SlotFields::Row(row) => {
            let values = object
                .as_ref()
                .and_then(|r| structured::lookup_array(r, row.aliases))
                .unwrap_or_else(|| heuristics::header_column(&prose, row.width));
            for (i, value) in values.into_iter().take(row.width).enumerate() {
                record.set(&row.field_name(i), value, source);
            }
        }
    }
}

fn bindings(report: &Report) -> Vec<Binding> {
    let mut out = Vec::new();
    for slot in report.slots {
        match slot.fields {
            SlotFields::Scalars(specs) => out.extend(specs.iter().filter(|s| !s.cells.is_empty()).map(
                |s| Binding {
                    field: s.name.to_string(),
                    cells: s.cells.iter().map(|c| c.to_string()).collect(),
                    mode: s.mode,
                },
            )),
            SlotFields::Row(row) => out.extend((0..row.width).map(|i| Binding {
                field: row.field_name(i),
                cells: vec![row.cell(i)],
                mode: WriteMode::Set,
            })),
        }
    }
    out
}

/// 1 -> A, 26 -> Z, 27 -> AA.
fn column_letters(mut index: u32) -> String {
    let mut letters = Vec::new();
    while index > 0 {
        let rem = (index - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        index = (index - 1) / 26;
    }
    letters.iter().rev().collect()
}
