mod config;
mod error;
mod heuristics;
mod image;
mod numbers;
mod ocr;
mod orchestrator;
mod record;
mod strategy;
mod structured;
mod vision;
mod workbook;

use clap::Parser;
use orchestrator::{Orchestrator, RunOutcome};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use strategy::{ExtractionStrategy, Report, reports};
use time::{Date, OffsetDateTime, macros::format_description};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "daybook",
    version,
    about = "Read the day's report photos and fill in the daily report workbook"
)]
struct Cli {
    /// Day sheet to fill: a day of the month (17) or a date (2026-10-17).
    #[arg(long, value_name = "DAY", conflicts_with = "yesterday")]
    day: Option<String>,

    /// Fill yesterday's sheet.
    #[arg(long, default_value_t = false)]
    yesterday: bool,

    /// Extract and report without touching the workbook.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Run only these reports (repeatable).
    #[arg(long = "only", value_name = "NAME")]
    only: Vec<String>,

    /// Config file; defaults to .config/daybook.toml when that exists.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

const DEFAULT_CONFIG: &str = ".config/daybook.toml";

#[derive(Serialize)]
struct RunReport<'a> {
    day: &'a str,
    dry_run: bool,
    outcomes: &'a [RunOutcome],
}

#[tokio::main]
async fn main() -> ExitCode {
    // init tracing; stdout is reserved for the run report
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!(error = %e, "Run aborted");
            ExitCode::from(2)
        }
    }
}

/// Returns whether every strategy succeeded.
async fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let cfg = match &cli.config {
        Some(path) => config::Config::load(path)?,
        None => config::Config::load_or_default(DEFAULT_CONFIG)?,
    };
    let day = resolve_day(cli.day.as_deref(), cli.yesterday, today())?;
    let selected = select_reports(&cli.only)?;

    // fail fast on missing credentials, before any photo is looked at
    let vision = vision::GeminiClient::from_config(&cfg.vision)?;
    let ocr: Option<Box<dyn ocr::TextRecognizer>> = if cfg.ocr.enabled {
        Some(Box::new(ocr::TesseractCli::from_config(&cfg.ocr)))
    } else {
        info!("Text recognition fallback disabled");
        None
    };

    let strategies = selected
        .into_iter()
        .map(|report| ExtractionStrategy::new(report, &cfg))
        .collect();
    let mut orch = Orchestrator::new(&cfg, strategies, Box::new(vision), ocr);
    let outcomes = orch.run(&day, cli.dry_run).await?;

    let report = RunReport {
        day: &day,
        dry_run: cli.dry_run,
        outcomes: &outcomes,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(outcomes.iter().all(|o| o.success))
}

fn today() -> Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date()
}

/// Sheet name for the requested day. Sheets are named by bare day of month.
fn resolve_day(day: Option<&str>, yesterday: bool, today: Date) -> Result<String, String> {
    if yesterday {
        let date = today
            .previous_day()
            .ok_or_else(|| format!("no day before {today}"))?;
        return Ok(date.day().to_string());
    }

    let Some(raw) = day.map(str::trim) else {
        return Ok(today.day().to_string());
    };

    if let Ok(n) = raw.parse::<u8>() {
        return match n {
            1..=31 => Ok(n.to_string()),
            _ => Err(format!("day {n} is out of range 1-31")),
        };
    }

    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .map(|d| d.day().to_string())
        .map_err(|e| format!("invalid --day '{raw}': {e}"))
}

fn select_reports(only: &[String]) -> Result<Vec<&'static Report>, String> {
    for name in only {
        if reports::by_name(name).is_none() {
            let known: Vec<_> = reports::ALL.iter().map(|r| r.name).collect();
            return Err(format!("unknown report '{name}' (known: {})", known.join(", ")));
        }
    }
    Ok(reports::ALL
        .iter()
        .copied()
        .filter(|r| only.is_empty() || only.iter().any(|n| n == r.name))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_resolve_day() {
        let today = date!(2026 - 03 - 01);
        assert_eq!(resolve_day(None, false, today).unwrap(), "1");
        assert_eq!(resolve_day(Some("17"), false, today).unwrap(), "17");
        assert_eq!(resolve_day(Some("07"), false, today).unwrap(), "7");
        assert_eq!(resolve_day(Some("2026-02-28"), false, today).unwrap(), "28");
        assert_eq!(resolve_day(None, true, today).unwrap(), "28");
        assert!(resolve_day(Some("32"), false, today).is_err());
        assert!(resolve_day(Some("0"), false, today).is_err());
        assert!(resolve_day(Some("tomorrow"), false, today).is_err());
    }

    #[test]
    fn test_select_reports() {
        assert_eq!(select_reports(&[]).unwrap().len(), 8);

        // run order is kept regardless of flag order
        let picked = select_reports(&["batch".into(), "lotto".into()]).unwrap();
        let names: Vec<_> = picked.iter().map(|r| r.name).collect();
        assert_eq!(names, ["lotto", "batch"]);

        assert!(select_reports(&["payroll".into()]).is_err());
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from(["daybook", "--day", "17", "--dry-run", "--only", "batch"])
            .unwrap();
        assert_eq!(cli.day.as_deref(), Some("17"));
        assert!(cli.dry_run);
        assert_eq!(cli.only, ["batch"]);
        assert!(Cli::try_parse_from(["daybook", "--day", "17", "--yesterday"]).is_err());
    }
}
