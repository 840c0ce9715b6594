//! Generates a service reminder for one customer from a local workbook.
//!
//! By default the message is written back into the workbook's
//! `mail_content` column; `--sink file` stores it under the mail folder
//! instead.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use service_reminder_api::config::Config;
use service_reminder_api::dataset::Dataset;
use service_reminder_api::models::StyleOptions;
use service_reminder_api::persistence::{sink_for, DatasetSource, PersistenceMode};
use service_reminder_api::pipeline::ReminderPipeline;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SinkArg {
    Spreadsheet,
    File,
}

impl From<SinkArg> for PersistenceMode {
    fn from(arg: SinkArg) -> Self {
        match arg {
            SinkArg::Spreadsheet => PersistenceMode::Spreadsheet,
            SinkArg::File => PersistenceMode::File,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "remind", about = "Generate a service reminder from a customer workbook")]
struct Args {
    /// Workbook containing the customer and vehicle rows
    #[arg(long)]
    file: PathBuf,

    /// VIN or customer id of the row to use
    #[arg(long)]
    key: String,

    /// formal, normal or informal
    #[arg(long)]
    formality: Option<String>,

    /// short, medium or long
    #[arg(long)]
    length: Option<String>,

    #[arg(long, value_enum, default_value = "spreadsheet")]
    sink: SinkArg,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "service_reminder_api=info,remind=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let dataset = Dataset::open(&args.file)
        .map_err(|e| anyhow::anyhow!("{}", e))
        .with_context(|| format!("loading {}", args.file.display()))?;
    tracing::info!(
        "Loaded {} rows from sheet '{}'",
        dataset.len(),
        dataset.sheet_name()
    );

    let sink = sink_for(
        args.sink.into(),
        &config.mail_folder,
        &config.spreadsheet_output_dir,
    );
    let pipeline = ReminderPipeline::from_config_with_sink(&config, sink)
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    let style = StyleOptions::from_raw(args.formality.as_deref(), args.length.as_deref());
    let source = DatasetSource::Path(args.file.clone());

    let outcome = pipeline
        .run(&dataset, &source, &args.key, style)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    if let Some(warning) = &outcome.duplicate_warning {
        eprintln!(
            "warning: '{}' also matches rows {:?}; used row {}",
            warning.key, warning.ignored_rows, warning.selected_row
        );
    }
    eprintln!(
        "Loyalty discount: {:?}, repair cost insurance: {:?}, due: {}",
        outcome.signals.loyalty_field_state(),
        outcome.signals.insurance_field_state(),
        outcome.signals.service_due_text()
    );
    eprintln!(
        "Generated at {}, saved to {}",
        outcome.message.generated_at.to_rfc3339(),
        outcome.persisted.location.display()
    );
    println!("{}", outcome.message.text);

    Ok(())
}
