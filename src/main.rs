mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use secrecy::SecretString;
use tracing::{error, info, warn};

use bulk_export::config::{ExportConfig, DEFAULT_EXECUTE_TIME};
use bulk_export::error::AppError;
use bulk_export::export::{ExportOutcome, Exporter, TracingProgress};
use bulk_export::salesforce::{redact_id, BulkQueryClient, SalesforceClient};

const EXIT_FAILURE: u8 = 1;
const EXIT_TIMED_OUT: u8 = 2;

#[derive(Parser)]
#[command(
    name = "bulk-export",
    version,
    about = "Export a Salesforce object to CSV through the Bulk API"
)]
struct Cli {
    /// Subject type to export (e.g. Asset, BIL_Identifier_Mapping__c)
    subject: String,

    /// Salesforce instance URL (e.g. https://example.my.salesforce.com)
    instance_url: String,

    /// Session id sent with every request
    #[arg(env = "SFDC_SESSION_ID", hide_env_values = true)]
    session_id: String,

    /// JSON configuration file; built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory the report is written to (overrides the config)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Execute-time cut-off substituted into the query
    #[arg(long, default_value = DEFAULT_EXECUTE_TIME)]
    as_of: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    logging::init(&cli.log_level);
    info!(
        "==================== bulk-export {} : {} ====================",
        env!("CARGO_PKG_VERSION"),
        cli.subject
    );

    match run(cli).await {
        Ok(ExportOutcome::Exported(summary)) => {
            info!(
                "Export complete: {} records in {}",
                summary.records_written,
                summary.output_path.display()
            );
            ExitCode::SUCCESS
        }
        Ok(ExportOutcome::ZeroBatches { job_id }) => {
            warn!(
                "Job {} produced no batches; no report written",
                redact_id(&job_id)
            );
            ExitCode::SUCCESS
        }
        Ok(ExportOutcome::TimedOut { job_id, attempts }) => {
            error!(
                "Job {} did not complete within {} status checks; no report written",
                redact_id(&job_id),
                attempts
            );
            ExitCode::from(EXIT_TIMED_OUT)
        }
        Err(e) => {
            error!("Export failed: {}", e);
            let presentation = e.to_presentation();
            eprintln!("{}: {}", presentation.title, presentation.message);
            if let Some(action) = presentation.action {
                eprintln!("{}", action);
            }
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run(cli: Cli) -> Result<ExportOutcome, AppError> {
    let mut config = match &cli.config {
        Some(path) => ExportConfig::load(path)?,
        None => ExportConfig::default(),
    };
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }

    let transport = SalesforceClient::new(
        &cli.instance_url,
        SecretString::from(cli.session_id),
        &config.auth_header_name,
    )?;
    let api = BulkQueryClient::new(transport, config.api_version.clone());

    let progress = TracingProgress;
    Exporter::new(&api, &config, &progress)
        .run(&cli.subject, &cli.as_of)
        .await
}
