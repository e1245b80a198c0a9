use clap::{Parser, Subcommand};
use consig_margin::config::{self, Config};
use consig_margin::document::SourceDocument;
use consig_margin::error::{AnalysisError, ConfigError};
use consig_margin::llm_extract;
use consig_margin::margin::ExtractedData;
use consig_margin::report;
use consig_margin::session::{AnalysisOutcome, AnalysisRecord, AnalysisSession};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "consig-margin")]
#[command(about = "Margem consignável a partir do contracheque e do extrato SIAPE")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract the documents with the AI backend and report the margins
    Analyze {
        /// Payslip (contracheque), PDF or image. Required.
        #[arg(long)]
        contracheque: Option<PathBuf>,

        /// Payroll deduction statement (extrato de consignações)
        #[arg(long)]
        extrato: Option<PathBuf>,

        /// Print the calculation as JSON instead of the text report
        #[arg(long)]
        json: bool,

        /// Also write the extracted data to this file, for `calc`
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Recompute margins from a previously saved extraction
    Calc {
        extracted: PathBuf,

        #[arg(long)]
        json: bool,
    },
    /// Inspect or edit the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Set the model of the selected backend
    SetModel { model: String },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("failed to read {path}: {source}")]
    ReadExtraction { path: String, source: std::io::Error },

    #[error("failed to write {path}: {source}")]
    WriteExtraction { path: String, source: std::io::Error },

    #[error("invalid extraction file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to render config: {0}")]
    Toml(#[from] toml::ser::Error),
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Analysis(e.into())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // logs go to stderr so reports and JSON stay clean on stdout
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "Command failed");
            eprintln!("erro: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Analyze {
            contracheque,
            extrato,
            json,
            save,
        } => analyze(&cli.config, contracheque, extrato, json, save).await,
        Command::Calc { extracted, json } => calc(&extracted, json),
        Command::Config { action } => match action {
            ConfigAction::Show => {
                let cfg = Config::load_or_default(&cli.config)?;
                print!("{}", toml::to_string_pretty(&cfg)?);
                Ok(())
            }
            ConfigAction::SetModel { model } => {
                Config::update_model(&cli.config, &model)?;
                Ok(())
            }
        },
    }
}

async fn analyze(
    config_path: &Path,
    contracheque: Option<PathBuf>,
    extrato: Option<PathBuf>,
    json: bool,
    save: Option<PathBuf>,
) -> Result<(), CliError> {
    let Some(contracheque) = contracheque else {
        return Err(AnalysisError::MissingPrimaryDocument.into());
    };

    let cfg = Config::load_or_default(config_path)?;
    let primary = load_document(&contracheque)?;
    let secondary = extrato.as_deref().map(load_document).transpose()?;

    let extractor = llm_extract::build_extractor(&cfg.llm)?;
    let session = AnalysisSession::new();

    match session
        .analyze(extractor.as_ref(), Some(&primary), secondary.as_ref())
        .await?
    {
        AnalysisOutcome::Committed => {}
        AnalysisOutcome::Superseded => {
            info!("Analysis superseded, nothing to show");
            return Ok(());
        }
    }

    let Some(record) = session.current() else {
        return Ok(());
    };

    if let Some(path) = save {
        let body = serde_json::to_string_pretty(&record.data)?;
        fs::write(&path, body).map_err(|source| CliError::WriteExtraction {
            path: path.display().to_string(),
            source,
        })?;
        info!(path = %path.display(), "Extraction saved");
    }

    print_record(&record, json)
}

fn load_document(path: &Path) -> Result<SourceDocument, AnalysisError> {
    let doc = SourceDocument::load(path)?;
    info!(
        name = %doc.name,
        mime = doc.mime_type,
        size_mb = format!("{:.2}", doc.size_mb()),
        "Document loaded"
    );
    Ok(doc)
}

fn calc(path: &Path, json: bool) -> Result<(), CliError> {
    let content = fs::read_to_string(path).map_err(|source| CliError::ReadExtraction {
        path: path.display().to_string(),
        source,
    })?;
    let data: ExtractedData = serde_json::from_str(&content)?;

    let session = AnalysisSession::new();
    session.load(data, Vec::new());
    match session.current() {
        Some(record) => print_record(&record, json),
        None => Ok(()),
    }
}

fn print_record(record: &AnalysisRecord, json: bool) -> Result<(), CliError> {
    if json {
        println!("{}", report::render_json(&record.result)?);
        return Ok(());
    }

    print!("{}", report::render_dashboard(record));
    if let Some(alert) = report::render_negative_alert(&record.result) {
        println!();
        print!("{alert}");
    }
    println!();
    print!("{}", report::render_ledger(&record.result));
    Ok(())
}
