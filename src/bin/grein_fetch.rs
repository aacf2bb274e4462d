use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use grein_loader::config::ConfigLoader;
use grein_loader::domain::{CountMode, DatasetId};
use grein_loader::error::{ErrorKind, GreinError};
use grein_loader::output::{JsonOutput, write_counts_csv};
use grein_loader::GreinClient;

#[derive(Parser)]
#[command(name = "grein-fetch")]
#[command(about = "Fetch GEO datasets and the dataset catalog from GREIN")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch description, metadata and count matrix of one dataset")]
    Dataset(DatasetArgs),
    #[command(about = "List datasets available on GREIN")]
    Overview(OverviewArgs),
}

#[derive(Args)]
struct DatasetArgs {
    dataset: String,

    #[arg(long, value_enum, default_value = "RAW")]
    mode: CountMode,

    #[arg(long)]
    counts_out: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct OverviewArgs {
    #[arg(long)]
    count: Option<u64>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<GreinError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GreinError) -> u8 {
    match error.kind() {
        ErrorKind::Validation | ErrorKind::Config => 2,
        ErrorKind::Connection
        | ErrorKind::Streaming
        | ErrorKind::Protocol
        | ErrorKind::DataFetch => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let client = GreinClient::new(config)?;

    match cli.command {
        Commands::Dataset(args) => {
            let dataset: DatasetId = args.dataset.parse()?;
            let record = client.fetch_dataset_with(&dataset, args.mode)?;
            if let Some(path) = &args.counts_out {
                match &record.count_matrix {
                    Some(matrix) => write_counts_csv(matrix, path)?,
                    None => tracing::warn!("count matrix unavailable, {path} not written"),
                }
            }
            JsonOutput::print_dataset(&record).into_diagnostic()
        }
        Commands::Overview(args) => {
            let entries = client.fetch_overview(args.count)?;
            JsonOutput::print_overview(&entries).into_diagnostic()
        }
    }
}
