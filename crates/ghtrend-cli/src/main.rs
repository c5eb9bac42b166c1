use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use ghtrend_core::{PublishSelection, TracingSink};
use ghtrend_pipeline::{traced, Pipeline, PipelineConfig};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ghtrend")]
#[command(about = "Turn trending GitHub repositories into published blog articles")]
struct Cli {
    /// YAML config file; environment variables override its values.
    #[arg(long, global = true, env = "GHTREND_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// -v for debug, -vv for trace. `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the article database and schema.
    InitDb,
    /// Fetch the trending listing and write the candidate list.
    Discover,
    /// Fetch README and metadata for every candidate.
    Enrich,
    /// Generate and store articles for new repository versions.
    Generate,
    /// Publish pending articles, oldest first.
    Publish {
        /// Publish at most N articles (default 2).
        #[arg(long)]
        limit: Option<u32>,
        /// Publish every pending article. Wins over --limit.
        #[arg(long)]
        bulk: bool,
        /// Reprocess failed articles (not implemented).
        #[arg(long)]
        retry: bool,
    },
    /// Discover, enrich, generate and publish in one go.
    Run {
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        bulk: bool,
    },
    /// Run collection and publication on their cron schedules until Ctrl-C.
    Schedule,
    /// Show article counts by status.
    Status,
}

fn init_tracing(format: LogFormat, verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = PipelineConfig::load(cli.config.as_deref())?;
    let pipeline = Arc::new(Pipeline::new(config, Arc::new(TracingSink)));

    match cli.command {
        Commands::InitDb => {
            traced("init-db", pipeline.init_db()).await?;
            println!("database ready: {}", pipeline.store().path().display());
        }
        Commands::Discover => {
            let candidates = traced("discover", pipeline.discover()).await?;
            println!("discovery complete: candidates={}", candidates.len());
            for candidate in &candidates {
                println!("  {}", candidate.full_name);
            }
        }
        Commands::Enrich => {
            let records = traced("enrich", pipeline.enrich()).await?;
            println!("enrichment complete: records={}", records.len());
            for record in &records {
                println!("  {} stars={} license={}", record.full_name, record.star_count, record.license_name);
            }
        }
        Commands::Generate => {
            let summary = traced("generate", pipeline.generate()).await?;
            println!(
                "generation complete: processed={} generated={} skipped={} failed={}",
                summary.processed, summary.generated, summary.skipped, summary.failed
            );
        }
        Commands::Publish { limit, bulk, retry } => {
            if retry {
                warn!("--retry is not implemented; no articles were changed");
                return Ok(());
            }
            let selection = PublishSelection::from_flags(limit, bulk);
            let summary = traced("publish", pipeline.publish(selection)).await?;
            println!(
                "publication complete: selected={} succeeded={} failed={}",
                summary.selected, summary.succeeded, summary.failed
            );
        }
        Commands::Run { limit, bulk } => {
            let selection = PublishSelection::from_flags(limit, bulk);
            let summary = traced("run", pipeline.run_all(selection)).await?;
            println!(
                "run complete: candidates={} enriched={} generated={} published={} failed={}",
                summary.collect.candidates,
                summary.collect.enriched,
                summary.collect.generation.generated,
                summary.publication.succeeded,
                summary.publication.failed
            );
        }
        Commands::Schedule => {
            ghtrend_pipeline::run_scheduler(pipeline.clone()).await?;
        }
        Commands::Status => {
            let counts = traced("status", pipeline.status()).await?;
            println!(
                "articles: pending={} success={} failed={} total={}",
                counts.pending,
                counts.success,
                counts.failed,
                counts.total()
            );
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "command failed");
            ExitCode::FAILURE
        }
    }
}
