//! Bucket ACL probe - verifies owner grants after upload, append, mkdir and copy

use bucket_acl_probe::config::{BackendConfig, Config};
use bucket_acl_probe::orchestrator::{RunSummary, Scenario, TestOrchestrator};
use bucket_acl_probe::storage;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScenarioArg {
    All,
    Upload,
    Mkdir,
    CopyLocal,
}

impl ScenarioArg {
    fn scenarios(self) -> Vec<Scenario> {
        match self {
            ScenarioArg::All => Scenario::ALL.to_vec(),
            ScenarioArg::Upload => vec![Scenario::UploadAppend],
            ScenarioArg::Mkdir => vec![Scenario::Mkdir],
            ScenarioArg::CopyLocal => vec![Scenario::CopyFromLocal],
        }
    }
}

/// Bucket ACL probe - checks that written objects carry the owner's grant
#[derive(Parser, Debug)]
#[command(name = "bucket_acl_probe")]
#[command(author, about, long_about = None)]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (built ", env!("BAP_BUILD_TIME"), ")"))]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Use a filesystem bucket rooted at DIR (overrides config)
    #[arg(short, long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Scenario(s) to run
    #[arg(short, long, value_enum, default_value_t = ScenarioArg::All)]
    scenario: ScenarioArg,

    /// Write the run summary as JSON to FILE
    #[arg(short, long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match Config::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Cannot load {}: {}", path, e);
                return ExitCode::from(2);
            }
        },
        None => Config::load(),
    };

    let log_level = if cli.verbose {
        "bucket_acl_probe=trace".to_string()
    } else {
        config.log_level.clone()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(cli, config).await {
        Ok(summary) if summary.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli, mut config: Config) -> Result<RunSummary, Box<dyn std::error::Error>> {
    if let Some(dir) = cli.data_dir {
        let (bucket, owner_id) = match config.backend {
            BackendConfig::Filesystem {
                bucket, owner_id, ..
            }
            | BackendConfig::Memory { bucket, owner_id } => (bucket, owner_id),
            BackendConfig::S3 { bucket, .. } => {
                (bucket, bucket_acl_probe::config::DEFAULT_OWNER_ID.to_string())
            }
        };
        config.backend = BackendConfig::Filesystem {
            path: dir,
            bucket,
            owner_id,
        };
    }

    let scenarios = cli.scenario.scenarios();
    info!("Starting bucket ACL probe");
    match &config.backend {
        BackendConfig::Filesystem { path, bucket, .. } => {
            info!("  Backend: Filesystem ({:?}, bucket {})", path, bucket);
        }
        BackendConfig::Memory { bucket, .. } => info!("  Backend: Memory (bucket {})", bucket),
        BackendConfig::S3 {
            endpoint,
            bucket,
            region,
            fs_bucket,
            ..
        } => {
            info!("  Backend: S3 (bucket {}, region {}, fs_bucket {})", bucket, region, fs_bucket);
            if let Some(ep) = endpoint {
                info!("  Endpoint: {}", ep);
            }
        }
    }
    info!(
        "  Chunk {} bytes, modulus {}, expected permission {}",
        config.probe.chunk_buffer_size, config.probe.modulus, config.probe.expected_permission
    );

    let summary = if config.enabled {
        let store = storage::from_config(&config.backend).await?;
        let orchestrator = TestOrchestrator::from_config(store, config.probe.clone())?;
        orchestrator.run_all(&scenarios).await
    } else {
        info!("Probing disabled (enabled = false); skipping all scenarios");
        RunSummary::all_skipped(&scenarios, "probing disabled")
    };

    info!(
        "Summary: {} passed, {} skipped, {} failed",
        summary.passed(),
        summary.skipped(),
        summary.failed()
    );

    if let Some(path) = cli.report {
        std::fs::write(&path, serde_json::to_vec_pretty(&summary)?)?;
        info!("Report written to {:?}", path);
    }

    Ok(summary)
}
