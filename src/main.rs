use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stake_flow::config::{Config, DEFAULT_CONFIG_PATH};
use stake_flow::export::{read_snapshot, write_snapshot, Snapshot};
use stake_flow::indexer::types::EventSource;
use stake_flow::pipeline::{RunRequest, StakePipeline, Window};
use stake_flow::report;

/// Delegation and unbonding flow reports for validator staking.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML config file. Defaults are used when it does not exist.
    #[clap(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every delegation and unbonding in the window, oldest first.
    Fetch {
        #[clap(flatten)]
        window: WindowArgs,
        #[clap(long, value_enum, default_value = "rpc")]
        source: EventSource,
        #[clap(long)]
        validator: Option<u64>,
        #[clap(long)]
        output: Option<PathBuf>,
    },
    /// Rank addresses by net stake (delegated minus unbonded).
    RankNetStake {
        #[clap(flatten)]
        window: WindowArgs,
        #[clap(long, default_value = "20")]
        top: usize,
        #[clap(long)]
        validator: Option<u64>,
        #[clap(long, value_enum, default_value = "rpc")]
        source: EventSource,
        #[clap(long)]
        output: Option<PathBuf>,
    },
    /// Rank the largest single unbondings.
    RankWithdrawals {
        #[clap(flatten)]
        window: WindowArgs,
        #[clap(long, default_value = "20")]
        top: usize,
        #[clap(long)]
        validator: Option<u64>,
        #[clap(long, value_enum, default_value = "rpc")]
        source: EventSource,
        #[clap(long)]
        output: Option<PathBuf>,
    },
    /// Summarise a previously exported JSON snapshot.
    Report {
        #[clap(long)]
        input: PathBuf,
        #[clap(long, default_value = "20")]
        top: usize,
    },
}

#[derive(Args, Clone, Debug)]
struct WindowArgs {
    /// Look back this many days from now (default 1).
    #[clap(long, conflicts_with_all = ["hours", "from_block", "to_block"])]
    days: Option<i64>,
    /// Look back this many hours from now.
    #[clap(long, conflicts_with_all = ["from_block", "to_block"])]
    hours: Option<i64>,
    #[clap(long, requires = "to_block")]
    from_block: Option<u64>,
    #[clap(long, requires = "from_block")]
    to_block: Option<u64>,
}

impl WindowArgs {
    fn window(&self) -> eyre::Result<Window> {
        if let (Some(from), Some(to)) = (self.from_block, self.to_block) {
            return Ok(Window::Blocks { from, to });
        }
        let span = match (self.days, self.hours) {
            (_, Some(hours)) => chrono::Duration::try_hours(hours),
            (Some(days), None) => chrono::Duration::try_days(days),
            (None, None) => chrono::Duration::try_days(1),
        }
        .filter(|span| *span > chrono::Duration::zero())
        .ok_or_else(|| eyre::eyre!("The time window must be a positive number of days or hours"))?;
        Ok(Window::Recent(span))
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // Logs go to stderr so result tables on stdout stay clean (set RUST_LOG to tune)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }

    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded environment variables from {:?}", path),
        Err(e) if e.not_found() => tracing::debug!("No .env file found"),
        Err(e) => return Err(eyre::eyre!("Failed to load .env file: {}", e)),
    }

    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> eyre::Result<()> {
    if let Commands::Report { input, top } = &cli.cmd {
        let snapshot = read_snapshot(input)?;
        print!("{}", report::render_snapshot(&snapshot, *top));
        return Ok(());
    }

    let config = Config::load_or_default(&cli.config)?;
    tracing::info!(
        rpc_endpoints = config.rpc.endpoints.len(),
        "Configuration loaded from {}",
        cli.config
    );
    let mut pipeline = StakePipeline::init(config)?;

    match cli.cmd {
        Commands::Fetch {
            window,
            source,
            validator,
            output,
        } => {
            let request = RunRequest {
                window: window.window()?,
                source,
                validator,
                kind: None,
                top: None,
            };
            let snapshot = pipeline.events(&request).await?;
            print!("{}", report::render_header(&snapshot.query));
            print!("{}", report::render_events(&snapshot.results));
            print!("{}", report::render_summary(&snapshot.summary));
            export(output, &snapshot)?;
        }
        Commands::RankNetStake {
            window,
            top,
            validator,
            source,
            output,
        } => {
            let request = RunRequest {
                window: window.window()?,
                source,
                validator,
                kind: None,
                top: Some(top),
            };
            let snapshot = pipeline.net_stake(&request).await?;
            print!("{}", report::render_header(&snapshot.query));
            print!("{}", report::render_net_stake(&snapshot.results));
            print!("{}", report::render_summary(&snapshot.summary));
            export(output, &snapshot)?;
        }
        Commands::RankWithdrawals {
            window,
            top,
            validator,
            source,
            output,
        } => {
            let request = RunRequest {
                window: window.window()?,
                source,
                validator,
                kind: None,
                top: Some(top),
            };
            let snapshot = pipeline.withdrawals(&request).await?;
            print!("{}", report::render_header(&snapshot.query));
            print!("{}", report::render_withdrawals(&snapshot.results));
            print!("{}", report::render_summary(&snapshot.summary));
            export(output, &snapshot)?;
        }
        Commands::Report { .. } => {}
    }

    Ok(())
}

fn export<T: serde::Serialize>(output: Option<PathBuf>, snapshot: &Snapshot<T>) -> eyre::Result<()> {
    if let Some(path) = output {
        write_snapshot(&path, snapshot)?;
        println!("Exported {} rows to {}", snapshot.results.len(), path.display());
    }
    Ok(())
}
