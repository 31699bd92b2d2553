use clap::{Parser, Subcommand};
use scanner_core::{
    config::{Dashboard, ScannerConfig},
    engine::ScannerEngine,
};
use scanner_feed::{
    error::FeedError,
    init_logging,
    reference::ReferenceClient,
    runner::{RunnerConfig, ScannerRunner},
};
use tracing::{error, info, warn};

/// Headless quote scanner. Without a subcommand, runs the scanner and prints one JSON
/// snapshot per line.
#[derive(Debug, Parser)]
#[command(name = "quote-scanner", version)]
#[command(about = "Streaming spread and session-change scanner")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// Add an index to the configured dashboard's index bar
    AddIndex {
        /// Instrument id or ticker known to the backend
        name: String,
        /// Name shown in the index bar, defaults to `name`
        display: Option<String>,
    },
    /// Remove an index from the configured dashboard's index bar
    RemoveIndex {
        /// Instrument id or ticker known to the backend
        name: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    let config = match ScannerConfig::default().with_env_overrides() {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "invalid scanner configuration");
            std::process::exit(1);
        }
    };
    let runner_config = RunnerConfig::from_env();

    if let Some(command) = cli.command {
        let code = match manage_indices(config.dashboard, &runner_config, &command).await {
            Ok(true) => 0,
            Ok(false) => {
                warn!(?command, "index request rejected by backend");
                1
            }
            Err(error) => {
                error!(%error, ?command, "index request failed");
                1
            }
        };
        std::process::exit(code);
    }

    info!(
        dashboard = ?config.dashboard,
        ws_url = %runner_config.stream.url,
        api_url = %runner_config.reference.base_url,
        "starting quote scanner"
    );

    let (runner, mut snapshots) = match ScannerRunner::new(ScannerEngine::new(config), runner_config)
    {
        Ok(runner) => runner,
        Err(error) => {
            error!(%error, "failed to initialise scanner runner");
            std::process::exit(1);
        }
    };

    // One JSON line per published snapshot on stdout
    tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let line = snapshots
                .borrow_and_update()
                .as_ref()
                .map(serde_json::to_string);
            match line {
                Some(Ok(line)) => println!("{line}"),
                Some(Err(error)) => error!(%error, "failed to serialise snapshot"),
                None => {}
            }
        }
    });

    if let Err(error) = runner.run().await {
        error!(%error, "scanner runner failed");
        std::process::exit(1);
    }
}

async fn manage_indices(
    dashboard: Dashboard,
    config: &RunnerConfig,
    command: &Command,
) -> Result<bool, FeedError> {
    let client = ReferenceClient::new(&config.reference)?;

    match command {
        Command::AddIndex { name, display } => {
            let display = display.as_deref().unwrap_or(name.as_str());
            client.add_index(dashboard, name, display).await
        }
        Command::RemoveIndex { name } => client.remove_index(dashboard, name).await,
    }
}
