use analyzer::{Analyzer, AnalyzerConfig};
use clap::Parser;
use crawler::{ContentExtractor, Fetcher};
use engine::{BatchScheduler, EngineConfig, SchedulerError};
use monitor::{AppState, LogBuffer, MonitorServer};
use std::io::{BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use storage::{ProgressTracker, RotatingStore, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EXIT_OK: u8 = 0;
const EXIT_SCHEDULER: u8 = 1;
const EXIT_STORE: u8 = 2;
const EXIT_CONFIG: u8 = 3;

const PROBE_INTERVAL: Duration = Duration::from_secs(60);
const FORCE_EXIT_WINDOW: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "crawl-engine", about = "Backlink crawling and link-analysis engine")]
struct Cli {
    /// Print the current progress record and exit
    #[arg(long)]
    status: bool,

    /// Clear saved progress after confirmation and exit
    #[arg(long)]
    reset: bool,

    /// Run one link-graph analysis pass and exit
    #[arg(long)]
    analyze: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if cli.status {
        let tracker = ProgressTracker::new(&config.progress_file);
        let progress = tracker.load();
        println!(
            "{}",
            serde_json::to_string_pretty(&progress).expect("progress serializes")
        );
        return ExitCode::from(EXIT_OK);
    }

    if cli.reset {
        return reset_progress(&config);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");
    ExitCode::from(runtime.block_on(run(config, cli.analyze)))
}

fn reset_progress(config: &EngineConfig) -> ExitCode {
    print!("Reset crawl progress to page 1? [y/N] ");
    std::io::stdout().flush().ok();

    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        eprintln!("could not read confirmation");
        return ExitCode::from(EXIT_SCHEDULER);
    }
    if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
        println!("aborted");
        return ExitCode::from(EXIT_OK);
    }

    let tracker = ProgressTracker::new(&config.progress_file);
    match tracker.reset() {
        Ok(()) => {
            println!("progress reset");
            ExitCode::from(EXIT_OK)
        }
        Err(e) => {
            eprintln!("reset failed: {e}");
            ExitCode::from(EXIT_STORE)
        }
    }
}

async fn run(config: EngineConfig, analyze_once: bool) -> u8 {
    let logs = LogBuffer::default();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(logs.layer())
        .init();

    let recrawl_window = chrono::Duration::days(config.recrawl_window_days);
    let store = match RotatingStore::open(
        config.databases.clone(),
        &config.frontier_db,
        recrawl_window,
    ) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "could not open databases");
            return EXIT_STORE;
        }
    };

    if analyze_once {
        let analyzer = Analyzer::new(store.clone(), AnalyzerConfig::default());
        return match analyzer.run().await {
            Ok(report) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).expect("report serializes")
                );
                EXIT_OK
            }
            Err(e) => {
                error!(error = %e, "analysis pass failed");
                EXIT_STORE
            }
        };
    }

    let fetcher = match Fetcher::new(config.crawler_config()) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(e) => {
            error!(error = %e, "could not build fetcher");
            return EXIT_CONFIG;
        }
    };
    let extractor = Arc::new(ContentExtractor::default());
    let tracker = Arc::new(ProgressTracker::new(&config.progress_file));
    tracker.load();

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone(), tracker.clone());
    spawn_monitor(&config, store.clone(), tracker.clone(), logs.clone()).await;
    spawn_probe_loop(store.clone(), cancel.clone());
    spawn_analyzer_loop(&config, store.clone(), cancel.clone());

    let scheduler = BatchScheduler::new(
        config,
        store,
        fetcher,
        extractor,
        tracker,
        cancel.clone(),
    );

    match scheduler.run().await {
        Ok(()) => {
            info!("scheduler stopped cleanly");
            EXIT_OK
        }
        Err(SchedulerError::Store(StoreError::NoCapacity)) => {
            error!("every database is at capacity; add capacity or raise quotas");
            EXIT_STORE
        }
        Err(SchedulerError::Store(e)) => {
            error!(error = %e, "unrecoverable store error");
            EXIT_STORE
        }
    }
}

async fn spawn_monitor(
    config: &EngineConfig,
    store: Arc<RotatingStore>,
    tracker: Arc<ProgressTracker>,
    logs: LogBuffer,
) {
    let state = AppState::new(store, tracker.handle(), logs);
    match MonitorServer::bind(config.monitor_addr, state).await {
        Ok(server) => {
            tokio::spawn(async move {
                if let Err(e) = server.serve().await {
                    warn!(error = %e, "monitoring api stopped");
                }
            });
        }
        Err(e) => {
            // The crawl core outlives a broken monitoring surface.
            warn!(addr = %config.monitor_addr, error = %e, "could not start monitoring api");
        }
    }
}

fn spawn_probe_loop(store: Arc<RotatingStore>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROBE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => store.probe_all(),
            }
        }
    });
}

fn spawn_analyzer_loop(config: &EngineConfig, store: Arc<RotatingStore>, cancel: CancellationToken) {
    let interval = Duration::from_secs(config.analyze_interval_hours * 3600);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let analyzer = Analyzer::new(store.clone(), AnalyzerConfig::default());
            match analyzer.run().await {
                Ok(report) => info!(
                    nodes = report.nodes,
                    domains = report.domains_scored,
                    spam = report.spam_links,
                    "scheduled analysis pass complete"
                ),
                Err(e) => warn!(error = %e, "scheduled analysis pass failed"),
            }
        }
    });
}

/// First signal drains the scheduler; a second one within five
/// seconds flushes progress best-effort and exits on the spot. Once
/// the window lapses the drain keeps going and the next signal counts
/// as a first signal again.
fn spawn_signal_handler(cancel: CancellationToken, tracker: Arc<ProgressTracker>) {
    tokio::spawn(async move {
        loop {
            shutdown_signal().await;
            info!("shutdown signal received, draining");
            cancel.cancel();

            tokio::select! {
                _ = shutdown_signal() => {
                    warn!("second signal within 5s, exiting immediately");
                    let mut progress = tracker.handle().snapshot();
                    progress.running = false;
                    let _ = tracker.save(&mut progress);
                    std::process::exit(EXIT_SCHEDULER as i32);
                }
                _ = tokio::time::sleep(FORCE_EXIT_WINDOW) => {
                    info!("no second signal, continuing drain");
                }
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
