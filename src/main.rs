mod config;
mod error;
mod model;
mod notification;
mod notifier;
mod runner;
mod sampler;
mod watcher;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{AppConfig, NotifierConfig};
use notifier::Notifier;
use notifier::telegram::TelegramNotifier;
use notifier::terminal::TerminalNotifier;
use sampler::Sampler;
use sampler::poloniex::PoloniexSampler;
use watcher::{ThresholdWatcher, WatcherConfig};

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("runtime error")]
    Runtime,
}

#[derive(Parser)]
#[command(
    name = "poloniex-watcher",
    about = "Notify once when a Poloniex ticker crosses a threshold"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Run a single tick per watcher, deliver any notification, and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    let config = config::load(Path::new(&cli.config)).change_context(AppError::Config)?;

    init_tracing(&config);

    // ── Sampler ───────────────────────────────────────────────────────────────
    let sampler: Arc<dyn Sampler> = Arc::new(build_sampler(&config)?);

    // ── Notifier ──────────────────────────────────────────────────────────────
    let notifier = build_notifier(&config.notifier)?;

    // ── Watchers ──────────────────────────────────────────────────────────────
    let watchers: Vec<Arc<ThresholdWatcher>> = WatcherConfig::from_config(&config)
        .change_context(AppError::Config)?
        .into_iter()
        .map(|wc| Arc::new(ThresholdWatcher::new(wc, Arc::clone(&sampler))))
        .collect();

    if cli.once {
        return run_once(&watchers, notifier.as_ref()).await;
    }

    let cancel = CancellationToken::new();
    let mut task_handles = Vec::new();

    for watcher in &watchers {
        let handle = tokio::spawn(runner::watch_loop(
            Arc::clone(watcher),
            Arc::clone(&notifier),
            cancel.clone(),
        ));
        task_handles.push(handle);
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .change_context(AppError::Runtime)?;

    info!("ctrl+c received, shutting down");
    cancel.cancel();

    for handle in task_handles {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    info!("shutdown complete");
    Ok(())
}

async fn run_once(
    watchers: &[Arc<ThresholdWatcher>],
    notifier: &dyn Notifier,
) -> Result<(), Report<AppError>> {
    let mut failed = 0usize;
    for watcher in watchers {
        if !runner::run_tick(watcher, notifier).await {
            failed += 1;
        }
    }

    if failed > 0 {
        return Err(Report::new(AppError::Runtime)
            .attach(format!("{failed} of {} watchers failed", watchers.len())));
    }
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

fn build_sampler(config: &AppConfig) -> Result<PoloniexSampler, Report<AppError>> {
    let poloniex = &config.poloniex;
    PoloniexSampler::new(
        poloniex.base_url.as_str(),
        Duration::from_secs(poloniex.request_timeout_secs),
        poloniex.requests_per_second,
    )
    .change_context(AppError::Config)
}

fn build_notifier(config: &NotifierConfig) -> Result<Arc<dyn Notifier>, Report<AppError>> {
    match config.kind.as_str() {
        "telegram" => {
            let (Some(bot_token), Some(chat_id)) = (&config.bot_token, &config.chat_id) else {
                return Err(Report::new(AppError::Config)
                    .attach("notifier.bot_token and notifier.chat_id are required"));
            };
            let notifier = TelegramNotifier::new(config.api_base.as_str(), bot_token, chat_id)
                .change_context(AppError::Config)?;
            Ok(Arc::new(notifier))
        }
        _ => Ok(Arc::new(TerminalNotifier)),
    }
}
