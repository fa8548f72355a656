use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::notifier::Notifier;
use crate::watcher::ThresholdWatcher;

/// Tick `watcher` every poll interval until `cancel` fires.
///
/// The first tick runs immediately. A tick already in progress finishes
/// before cancellation is observed.
pub async fn watch_loop(
    watcher: Arc<ThresholdWatcher>,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
) {
    let config = watcher.config();
    let mut interval = tokio::time::interval(config.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        instrument = %config.instrument,
        operator = %config.operator,
        threshold = %config.threshold,
        interval_secs = config.poll_interval_secs,
        "watcher started"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let already_notified = watcher.already_notified().await;
                debug!(instrument = %config.instrument, already_notified, "watcher cancelled");
                break;
            }
            _ = interval.tick() => {
                run_tick(&watcher, notifier.as_ref()).await;
            }
        }
    }
}

/// Run one tick and deliver its notification, if any.
///
/// Errors are logged and reported as `false`; the caller decides whether to
/// keep going.
pub async fn run_tick(watcher: &ThresholdWatcher, notifier: &dyn Notifier) -> bool {
    let instrument = &watcher.config().instrument;
    match watcher.tick().await {
        Ok(Some(payload)) => match notifier.notify(&payload).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = ?e, instrument = %instrument, title = %payload.title, "notification delivery failed");
                false
            }
        },
        Ok(None) => true,
        Err(e) => {
            warn!(error = ?e, instrument = %instrument, "tick failed (continuing)");
            false
        }
    }
}
