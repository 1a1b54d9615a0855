use std::time::Duration;
use tokio::time::MissedTickBehavior;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use super::check::{Pipeline, RunOutcome};

/// Runs the pipeline now and then every `interval` until SIGINT or SIGTERM.
///
/// Runs never overlap: each one is awaited before the next tick is taken,
/// and ticks missed during a long run are skipped rather than queued.
/// A failed run is logged and the loop carries on.
pub async fn watch(pipeline: &Pipeline, interval: Duration) -> std::io::Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // On non-Unix platforms these become pending futures that never complete
    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate())?;
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt())?;

    tracing::info!(interval_secs = interval.as_secs(), "Watching sources");

    loop {
        #[cfg(unix)]
        let sigterm_fut = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_fut = std::future::pending::<Option<()>>();

        #[cfg(unix)]
        let sigint_fut = sigint.recv();
        #[cfg(not(unix))]
        let sigint_fut = std::future::pending::<Option<()>>();

        tokio::select! {
            biased;

            _ = sigterm_fut => {
                tracing::info!("Received SIGTERM, shutting down gracefully");
                break;
            }

            _ = sigint_fut => {
                tracing::info!("Received SIGINT, shutting down gracefully");
                break;
            }

            _ = ticker.tick() => {
                match pipeline.run().await {
                    Ok(RunOutcome::Completed(_)) => {}
                    Ok(RunOutcome::Skipped(reason)) => {
                        tracing::debug!(reason = %reason, "Run skipped");
                    }
                    Err(e) => tracing::error!(error = %e, "Check run failed"),
                }
            }
        }
    }

    Ok(())
}
