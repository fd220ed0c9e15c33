use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cronwarden_config::CronwardenConfig;
use cronwarden_cron::{FireHandler, JobService};

/// Reconcile, then run the dispatch loop until Ctrl-C.
pub async fn run_serve(config: CronwardenConfig, service: JobService) -> Result<()> {
    // All active jobs must be armed before the loop computes its first deadline.
    let report = service.reconcile_from_store().await?;
    info!(
        armed = report.armed.len(),
        rejected = report.rejected.len(),
        "Scheduler ready"
    );

    let cancel = CancellationToken::new();

    let dispatch = {
        let scheduler = service.scheduler().clone();
        let handler: Arc<dyn FireHandler> = service.runner();
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(handler, cancel).await })
    };

    let resync = match config.scheduler.resync_interval_secs {
        0 => None,
        secs => Some(tokio::spawn(run_resync_loop(
            service.clone(),
            Duration::from_secs(secs),
            cancel.clone(),
        ))),
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutting down scheduler");
    cancel.cancel();

    dispatch.await?;
    if let Some(resync) = resync {
        resync.await?;
    }
    Ok(())
}

/// Pick up job edits made by other processes against the same database.
async fn run_resync_loop(service: JobService, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately and startup has already reconciled.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = service.reconcile_from_store().await {
                    error!("Periodic reconciliation failed: {e}");
                }
            }
        }
    }
}
