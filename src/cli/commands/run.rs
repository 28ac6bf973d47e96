//! Run-loop command implementation.

use anyhow::Result;
use std::time::Duration;
use tracing::{info, warn};

use hktrade_monitor::setup_logging;

use crate::cli::{Cli, RunArgs};

use super::build_stack;

pub async fn run(args: RunArgs, cli: &Cli) -> Result<()> {
    let config = hktrade_config::load_config(&cli.config)?;
    setup_logging(
        &cli.effective_log_level(&config.logging.level),
        cli.json_logs || config.logging.format == "json",
        config.logging.file.as_deref(),
    );

    let stack = build_stack(&config).await?;
    info!(
        venue = stack.venue.name(),
        environment = %config.app.environment,
        "execution core started"
    );

    // Settle any state left over from a previous run before accepting
    // price-driven work.
    let report = stack.reconciler.run_once().await?;
    if !report.discrepancies.is_empty() {
        warn!(
            found = report.discrepancies.len(),
            "startup reconciliation found divergences"
        );
    }

    if args.check_only {
        info!("check-only run complete");
        return Ok(());
    }

    let keepalive = stack
        .session
        .as_ref()
        .map(|s| std::sync::Arc::clone(s).spawn_keepalive());
    let reconcile_task = std::sync::Arc::clone(&stack.reconciler).spawn();

    let mut poll = tokio::time::interval(Duration::from_secs(config.engine.quote_poll_secs));
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
            _ = poll.tick() => {
                tick(&stack).await;
            }
        }
    }

    // Drain: refuse new intents, let in-flight submissions settle, then
    // stop background tasks.
    stack.engine.begin_shutdown();
    stack.engine.drain().await;
    reconcile_task.abort();
    if let Some(task) = keepalive {
        task.abort();
    }
    info!("execution core stopped");
    Ok(())
}

/// One poll round: refresh open orders, then feed quotes for watched
/// symbols through the stop/target supervisor.
async fn tick(stack: &super::Stack) {
    if let Err(e) = stack.engine.sync_open_orders().await {
        warn!(error = %e, "open-order sync failed");
    }

    for symbol in stack.supervisor.watched_symbols() {
        let quote = match stack.venue.get_quote(&symbol).await {
            Ok(quote) => quote,
            Err(e) => {
                warn!(%symbol, error = %e, "quote poll failed");
                continue;
            }
        };

        let Some(exit) = stack.supervisor.on_quote(&quote) else {
            continue;
        };

        match stack.engine.submit(exit).await {
            Ok(order) => {
                info!(%symbol, order_id = %order.id, status = %order.status, "exit submitted");
            }
            Err(e) => {
                warn!(%symbol, error = %e, "exit submission failed; re-arming watch");
                stack.supervisor.rearm(&symbol);
            }
        }
    }
}
