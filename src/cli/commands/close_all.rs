//! Emergency close-all command implementation.

use anyhow::Result;
use tracing::{info, warn};

use hktrade_monitor::setup_logging;

use crate::cli::{Cli, CloseAllArgs};

use super::build_stack;

pub async fn run(args: CloseAllArgs, cli: &Cli) -> Result<()> {
    let config = hktrade_config::load_config(&cli.config)?;
    setup_logging(
        &cli.effective_log_level(&config.logging.level),
        cli.json_logs,
        config.logging.file.as_deref(),
    );

    let stack = build_stack(&config).await?;
    warn!(reason = %args.reason, "emergency close-all requested");

    // Adopt venue truth first so every venue-reported position is in the
    // ledger to be closed.
    stack.reconciler.run_once().await?;

    let orders = stack.engine.close_all_positions(&args.reason).await?;
    for order in &orders {
        info!(
            symbol = %order.symbol,
            side = %order.side,
            quantity = %order.quantity,
            status = %order.status,
            "closing order"
        );
    }
    info!(count = orders.len(), "close-all complete");
    Ok(())
}
