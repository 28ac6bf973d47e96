//! Configuration validation command.

use anyhow::Result;

use crate::cli::Cli;

pub async fn run(cli: &Cli) -> Result<()> {
    let config = hktrade_config::load_config(&cli.config)?;

    println!("Configuration OK: {}", cli.config.display());
    println!("  environment:        {}", config.app.environment);
    println!("  venue:              {:?}", config.venue.kind);
    println!("  lot size:           {}", config.risk.lot_size);
    println!("  max positions:      {}", config.risk.max_positions);
    println!(
        "  reconcile interval: {}s",
        config.engine.reconcile_interval_secs
    );
    println!(
        "  keepalive interval: {}s",
        config.engine.keepalive_interval_secs
    );
    Ok(())
}
