//! Shared construction of the venue, session and engine stack.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::RwLock;

use hktrade_config::{AppConfig, VenueKind};
use hktrade_core::traits::Venue;
use hktrade_engine::{ExecutionEngine, Ledger, ReconcileConfig, Reconciler, StopTargetSupervisor};
use hktrade_monitor::LogAlertSink;
use hktrade_risk::SafetyGate;
use hktrade_venue::{
    FutuConfig, FutuTransport, FutuVenue, IbkrConfig, IbkrTransport, IbkrVenue,
    KeepaliveConfig, SessionManager, SimVenue,
};

pub(crate) struct Stack {
    pub venue: Arc<dyn Venue>,
    pub session: Option<Arc<SessionManager>>,
    pub engine: Arc<ExecutionEngine>,
    pub supervisor: Arc<StopTargetSupervisor>,
    pub reconciler: Arc<Reconciler>,
}

fn keepalive_config(config: &AppConfig) -> KeepaliveConfig {
    KeepaliveConfig {
        interval_secs: config.engine.keepalive_interval_secs,
        max_failures: config.engine.max_keepalive_failures,
        backoff_base_ms: config.engine.backoff_base_ms,
        backoff_cap_ms: config.engine.backoff_cap_ms,
    }
}

fn build_venue(config: &AppConfig) -> Result<(Arc<dyn Venue>, Option<Arc<SessionManager>>)> {
    let ticks = config.venue.tick_table.clone();
    match config.venue.kind {
        VenueKind::Futu => {
            let futu_config = FutuConfig {
                host: config.venue.futu.host.clone(),
                port: config.venue.futu.port,
                paper: config.paper_trading(),
                request_timeout_secs: config.venue.request_timeout_secs,
            };
            let password = std::env::var(&config.venue.futu.trade_password_env).ok();
            let transport = Arc::new(FutuTransport::new(&futu_config, password)?);
            let session = Arc::new(SessionManager::new(transport, keepalive_config(config)));
            let mut venue = FutuVenue::new(futu_config, session.session())?;
            if let Some(ticks) = ticks {
                venue = venue.with_tick_table(ticks);
            }
            Ok((Arc::new(venue), Some(session)))
        }
        VenueKind::Ibkr => {
            let ibkr_config = IbkrConfig {
                base_url: config.venue.ibkr.gateway_url.clone(),
                account_id: config.venue.ibkr.account_id.clone(),
                paper: config.paper_trading(),
                request_timeout_secs: config.venue.request_timeout_secs,
            };
            let transport = Arc::new(IbkrTransport::new(&ibkr_config)?);
            let session = Arc::new(SessionManager::new(transport, keepalive_config(config)));
            let mut venue = IbkrVenue::new(ibkr_config, session.session())?;
            if let Some(ticks) = ticks {
                venue = venue.with_tick_table(ticks);
            }
            Ok((Arc::new(venue), Some(session)))
        }
        VenueKind::Sim => {
            let mut venue = SimVenue::with_capabilities(false, true);
            if let Some(ticks) = ticks {
                venue = venue.with_tick_table(ticks);
            }
            Ok((Arc::new(venue), None))
        }
    }
}

pub(crate) async fn build_stack(config: &AppConfig) -> Result<Stack> {
    let (venue, session) = build_venue(config)?;
    if let Some(manager) = &session {
        manager
            .connect()
            .await
            .context("venue session establishment failed")?;
    }

    let gate = Arc::new(SafetyGate::new(config.risk.clone(), config.market.clone()));
    let ledger = Arc::new(RwLock::new(Ledger::new()));
    let supervisor = Arc::new(StopTargetSupervisor::new());
    let halted = Arc::new(AtomicBool::new(false));

    let engine = Arc::new(ExecutionEngine::new(
        Arc::clone(&venue),
        gate,
        Arc::clone(&ledger),
        Arc::clone(&supervisor),
        Arc::clone(&halted),
        Duration::from_secs(config.engine.submit_timeout_secs),
    ));

    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&venue),
        ledger,
        Arc::clone(&supervisor),
        Arc::new(LogAlertSink),
        halted,
        ReconcileConfig {
            interval_secs: config.engine.reconcile_interval_secs,
            strike_threshold: config.engine.discrepancy_strike_threshold,
            min_order_age_secs: config.engine.min_order_age_secs,
            ..Default::default()
        },
    ));

    Ok(Stack {
        venue,
        session,
        engine,
        supervisor,
        reconciler,
    })
}
