//! Session lifecycle and keepalive.
//!
//! One authenticated session per venue, shared by reference with every
//! dependent. A background task pings the venue on a short interval and
//! reconnects with bounded exponential backoff; after the configured
//! number of consecutive failures the session is marked `Dead` and all
//! dependent operations fail fast until a reconnect succeeds.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use hktrade_core::error::VenueError;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Disconnected = 0,
    Live = 1,
    Reconnecting = 2,
    /// Keepalive gave up; only an explicit reconnect revives the session
    Dead = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SessionState::Live,
            2 => SessionState::Reconnecting,
            3 => SessionState::Dead,
            _ => SessionState::Disconnected,
        }
    }
}

/// Shared session handle. Venue adapters call [`Session::require_live`]
/// before touching the wire.
#[derive(Debug)]
pub struct Session {
    state: AtomicU8,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Disconnected as u8),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_live(&self) -> bool {
        self.state() == SessionState::Live
    }

    /// Fail fast when the session is not live.
    pub fn require_live(&self) -> Result<(), VenueError> {
        if self.is_live() {
            Ok(())
        } else {
            Err(VenueError::NotAuthenticated)
        }
    }

    fn set(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-venue authentication primitives used by the session manager.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Establish (or re-establish) an authenticated session.
    async fn authenticate(&self) -> Result<(), VenueError>;

    /// Cheap liveness check against the venue.
    async fn ping(&self) -> Result<(), VenueError>;
}

/// Keepalive tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    /// Seconds between pings (IBKR sessions lapse at 300)
    pub interval_secs: u64,
    /// Reconnect attempts before the session is marked dead
    pub max_failures: u32,
    /// Initial reconnect backoff in milliseconds
    pub backoff_base_ms: u64,
    /// Backoff ceiling in milliseconds
    pub backoff_cap_ms: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval_secs: 240,
            max_failures: 3,
            backoff_base_ms: 1000,
            backoff_cap_ms: 30_000,
        }
    }
}

/// Owns connect/reconnect and the keepalive task for one venue session.
pub struct SessionManager {
    session: Arc<Session>,
    transport: Arc<dyn SessionTransport>,
    config: KeepaliveConfig,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn SessionTransport>, config: KeepaliveConfig) -> Self {
        Self {
            session: Arc::new(Session::new()),
            transport,
            config,
        }
    }

    /// The shared handle dependents hold.
    pub fn session(&self) -> Arc<Session> {
        Arc::clone(&self.session)
    }

    /// Authenticate and mark the session live.
    pub async fn connect(&self) -> Result<(), VenueError> {
        self.transport.authenticate().await?;
        self.session.set(SessionState::Live);
        info!("venue session established");
        Ok(())
    }

    /// Explicit reconnect, including from `Dead`.
    pub async fn reconnect(&self) -> Result<(), VenueError> {
        self.session.set(SessionState::Reconnecting);
        match self.connect().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.session.set(SessionState::Dead);
                Err(e)
            }
        }
    }

    /// Spawn the background keepalive loop.
    pub fn spawn_keepalive(self: Arc<Self>) -> JoinHandle<()> {
        let mgr = self;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(mgr.config.interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it, connect() already ran.
            interval.tick().await;
            loop {
                interval.tick().await;
                mgr.keepalive_tick().await;
            }
        })
    }

    /// One keepalive round: ping, and on failure reconnect with bounded
    /// exponential backoff until the failure budget is spent.
    pub async fn keepalive_tick(&self) {
        if self.session.state() == SessionState::Dead {
            return;
        }

        match self.transport.ping().await {
            Ok(()) => {
                self.session.set(SessionState::Live);
            }
            Err(e) => {
                warn!(error = %e, "keepalive ping failed; reconnecting");
                self.session.set(SessionState::Reconnecting);

                let mut delay = Duration::from_millis(self.config.backoff_base_ms);
                let cap = Duration::from_millis(self.config.backoff_cap_ms);
                for attempt in 1..=self.config.max_failures {
                    tokio::time::sleep(delay).await;
                    match self.transport.authenticate().await {
                        Ok(()) => {
                            self.session.set(SessionState::Live);
                            info!(attempt, "session re-established");
                            return;
                        }
                        Err(e) => {
                            warn!(attempt, error = %e, "reconnect attempt failed");
                            delay = (delay * 2).min(cap);
                        }
                    }
                }

                self.session.set(SessionState::Dead);
                error!(
                    failures = self.config.max_failures,
                    "session marked dead; mutating operations will fail until reconnect"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FlakyTransport {
        auth_failures_left: AtomicU32,
        ping_ok: std::sync::atomic::AtomicBool,
    }

    impl FlakyTransport {
        fn new(auth_failures: u32, ping_ok: bool) -> Self {
            Self {
                auth_failures_left: AtomicU32::new(auth_failures),
                ping_ok: std::sync::atomic::AtomicBool::new(ping_ok),
            }
        }
    }

    #[async_trait]
    impl SessionTransport for FlakyTransport {
        async fn authenticate(&self) -> Result<(), VenueError> {
            let left = self.auth_failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.auth_failures_left.store(left - 1, Ordering::SeqCst);
                Err(VenueError::Connectivity("refused".into()))
            } else {
                Ok(())
            }
        }

        async fn ping(&self) -> Result<(), VenueError> {
            if self.ping_ok.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(VenueError::Timeout)
            }
        }
    }

    fn fast_config() -> KeepaliveConfig {
        KeepaliveConfig {
            interval_secs: 1,
            max_failures: 3,
            backoff_base_ms: 1,
            backoff_cap_ms: 4,
        }
    }

    #[tokio::test]
    async fn test_connect_marks_live() {
        let mgr = SessionManager::new(Arc::new(FlakyTransport::new(0, true)), fast_config());
        assert!(!mgr.session().is_live());
        mgr.connect().await.unwrap();
        assert!(mgr.session().is_live());
        assert!(mgr.session().require_live().is_ok());
    }

    #[tokio::test]
    async fn test_bad_credentials_surface() {
        struct BadCreds;
        #[async_trait]
        impl SessionTransport for BadCreds {
            async fn authenticate(&self) -> Result<(), VenueError> {
                Err(VenueError::Authentication("bad password".into()))
            }
            async fn ping(&self) -> Result<(), VenueError> {
                Ok(())
            }
        }
        let mgr = SessionManager::new(Arc::new(BadCreds), fast_config());
        let err = mgr.connect().await.unwrap_err();
        assert!(matches!(err, VenueError::Authentication(_)));
        assert!(!mgr.session().is_live());
    }

    #[tokio::test]
    async fn test_keepalive_recovers_within_budget() {
        let transport = Arc::new(FlakyTransport::new(2, false));
        let mgr = SessionManager::new(transport.clone(), fast_config());
        mgr.connect().await.unwrap_err(); // two failures still pending
        // Force live so the tick starts from a ping failure
        mgr.session.set(SessionState::Live);

        mgr.keepalive_tick().await;
        // Third authenticate attempt succeeds inside the tick
        assert_eq!(mgr.session().state(), SessionState::Live);
    }

    #[tokio::test]
    async fn test_keepalive_marks_dead_after_budget() {
        let transport = Arc::new(FlakyTransport::new(u32::MAX, false));
        let mgr = SessionManager::new(transport, fast_config());
        mgr.session.set(SessionState::Live);

        mgr.keepalive_tick().await;
        assert_eq!(mgr.session().state(), SessionState::Dead);
        assert!(matches!(
            mgr.session().require_live().unwrap_err(),
            VenueError::NotAuthenticated
        ));

        // Dead sessions stay dead until an explicit reconnect
        mgr.keepalive_tick().await;
        assert_eq!(mgr.session().state(), SessionState::Dead);
    }
}
