//! # Application State Management
//!
//! Shared state handed to every HTTP and WebSocket handler through
//! `web::Data<AppState>`.
//!
//! ## Ownership:
//! - **Arc** for everything the background tasks also hold: the registry the
//!   detectors write, the mailbox the arbiter drains, the router feeding the
//!   detectors
//! - **RwLock** only for connection metrics, which handlers update
//! - **watch::Receiver** for the arbiter's published focus, so readers never
//!   touch arbiter internals
//!
//! The configuration is fixed for the process lifetime; it is validated once at
//! startup and never replaced.

use crate::attention::{FocusView, OverrideMailbox, SpeakerRegistry};
use crate::audio::FrameRouter;
use crate::config::AppConfig;
use crate::shutdown::ShutdownSignal;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::watch;

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<SpeakerRegistry>,
    pub mailbox: Arc<OverrideMailbox>,
    pub router: Arc<FrameRouter>,
    /// Latest arbiter view, updated once per cycle
    pub focus: watch::Receiver<FocusView>,
    pub shutdown: ShutdownSignal,
    pub metrics: Arc<RwLock<AppMetrics>>,
    /// When the server started (never changes, so no Arc<RwLock> needed)
    pub start_time: Instant,
}

/// Audio ingress connection counters.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// WebSocket connections currently open
    pub active_connections: u32,
    /// WebSocket connections accepted since start
    pub total_connections: u64,
    /// Client messages answered with an `error` message
    pub rejected_messages: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        registry: Arc<SpeakerRegistry>,
        mailbox: Arc<OverrideMailbox>,
        router: FrameRouter,
        focus: watch::Receiver<FocusView>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            mailbox,
            router: Arc::new(router),
            focus,
            shutdown,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// Copy of the arbiter's most recent view.
    pub fn focus_view(&self) -> FocusView {
        self.focus.borrow().clone()
    }

    pub fn connection_opened(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.active_connections += 1;
        metrics.total_connections += 1;
    }

    /// Includes an underflow guard in case a close is reported twice.
    pub fn connection_closed(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.active_connections = metrics.active_connections.saturating_sub(1);
    }

    pub fn message_rejected(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.rejected_messages += 1;
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// State over the default configuration with no running tasks behind it.
    pub(crate) fn test_state() -> AppState {
        let config = AppConfig::default();
        let registry = Arc::new(SpeakerRegistry::new(config.channel_ids()));
        let mut router = FrameRouter::new();
        for channel in &config.channels {
            // No detector behind the queue; frames are discarded
            let (tx, _) = tokio::sync::mpsc::channel(4);
            router.add_route(channel.id, channel.input_index, tx);
        }
        let (_tx, focus) = watch::channel(FocusView::default());
        AppState::new(
            config,
            registry,
            Arc::new(OverrideMailbox::new()),
            router,
            focus,
            ShutdownSignal::new(),
        )
    }

    #[test]
    fn test_connection_metrics() {
        let state = test_state();
        state.connection_opened();
        state.connection_opened();
        state.connection_closed();
        state.connection_closed();
        state.connection_closed();

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_connections, 0);
        assert_eq!(metrics.total_connections, 2);
    }

    #[test]
    fn test_focus_view_survives_closed_sender() {
        let state = test_state();
        assert_eq!(state.focus_view().focus, None);
    }
}
