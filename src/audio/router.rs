//! Frame routing from WebSocket ingress to the per-channel detectors.
//!
//! Each configured channel gets a bounded queue. Ingress never waits on a
//! detector: when a queue is full the frame is dropped, since a detector only
//! ever scores its newest window anyway.

use crate::attention::registry::RegistryError;
use crate::attention::ChannelId;
use crate::audio::processor::deinterleave;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

struct Route {
    input_index: usize,
    tx: mpsc::Sender<Vec<f32>>,
}

/// Frame counters since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub routed: u64,
    pub dropped: u64,
}

/// Channel id → detector queue.
#[derive(Default)]
pub struct FrameRouter {
    routes: BTreeMap<ChannelId, Route>,
    routed: AtomicU64,
    dropped: AtomicU64,
}

impl FrameRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the queue feeding `channel`'s detector.
    pub fn add_route(&mut self, channel: ChannelId, input_index: usize, tx: mpsc::Sender<Vec<f32>>) {
        self.routes.insert(channel, Route { input_index, tx });
    }

    /// Fails for channels with no detector behind them.
    pub fn ensure_route(&self, channel: ChannelId) -> Result<(), RegistryError> {
        if self.routes.contains_key(&channel) {
            Ok(())
        } else {
            Err(RegistryError { channel })
        }
    }

    pub fn channels(&self) -> Vec<ChannelId> {
        self.routes.keys().copied().collect()
    }

    /// Hand a mono frame to one channel. `Ok(false)` means it was dropped.
    pub fn route(&self, channel: ChannelId, frame: Vec<f32>) -> Result<bool, RegistryError> {
        let route = self.routes.get(&channel).ok_or(RegistryError { channel })?;
        Ok(self.deliver(channel, route, frame))
    }

    /// Split an interleaved device frame and hand each input to its channel.
    /// Returns how many channels accepted a frame.
    pub fn route_interleaved(&self, samples: &[f32], device_channels: usize) -> usize {
        self.routes
            .iter()
            .filter(|(_, route)| route.input_index < device_channels)
            .filter(|(channel, route)| {
                let frame = deinterleave(samples, device_channels, route.input_index);
                !frame.is_empty() && self.deliver(**channel, route, frame)
            })
            .count()
    }

    fn deliver(&self, channel: ChannelId, route: &Route, frame: Vec<f32>) -> bool {
        match route.tx.try_send(frame) {
            Ok(()) => {
                self.routed.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(channel, dropped, "Detector queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(channel, "Detector has stopped, discarding frame");
                false
            }
        }
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            routed: self.routed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_to_known_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut router = FrameRouter::new();
        router.add_route(1, 3, tx);

        assert_eq!(router.route(1, vec![0.5]), Ok(true));
        assert_eq!(rx.try_recv().unwrap(), vec![0.5]);
        assert_eq!(router.route(7, vec![0.5]), Err(RegistryError { channel: 7 }));
        assert!(router.ensure_route(1).is_ok());
        assert_eq!(router.ensure_route(7), Err(RegistryError { channel: 7 }));
    }

    #[test]
    fn test_full_queue_drops() {
        let (tx, _rx) = mpsc::channel(1);
        let mut router = FrameRouter::new();
        router.add_route(2, 0, tx);

        assert_eq!(router.route(2, vec![0.1]), Ok(true));
        assert_eq!(router.route(2, vec![0.2]), Ok(false));
        assert_eq!(router.stats(), RouterStats { routed: 1, dropped: 1 });
    }

    #[test]
    fn test_interleaved_split() {
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let (tx_c, mut rx_c) = mpsc::channel(4);
        let mut router = FrameRouter::new();
        router.add_route(1, 0, tx_a);
        router.add_route(2, 2, tx_b);
        // Input 5 doesn't exist on a 3-input device
        router.add_route(3, 5, tx_c);

        let samples = [0.0, 0.1, 0.2, 1.0, 1.1, 1.2];
        assert_eq!(router.route_interleaved(&samples, 3), 2);
        assert_eq!(rx_a.try_recv().unwrap(), vec![0.0, 1.0]);
        assert_eq!(rx_b.try_recv().unwrap(), vec![0.2, 1.2]);
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn test_closed_queue_is_not_an_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut router = FrameRouter::new();
        router.add_route(1, 0, tx);
        assert_eq!(router.route(1, vec![0.1]), Ok(false));
    }
}
