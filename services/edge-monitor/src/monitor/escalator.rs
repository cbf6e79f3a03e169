//! Offline escalation for one node.
//!
//! ```text
//!            Birth            Death
//! Unknown ---------> Online ---------> Offline --(every interval)--> restart
//!    |                  ^                 |
//!    +------ Death -----|------ Birth ----+
//! ```
//!
//! Every Birth or Death packet abandons the running timer and starts a fresh
//! one, even when the state does not change. Only `Offline` has a timer.

use std::sync::Arc;
use std::time::Duration;

use edge_monitor_id::NodeUuid;
use futures_util::StreamExt;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::events::{EventSender, MonitorEvent};
use crate::telemetry::{DeviceHandle, PacketType};

/// Liveness of a node as seen from its packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    /// No Birth or Death seen yet.
    Unknown,
    Online,
    Offline,
}

/// Folds packet types into a [`LivenessState`].
#[derive(Debug, Clone)]
pub struct LivenessTracker {
    state: LivenessState,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self {
            state: LivenessState::Unknown,
        }
    }

    pub fn state(&self) -> LivenessState {
        self.state
    }

    /// Apply a packet. Returns the state entered for Birth and Death
    /// (including re-entry), `None` for packets that carry no liveness.
    pub fn observe(&mut self, packet: PacketType) -> Option<LivenessState> {
        let next = match packet {
            PacketType::Birth => LivenessState::Online,
            PacketType::Death => LivenessState::Offline,
            PacketType::Data | PacketType::Command => return None,
        };
        self.state = next;
        Some(next)
    }
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Emits restart requests while a node stays offline.
pub struct OfflineEscalator {
    node: NodeUuid,
    device: Arc<dyn DeviceHandle>,
    interval: Option<Duration>,
    events: EventSender,
}

impl OfflineEscalator {
    /// Escalate every `interval` while offline.
    pub fn new(
        node: NodeUuid,
        device: Arc<dyn DeviceHandle>,
        interval: Duration,
        events: EventSender,
    ) -> Self {
        Self {
            node,
            device,
            interval: Some(interval),
            events,
        }
    }

    /// Report liveness transitions without ever escalating.
    pub fn observe_only(node: NodeUuid, device: Arc<dyn DeviceHandle>, events: EventSender) -> Self {
        Self {
            node,
            device,
            interval: None,
            events,
        }
    }

    /// Run until cancelled.
    ///
    /// If the packet stream ends the current timer keeps running, so an
    /// offline node whose telemetry vanished is still escalated.
    pub async fn run(self, cancel: CancellationToken) {
        let mut packets = self.device.packets();
        let address = self.device.address();
        let mut packets_open = true;

        let mut tracker = LivenessTracker::new();
        let mut timer: Option<Interval> = None;
        let mut sequence = 0u64;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(node = %self.node, "Offline escalator cancelled");
                    break;
                }

                packet = packets.next(), if packets_open => match packet {
                    Some(packet) => {
                        let Some(state) = tracker.observe(packet) else {
                            continue;
                        };
                        debug!(node = %self.node, state = ?state, "Liveness changed");
                        let _ = self.events.send(MonitorEvent::LivenessChanged {
                            node: self.node,
                            state,
                        });

                        timer = self.timer_for(state);
                        sequence = 0;
                    }
                    None => {
                        packets_open = false;
                        debug!(node = %self.node, "Packet stream ended");
                    }
                },

                _ = tick(&mut timer) => {
                    sequence += 1;
                    let address = address.borrow().clone();
                    debug!(node = %self.node, address = ?address, sequence, "Restart");
                    let _ = self.events.send(MonitorEvent::RestartRequested {
                        node: self.node,
                        address,
                        sequence,
                    });
                }
            }
        }
    }

    fn timer_for(&self, state: LivenessState) -> Option<Interval> {
        match (state, self.interval) {
            (LivenessState::Offline, Some(period)) => {
                // First tick one full period after going offline.
                let start = tokio::time::Instant::now() + period;
                let mut timer = tokio::time::interval_at(start, period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Some(timer)
            }
            _ => None,
        }
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_starts_unknown() {
        assert_eq!(LivenessTracker::new().state(), LivenessState::Unknown);
    }

    #[test]
    fn test_tracker_ignores_non_liveness_packets() {
        let mut tracker = LivenessTracker::new();
        assert_eq!(tracker.observe(PacketType::Data), None);
        assert_eq!(tracker.observe(PacketType::Command), None);
        assert_eq!(tracker.state(), LivenessState::Unknown);
    }

    #[test]
    fn test_tracker_transitions() {
        let mut tracker = LivenessTracker::new();

        assert_eq!(tracker.observe(PacketType::Death), Some(LivenessState::Offline));
        assert_eq!(tracker.observe(PacketType::Birth), Some(LivenessState::Online));
        assert_eq!(tracker.observe(PacketType::Data), None);
        assert_eq!(tracker.state(), LivenessState::Online);
    }

    #[test]
    fn test_tracker_reports_reentry() {
        let mut tracker = LivenessTracker::new();
        tracker.observe(PacketType::Death);
        assert_eq!(tracker.observe(PacketType::Death), Some(LivenessState::Offline));
    }
}
