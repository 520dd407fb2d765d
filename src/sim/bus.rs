//! Shared FlexRay bus for multi-node startup
//!
//! Nodes join the bus when their core receives RUN. The first coldstart node whose
//! listen phase elapses without an existing leader starts the schedule and sends
//! sync frames in its key slot. Every other node integrates once a leader exists
//! and only then transmits in its own key slot.
//!
//! Progress is evaluated lazily against tokio time, so tests with a paused clock
//! see deterministic transmission instants.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::flexray::poc::PocStatus;

/// One frame observed on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusTransmission {
    pub node: String,
    pub slot_id: u16,
    pub sync: bool,
    pub at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Listening,
    Integrated,
}

#[derive(Debug)]
struct Node {
    name: String,
    started_at: Instant,
    coldstart: bool,
    key_slot: Option<u16>,
    sync: bool,
    phase: Phase,
}

#[derive(Debug, Default)]
struct BusState {
    nodes: Vec<Node>,
    leader: Option<(String, Instant)>,
    log: Vec<BusTransmission>,
}

#[derive(Debug)]
pub struct SimFlexRayBus {
    state: Mutex<BusState>,
    coldstart_delay: Duration,
    integration_delay: Duration,
}

impl SimFlexRayBus {
    /// Four 5 ms cycles to coldstart, two to integrate.
    pub fn new() -> Arc<Self> {
        Self::with_delays(Duration::from_millis(20), Duration::from_millis(10))
    }

    pub fn with_delays(coldstart_delay: Duration, integration_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BusState::default()),
            coldstart_delay,
            integration_delay,
        })
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A node's core entered RUN.
    pub(crate) fn run(&self, name: &str, coldstart: bool, key_slot: Option<u16>, sync: bool) {
        let mut state = self.lock();
        state.nodes.retain(|node| node.name != name);
        state.nodes.push(Node {
            name: name.to_string(),
            started_at: Instant::now(),
            coldstart,
            key_slot,
            sync,
            phase: Phase::Listening,
        });
        debug!(node = name, coldstart, ?key_slot, "Node joined FlexRay bus");
    }

    /// A node halted or went offline.
    pub(crate) fn leave(&self, name: &str) {
        let mut state = self.lock();
        state.nodes.retain(|node| node.name != name);
        if state.leader.as_ref().is_some_and(|(leader, _)| leader == name) {
            let others_sync =
                state.nodes.iter().any(|node| node.phase == Phase::Integrated && node.sync);
            if !others_sync {
                state.leader = None;
            }
        }
    }

    /// Startup state of `name`, or `None` if it is not on the bus.
    pub(crate) fn status(&self, name: &str) -> Option<PocStatus> {
        let mut state = self.lock();
        self.advance(&mut state, Instant::now());
        let node = state.nodes.iter().find(|node| node.name == name)?;
        Some(match (node.phase, node.coldstart) {
            (Phase::Integrated, _) => PocStatus::NormalActive,
            (Phase::Listening, true) => PocStatus::ColdstartListen,
            (Phase::Listening, false) => PocStatus::IntegrationListen,
        })
    }

    /// Log a data frame sent by an integrated node.
    pub(crate) fn transmit(&self, name: &str, slot_id: u16) {
        let mut state = self.lock();
        self.advance(&mut state, Instant::now());
        let at = Instant::now();
        state.log.push(BusTransmission { node: name.to_string(), slot_id, sync: false, at });
    }

    fn advance(&self, state: &mut BusState, now: Instant) {
        if state.leader.is_none() {
            let elected = state
                .nodes
                .iter()
                .filter(|node| node.coldstart && node.phase == Phase::Listening)
                .map(|node| (node.started_at + self.coldstart_delay, node.name.clone()))
                .filter(|(ready, _)| *ready <= now)
                .min_by_key(|(ready, _)| *ready);
            if let Some((since, name)) = elected {
                debug!(node = %name, "Coldstart leader elected");
                state.leader = Some((name, since));
            }
        }
        let Some((leader, since)) = state.leader.clone() else {
            return;
        };

        let mut joined = Vec::new();
        for node in state.nodes.iter_mut().filter(|node| node.phase == Phase::Listening) {
            let at = if node.name == leader {
                since
            } else {
                node.started_at.max(since) + self.integration_delay
            };
            if at <= now {
                node.phase = Phase::Integrated;
                if let Some(slot_id) = node.key_slot {
                    let node_name = node.name.clone();
                    joined.push(BusTransmission { node: node_name, slot_id, sync: node.sync, at });
                }
            }
        }
        joined.sort_by_key(|transmission| transmission.at);
        state.log.extend(joined);
    }

    pub fn transmissions(&self) -> Vec<BusTransmission> {
        let mut state = self.lock();
        self.advance(&mut state, Instant::now());
        state.log.clone()
    }

    pub fn leader(&self) -> Option<(String, Instant)> {
        let mut state = self.lock();
        self.advance(&mut state, Instant::now());
        state.leader.clone()
    }

    /// First frame `node` sent in `slot_id`.
    pub fn first_transmission(&self, node: &str, slot_id: u16) -> Option<BusTransmission> {
        self.transmissions().into_iter().find(|t| t.node == node && t.slot_id == slot_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn coldstart_node_leads_and_others_follow() {
        let bus = SimFlexRayBus::new();
        bus.run("passive", false, Some(2), true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bus.status("passive"), Some(PocStatus::IntegrationListen));
        assert!(bus.transmissions().is_empty());

        bus.run("leader", true, Some(1), true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(bus.status("passive"), Some(PocStatus::NormalActive));

        let (leader, since) = bus.leader().unwrap();
        assert_eq!(leader, "leader");
        let passive = bus.first_transmission("passive", 2).unwrap();
        assert!(passive.at > since);
    }

    #[tokio::test(start_paused = true)]
    async fn earliest_coldstart_node_wins() {
        let bus = SimFlexRayBus::new();
        bus.run("a", true, Some(1), true);
        tokio::time::sleep(Duration::from_millis(5)).await;
        bus.run("b", true, Some(2), true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(bus.leader().map(|(name, _)| name), Some("a".to_string()));
        assert_eq!(bus.status("b"), Some(PocStatus::NormalActive));
    }

    #[tokio::test(start_paused = true)]
    async fn leader_leaving_ends_schedule_without_other_sync_nodes() {
        let bus = SimFlexRayBus::new();
        bus.run("a", true, Some(1), true);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(bus.leader().is_some());
        bus.leave("a");
        assert!(bus.leader().is_none());
        assert_eq!(bus.status("a"), None);
    }
}
