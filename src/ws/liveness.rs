//! Liveness monitor - periodic probe sweep over all sessions
//!
//! Each sweep marks every session unresponsive and sends a websocket ping.
//! A pong flips the session back to alive. A session still unresponsive at
//! the next sweep is evicted, so a dead peer gets one full period of grace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::game::PlayerId;

use super::session::Outbound;

/// Per-session liveness state shared between the monitor and the session
#[derive(Debug)]
pub struct LivenessHandle {
    id: PlayerId,
    alive: AtomicBool,
    acked_once: AtomicBool,
    ping_started: Mutex<Option<Instant>>,
    probe_tx: mpsc::Sender<Outbound>,
    evicted: Notify,
}

impl LivenessHandle {
    fn new(id: PlayerId, probe_tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            alive: AtomicBool::new(true),
            acked_once: AtomicBool::new(false),
            ping_started: Mutex::new(None),
            probe_tx,
            evicted: Notify::new(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark unresponsive and send a probe
    fn probe(&self) {
        self.alive.store(false, Ordering::Release);
        *self.ping_started.lock() = Some(Instant::now());

        if self.probe_tx.try_send(Outbound::Probe).is_err() {
            debug!(player_id = %self.id, "Outbound queue full, probe dropped");
        }
    }

    /// Record a probe acknowledgment. Returns the round-trip time on the
    /// first acknowledgment of a probe only.
    pub fn acknowledge(&self) -> Option<Duration> {
        self.alive.store(true, Ordering::Release);

        let started = (*self.ping_started.lock())?;
        if self.acked_once.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(started.elapsed())
    }

    fn evict(&self) {
        // notify_one stores a permit if the session is not waiting yet
        self.evicted.notify_one();
    }

    /// Resolves once the monitor has evicted this session
    pub async fn evicted(&self) {
        self.evicted.notified().await;
    }
}

/// Registry of live sessions plus the sweep loop
pub struct LivenessMonitor {
    sessions: DashMap<PlayerId, Arc<LivenessHandle>>,
    period: Duration,
}

impl LivenessMonitor {
    pub fn new(period: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            period,
        }
    }

    pub fn register(&self, id: &str, probe_tx: mpsc::Sender<Outbound>) -> Arc<LivenessHandle> {
        let handle = Arc::new(LivenessHandle::new(id.to_string(), probe_tx));
        self.sessions.insert(id.to_string(), handle.clone());
        handle
    }

    pub fn unregister(&self, id: &str) {
        self.sessions.remove(id);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// One pass over all sessions. Returns the ids evicted this pass.
    pub fn sweep(&self) -> Vec<PlayerId> {
        let mut evicted = Vec::new();

        for entry in self.sessions.iter() {
            let handle = entry.value();
            if !handle.is_alive() {
                handle.evict();
                evicted.push(entry.key().clone());
                continue;
            }
            handle.probe();
        }

        // Removing while iterating would deadlock the shard
        for id in &evicted {
            self.sessions.remove(id);
            info!(player_id = %id, "Evicting unresponsive session");
        }

        evicted
    }

    /// Run the sweep loop forever
    pub async fn run(self: Arc<Self>) {
        info!(period_ms = self.period.as_millis() as u64, "Liveness monitor started");

        let mut sweep_interval = interval(self.period);
        sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick fires immediately; skip it so new sessions get a full period
        sweep_interval.tick().await;

        loop {
            sweep_interval.tick().await;
            let evicted = self.sweep();
            if !evicted.is_empty() {
                debug!(count = evicted.len(), remaining = self.session_count(), "Liveness sweep done");
            }
        }
    }
}
