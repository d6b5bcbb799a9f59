//! Authoritative simulation tick loop

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::fanout::Broker;
use crate::ws::protocol::ServerMsg;

use super::world::WorldStore;

/// Fixed-period simulation loop. Each tick clamps the world, rebuilds the
/// leaderboard and publishes a `player_state` snapshot to the arena channel.
///
/// Tick work never touches sockets; publication is fire-and-forget.
pub struct Ticker {
    world: Arc<WorldStore>,
    broker: Arc<dyn Broker>,
    channel: String,
    period: Duration,
    ticks: AtomicU64,
}

impl Ticker {
    pub fn new(
        world: Arc<WorldStore>,
        broker: Arc<dyn Broker>,
        channel: impl Into<String>,
        period: Duration,
    ) -> Self {
        Self {
            world,
            broker,
            channel: channel.into(),
            period,
            ticks: AtomicU64::new(0),
        }
    }

    /// Ticks completed since start
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Run one tick: reconcile, snapshot, publish
    pub fn tick_once(&self) {
        let snapshot = self.world.tick();

        match ServerMsg::PlayerState(snapshot).encode() {
            Ok(json) => self.broker.publish(&self.channel, Bytes::from(json)),
            Err(e) => error!(channel = %self.channel, error = %e, "Failed to encode snapshot"),
        }

        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Run the tick loop forever
    pub async fn run(self: Arc<Self>) {
        info!(
            channel = %self.channel,
            period_ms = self.period.as_millis() as u64,
            "Simulation ticker started"
        );

        let mut tick_interval = interval(self.period);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;

            let started = Instant::now();
            self.tick_once();

            let elapsed = started.elapsed();
            if elapsed > self.period {
                warn!(
                    elapsed_us = elapsed.as_micros() as u64,
                    period_ms = self.period.as_millis() as u64,
                    "Tick overran its period"
                );
            }
        }
    }
}
