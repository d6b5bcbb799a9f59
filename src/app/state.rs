//! Application state shared across routes and sessions

use std::sync::Arc;

use crate::config::Config;
use crate::fanout::Broker;
use crate::game::{Ticker, WorldStore};
use crate::ws::liveness::LivenessMonitor;

/// Shared application state for one arena
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub world: Arc<WorldStore>,
    pub broker: Arc<dyn Broker>,
    pub liveness: Arc<LivenessMonitor>,
    pub ticker: Arc<Ticker>,
}

impl AppState {
    pub fn new(config: Config, broker: Arc<dyn Broker>) -> Self {
        let config = Arc::new(config);

        // Initialize the world store
        let world = Arc::new(WorldStore::new(config.rules));

        // Initialize the liveness monitor
        let liveness = Arc::new(LivenessMonitor::new(config.liveness_period));

        // Initialize the simulation ticker (publishes into the arena channel)
        let ticker = Arc::new(Ticker::new(
            world.clone(),
            broker.clone(),
            config.arena_channel.clone(),
            config.tick_period,
        ));

        Self {
            config,
            world,
            broker,
            liveness,
            ticker,
        }
    }
}
