//! Connection session - one per client socket
//!
//! Lifecycle: open (assign id, spawn player, queue `register`, subscribe)
//! -> active (dispatch inbound frames, forward fanout snapshots) -> closed
//! (drop subscription, remove player). Closing is idempotent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::fanout::Subscription;
use crate::game::{PlayerId, WorldStore};
use crate::util::time::ceil_millis;

use super::liveness::{LivenessHandle, LivenessMonitor};
use super::protocol::{decode_client, ClientMsg, ServerMsg};

/// Frames queued for the socket writer
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Encoded server message addressed to this client only
    Text(String),
    /// Fanout message, forwarded verbatim
    Fanout(Bytes),
    /// Low-level liveness probe (websocket ping)
    Probe,
}

/// Short opaque id: first 8 hex digits of a v4 uuid
pub fn new_player_id() -> PlayerId {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Per-connection session owning its identity and a handle on the arena
pub struct Session {
    id: PlayerId,
    world: Arc<WorldStore>,
    liveness: Arc<LivenessMonitor>,
    handle: Arc<LivenessHandle>,
    outbound: mpsc::Sender<Outbound>,
    closed: AtomicBool,
}

impl Session {
    /// Accept a connection: create its player, queue `register` and
    /// subscribe to the arena channel
    pub fn open(state: &AppState, outbound: mpsc::Sender<Outbound>) -> (Self, Subscription) {
        let id = loop {
            let candidate = new_player_id();
            if state.world.create_player(&candidate) {
                break candidate;
            }
        };

        let handle = state.liveness.register(&id, outbound.clone());
        let subscription = state.broker.subscribe(&state.config.arena_channel);

        let session = Self {
            id,
            world: state.world.clone(),
            liveness: state.liveness.clone(),
            handle,
            outbound,
            closed: AtomicBool::new(false),
        };

        session.send(&ServerMsg::Register {
            id: session.id.clone(),
        });

        info!(player_id = %session.id, "Player registered");
        (session, subscription)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Decode one text frame and apply it. Bad frames are logged and dropped.
    pub fn handle_text(&self, text: &str) {
        match decode_client(text) {
            Ok(msg) => self.dispatch(msg),
            Err(e) if e.is_unknown_code() => {
                debug!(player_id = %self.id, error = %e, "Ignoring unknown message");
            }
            Err(e) => {
                warn!(player_id = %self.id, error = %e, "Failed to parse client message");
            }
        }
    }

    /// Apply one decoded message to the world
    pub fn dispatch(&self, msg: ClientMsg) {
        match msg {
            ClientMsg::Movement(m) => {
                self.world.apply_movement(&self.id, m.x, m.y, m.rotation);
            }
            ClientMsg::SetName(s) => {
                debug!(player_id = %self.id, name = %s.name, "Set name");
                self.world.apply_name_ship(&self.id, s.name, s.ship);
            }
            ClientMsg::Projectiles(p) => {
                self.world.apply_projectiles(&self.id, p.projectiles);
            }
            ClientMsg::PlayerHit(hit) => {
                if let Some(kill) = self.world.resolve_hit(&self.id, &hit.player_hit) {
                    info!(
                        player_id = %self.id,
                        victim_id = %kill.victim_id,
                        kills = kill.attacker_kills,
                        "Player killed"
                    );
                    self.send(&ServerMsg::PlayerKilled {
                        name: kill.victim_name,
                    });
                }
            }
        }
    }

    /// Peer answered a liveness probe
    pub fn handle_pong(&self) {
        if let Some(rtt) = self.handle.acknowledge() {
            let latency_ms = ceil_millis(rtt);
            debug!(player_id = %self.id, latency_ms, "First probe acknowledged");
            self.send(&ServerMsg::ping(latency_ms));
        }
    }

    /// Resolves once the liveness monitor evicts this session
    pub async fn evicted(&self) {
        self.handle.evicted().await;
    }

    /// Queue a message for this client; dropped if the client is too slow
    pub fn send(&self, msg: &ServerMsg) {
        match msg.encode() {
            Ok(json) => enqueue(&self.id, &self.outbound, Outbound::Text(json)),
            Err(e) => warn!(player_id = %self.id, error = %e, "Failed to encode message"),
        }
    }

    /// Tear down: forget liveness state and remove the player and its projectiles
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.liveness.unregister(&self.id);
        if self.world.remove_player(&self.id) {
            info!(player_id = %self.id, "Player removed");
        }
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Forward every fanout message to the socket writer until the channel
/// closes or the writer goes away
pub async fn forward_fanout(
    id: PlayerId,
    mut subscription: Subscription,
    outbound: mpsc::Sender<Outbound>,
) {
    while let Some(message) = subscription.recv().await {
        if outbound.is_closed() {
            break;
        }
        enqueue(&id, &outbound, Outbound::Fanout(message));
    }
    debug!(player_id = %id, channel = subscription.channel(), "Fanout forwarding stopped");
}

/// Best-effort enqueue; never waits on a slow socket
fn enqueue(id: &str, outbound: &mpsc::Sender<Outbound>, frame: Outbound) {
    match outbound.try_send(frame) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            debug!(player_id = %id, "Outbound queue full, dropping frame");
        }
        Err(TrySendError::Closed(_)) => {}
    }
}
