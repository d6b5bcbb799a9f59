//! World state store - players, projectile sets and the leaderboard of one arena
//!
//! All mutation goes through [`WorldStore`], which serializes every call on a
//! single coarse lock. Mutators targeting an id that is no longer present are
//! no-ops: a disconnect racing with an in-flight message must never fail.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ArenaRules;

/// Opaque short token identifying a connection and its player
pub type PlayerId = String;

/// Default display name until the client sends `set_name`
pub const DEFAULT_NAME: &str = "unknown";
/// Default cosmetic ship tag
pub const DEFAULT_SHIP: &str = "default";

/// Player position on the field
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    /// Rotation in radians, client-reported
    pub rotation: f64,
}

/// Player state (client-authoritative movement, server-clamped)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub ship: String,
    pub position: Position,
    /// Health (0..=starting health)
    pub health: u32,
    pub kills: u32,
}

/// One row of the derived leaderboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub name: String,
    pub kills: u32,
}

/// Full copy of the world at one tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub players: BTreeMap<PlayerId, Player>,
    /// Projectile descriptors are opaque; they are relayed as reported
    pub projectiles: BTreeMap<PlayerId, Vec<Value>>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// Kill confirmed by a hit claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillReport {
    pub victim_id: PlayerId,
    pub victim_name: String,
    pub attacker_kills: u32,
}

/// Unlocked world model. Use [`WorldStore`] from concurrent code.
#[derive(Debug)]
pub struct World {
    rules: ArenaRules,
    players: BTreeMap<PlayerId, Player>,
    projectiles: BTreeMap<PlayerId, Vec<Value>>,
    leaderboard: Vec<LeaderboardEntry>,
}

impl World {
    pub fn new(rules: ArenaRules) -> Self {
        Self {
            rules,
            players: BTreeMap::new(),
            projectiles: BTreeMap::new(),
            leaderboard: Vec::new(),
        }
    }

    /// Spawn a player at the field center. Returns false if the id is taken.
    pub fn create_player(&mut self, id: &str) -> bool {
        if self.players.contains_key(id) {
            return false;
        }

        let player = Player {
            id: id.to_string(),
            name: DEFAULT_NAME.to_string(),
            ship: DEFAULT_SHIP.to_string(),
            position: Position {
                x: self.rules.field_max_width / 2.0,
                y: self.rules.field_max_height / 2.0,
                rotation: 0.0,
            },
            health: self.rules.starting_health,
            kills: 0,
        };
        self.players.insert(id.to_string(), player);
        true
    }

    /// Remove a player and its projectile set. Returns false if already gone.
    pub fn remove_player(&mut self, id: &str) -> bool {
        self.projectiles.remove(id);
        self.players.remove(id).is_some()
    }

    pub fn apply_movement(&mut self, id: &str, x: f64, y: f64, rotation: f64) {
        if let Some(player) = self.players.get_mut(id) {
            player.position = Position { x, y, rotation };
        }
    }

    /// Replace (never merge) the projectile set of a live player
    pub fn apply_projectiles(&mut self, id: &str, projectiles: Vec<Value>) {
        if self.players.contains_key(id) {
            self.projectiles.insert(id.to_string(), projectiles);
        }
    }

    /// Set the display name and, when given, the ship tag
    pub fn apply_name_ship(&mut self, id: &str, name: String, ship: Option<String>) {
        if let Some(player) = self.players.get_mut(id) {
            player.name = name;
            if let Some(ship) = ship {
                player.ship = ship;
            }
        }
    }

    /// Damage the target once. Returns true only on the hit that takes health to zero.
    pub fn apply_hit(&mut self, target_id: &str) -> bool {
        let damage = self.rules.hit_damage;
        match self.players.get_mut(target_id) {
            Some(target) if target.health > 0 => {
                target.health = target.health.saturating_sub(damage);
                target.health == 0
            }
            _ => false,
        }
    }

    /// Apply a hit claim and credit the attacker if it killed the target
    pub fn resolve_hit(&mut self, attacker_id: &str, target_id: &str) -> Option<KillReport> {
        if !self.apply_hit(target_id) {
            return None;
        }

        let victim_name = self
            .players
            .get(target_id)
            .map(|p| p.name.clone())
            .unwrap_or_default();

        // Attacker may have left between sending the claim and now
        let attacker_kills = match self.players.get_mut(attacker_id) {
            Some(attacker) => {
                attacker.kills += 1;
                attacker.kills
            }
            None => return None,
        };

        Some(KillReport {
            victim_id: target_id.to_string(),
            victim_name,
            attacker_kills,
        })
    }

    /// Clamp positions into the field and rebuild the leaderboard
    pub fn tick(&mut self) {
        let (max_x, max_y) = (self.rules.field_max_width, self.rules.field_max_height);

        for player in self.players.values_mut() {
            player.position.x = clamp(player.position.x, 0.0, max_x);
            player.position.y = clamp(player.position.y, 0.0, max_y);
        }

        let mut leaderboard: Vec<LeaderboardEntry> = self
            .players
            .values()
            .map(|p| LeaderboardEntry {
                name: p.name.clone(),
                kills: p.kills,
            })
            .collect();
        // Stable sort keeps id order among equal kill counts
        leaderboard.sort_by_key(|entry| entry.kills);
        self.leaderboard = leaderboard;
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            players: self.players.clone(),
            projectiles: self.projectiles.clone(),
            leaderboard: self.leaderboard.clone(),
        }
    }

    #[cfg(test)]
    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.get(id)
    }

    #[cfg(test)]
    pub fn contains(&self, id: &str) -> bool {
        self.players.contains_key(id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }
}

/// NaN coordinates collapse to the lower bound
fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        return min;
    }
    value.clamp(min, max)
}

/// Shared world with one mutual-exclusion lock per call
#[derive(Debug)]
pub struct WorldStore {
    inner: Mutex<World>,
}

impl WorldStore {
    pub fn new(rules: ArenaRules) -> Self {
        Self {
            inner: Mutex::new(World::new(rules)),
        }
    }

    pub fn create_player(&self, id: &str) -> bool {
        self.inner.lock().create_player(id)
    }

    pub fn remove_player(&self, id: &str) -> bool {
        self.inner.lock().remove_player(id)
    }

    pub fn apply_movement(&self, id: &str, x: f64, y: f64, rotation: f64) {
        self.inner.lock().apply_movement(id, x, y, rotation);
    }

    pub fn apply_projectiles(&self, id: &str, projectiles: Vec<Value>) {
        self.inner.lock().apply_projectiles(id, projectiles);
    }

    pub fn apply_name_ship(&self, id: &str, name: String, ship: Option<String>) {
        self.inner.lock().apply_name_ship(id, name, ship);
    }

    #[cfg(test)]
    pub fn apply_hit(&self, target_id: &str) -> bool {
        self.inner.lock().apply_hit(target_id)
    }

    pub fn resolve_hit(&self, attacker_id: &str, target_id: &str) -> Option<KillReport> {
        self.inner.lock().resolve_hit(attacker_id, target_id)
    }

    /// Run one tick and take the snapshot under the same lock
    pub fn tick(&self) -> WorldSnapshot {
        let mut world = self.inner.lock();
        world.tick();
        world.snapshot()
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> WorldSnapshot {
        self.inner.lock().snapshot()
    }

    #[cfg(test)]
    pub fn player(&self, id: &str) -> Option<Player> {
        self.inner.lock().player(id).cloned()
    }

    #[cfg(test)]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().contains(id)
    }

    pub fn player_count(&self) -> usize {
        self.inner.lock().player_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn world() -> World {
        World::new(ArenaRules::default())
    }

    #[test]
    fn new_player_has_defaults() {
        let mut w = world();
        assert!(w.create_player("a1"));
        assert!(!w.create_player("a1"));

        let p = w.player("a1").unwrap();
        assert_eq!(p.name, DEFAULT_NAME);
        assert_eq!(p.health, 100);
        assert_eq!(p.kills, 0);
        assert_eq!(p.position.x, 2000.0);
        assert_eq!(p.position.y, 2000.0);
    }

    #[test]
    fn tick_clamps_positions_into_field() {
        let mut w = world();
        for id in ["a", "b", "c", "d"] {
            w.create_player(id);
        }
        w.apply_movement("a", -50.0, 9000.0, 1.0);
        w.apply_movement("b", 4500.0, -1.0, 0.0);
        w.apply_movement("c", 123.0, 456.0, 3.0);
        w.apply_movement("d", f64::NAN, f64::INFINITY, 0.0);

        w.tick();
        for p in w.snapshot().players.values() {
            assert!((0.0..=4000.0).contains(&p.position.x), "{p:?}");
            assert!((0.0..=4000.0).contains(&p.position.y), "{p:?}");
        }

        let a = w.player("a").unwrap();
        assert_eq!((a.position.x, a.position.y, a.position.rotation), (0.0, 4000.0, 1.0));
        let c = w.player("c").unwrap();
        assert_eq!((c.position.x, c.position.y), (123.0, 456.0));
    }

    #[test]
    fn leaderboard_is_sorted_ascending_by_kills() {
        let mut w = world();
        for id in ["a", "b", "c", "d"] {
            w.create_player(id);
        }
        w.players.get_mut("a").unwrap().kills = 3;
        w.players.get_mut("b").unwrap().kills = 0;
        w.players.get_mut("c").unwrap().kills = 7;
        w.players.get_mut("d").unwrap().kills = 3;

        w.tick();
        let board = w.snapshot().leaderboard;
        assert_eq!(board.len(), 4);
        assert!(board.windows(2).all(|pair| pair[0].kills <= pair[1].kills));
        assert_eq!(board.first().unwrap().kills, 0);
        assert_eq!(board.last().unwrap().kills, 7);
    }

    #[test]
    fn hit_kills_exactly_once() {
        let mut w = world();
        w.create_player("t");
        w.players.get_mut("t").unwrap().health = 5;

        assert!(w.apply_hit("t"));
        assert_eq!(w.player("t").unwrap().health, 0);

        assert!(!w.apply_hit("t"));
        assert_eq!(w.player("t").unwrap().health, 0);
    }

    #[test]
    fn damage_never_underflows() {
        let mut w = World::new(ArenaRules {
            hit_damage: 30,
            ..ArenaRules::default()
        });
        w.create_player("t");
        let kills: Vec<bool> = (0..5).map(|_| w.apply_hit("t")).collect();
        assert_eq!(kills, vec![false, false, false, true, false]);
        assert_eq!(w.player("t").unwrap().health, 0);
    }

    #[test]
    fn resolve_hit_credits_attacker_once() {
        let mut w = world();
        w.create_player("a");
        w.create_player("b");
        w.apply_name_ship("a", "Rey".into(), None);

        let reports: Vec<KillReport> = (0..25).filter_map(|_| w.resolve_hit("b", "a")).collect();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].victim_name, "Rey");
        assert_eq!(w.player("b").unwrap().kills, 1);
    }

    #[test]
    fn removed_player_is_not_resurrected() {
        let mut w = world();
        w.create_player("a");
        w.apply_projectiles("a", vec![json!({"x": 1, "y": 2})]);
        assert_eq!(w.snapshot().projectiles["a"].len(), 1);

        assert!(w.remove_player("a"));
        assert!(!w.remove_player("a"));
        assert!(w.snapshot().projectiles.is_empty());

        w.apply_projectiles("a", vec![json!({})]);
        w.apply_movement("a", 1.0, 1.0, 0.0);
        w.apply_name_ship("a", "ghost".into(), Some("X".into()));
        assert!(!w.apply_hit("a"));

        let snap = w.snapshot();
        assert!(snap.players.is_empty());
        assert!(snap.projectiles.is_empty());
    }

    #[test]
    fn projectiles_are_replaced_not_merged() {
        let mut w = world();
        w.create_player("a");
        w.apply_projectiles("a", vec![json!(1), json!(2), json!(3)]);
        w.apply_projectiles("a", vec![json!(4)]);
        assert_eq!(w.snapshot().projectiles["a"], vec![json!(4)]);
    }

    #[test]
    fn name_without_ship_keeps_ship() {
        let mut w = world();
        w.create_player("a");
        w.apply_name_ship("a", "Rey".into(), Some("X1".into()));
        w.apply_name_ship("a", "Finn".into(), None);
        let p = w.player("a").unwrap();
        assert_eq!((p.name.as_str(), p.ship.as_str()), ("Finn", "X1"));
    }

    #[test]
    fn store_tick_returns_snapshot() {
        let store = WorldStore::new(ArenaRules::default());
        store.create_player("a");
        store.apply_movement("a", 5000.0, 10.0, 0.5);
        let snap = store.tick();
        assert_eq!(snap.players["a"].position.x, 4000.0);
        assert_eq!(snap.leaderboard.len(), 1);
        assert_eq!(store.player_count(), 1);
    }
}
