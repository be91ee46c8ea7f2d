//! Entity and marker caches.
//!
//! The entity cache glues later per-frame events back to the registration
//! record that introduced the entity. It is the sole owner of "is this
//! ObjectID known yet" during a mission; state handlers that find nothing
//! here return [`IngestError::TooEarlyForStateAssociation`] rather than
//! inventing a registration.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::IngestError;
use crate::types::{MarkerId, ObjectId, Soldier, Vehicle};

/// `ObjectID -> Soldier` and `ObjectID -> Vehicle`, guarded by one lock
/// each so a soldier lookup never blocks on a concurrent vehicle write.
pub struct EntityCache {
    soldiers: RwLock<FxHashMap<ObjectId, Soldier>>,
    vehicles: RwLock<FxHashMap<ObjectId, Vehicle>>,
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityCache {
    pub fn new() -> Self {
        Self {
            soldiers: RwLock::new(FxHashMap::default()),
            vehicles: RwLock::new(FxHashMap::default()),
        }
    }

    /// Idempotent by ObjectID, with the sticky-player-flag merge: once
    /// `is_player` has been observed true for an ObjectID, a later
    /// registration or state event carrying `is_player = false` cannot
    /// regress it.
    pub fn add_soldier(&self, mut soldier: Soldier) {
        let mut guard = self.soldiers.write();
        if let Some(existing) = guard.get(&soldier.object_id) {
            if existing.is_player && !soldier.is_player {
                soldier.is_player = true;
            }
        }
        guard.insert(soldier.object_id, soldier);
    }

    pub fn add_vehicle(&self, vehicle: Vehicle) {
        self.vehicles.write().insert(vehicle.object_id, vehicle);
    }

    pub fn get_soldier(&self, id: ObjectId) -> Option<Soldier> {
        self.soldiers.read().get(&id).cloned()
    }

    pub fn get_vehicle(&self, id: ObjectId) -> Option<Vehicle> {
        self.vehicles.read().get(&id).cloned()
    }

    /// Applies the player-takeover merge to an already-cached soldier
    /// without replacing the whole record, used by the state handler when
    /// a state event carries `is_player = true` for a previously-AI
    /// soldier. Returns the updated record, or `TooEarlyForStateAssociation`
    /// if the soldier was never registered.
    pub fn upgrade_to_player(
        &self,
        id: ObjectId,
        unit_name: &str,
    ) -> Result<Soldier, IngestError> {
        let mut guard = self.soldiers.write();
        let soldier = guard
            .get_mut(&id)
            .ok_or(IngestError::TooEarlyForStateAssociation(id))?;
        soldier.is_player = true;
        soldier.unit_name = unit_name.to_string();
        Ok(soldier.clone())
    }

    /// Single lookup across both maps, used by handlers that must decide
    /// which side of a kill/hit an entity is on.
    pub fn classify(&self, id: ObjectId) -> (Option<Soldier>, Option<Vehicle>) {
        (self.get_soldier(id), self.get_vehicle(id))
    }

    /// Clears both maps. Called exactly at `:NEW:MISSION:` before any
    /// handler processes mission-scoped events. Idempotent: calling twice
    /// with no intervening `add_*` leaves the cache in the same state as
    /// calling once.
    pub fn reset(&self) {
        self.soldiers.write().clear();
        self.vehicles.write().clear();
    }
}

/// `MarkerName -> MarkerID`, guarded by a single RW lock. A name is held
/// only while the marker is live for the current mission (cleared on
/// `reset`, not on delete — delete leaves history queryable).
pub struct MarkerCache {
    markers: RwLock<FxHashMap<String, MarkerId>>,
}

impl Default for MarkerCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkerCache {
    pub fn new() -> Self {
        Self {
            markers: RwLock::new(FxHashMap::default()),
        }
    }

    /// Called only once the backend has confirmed a durable ID for `name`.
    pub fn set(&self, name: impl Into<String>, id: MarkerId) {
        self.markers.write().insert(name.into(), id);
    }

    pub fn get(&self, name: &str) -> Option<MarkerId> {
        self.markers.read().get(name).copied()
    }

    pub fn reset(&self) {
        self.markers.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn soldier(id: ObjectId, is_player: bool, unit_name: &str) -> Soldier {
        Soldier {
            object_id: id,
            join_time_unix_nanos: 0,
            join_frame: 0,
            unit_type: "Man".to_string(),
            unit_name: unit_name.to_string(),
            group_id: String::new(),
            side: String::new(),
            is_player,
            role_description: String::new(),
            class_name: String::new(),
            display_name: String::new(),
            player_uid: String::new(),
            squad_info: serde_json::Value::Null,
        }
    }

    #[test]
    fn add_is_idempotent_by_object_id() {
        let cache = EntityCache::new();
        cache.add_soldier(soldier(1, false, "Habib"));
        cache.add_soldier(soldier(1, false, "Habib v2"));
        assert_eq!(cache.get_soldier(1).unwrap().unit_name, "Habib v2");
    }

    #[test]
    fn player_flag_is_sticky() {
        let cache = EntityCache::new();
        cache.add_soldier(soldier(10, false, "Habib"));
        cache.add_soldier(soldier(10, true, "zigster"));
        assert!(cache.get_soldier(10).unwrap().is_player);

        // a later registration carrying is_player=false cannot regress it
        cache.add_soldier(soldier(10, false, "zigster"));
        assert!(cache.get_soldier(10).unwrap().is_player);
    }

    #[test]
    fn upgrade_to_player_requires_prior_registration() {
        let cache = EntityCache::new();
        let err = cache.upgrade_to_player(999, "ghost").unwrap_err();
        assert!(matches!(
            err,
            IngestError::TooEarlyForStateAssociation(999)
        ));
    }

    #[test]
    fn reset_is_idempotent() {
        let cache = EntityCache::new();
        cache.add_soldier(soldier(1, false, "Habib"));
        cache.reset();
        cache.reset();
        assert!(cache.get_soldier(1).is_none());
    }

    #[test]
    fn classify_distinguishes_soldier_and_vehicle() {
        let cache = EntityCache::new();
        cache.add_soldier(soldier(7, false, "Habib"));
        cache.add_vehicle(Vehicle {
            object_id: 30,
            join_time_unix_nanos: 0,
            join_frame: 0,
            vehicle_class: "Ifrit".to_string(),
            display_name: "Ifrit".to_string(),
            customization: serde_json::Value::Null,
        });

        let (soldier, vehicle) = cache.classify(7);
        assert!(soldier.is_some());
        assert!(vehicle.is_none());

        let (soldier, vehicle) = cache.classify(30);
        assert!(soldier.is_none());
        assert!(vehicle.is_some());

        let (soldier, vehicle) = cache.classify(999);
        assert!(soldier.is_none());
        assert!(vehicle.is_none());
    }

    #[test]
    fn marker_cache_set_get_reset() {
        let cache = MarkerCache::new();
        assert!(cache.get("Proj#123").is_none());
        cache.set("Proj#123", 5);
        assert_eq!(cache.get("Proj#123"), Some(5));
        cache.reset();
        assert!(cache.get("Proj#123").is_none());
    }
}
