//! Worker handlers: one per ingest command. Each composes parse -> cache
//! validation/enrichment -> backend call, exactly as the component design
//! describes it. Registration with the dispatcher (buffer depths, sync vs
//! buffered) lives in `crate::lifecycle`, which is the "worker manager"
//! collaborator from the system overview.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::{EntityCache, MarkerCache};
use crate::error::{IngestError, Result};
use crate::parser;
use crate::storage::StorageBackend;
use crate::types::EntityRef;

/// Tracks which (marker name) pairs have already produced an "unknown
/// marker" log line this mission, so a flood of moves against a typo'd
/// name doesn't flood the log sink. Cleared alongside the marker cache at
/// `:NEW:MISSION:`.
#[derive(Default)]
pub struct UnknownMarkerLog {
    seen: Mutex<HashSet<String>>,
}

impl UnknownMarkerLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.seen.lock().clear();
    }

    /// Returns true the first time `name` is seen this mission.
    fn first_time(&self, name: &str) -> bool {
        self.seen.lock().insert(name.to_string())
    }
}

/// Classifies a raw ObjectID against both caches, the way `:KILL:`,
/// `:PROJECTILE:` and `:ACE3:DEATH:` handlers all need to.
fn classify_ref(cache: &EntityCache, id: crate::types::ObjectId) -> Option<EntityRef> {
    let (soldier, vehicle) = cache.classify(id);
    if soldier.is_some() {
        Some(EntityRef::Soldier(id))
    } else if vehicle.is_some() {
        Some(EntityRef::Vehicle(id))
    } else {
        None
    }
}

/// `:NEW:SOLDIER:` — inserted into the cache *before* being forwarded to
/// the backend: the host's next event in arrival order may reference this
/// ObjectID, and the cache must be authoritative even if the backend is
/// slow.
pub fn handle_new_soldier(
    cache: &EntityCache,
    backend: &dyn StorageBackend,
    args: Vec<String>,
) -> Result<()> {
    let soldier = parser::parse_new_soldier(&args)?;
    cache.add_soldier(soldier.clone());
    backend.add_soldier(soldier)
}

/// `:NEW:VEHICLE:` — same pattern as soldier registration.
pub fn handle_new_vehicle(
    cache: &EntityCache,
    backend: &dyn StorageBackend,
    args: Vec<String>,
) -> Result<()> {
    let vehicle = parser::parse_new_vehicle(&args)?;
    cache.add_vehicle(vehicle.clone());
    backend.add_vehicle(vehicle)
}

/// `:NEW:SOLDIER:STATE:` — drops with `TooEarlyForStateAssociation` if the
/// soldier is not yet cached. Fills `GroupID`/`Side` from the cached
/// registration when the host omitted them, and applies the
/// once-a-player-always-a-player merge.
pub fn handle_soldier_state(
    cache: &EntityCache,
    backend: &dyn StorageBackend,
    args: Vec<String>,
) -> Result<()> {
    let mut state = parser::parse_soldier_state(&args)?;

    let cached = cache
        .get_soldier(state.soldier_id)
        .ok_or(IngestError::TooEarlyForStateAssociation(state.soldier_id))?;

    if state.group_id.is_empty() {
        state.group_id = cached.group_id.clone();
    }
    if state.side.is_empty() {
        state.side = cached.side.clone();
    }

    if state.is_player && !cached.is_player {
        cache.upgrade_to_player(state.soldier_id, &state.unit_name)?;
    } else if !state.is_player && cached.is_player {
        // sticky player flag: the state event cannot regress the cache,
        // and the durable record should reflect the sticky truth too.
        state.is_player = true;
    }

    backend.record_soldier_state(state)
}

/// `:NEW:VEHICLE:STATE:`
pub fn handle_vehicle_state(
    cache: &EntityCache,
    backend: &dyn StorageBackend,
    args: Vec<String>,
) -> Result<()> {
    let state = parser::parse_vehicle_state(&args)?;
    cache
        .get_vehicle(state.vehicle_id)
        .ok_or(IngestError::TooEarlyForStateAssociation(state.vehicle_id))?;
    backend.record_vehicle_state(state)
}

/// `:PROJECTILE:` — each raw hit is classified; unclassified hits are
/// dropped with a warn log, once per projectile (not once per hit, to
/// avoid flooding on a single bad projectile).
pub fn handle_projectile(
    cache: &EntityCache,
    backend: &dyn StorageBackend,
    args: Vec<String>,
) -> Result<()> {
    let parsed = parser::parse_projectile(&args)?;

    let firer = if let Some(vehicle_id) = parsed.vehicle {
        Some(EntityRef::Vehicle(vehicle_id))
    } else {
        parsed.firer.and_then(|id| classify_ref(cache, id))
    };

    let mut hits = Vec::with_capacity(parsed.raw_hits.len());
    let mut dropped = 0u32;
    for raw in &parsed.raw_hits {
        match classify_ref(cache, raw.entity_id) {
            Some(target) => hits.push(crate::types::ProjectileHit {
                target,
                frame: raw.frame,
                position: raw.position,
                components_hit: raw.components_hit,
            }),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::warn!(
            dropped,
            total = parsed.raw_hits.len(),
            "projectile hit(s) against unregistered entity dropped"
        );
    }

    let event = crate::types::ProjectileEvent {
        firer,
        capture_frame: parsed.capture_frame,
        fired_time_unix_nanos: parsed.fired_time_unix_nanos,
        weapon_display: parsed.weapon_display,
        magazine_display: parsed.magazine_display,
        muzzle_display: parsed.muzzle_display,
        simulation_type: parsed.simulation_type,
        icon_path: parsed.icon_path,
        trajectory: parsed.trajectory,
        hits,
    };
    backend.record_projectile_event(event)
}

/// `:KILL:` — unclassified attackers are allowed (environmental kills);
/// unclassified victims cause the event to be dropped.
pub fn handle_kill(
    cache: &EntityCache,
    backend: &dyn StorageBackend,
    args: Vec<String>,
) -> Result<()> {
    let parsed = parser::parse_kill(&args)?;

    let victim = classify_ref(cache, parsed.victim_id).ok_or_else(|| {
        IngestError::CacheMiss(format!("kill victim {} not registered", parsed.victim_id))
    })?;
    let attacker = parsed.attacker_id.and_then(|id| classify_ref(cache, id));

    let event = parser::finish_kill(&parsed, victim, attacker);
    backend.record_kill_event(event)
}

/// `:CHAT:` — a nil sender (system message) is valid; a non-nil sender
/// not present in the soldier cache causes the event to be dropped.
pub fn handle_chat(
    cache: &EntityCache,
    backend: &dyn StorageBackend,
    args: Vec<String>,
) -> Result<()> {
    let event = parser::parse_chat(&args)?;
    if let Some(sender) = event.sender {
        if cache.get_soldier(sender).is_none() {
            return Err(IngestError::CacheMiss(format!(
                "chat sender {sender} not registered"
            )));
        }
    }
    backend.record_chat_event(event)
}

/// `:RADIO:` — same rule as `:CHAT:`.
pub fn handle_radio(
    cache: &EntityCache,
    backend: &dyn StorageBackend,
    args: Vec<String>,
) -> Result<()> {
    let event = parser::parse_radio(&args)?;
    if let Some(sender) = event.sender {
        if cache.get_soldier(sender).is_none() {
            return Err(IngestError::CacheMiss(format!(
                "radio sender {sender} not registered"
            )));
        }
    }
    backend.record_radio_event(event)
}

/// `:ACE3:DEATH:` — soldier must be cached; an optional damage source, if
/// present, must resolve against either cache.
pub fn handle_ace3_death(
    cache: &EntityCache,
    backend: &dyn StorageBackend,
    args: Vec<String>,
) -> Result<()> {
    let (mut event, damage_source_id) = parser::parse_ace3_death(&args)?;

    if cache.get_soldier(event.soldier_id).is_none() {
        return Err(IngestError::TooEarlyForStateAssociation(event.soldier_id));
    }

    if let Some(id) = damage_source_id {
        let resolved = classify_ref(cache, id)
            .ok_or_else(|| IngestError::CacheMiss(format!("ace3 damage source {id} not registered")))?;
        event.damage_source = Some(resolved);
    }

    backend.record_ace3_death_event(event)
}

/// `:ACE3:UNCONSCIOUS:`
pub fn handle_ace3_unconscious(
    cache: &EntityCache,
    backend: &dyn StorageBackend,
    args: Vec<String>,
) -> Result<()> {
    let event = parser::parse_ace3_unconscious(&args)?;
    if cache.get_soldier(event.soldier_id).is_none() {
        return Err(IngestError::TooEarlyForStateAssociation(event.soldier_id));
    }
    backend.record_ace3_unconscious_event(event)
}

/// `:NEW:MARKER:` — the marker cache is updated only once the backend has
/// confirmed a durable ID. If the backend fails, the cache is left
/// untouched and subsequent `:NEW:MARKER:STATE:` for this name will
/// (correctly) fail to resolve.
pub fn handle_new_marker(
    marker_cache: &MarkerCache,
    backend: &dyn StorageBackend,
    args: Vec<String>,
) -> Result<()> {
    let marker = parser::parse_new_marker(&args)?;
    let name = marker.name.clone();
    let id = backend.add_marker(marker)?;
    marker_cache.set(name, id);
    Ok(())
}

/// `:NEW:MARKER:STATE:` — resolves the name through the marker cache;
/// drops (logged once per name per mission) if unknown.
pub fn handle_new_marker_state(
    marker_cache: &MarkerCache,
    unknown_log: &UnknownMarkerLog,
    backend: &dyn StorageBackend,
    args: Vec<String>,
) -> Result<()> {
    let parsed = parser::parse_new_marker_state(&args)?;
    let Some(id) = marker_cache.get(&parsed.name) else {
        if unknown_log.first_time(&parsed.name) {
            tracing::warn!(marker = %parsed.name, "marker move against unknown name");
        }
        return Ok(());
    };
    let state = parser::finish_marker_state(parsed, id);
    backend.record_marker_state(state)
}

/// `:DELETE:MARKER:` — the cache entry is left intact; history queries may
/// still need to resolve the name afterwards.
pub fn handle_delete_marker(backend: &dyn StorageBackend, args: Vec<String>) -> Result<()> {
    let delete = parser::parse_delete_marker(&args)?;
    backend.delete_marker(delete)
}

/// `:NEW:TIME:STATE:`, `:FPS:` and `:EVENT:` carry no entity reference and
/// need no cache lookup; they are a straight parse-then-forward.
pub fn handle_time_state(backend: &dyn StorageBackend, args: Vec<String>) -> Result<()> {
    backend.record_time_state(parser::parse_time_state(&args)?)
}

pub fn handle_fps(backend: &dyn StorageBackend, args: Vec<String>) -> Result<()> {
    backend.record_server_fps_event(parser::parse_fps(&args)?)
}

pub fn handle_general_event(backend: &dyn StorageBackend, args: Vec<String>) -> Result<()> {
    backend.record_general_event(parser::parse_event(&args)?)
}

/// Bundles the shared collaborators every handler closure captures, so
/// `crate::lifecycle` can register the whole command surface in one pass
/// without repeating `Arc::clone` five different ways per command.
#[derive(Clone)]
pub struct HandlerContext {
    pub entity_cache: Arc<EntityCache>,
    pub marker_cache: Arc<MarkerCache>,
    pub unknown_marker_log: Arc<UnknownMarkerLog>,
    pub backend: Arc<dyn StorageBackend>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryBackend;
    use crate::types::{Mission, PlayableSlots, SideFriendlyMatrix, World};

    fn sample_world() -> World {
        World {
            id: None,
            name: "altis".to_string(),
            name_original: "altis".to_string(),
            display_name: "Altis".to_string(),
            workshop_id: String::new(),
            author: "BIS".to_string(),
            world_size: 30720.0,
            latitude: -40.0,
            longitude: 20.0,
        }
    }

    fn sample_mission() -> Mission {
        Mission {
            id: None,
            world_id: None,
            name: "T".to_string(),
            briefing_name: "B".to_string(),
            mission_name_source: String::new(),
            on_load_name: String::new(),
            author: "A".to_string(),
            server_name: "S".to_string(),
            server_profile: "S".to_string(),
            tag: "TvT".to_string(),
            capture_delay: 1.0,
            addons: vec![],
            playable_slots: PlayableSlots {
                east: 0,
                west: 0,
                independent: 0,
                civilian: 0,
                logic: 0,
            },
            side_friendly: SideFriendlyMatrix {
                east_west: false,
                east_independent: false,
                west_independent: false,
            },
            start_time_unix_nanos: 0,
        }
    }

    fn soldier_args(id: &str, is_player: &str) -> Vec<String> {
        vec![
            id,
            "0",
            "Man",
            "Habib",
            "Alpha",
            "WEST",
            is_player,
            "rifleman",
            "B_Soldier_F",
            "Habib",
            "1700000000000000000",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    #[test]
    fn registration_then_state_fills_empty_fields() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackend::new(dir.path(), 5_000_000);
        backend.init().unwrap();
        backend.start_mission(sample_world(), sample_mission()).unwrap();
        let cache = EntityCache::new();

        handle_new_soldier(&cache, &backend, soldier_args("42", "false")).unwrap();

        let state_args: Vec<String> = vec![
            "42", "10", "[0,0,0]", "90", "ALIVE", "", "-1", "Habib", "false", "rifleman", "true",
            "false", "UP", "", "", "0,0,0,0,0,0", "1700000000000000001",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        handle_soldier_state(&cache, &backend, state_args).unwrap();
        assert_eq!(cache.get_soldier(42).unwrap().group_id, "Alpha");
    }

    #[test]
    fn state_for_unregistered_soldier_is_too_early() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackend::new(dir.path(), 5_000_000);
        backend.init().unwrap();
        backend.start_mission(sample_world(), sample_mission()).unwrap();
        let cache = EntityCache::new();

        let state_args: Vec<String> = vec![
            "999", "10", "[0,0,0]", "90", "ALIVE", "", "-1", "ghost", "false", "rifleman", "true",
            "false", "UP", "", "", "0,0,0,0,0,0", "1700000000000000001",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let err = handle_soldier_state(&cache, &backend, state_args).unwrap_err();
        assert!(matches!(err, IngestError::TooEarlyForStateAssociation(999)));
    }

    #[test]
    fn player_takeover_through_handler() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackend::new(dir.path(), 5_000_000);
        backend.init().unwrap();
        backend.start_mission(sample_world(), sample_mission()).unwrap();
        let cache = EntityCache::new();

        handle_new_soldier(&cache, &backend, soldier_args("10", "false")).unwrap();

        let takeover_args: Vec<String> = vec![
            "10", "5", "[0,0,0]", "0", "ALIVE", "", "-1", "zigster", "true", "rifleman", "true",
            "false", "UP", "", "", "0,0,0,0,0,0", "1700000000000000001",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        handle_soldier_state(&cache, &backend, takeover_args).unwrap();
        assert!(cache.get_soldier(10).unwrap().is_player);
        assert_eq!(cache.get_soldier(10).unwrap().unit_name, "zigster");

        let regress_args: Vec<String> = vec![
            "10", "6", "[0,0,0]", "0", "ALIVE", "", "-1", "zigster", "false", "rifleman", "true",
            "false", "UP", "", "", "0,0,0,0,0,0", "1700000000000000002",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        handle_soldier_state(&cache, &backend, regress_args).unwrap();
        assert!(cache.get_soldier(10).unwrap().is_player);
    }

    #[test]
    fn marker_lifecycle_through_handlers() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackend::new(dir.path(), 5_000_000);
        backend.init().unwrap();
        backend.start_mission(sample_world(), sample_mission()).unwrap();
        let marker_cache = MarkerCache::new();
        let unknown_log = UnknownMarkerLog::new();

        let create_args: Vec<String> = vec![
            "Proj#123", "0", "mil_dot", "", "10", "-1", "0", "ColorRed", "icon", "WEST", "[0,0]",
            "ICON", "1.0", "SolidFull", "1700000000000000000",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        handle_new_marker(&marker_cache, &backend, create_args).unwrap();
        assert_eq!(marker_cache.get("Proj#123"), Some(1));

        let move_args: Vec<String> = vec!["Proj#123", "50", "[1,1]", "45", "0.8"]
            .into_iter()
            .map(String::from)
            .collect();
        handle_new_marker_state(&marker_cache, &unknown_log, &backend, move_args).unwrap();

        let delete_args: Vec<String> = vec!["Proj#123", "500"]
            .into_iter()
            .map(String::from)
            .collect();
        handle_delete_marker(&backend, delete_args).unwrap();
        assert_eq!(marker_cache.get("Proj#123"), Some(1));
    }

    #[test]
    fn projectile_drops_unclassified_hits() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackend::new(dir.path(), 5_000_000);
        backend.init().unwrap();
        backend.start_mission(sample_world(), sample_mission()).unwrap();
        let cache = EntityCache::new();

        handle_new_soldier(&cache, &backend, soldier_args("7", "false")).unwrap();
        let vehicle_args: Vec<String> = vec!["30", "0", "car", "Ifrit", "{}", "1700000000000000000"]
            .into_iter()
            .map(String::from)
            .collect();
        handle_new_vehicle(&cache, &backend, vehicle_args).unwrap();

        let body = serde_json::json!({
            "firedTime": 1,
            "firedFrame": 10,
            "firerID": 7,
            "vehicleID": -1,
            "positions": [[1, 0, "[0,0,0]"]],
            "hitParts": [[7, [], "[0,0,0]", 11], [30, [], "[1,1,1]", 11], [999, [], "[2,2,2]", 11]],
            "weaponDisplay": "Rifle",
            "magazineDisplay": "Mag",
            "muzzleDisplay": "Muzzle",
            "simulationType": "shotBullet",
            "iconPath": "path"
        });
        handle_projectile(&cache, &backend, vec![body.to_string()]).unwrap();
    }
}
