//! Core data model: identifiers, geometry, and the record types every
//! parser produces and every storage backend persists.
//!
//! These are plain value types. None of them carry I/O or shared state;
//! parser outputs are moved by value into handlers and onward into the
//! backend (see `crate::parser` and `crate::handlers`).

use serde::{Deserialize, Serialize};

/// Host-assigned entity identifier. Stable across a mission, reused across
/// missions (the host recycles small integers), so it is never treated as
/// globally unique outside the scope of one mission.
pub type ObjectId = u16;

pub type MissionId = u32;
pub type WorldId = u32;
pub type MarkerId = u32;

/// The host's monotonic mission tick counter. Weakly monotonic in arrival
/// order per entity; not necessarily monotonic across entities.
pub type CaptureFrame = u64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position2D {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

pub type Polyline = Vec<Position2D>;

/// A single vertex of a projectile's flight path. `frame` is fixed to the
/// frame number uniformly (see the design notes' open question — some
/// source paths carry a nanosecond timestamp here instead; this crate does
/// not).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub position: Position3D,
    pub frame: CaptureFrame,
}

/// Ordered sequence of trajectory points. Length is >= 2 whenever present,
/// but an empty trajectory (no position samples arrived) is representable
/// and is not itself an error.
pub type Trajectory = Vec<TrajectoryPoint>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifeState {
    Alive,
    Unconscious,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stance {
    Up,
    Middle,
    Down,
}

/// Either a string workshop id or a numeric one; the host's addon list
/// mixes both shapes in the wild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkshopId {
    Text(String),
    Number(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Addon {
    pub name: String,
    pub workshop_id: WorkshopId,
}

/// Friendliness between two of the three playable sides, in the fixed
/// order (EastWest, EastIndependent, WestIndependent).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SideFriendlyMatrix {
    pub east_west: bool,
    pub east_independent: bool,
    pub west_independent: bool,
}

/// Playable slot counts in the fixed order (East, West, Independent,
/// Civilian, Logic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayableSlots {
    pub east: u32,
    pub west: u32,
    pub independent: u32,
    pub civilian: u32,
    pub logic: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    pub id: Option<WorldId>,
    pub name: String,
    pub name_original: String,
    pub display_name: String,
    pub workshop_id: String,
    pub author: String,
    pub world_size: f64,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: Option<MissionId>,
    pub world_id: Option<WorldId>,
    pub name: String,
    pub briefing_name: String,
    pub mission_name_source: String,
    pub on_load_name: String,
    pub author: String,
    pub server_name: String,
    pub server_profile: String,
    pub tag: String,
    pub capture_delay: f64,
    pub addons: Vec<Addon>,
    pub playable_slots: PlayableSlots,
    pub side_friendly: SideFriendlyMatrix,
    pub start_time_unix_nanos: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Soldier {
    pub object_id: ObjectId,
    pub join_time_unix_nanos: i64,
    pub join_frame: CaptureFrame,
    pub unit_type: String,
    pub unit_name: String,
    pub group_id: String,
    pub side: String,
    pub is_player: bool,
    pub role_description: String,
    pub class_name: String,
    pub display_name: String,
    pub player_uid: String,
    pub squad_info: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub object_id: ObjectId,
    pub join_time_unix_nanos: i64,
    pub join_frame: CaptureFrame,
    pub vehicle_class: String,
    pub display_name: String,
    pub customization: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreTuple {
    pub infantry_kills: i32,
    pub vehicle_kills: i32,
    pub armor_kills: i32,
    pub air_kills: i32,
    pub deaths: i32,
    pub total: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoldierState {
    pub soldier_id: ObjectId,
    pub frame: CaptureFrame,
    pub time_unix_nanos: i64,
    pub position: Position3D,
    pub bearing: f64,
    pub life_state: LifeState,
    pub in_vehicle: Option<ObjectId>,
    pub vehicle_role: Option<String>,
    pub unit_name: String,
    pub is_player: bool,
    pub current_role: String,
    pub has_stable_vitals: bool,
    pub is_dragged_or_carried: bool,
    pub stance: Stance,
    pub group_id: String,
    pub side: String,
    pub score: ScoreTuple,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub vehicle_id: ObjectId,
    pub frame: CaptureFrame,
    pub time_unix_nanos: i64,
    pub position: Position3D,
    pub bearing: f64,
    pub is_alive: bool,
    /// comma-joined ObjectIDs in the wire format; decoded to a typed list.
    pub crew: Vec<ObjectId>,
    pub fuel: f64,
    pub damage: f64,
    pub is_locked: bool,
    pub is_engine_on: bool,
    pub side: String,
    pub vector_dir: String,
    pub vector_up: String,
    pub turret_azimuth: f64,
    pub turret_elevation: f64,
}

/// Mutually exclusive soldier/vehicle reference, used everywhere the model
/// says "exactly one of soldier or vehicle".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityRef {
    Soldier(ObjectId),
    Vehicle(ObjectId),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectileHit {
    pub target: EntityRef,
    pub frame: CaptureFrame,
    pub position: Position3D,
    pub components_hit: u32,
}

/// An unclassified hit straight out of the parser: it carries only the raw
/// `EntityID`; classification into soldier/vehicle is deferred to the
/// handler, which consults the entity cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawHit {
    pub entity_id: ObjectId,
    pub frame: CaptureFrame,
    pub position: Position3D,
    pub components_hit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileEvent {
    pub firer: Option<EntityRef>,
    pub capture_frame: CaptureFrame,
    pub fired_time_unix_nanos: i64,
    pub weapon_display: String,
    pub magazine_display: String,
    pub muzzle_display: String,
    pub simulation_type: String,
    pub icon_path: String,
    pub trajectory: Trajectory,
    pub hits: Vec<ProjectileHit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KillEvent {
    pub victim: EntityRef,
    pub attacker: Option<EntityRef>,
    pub frame: CaptureFrame,
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitEvent {
    pub victim: EntityRef,
    pub attacker: Option<EntityRef>,
    pub frame: CaptureFrame,
    pub event_text: String,
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEvent {
    pub sender: Option<ObjectId>,
    pub frame: CaptureFrame,
    pub channel: String,
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioEvent {
    pub sender: Option<ObjectId>,
    pub frame: CaptureFrame,
    pub radio_type: String,
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralEvent {
    pub frame: CaptureFrame,
    pub name: String,
    pub message: String,
    pub extra_data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServerFpsEvent {
    pub frame: CaptureFrame,
    pub fps: f64,
    pub fps_min: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeState {
    pub frame: CaptureFrame,
    pub time_unix_nanos: i64,
    pub mission_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ace3DeathEvent {
    pub soldier_id: ObjectId,
    pub damage_source: Option<EntityRef>,
    pub frame: CaptureFrame,
    pub instigator: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ace3UnconsciousEvent {
    pub soldier_id: ObjectId,
    pub frame: CaptureFrame,
    pub is_awake: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub id: Option<MarkerId>,
    pub name: String,
    pub frame: CaptureFrame,
    pub marker_type: String,
    pub text: String,
    pub owner: ObjectId,
    pub color: String,
    pub size: String,
    pub side: String,
    pub position: Position2D,
    pub shape: String,
    pub alpha: f64,
    pub brush: String,
    pub polyline: Option<Polyline>,
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerState {
    pub marker_id: MarkerId,
    pub frame: CaptureFrame,
    pub position: Position2D,
    pub direction: f64,
    pub alpha: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteMarker {
    pub name: String,
    pub end_frame: CaptureFrame,
}

/// Metadata returned by `StorageBackend::Uploadable` implementations;
/// typed rather than an opaque blob, since the record counts a caller
/// cares about are known up front.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub mission_name: String,
    pub start_time_unix_nanos: i64,
    pub end_frame: CaptureFrame,
    pub record_counts: std::collections::BTreeMap<String, u64>,
}

/// A single line item in the dispatcher's status snapshot (see
/// `crate::dispatcher::Dispatcher::status`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStatus {
    pub command: String,
    pub processed: u64,
    pub dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workshop_id_accepts_both_shapes() {
        let text: WorkshopId = serde_json::from_str("\"12345\"").unwrap();
        let number: WorkshopId = serde_json::from_str("12345").unwrap();
        assert_eq!(text, WorkshopId::Text("12345".to_string()));
        assert_eq!(number, WorkshopId::Number(12345));
    }

    #[test]
    fn entity_ref_is_copy_and_eq() {
        let a = EntityRef::Soldier(7);
        let b = a;
        assert_eq!(a, b);
        assert_ne!(a, EntityRef::Vehicle(7));
    }
}
