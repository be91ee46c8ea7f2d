//! Storage backend contract and its three implementations.
//!
//! One interface, three shapes: an in-memory JSON exporter
//! ([`memory::MemoryBackend`]), a batched relational writer targeting a
//! server-class database ([`relational_server::RelationalServerBackend`]),
//! and an embedded single-file relational writer with periodic disk
//! snapshots ([`relational_embedded::RelationalEmbeddedBackend`]).
//!
//! Every `Record*` method may be called from a buffered dispatcher
//! consumer; implementations must never hold a lock across disk or
//! network I/O (see the concurrency model).

pub mod memory;

#[cfg(feature = "relational-embedded")]
pub mod relational_embedded;

#[cfg(feature = "relational-server")]
pub mod relational_server;

use std::path::PathBuf;

use crate::error::Result;
use crate::types::{
    Ace3DeathEvent, Ace3UnconsciousEvent, ChatEvent, DeleteMarker, ExportMetadata, GeneralEvent,
    KillEvent, Marker, MarkerId, MarkerState, Mission, ProjectileEvent, RadioEvent,
    ServerFpsEvent, Soldier, SoldierState, TimeState, Vehicle, VehicleState, World,
};

/// Per-backend write-queue / flush-cycle counters, surfaced the same way
/// the dispatcher surfaces its own per-command status snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub records_written: u64,
    pub batches_flushed: u64,
    pub batches_dropped: u64,
}

pub trait StorageBackend: Send + Sync {
    fn init(&self) -> Result<()>;
    fn close(&self) -> Result<()>;

    /// Brackets a mission. Must populate `mission.id` (and `world.id`)
    /// before returning so the dispatcher's mission-scoped handlers can
    /// stamp their records.
    fn start_mission(&self, world: World, mission: Mission) -> Result<Mission>;
    fn end_mission(&self) -> Result<()>;

    fn add_soldier(&self, soldier: Soldier) -> Result<()>;
    fn add_vehicle(&self, vehicle: Vehicle) -> Result<()>;
    /// Returns the assigned durable marker id.
    fn add_marker(&self, marker: Marker) -> Result<MarkerId>;

    fn record_soldier_state(&self, state: SoldierState) -> Result<()>;
    fn record_vehicle_state(&self, state: VehicleState) -> Result<()>;
    fn record_marker_state(&self, state: MarkerState) -> Result<()>;
    fn record_projectile_event(&self, event: ProjectileEvent) -> Result<()>;
    fn record_kill_event(&self, event: KillEvent) -> Result<()>;
    fn record_chat_event(&self, event: ChatEvent) -> Result<()>;
    fn record_radio_event(&self, event: RadioEvent) -> Result<()>;
    fn record_general_event(&self, event: GeneralEvent) -> Result<()>;
    fn record_server_fps_event(&self, event: ServerFpsEvent) -> Result<()>;
    fn record_ace3_death_event(&self, event: Ace3DeathEvent) -> Result<()>;
    fn record_ace3_unconscious_event(&self, event: Ace3UnconsciousEvent) -> Result<()>;
    fn record_time_state(&self, state: TimeState) -> Result<()>;
    fn delete_marker(&self, delete: DeleteMarker) -> Result<()>;

    fn stats(&self) -> StorageStats;

    /// Optional capability: backends that can hand over a finished,
    /// already-written artifact (the memory backend's gzip export, the
    /// embedded backend's snapshot file) implement [`Uploadable`] and
    /// expose it here instead of every backend carrying dead methods.
    fn as_uploadable(&self) -> Option<&dyn Uploadable> {
        None
    }
}

pub trait Uploadable {
    fn get_exported_file_path(&self) -> Result<PathBuf>;
    fn get_export_metadata(&self) -> Result<ExportMetadata>;
}

/// One entry in a relational backend's per-table write queue. Grouping
/// every record kind behind one enum lets the writer thread treat "drain
/// the queue, begin a transaction, bulk-insert, commit" uniformly across
/// tables instead of special-casing each record type in the flush loop.
#[derive(Debug, Clone)]
pub enum RecordOp {
    SoldierState(SoldierState),
    VehicleState(VehicleState),
    MarkerState(MarkerState),
    ProjectileEvent(ProjectileEvent),
    KillEvent(KillEvent),
    ChatEvent(ChatEvent),
    RadioEvent(RadioEvent),
    GeneralEvent(GeneralEvent),
    ServerFpsEvent(ServerFpsEvent),
    Ace3DeathEvent(Ace3DeathEvent),
    Ace3UnconsciousEvent(Ace3UnconsciousEvent),
    TimeState(TimeState),
    DeleteMarker(DeleteMarker),
}

impl RecordOp {
    /// The logical table/queue this op belongs to; used to fan operations
    /// out to per-table queues.
    pub fn table(&self) -> &'static str {
        match self {
            RecordOp::SoldierState(_) => "soldier_states",
            RecordOp::VehicleState(_) => "vehicle_states",
            RecordOp::MarkerState(_) => "marker_states",
            RecordOp::ProjectileEvent(_) => "projectiles",
            RecordOp::KillEvent(_) => "kills",
            RecordOp::ChatEvent(_) => "chat",
            RecordOp::RadioEvent(_) => "radio",
            RecordOp::GeneralEvent(_) => "events",
            RecordOp::ServerFpsEvent(_) => "fps",
            RecordOp::Ace3DeathEvent(_) => "ace3_deaths",
            RecordOp::Ace3UnconsciousEvent(_) => "ace3_unconscious",
            RecordOp::TimeState(_) => "time_states",
            RecordOp::DeleteMarker(_) => "marker_deletes",
        }
    }
}
