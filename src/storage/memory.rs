//! In-memory backend: per-mission record lists, no persistence during the
//! mission. `end_mission` serialises everything into a single gzipped JSON
//! document whose schema is a stable, documented transformation of the
//! core records (the web-player consumer is an external contract; this
//! backend only owns the transformation, not the consumer).

use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use serde::Serialize;

use super::{StorageBackend, StorageStats, Uploadable};
use crate::error::{IngestError, Result};
use crate::types::{
    Ace3DeathEvent, Ace3UnconsciousEvent, ChatEvent, DeleteMarker, ExportMetadata, GeneralEvent,
    KillEvent, Marker, MarkerId, MarkerState, Mission, ProjectileEvent, RadioEvent,
    ServerFpsEvent, Soldier, SoldierState, TimeState, Vehicle, VehicleState, World,
};

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct MissionDocument {
    mission_name: String,
    world_name: String,
    end_frame: u64,
    entities: MissionEntities,
}

#[derive(Debug, Default, Serialize)]
struct MissionEntities {
    soldiers: Vec<Soldier>,
    vehicles: Vec<Vehicle>,
    soldier_states: Vec<SoldierState>,
    vehicle_states: Vec<VehicleState>,
    markers: Vec<Marker>,
    marker_states: Vec<MarkerState>,
    marker_deletes: Vec<DeleteMarker>,
    projectiles: Vec<ProjectileEvent>,
    kills: Vec<KillEvent>,
    chat: Vec<ChatEvent>,
    radio: Vec<RadioEvent>,
    events: Vec<GeneralEvent>,
    fps: Vec<ServerFpsEvent>,
    ace3_deaths: Vec<Ace3DeathEvent>,
    ace3_unconscious: Vec<Ace3UnconsciousEvent>,
    time_states: Vec<TimeState>,
}

struct MissionState {
    mission: Mission,
    world: World,
    entities: MissionEntities,
    next_marker_id: MarkerId,
}

/// Soft record cap per mission. Exceeding it logs a warning and continues;
/// truncation is explicitly a future concern, not implemented here.
pub struct MemoryBackend {
    addon_dir: PathBuf,
    soft_record_cap: u64,
    state: Mutex<Option<MissionState>>,
    last_export_path: Mutex<Option<PathBuf>>,
    last_export_metadata: Mutex<Option<ExportMetadata>>,
    records_written: AtomicU64,
}

impl MemoryBackend {
    pub fn new(addon_dir: impl Into<PathBuf>, soft_record_cap: u64) -> Self {
        Self {
            addon_dir: addon_dir.into(),
            soft_record_cap,
            state: Mutex::new(None),
            last_export_path: Mutex::new(None),
            last_export_metadata: Mutex::new(None),
            records_written: AtomicU64::new(0),
        }
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut MissionState) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.state.lock();
        let state = guard
            .as_mut()
            .ok_or_else(|| IngestError::BackendTransient("no mission in progress".to_string()))?;
        f(state)
    }

    fn record_count(entities: &MissionEntities) -> u64 {
        (entities.soldiers.len()
            + entities.vehicles.len()
            + entities.soldier_states.len()
            + entities.vehicle_states.len()
            + entities.markers.len()
            + entities.marker_states.len()
            + entities.marker_deletes.len()
            + entities.projectiles.len()
            + entities.kills.len()
            + entities.chat.len()
            + entities.radio.len()
            + entities.events.len()
            + entities.fps.len()
            + entities.ace3_deaths.len()
            + entities.ace3_unconscious.len()
            + entities.time_states.len()) as u64
    }

    fn record_counts(entities: &MissionEntities) -> std::collections::BTreeMap<String, u64> {
        [
            ("soldiers", entities.soldiers.len()),
            ("vehicles", entities.vehicles.len()),
            ("soldier_states", entities.soldier_states.len()),
            ("vehicle_states", entities.vehicle_states.len()),
            ("markers", entities.markers.len()),
            ("marker_states", entities.marker_states.len()),
            ("marker_deletes", entities.marker_deletes.len()),
            ("projectiles", entities.projectiles.len()),
            ("kills", entities.kills.len()),
            ("chat", entities.chat.len()),
            ("radio", entities.radio.len()),
            ("events", entities.events.len()),
            ("fps", entities.fps.len()),
            ("ace3_deaths", entities.ace3_deaths.len()),
            ("ace3_unconscious", entities.ace3_unconscious.len()),
            ("time_states", entities.time_states.len()),
        ]
        .into_iter()
        .map(|(name, count)| (name.to_string(), count as u64))
        .collect()
    }

    fn check_soft_cap(&self, entities: &MissionEntities, mission_name: &str) {
        let count = Self::record_count(entities);
        if count > 0 && count % self.soft_record_cap == 0 {
            tracing::warn!(
                mission = %mission_name,
                record_count = count,
                cap = self.soft_record_cap,
                "memory backend exceeded soft record cap; continuing without truncation"
            );
        }
    }
}

fn write_atomically(final_path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = final_path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, final_path)?;
    Ok(())
}

impl StorageBackend for MemoryBackend {
    fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.addon_dir)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn start_mission(&self, world: World, mut mission: Mission) -> Result<Mission> {
        mission.id = Some(1);
        let mut world = world;
        world.id = Some(1);
        mission.world_id = world.id;

        *self.state.lock() = Some(MissionState {
            mission: mission.clone(),
            world,
            entities: MissionEntities::default(),
            next_marker_id: 1,
        });
        Ok(mission)
    }

    fn end_mission(&self) -> Result<()> {
        let state = self
            .state
            .lock()
            .take()
            .ok_or_else(|| IngestError::BackendTransient("no mission in progress".to_string()))?;

        let end_frame = state
            .entities
            .soldier_states
            .iter()
            .map(|s| s.frame)
            .chain(state.entities.vehicle_states.iter().map(|s| s.frame))
            .max()
            .unwrap_or(0);

        let record_counts = Self::record_counts(&state.entities);

        let document = MissionDocument {
            mission_name: state.mission.name.clone(),
            world_name: state.world.name.clone(),
            end_frame,
            entities: state.entities,
        };

        let json = serde_json::to_vec(&document)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        let gzipped = encoder.finish()?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let filename = format!("{}_{}.json.gz", document.mission_name, timestamp);
        let path = self.addon_dir.join(filename);
        write_atomically(&path, &gzipped)?;

        *self.last_export_metadata.lock() = Some(ExportMetadata {
            mission_name: document.mission_name,
            start_time_unix_nanos: state.mission.start_time_unix_nanos,
            end_frame,
            record_counts,
        });
        *self.last_export_path.lock() = Some(path);
        Ok(())
    }

    fn add_soldier(&self, soldier: Soldier) -> Result<()> {
        self.with_state(|state| {
            state.entities.soldiers.push(soldier);
            self.records_written.fetch_add(1, Ordering::Relaxed);
            self.check_soft_cap(&state.entities, &state.mission.name);
            Ok(())
        })
    }

    fn add_vehicle(&self, vehicle: Vehicle) -> Result<()> {
        self.with_state(|state| {
            state.entities.vehicles.push(vehicle);
            self.records_written.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn add_marker(&self, mut marker: Marker) -> Result<MarkerId> {
        self.with_state(|state| {
            let id = state.next_marker_id;
            state.next_marker_id += 1;
            marker.id = Some(id);
            state.entities.markers.push(marker);
            self.records_written.fetch_add(1, Ordering::Relaxed);
            Ok(id)
        })
    }

    fn record_soldier_state(&self, state: SoldierState) -> Result<()> {
        self.with_state(|m| {
            m.entities.soldier_states.push(state);
            self.records_written.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn record_vehicle_state(&self, state: VehicleState) -> Result<()> {
        self.with_state(|m| {
            m.entities.vehicle_states.push(state);
            self.records_written.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn record_marker_state(&self, state: MarkerState) -> Result<()> {
        self.with_state(|m| {
            m.entities.marker_states.push(state);
            Ok(())
        })
    }

    fn record_projectile_event(&self, event: ProjectileEvent) -> Result<()> {
        self.with_state(|m| {
            m.entities.projectiles.push(event);
            Ok(())
        })
    }

    fn record_kill_event(&self, event: KillEvent) -> Result<()> {
        self.with_state(|m| {
            m.entities.kills.push(event);
            Ok(())
        })
    }

    fn record_chat_event(&self, event: ChatEvent) -> Result<()> {
        self.with_state(|m| {
            m.entities.chat.push(event);
            Ok(())
        })
    }

    fn record_radio_event(&self, event: RadioEvent) -> Result<()> {
        self.with_state(|m| {
            m.entities.radio.push(event);
            Ok(())
        })
    }

    fn record_general_event(&self, event: GeneralEvent) -> Result<()> {
        self.with_state(|m| {
            m.entities.events.push(event);
            Ok(())
        })
    }

    fn record_server_fps_event(&self, event: ServerFpsEvent) -> Result<()> {
        self.with_state(|m| {
            m.entities.fps.push(event);
            Ok(())
        })
    }

    fn record_ace3_death_event(&self, event: Ace3DeathEvent) -> Result<()> {
        self.with_state(|m| {
            m.entities.ace3_deaths.push(event);
            Ok(())
        })
    }

    fn record_ace3_unconscious_event(&self, event: Ace3UnconsciousEvent) -> Result<()> {
        self.with_state(|m| {
            m.entities.ace3_unconscious.push(event);
            Ok(())
        })
    }

    fn record_time_state(&self, state: TimeState) -> Result<()> {
        self.with_state(|m| {
            m.entities.time_states.push(state);
            Ok(())
        })
    }

    fn delete_marker(&self, delete: DeleteMarker) -> Result<()> {
        self.with_state(|m| {
            m.entities.marker_deletes.push(delete);
            Ok(())
        })
    }

    fn stats(&self) -> StorageStats {
        StorageStats {
            records_written: self.records_written.load(Ordering::Relaxed),
            batches_flushed: 0,
            batches_dropped: 0,
        }
    }

    fn as_uploadable(&self) -> Option<&dyn Uploadable> {
        Some(self)
    }
}

impl Uploadable for MemoryBackend {
    fn get_exported_file_path(&self) -> Result<PathBuf> {
        self.last_export_path
            .lock()
            .clone()
            .ok_or_else(|| IngestError::BackendTransient("mission not yet exported".to_string()))
    }

    fn get_export_metadata(&self) -> Result<ExportMetadata> {
        self.last_export_metadata
            .lock()
            .clone()
            .ok_or_else(|| IngestError::BackendTransient("mission not yet exported".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

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
            playable_slots: crate::types::PlayableSlots {
                east: 10,
                west: 10,
                independent: 5,
                civilian: 0,
                logic: 2,
            },
            side_friendly: crate::types::SideFriendlyMatrix {
                east_west: false,
                east_independent: true,
                west_independent: false,
            },
            start_time_unix_nanos: 0,
        }
    }

    #[test]
    fn mission_bootstrap_exports_gzip_json() {
        let dir = tempdir().unwrap();
        let backend = MemoryBackend::new(dir.path(), 5_000_000);
        backend.init().unwrap();

        let mission = backend.start_mission(sample_world(), sample_mission()).unwrap();
        assert_eq!(mission.id, Some(1));

        backend.end_mission().unwrap();

        let path = backend.get_exported_file_path().unwrap();
        assert!(path.exists());
        assert!(path.to_string_lossy().starts_with(&format!(
            "{}/T_",
            dir.path().to_string_lossy()
        )));

        let bytes = std::fs::read(&path).unwrap();
        let mut decoder = flate2::read::GzDecoder::new(&bytes[..]);
        let mut decompressed = String::new();
        std::io::Read::read_to_string(&mut decoder, &mut decompressed).unwrap();
        let value: serde_json::Value = serde_json::from_str(&decompressed).unwrap();
        assert_eq!(value["missionName"], "T");
        assert_eq!(value["worldName"], "altis");
        assert_eq!(value["endFrame"], 0);

        let metadata = backend.get_export_metadata().unwrap();
        assert_eq!(metadata.mission_name, "T");
        assert_eq!(metadata.end_frame, 0);
        assert_eq!(metadata.record_counts["soldiers"], 0);
    }

    #[test]
    fn export_metadata_unavailable_before_end_mission() {
        let dir = tempdir().unwrap();
        let backend = MemoryBackend::new(dir.path(), 5_000_000);
        backend.init().unwrap();
        backend.start_mission(sample_world(), sample_mission()).unwrap();

        let err = backend.get_export_metadata().unwrap_err();
        assert!(matches!(err, IngestError::BackendTransient(_)));
    }

    #[test]
    fn record_without_mission_fails() {
        let dir = tempdir().unwrap();
        let backend = MemoryBackend::new(dir.path(), 5_000_000);
        let err = backend
            .add_soldier(Soldier {
                object_id: 1,
                join_time_unix_nanos: 0,
                join_frame: 0,
                unit_type: String::new(),
                unit_name: String::new(),
                group_id: String::new(),
                side: String::new(),
                is_player: false,
                role_description: String::new(),
                class_name: String::new(),
                display_name: String::new(),
                player_uid: String::new(),
                squad_info: serde_json::Value::Null,
            })
            .unwrap_err();
        assert!(matches!(err, IngestError::BackendTransient(_)));
    }
}
