//! Embedded single-file relational backend.
//!
//! Target: a single-file database engine run in-memory, with periodic
//! disk snapshots standing in for crash durability. The process is the
//! sole writer and the file is a session artifact — the remote backend,
//! not this one, is the source of truth — so the PRAGMA tuning below
//! trades durability for throughput on purpose.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;

use super::{RecordOp, StorageBackend, StorageStats};
use crate::error::{IngestError, Result};
use crate::types::{
    Ace3DeathEvent, Ace3UnconsciousEvent, ChatEvent, DeleteMarker, GeneralEvent, KillEvent,
    Marker, MarkerId, MarkerState, Mission, ProjectileEvent, RadioEvent, ServerFpsEvent, Soldier,
    SoldierState, TimeState, Vehicle, VehicleState, World,
};

const FLUSH_CYCLE: Duration = Duration::from_secs(2);
const SNAPSHOT_CYCLE: Duration = Duration::from_secs(180);
const QUEUE_CAPACITY: usize = 20_000;

fn tune_connection(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "MEMORY")?;
    conn.pragma_update(None, "synchronous", "OFF")?;
    conn.pragma_update(None, "cache_size", -32_000i64)?; // >= 32MB, negative = KB
    conn.pragma_update(None, "page_size", 32_768i64)?;
    conn.pragma_update(None, "mmap_size", 268_435_456i64)?; // 256MB window
    Ok(())
}

fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS settings (id INTEGER PRIMARY KEY, schema_version INTEGER NOT NULL);
        CREATE TABLE IF NOT EXISTS worlds (id INTEGER PRIMARY KEY, name TEXT UNIQUE, payload TEXT);
        CREATE TABLE IF NOT EXISTS missions (id INTEGER PRIMARY KEY, world_id INTEGER, name TEXT, payload TEXT);
        CREATE TABLE IF NOT EXISTS soldiers (object_id INTEGER PRIMARY KEY, payload TEXT);
        CREATE TABLE IF NOT EXISTS vehicles (object_id INTEGER PRIMARY KEY, payload TEXT);
        CREATE TABLE IF NOT EXISTS markers (id INTEGER PRIMARY KEY, name TEXT, payload TEXT);
        CREATE TABLE IF NOT EXISTS soldier_states (frame INTEGER, payload TEXT);
        CREATE TABLE IF NOT EXISTS vehicle_states (frame INTEGER, payload TEXT);
        CREATE TABLE IF NOT EXISTS marker_states (frame INTEGER, payload TEXT);
        CREATE TABLE IF NOT EXISTS projectiles (frame INTEGER, payload TEXT);
        CREATE TABLE IF NOT EXISTS kills (frame INTEGER, payload TEXT);
        CREATE TABLE IF NOT EXISTS chat (frame INTEGER, payload TEXT);
        CREATE TABLE IF NOT EXISTS radio (frame INTEGER, payload TEXT);
        CREATE TABLE IF NOT EXISTS events (frame INTEGER, payload TEXT);
        CREATE TABLE IF NOT EXISTS fps (frame INTEGER, payload TEXT);
        CREATE TABLE IF NOT EXISTS ace3_deaths (frame INTEGER, payload TEXT);
        CREATE TABLE IF NOT EXISTS ace3_unconscious (frame INTEGER, payload TEXT);
        CREATE TABLE IF NOT EXISTS time_states (frame INTEGER, payload TEXT);
        CREATE TABLE IF NOT EXISTS marker_deletes (frame INTEGER, payload TEXT);
        ",
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO settings (id, schema_version) VALUES (1, 1)",
        [],
    )?;
    Ok(())
}

fn insert_op(conn: &Connection, op: &RecordOp) -> Result<()> {
    let table = op.table();
    let (frame, payload) = match op {
        RecordOp::SoldierState(s) => (s.frame, serde_json::to_string(s)?),
        RecordOp::VehicleState(s) => (s.frame, serde_json::to_string(s)?),
        RecordOp::MarkerState(s) => (s.frame, serde_json::to_string(s)?),
        RecordOp::ProjectileEvent(s) => (s.capture_frame, serde_json::to_string(s)?),
        RecordOp::KillEvent(s) => (s.frame, serde_json::to_string(s)?),
        RecordOp::ChatEvent(s) => (s.frame, serde_json::to_string(s)?),
        RecordOp::RadioEvent(s) => (s.frame, serde_json::to_string(s)?),
        RecordOp::GeneralEvent(s) => (s.frame, serde_json::to_string(s)?),
        RecordOp::ServerFpsEvent(s) => (s.frame, serde_json::to_string(s)?),
        RecordOp::Ace3DeathEvent(s) => (s.frame, serde_json::to_string(s)?),
        RecordOp::Ace3UnconsciousEvent(s) => (s.frame, serde_json::to_string(s)?),
        RecordOp::TimeState(s) => (s.frame, serde_json::to_string(s)?),
        RecordOp::DeleteMarker(s) => (s.end_frame, serde_json::to_string(s)?),
    };
    conn.execute(
        &format!("INSERT INTO {table} (frame, payload) VALUES (?1, ?2)"),
        rusqlite::params![frame as i64, payload],
    )?;
    Ok(())
}

struct Shared {
    conn: Mutex<Connection>,
    inserts_paused: AtomicBool,
    records_written: AtomicU64,
    batches_flushed: AtomicU64,
    batches_dropped: AtomicU64,
}

/// Embedded backend. One `.db` snapshot file per session, named
/// `<extension>_<YYYYMMDD_HHMMSS>.db` under `addon_dir`; each snapshot
/// cycle replaces it in place.
pub struct RelationalEmbeddedBackend {
    shared: Arc<Shared>,
    sender: SyncSender<RecordOp>,
    addon_dir: PathBuf,
    extension_name: String,
    shutdown: Arc<AtomicBool>,
}

impl RelationalEmbeddedBackend {
    pub fn open(addon_dir: impl Into<PathBuf>, extension_name: impl Into<String>) -> Result<Self> {
        let addon_dir = addon_dir.into();
        std::fs::create_dir_all(&addon_dir)?;

        let conn = Connection::open_in_memory()?;
        tune_connection(&conn)?;
        create_schema(&conn)?;

        let shared = Arc::new(Shared {
            conn: Mutex::new(conn),
            inserts_paused: AtomicBool::new(false),
            records_written: AtomicU64::new(0),
            batches_flushed: AtomicU64::new(0),
            batches_dropped: AtomicU64::new(0),
        });

        let (tx, rx) = sync_channel::<RecordOp>(QUEUE_CAPACITY);
        let shutdown = Arc::new(AtomicBool::new(false));

        let writer_shared = shared.clone();
        let writer_shutdown = shutdown.clone();
        thread::Builder::new()
            .name("embedded-writer".to_string())
            .spawn(move || loop {
                if writer_shutdown.load(Ordering::Relaxed) {
                    return;
                }
                if writer_shared.inserts_paused.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_secs(1));
                    continue;
                }

                let mut batch = Vec::new();
                while let Ok(op) = rx.try_recv() {
                    batch.push(op);
                    if batch.len() >= QUEUE_CAPACITY {
                        break;
                    }
                }

                if !batch.is_empty() {
                    let conn = writer_shared.conn.lock().unwrap_or_else(|e| e.into_inner());
                    let result: Result<()> = (|| {
                        conn.execute("BEGIN", [])?;
                        for op in &batch {
                            if let Err(e) = insert_op(&conn, op) {
                                conn.execute("ROLLBACK", [])?;
                                return Err(e);
                            }
                        }
                        conn.execute("COMMIT", [])?;
                        Ok(())
                    })();

                    match result {
                        Ok(()) => {
                            writer_shared
                                .records_written
                                .fetch_add(batch.len() as u64, Ordering::Relaxed);
                            writer_shared.batches_flushed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            writer_shared.batches_dropped.fetch_add(1, Ordering::Relaxed);
                            tracing::error!(error = %e, "embedded backend batch write failed, dropping batch");
                        }
                    }
                }

                thread::sleep(FLUSH_CYCLE);
            })
            .expect("spawning embedded backend writer thread");

        let backend = Self {
            shared,
            sender: tx,
            addon_dir,
            extension_name: extension_name.into(),
            shutdown: shutdown.clone(),
        };

        let snapshot_shared = backend.shared.clone();
        let snapshot_addon_dir = backend.addon_dir.clone();
        let snapshot_extension = backend.extension_name.clone();
        let snapshot_path_cell: Arc<Mutex<Option<PathBuf>>> =
            Arc::new(Mutex::new(None));
        let snapshot_shutdown = shutdown;
        let snapshot_path_cell_for_thread = snapshot_path_cell.clone();
        thread::Builder::new()
            .name("embedded-snapshot".to_string())
            .spawn(move || loop {
                thread::sleep(SNAPSHOT_CYCLE);
                if snapshot_shutdown.load(Ordering::Relaxed) {
                    return;
                }
                if let Err(e) = run_snapshot_cycle(
                    &snapshot_shared,
                    &snapshot_addon_dir,
                    &snapshot_extension,
                    &snapshot_path_cell_for_thread,
                ) {
                    tracing::error!(error = %e, "snapshot cycle failed");
                }
            })
            .expect("spawning embedded backend snapshot thread");

        Ok(backend)
    }

    fn enqueue(&self, op: RecordOp) -> Result<()> {
        match self.sender.try_send(op) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.shared.batches_dropped.fetch_add(1, Ordering::Relaxed);
                Err(IngestError::BackendTransient(
                    "embedded backend queue full".to_string(),
                ))
            }
            Err(TrySendError::Disconnected(_)) => Err(IngestError::BackendFatal(
                "embedded backend writer thread gone".to_string(),
            )),
        }
    }

    /// Imports every `.db` file alongside `addon_dir` into `target`
    /// table-by-table inside one transaction each; on success the source
    /// file is renamed with a `.migrated` suffix. Run at startup or on
    /// operator command.
    pub fn import_into(&self, target: &dyn StorageBackend) -> Result<u64> {
        let mut imported = 0u64;
        let entries = std::fs::read_dir(&self.addon_dir)?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("db") {
                continue;
            }
            imported += import_one_file(&path, target)?;
            let migrated_path = path.with_extension("db.migrated");
            std::fs::rename(&path, migrated_path)?;
        }
        Ok(imported)
    }
}

fn import_one_file(path: &Path, target: &dyn StorageBackend) -> Result<u64> {
    let conn = Connection::open(path)?;
    let mut count = 0u64;

    let mut stmt = conn.prepare("SELECT payload FROM soldier_states ORDER BY frame")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    for row in rows {
        let payload = row?;
        let state: SoldierState = serde_json::from_str(&payload)?;
        target.record_soldier_state(state)?;
        count += 1;
    }

    let mut stmt = conn.prepare("SELECT payload FROM vehicle_states ORDER BY frame")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    for row in rows {
        let payload = row?;
        let state: VehicleState = serde_json::from_str(&payload)?;
        target.record_vehicle_state(state)?;
        count += 1;
    }

    Ok(count)
}

fn run_snapshot_cycle(
    shared: &Shared,
    addon_dir: &Path,
    extension_name: &str,
    last_path: &Mutex<Option<PathBuf>>,
) -> Result<()> {
    shared.inserts_paused.store(true, Ordering::Relaxed);

    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let final_path = addon_dir.join(format!("{extension_name}_{timestamp}.db"));
    let tmp_path = final_path.with_extension("db.tmp");

    {
        let conn = shared.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "VACUUM INTO ?1",
            rusqlite::params![tmp_path.to_string_lossy().to_string()],
        )?;
    }

    let previous = last_path.lock().unwrap_or_else(|e| e.into_inner()).clone();
    if let Some(previous) = previous {
        if previous.exists() {
            std::fs::remove_file(&previous)?;
        }
    }
    std::fs::rename(&tmp_path, &final_path)?;
    *last_path.lock().unwrap_or_else(|e| e.into_inner()) = Some(final_path);

    shared.inserts_paused.store(false, Ordering::Relaxed);
    Ok(())
}

impl Drop for RelationalEmbeddedBackend {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl StorageBackend for RelationalEmbeddedBackend {
    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn start_mission(&self, world: World, mut mission: Mission) -> Result<Mission> {
        let conn = self.shared.conn.lock().unwrap_or_else(|e| e.into_inner());
        let world_payload = serde_json::to_string(&world)?;
        conn.execute(
            "INSERT OR IGNORE INTO worlds (name, payload) VALUES (?1, ?2)",
            rusqlite::params![world.name, world_payload],
        )?;
        let world_id: i64 = conn.query_row(
            "SELECT id FROM worlds WHERE name = ?1",
            rusqlite::params![world.name],
            |row| row.get(0),
        )?;

        let mission_payload = serde_json::to_string(&mission)?;
        conn.execute(
            "INSERT INTO missions (world_id, name, payload) VALUES (?1, ?2, ?3)",
            rusqlite::params![world_id, mission.name, mission_payload],
        )?;
        let mission_id = conn.last_insert_rowid();

        mission.world_id = Some(world_id as u32);
        mission.id = Some(mission_id as u32);
        Ok(mission)
    }

    fn end_mission(&self) -> Result<()> {
        Ok(())
    }

    fn add_soldier(&self, soldier: Soldier) -> Result<()> {
        let conn = self.shared.conn.lock().unwrap_or_else(|e| e.into_inner());
        let payload = serde_json::to_string(&soldier)?;
        conn.execute(
            "INSERT OR REPLACE INTO soldiers (object_id, payload) VALUES (?1, ?2)",
            rusqlite::params![soldier.object_id, payload],
        )?;
        self.shared.records_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn add_vehicle(&self, vehicle: Vehicle) -> Result<()> {
        let conn = self.shared.conn.lock().unwrap_or_else(|e| e.into_inner());
        let payload = serde_json::to_string(&vehicle)?;
        conn.execute(
            "INSERT OR REPLACE INTO vehicles (object_id, payload) VALUES (?1, ?2)",
            rusqlite::params![vehicle.object_id, payload],
        )?;
        self.shared.records_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn add_marker(&self, marker: Marker) -> Result<MarkerId> {
        let conn = self.shared.conn.lock().unwrap_or_else(|e| e.into_inner());
        let payload = serde_json::to_string(&marker)?;
        conn.execute(
            "INSERT INTO markers (name, payload) VALUES (?1, ?2)",
            rusqlite::params![marker.name, payload],
        )?;
        self.shared.records_written.fetch_add(1, Ordering::Relaxed);
        Ok(conn.last_insert_rowid() as MarkerId)
    }

    fn record_soldier_state(&self, state: SoldierState) -> Result<()> {
        self.enqueue(RecordOp::SoldierState(state))
    }

    fn record_vehicle_state(&self, state: VehicleState) -> Result<()> {
        self.enqueue(RecordOp::VehicleState(state))
    }

    fn record_marker_state(&self, state: MarkerState) -> Result<()> {
        self.enqueue(RecordOp::MarkerState(state))
    }

    fn record_projectile_event(&self, event: ProjectileEvent) -> Result<()> {
        self.enqueue(RecordOp::ProjectileEvent(event))
    }

    fn record_kill_event(&self, event: KillEvent) -> Result<()> {
        self.enqueue(RecordOp::KillEvent(event))
    }

    fn record_chat_event(&self, event: ChatEvent) -> Result<()> {
        self.enqueue(RecordOp::ChatEvent(event))
    }

    fn record_radio_event(&self, event: RadioEvent) -> Result<()> {
        self.enqueue(RecordOp::RadioEvent(event))
    }

    fn record_general_event(&self, event: GeneralEvent) -> Result<()> {
        self.enqueue(RecordOp::GeneralEvent(event))
    }

    fn record_server_fps_event(&self, event: ServerFpsEvent) -> Result<()> {
        self.enqueue(RecordOp::ServerFpsEvent(event))
    }

    fn record_ace3_death_event(&self, event: Ace3DeathEvent) -> Result<()> {
        self.enqueue(RecordOp::Ace3DeathEvent(event))
    }

    fn record_ace3_unconscious_event(&self, event: Ace3UnconsciousEvent) -> Result<()> {
        self.enqueue(RecordOp::Ace3UnconsciousEvent(event))
    }

    fn record_time_state(&self, state: TimeState) -> Result<()> {
        self.enqueue(RecordOp::TimeState(state))
    }

    fn delete_marker(&self, delete: DeleteMarker) -> Result<()> {
        self.enqueue(RecordOp::DeleteMarker(delete))
    }

    fn stats(&self) -> StorageStats {
        StorageStats {
            records_written: self.shared.records_written.load(Ordering::Relaxed),
            batches_flushed: self.shared.batches_flushed.load(Ordering::Relaxed),
            batches_dropped: self.shared.batches_dropped.load(Ordering::Relaxed),
        }
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
                east: 0,
                west: 0,
                independent: 0,
                civilian: 0,
                logic: 0,
            },
            side_friendly: crate::types::SideFriendlyMatrix {
                east_west: false,
                east_independent: false,
                west_independent: false,
            },
            start_time_unix_nanos: 0,
        }
    }

    #[test]
    fn start_mission_populates_ids() {
        let dir = tempdir().unwrap();
        let backend = RelationalEmbeddedBackend::open(dir.path(), "ocap").unwrap();
        let mission = backend
            .start_mission(sample_world(), sample_mission())
            .unwrap();
        assert!(mission.id.is_some());
        assert!(mission.world_id.is_some());
    }

    #[test]
    fn add_soldier_is_immediately_queryable() {
        let dir = tempdir().unwrap();
        let backend = RelationalEmbeddedBackend::open(dir.path(), "ocap").unwrap();
        backend
            .add_soldier(Soldier {
                object_id: 42,
                join_time_unix_nanos: 0,
                join_frame: 0,
                unit_type: "Man".to_string(),
                unit_name: "Habib".to_string(),
                group_id: String::new(),
                side: String::new(),
                is_player: false,
                role_description: String::new(),
                class_name: String::new(),
                display_name: String::new(),
                player_uid: String::new(),
                squad_info: serde_json::Value::Null,
            })
            .unwrap();

        let conn = backend.shared.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM soldiers", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
