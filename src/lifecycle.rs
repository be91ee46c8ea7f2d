//! Lifecycle controller: two-stage readiness and the end-of-mission flush.
//!
//! A small number of lifecycle-only commands (`:INIT:`, `:VERSION:`,
//! `:GETDIR:*`, `:ADDON:VERSION:`, `:LOG:`) are always available on the
//! dispatcher from construction. Every ingest command is registered at the
//! same time (so the host can start sending traffic immediately) but the
//! backend it dispatches into lives behind a shared slot that is empty
//! until `:INIT:STORAGE:` succeeds; buffered ingest consumers are
//! `Gated` on a [`ReadinessGate`] tied to that same event, so they queue
//! but do not drain until the slot is populated.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::cache::{EntityCache, MarkerCache};
use crate::config::{Config, StorageType};
use crate::dispatcher::{Dispatcher, HandlerOptions, ReadinessGate};
use crate::error::{IngestError, Result};
use crate::handlers::{self, UnknownMarkerLog};
use crate::parser;
use crate::storage::memory::MemoryBackend;
use crate::storage::StorageBackend;

/// The extension's outbound callback collaborator (the FFI boundary, per
/// the external-interfaces surface). Kept as a trait so the controller can
/// be driven in tests without a real host.
pub trait CallbackSink: Send + Sync {
    fn emit(&self, name: &str, payload: &str);
}

/// Discards every callback; useful in tests and as a default.
pub struct NullCallbackSink;

impl CallbackSink for NullCallbackSink {
    fn emit(&self, _name: &str, _payload: &str) {}
}

const EXTENSION_VERSION: &str = env!("CARGO_PKG_VERSION");
const END_MISSION_DRAIN_DEADLINE: Duration = Duration::from_secs(5);

type BackendSlot = Arc<RwLock<Option<Arc<dyn StorageBackend>>>>;

fn current_backend(slot: &BackendSlot) -> Result<Arc<dyn StorageBackend>> {
    slot.read()
        .clone()
        .ok_or_else(|| IngestError::BackendFatal("storage not ready".to_string()))
}

/// Owns the dispatcher, caches, readiness gate, and backend slot, and
/// performs the registration sequence described in the concurrency model's
/// two-stage readiness note.
pub struct Lifecycle {
    dispatcher: Arc<Dispatcher>,
    gate: ReadinessGate,
    entity_cache: Arc<EntityCache>,
    marker_cache: Arc<MarkerCache>,
    unknown_marker_log: Arc<UnknownMarkerLog>,
    backend: BackendSlot,
    config: Config,
    callbacks: Arc<dyn CallbackSink>,
}

impl Lifecycle {
    pub fn new(config: Config, callbacks: Arc<dyn CallbackSink>) -> Result<Arc<Self>> {
        config.validate()?;

        let lifecycle = Arc::new(Self {
            dispatcher: Arc::new(Dispatcher::new()),
            gate: ReadinessGate::new(),
            entity_cache: Arc::new(EntityCache::new()),
            marker_cache: Arc::new(MarkerCache::new()),
            unknown_marker_log: Arc::new(UnknownMarkerLog::new()),
            backend: Arc::new(RwLock::new(None)),
            config,
            callbacks,
        });

        lifecycle.register_lifecycle_handlers()?;
        lifecycle.register_ingest_handlers()?;
        Ok(lifecycle)
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    fn emit(&self, name: &str, payload: &str) {
        self.callbacks.emit(name, payload);
    }

    /// `:INIT:`, `:VERSION:`, `:GETDIR:*`, `:ADDON:VERSION:`, `:LOG:`,
    /// `:INIT:STORAGE:` — always available, never gated.
    fn register_lifecycle_handlers(self: &Arc<Self>) -> Result<()> {
        let this = self.clone();
        self.dispatcher.register(
            ":INIT:",
            Box::new(move |_args| {
                this.emit(":EXT:READY:", "");
                Ok(())
            }),
            HandlerOptions::sync(),
        )?;

        let this = self.clone();
        self.dispatcher.register(
            ":VERSION:",
            Box::new(move |_args| {
                this.emit(":VERSION:", &format!("{EXTENSION_VERSION},,"));
                Ok(())
            }),
            HandlerOptions::sync(),
        )?;

        let this = self.clone();
        self.dispatcher.register(
            ":ADDON:VERSION:",
            Box::new(move |_args| {
                this.emit(":ADDON:VERSION:", EXTENSION_VERSION);
                Ok(())
            }),
            HandlerOptions::sync(),
        )?;

        for (command, path) in [
            (":GETDIR:ARMA:", self.config.storage.sqlite.addon_dir.clone()),
            (":GETDIR:MODULE:", self.config.storage.sqlite.addon_dir.clone()),
            (":GETDIR:OCAPLOG:", self.config.logs_dir.clone()),
        ] {
            let this = self.clone();
            let payload = path.to_string_lossy().into_owned();
            self.dispatcher.register(
                command,
                Box::new(move |_args| {
                    this.emit(command, &payload);
                    Ok(())
                }),
                HandlerOptions::sync(),
            )?;
        }

        self.dispatcher.register(
            ":LOG:",
            Box::new(move |args| {
                tracing::info!(target: "host", message = ?args, "host log line");
                Ok(())
            }),
            HandlerOptions::sync(),
        )?;

        let this = self.clone();
        self.dispatcher.register(
            ":INIT:STORAGE:",
            Box::new(move |_args| this.init_storage()),
            HandlerOptions::sync(),
        )?;

        Ok(())
    }

    /// Constructs the configured backend, initialises it, publishes it into
    /// the shared slot, and opens the readiness gate. On failure the slot
    /// stays empty and the gate stays closed, so buffered ingest handlers
    /// keep accumulating (and eventually dropping) events per the
    /// `BackendFatal` error-handling policy.
    fn init_storage(&self) -> Result<()> {
        let backend: Arc<dyn StorageBackend> = match self.config.storage.storage_type {
            StorageType::Memory => Arc::new(MemoryBackend::new(
                self.config.storage.sqlite.addon_dir.clone(),
                self.config.storage.memory.soft_record_cap,
            )),
            #[cfg(feature = "relational-embedded")]
            StorageType::Sqlite => {
                let extension_name = "ocap";
                Arc::new(crate::storage::relational_embedded::RelationalEmbeddedBackend::open(
                    self.config.storage.sqlite.addon_dir.clone(),
                    extension_name,
                )?)
            }
            #[cfg(not(feature = "relational-embedded"))]
            StorageType::Sqlite => {
                return Err(IngestError::ConfigError(
                    "storage.type is sqlite but this build lacks the relational-embedded feature"
                        .to_string(),
                ))
            }
            #[cfg(feature = "relational-server")]
            StorageType::Postgres => Arc::new(
                crate::storage::relational_server::RelationalServerBackend::connect(
                    &self.config.database,
                )?,
            ),
            #[cfg(not(feature = "relational-server"))]
            StorageType::Postgres => {
                return Err(IngestError::ConfigError(
                    "storage.type is postgres but this build lacks the relational-server feature"
                        .to_string(),
                ))
            }
        };

        if let Err(e) = backend.init() {
            self.emit(":STORAGE:ERROR:", &e.to_string());
            return Err(e);
        }

        *self.backend.write() = Some(backend);
        self.gate.signal();
        self.emit(":STORAGE:OK:", storage_type_name(self.config.storage.storage_type));
        Ok(())
    }

    /// Registers every ingest command. Entity-registration and marker
    /// commands run sync (per §4.4); everything else is buffered at the
    /// depth the worker-handler design calls for and gated on storage
    /// readiness.
    fn register_ingest_handlers(self: &Arc<Self>) -> Result<()> {
        let entity_cache = self.entity_cache.clone();
        let marker_cache = self.marker_cache.clone();
        let unknown_marker_log = self.unknown_marker_log.clone();
        let backend = self.backend.clone();
        let this = self.clone();

        self.dispatcher.register(
            ":NEW:MISSION:",
            Box::new({
                let entity_cache = entity_cache.clone();
                let marker_cache = marker_cache.clone();
                let unknown_marker_log = unknown_marker_log.clone();
                let backend = backend.clone();
                let this = this.clone();
                move |args| {
                    let (world, mission) = parser::parse_new_mission(&args)?;
                    entity_cache.reset();
                    marker_cache.reset();
                    unknown_marker_log.reset();
                    let backend = current_backend(&backend)?;
                    backend.start_mission(world, mission)?;
                    this.emit(":MISSION:OK:", "OK");
                    Ok(())
                }
            }),
            HandlerOptions::buffered(64).gated(self.gate.clone()),
        )?;

        self.dispatcher.register(
            ":SAVE:MISSION:",
            Box::new({
                let this = this.clone();
                move |_args| this.end_mission()
            }),
            HandlerOptions::sync(),
        )?;

        macro_rules! register_sync {
            ($command:expr, $handler:expr) => {{
                let entity_cache = entity_cache.clone();
                let marker_cache = marker_cache.clone();
                let backend = backend.clone();
                self.dispatcher.register(
                    $command,
                    Box::new(move |args| {
                        let backend = current_backend(&backend)?;
                        $handler(&entity_cache, &marker_cache, backend.as_ref(), args)
                    }),
                    HandlerOptions::sync(),
                )?;
            }};
        }

        macro_rules! register_buffered {
            ($command:expr, $capacity:expr, $handler:expr) => {{
                let entity_cache = entity_cache.clone();
                let marker_cache = marker_cache.clone();
                let unknown_marker_log = unknown_marker_log.clone();
                let backend = backend.clone();
                let gate = self.gate.clone();
                self.dispatcher.register(
                    $command,
                    Box::new(move |args| {
                        let backend = current_backend(&backend)?;
                        $handler(&entity_cache, &marker_cache, &unknown_marker_log, backend.as_ref(), args)
                    }),
                    HandlerOptions::buffered($capacity).gated(gate),
                )?;
            }};
        }

        register_sync!(":NEW:SOLDIER:", |ec: &EntityCache, _mc: &MarkerCache, be, args| {
            handlers::handle_new_soldier(ec, be, args)
        });
        register_sync!(":NEW:VEHICLE:", |ec: &EntityCache, _mc: &MarkerCache, be, args| {
            handlers::handle_new_vehicle(ec, be, args)
        });
        register_sync!(":NEW:MARKER:", |_ec: &EntityCache, mc: &MarkerCache, be, args| {
            handlers::handle_new_marker(mc, be, args)
        });

        register_buffered!(":NEW:SOLDIER:STATE:", 10_000, |ec: &EntityCache, _mc: &MarkerCache, _ul: &UnknownMarkerLog, be, args| {
            handlers::handle_soldier_state(ec, be, args)
        });
        register_buffered!(":NEW:VEHICLE:STATE:", 10_000, |ec: &EntityCache, _mc: &MarkerCache, _ul: &UnknownMarkerLog, be, args| {
            handlers::handle_vehicle_state(ec, be, args)
        });
        register_buffered!(":PROJECTILE:", 5_000, |ec: &EntityCache, _mc: &MarkerCache, _ul: &UnknownMarkerLog, be, args| {
            handlers::handle_projectile(ec, be, args)
        });
        register_buffered!(":KILL:", 2_000, |ec: &EntityCache, _mc: &MarkerCache, _ul: &UnknownMarkerLog, be, args| {
            handlers::handle_kill(ec, be, args)
        });
        register_buffered!(":CHAT:", 1_000, |ec: &EntityCache, _mc: &MarkerCache, _ul: &UnknownMarkerLog, be, args| {
            handlers::handle_chat(ec, be, args)
        });
        register_buffered!(":RADIO:", 1_000, |ec: &EntityCache, _mc: &MarkerCache, _ul: &UnknownMarkerLog, be, args| {
            handlers::handle_radio(ec, be, args)
        });
        register_buffered!(":ACE3:DEATH:", 1_000, |ec: &EntityCache, _mc: &MarkerCache, _ul: &UnknownMarkerLog, be, args| {
            handlers::handle_ace3_death(ec, be, args)
        });
        register_buffered!(":ACE3:UNCONSCIOUS:", 1_000, |ec: &EntityCache, _mc: &MarkerCache, _ul: &UnknownMarkerLog, be, args| {
            handlers::handle_ace3_unconscious(ec, be, args)
        });
        register_buffered!(":NEW:MARKER:STATE:", 1_000, |_ec: &EntityCache, mc: &MarkerCache, ul: &UnknownMarkerLog, be, args| {
            handlers::handle_new_marker_state(mc, ul, be, args)
        });
        register_buffered!(":DELETE:MARKER:", 500, |_ec: &EntityCache, _mc: &MarkerCache, _ul: &UnknownMarkerLog, be, args| {
            handlers::handle_delete_marker(be, args)
        });
        register_buffered!(":NEW:TIME:STATE:", 2_000, |_ec: &EntityCache, _mc: &MarkerCache, _ul: &UnknownMarkerLog, be, args| {
            handlers::handle_time_state(be, args)
        });
        register_buffered!(":FPS:", 2_000, |_ec: &EntityCache, _mc: &MarkerCache, _ul: &UnknownMarkerLog, be, args| {
            handlers::handle_fps(be, args)
        });
        register_buffered!(":EVENT:", 2_000, |_ec: &EntityCache, _mc: &MarkerCache, _ul: &UnknownMarkerLog, be, args| {
            handlers::handle_general_event(be, args)
        });

        Ok(())
    }

    /// Cooperative end-of-mission flush: waits (up to the drain deadline)
    /// for every buffered command's processed+dropped count to stop
    /// moving — a proxy for "backlog drained" without the dispatcher
    /// exposing queue depth directly — then asks the backend to finalise
    /// the mission regardless.
    fn end_mission(&self) -> Result<()> {
        let deadline = Instant::now() + END_MISSION_DRAIN_DEADLINE;
        let mut last = self.dispatcher.status();
        loop {
            std::thread::sleep(Duration::from_millis(100));
            let now = self.dispatcher.status();
            if now == last || Instant::now() >= deadline {
                break;
            }
            last = now;
        }

        let backend = current_backend(&self.backend)?;
        backend.end_mission()
    }

    /// Called by the host on shutdown; idempotent per backend `close()`.
    pub fn shutdown(&self) -> Result<()> {
        if let Some(backend) = self.backend.read().clone() {
            backend.close()?;
        }
        Ok(())
    }
}

fn storage_type_name(t: StorageType) -> &'static str {
    match t {
        StorageType::Memory => "memory",
        StorageType::Sqlite => "sqlite",
        StorageType::Postgres => "postgres",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(String, String)>>,
    }

    impl CallbackSink for RecordingSink {
        fn emit(&self, name: &str, payload: &str) {
            self.events
                .lock()
                .unwrap()
                .push((name.to_string(), payload.to_string()));
        }
    }

    #[test]
    fn mission_bootstrap_through_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.sqlite.addon_dir = dir.path().to_path_buf();
        let sink = Arc::new(RecordingSink::default());

        let lifecycle = Lifecycle::new(config, sink.clone()).unwrap();
        let dispatcher = lifecycle.dispatcher();

        dispatcher.dispatch(":INIT:STORAGE:", vec![]).unwrap();

        let world = r#"{"worldName":"altis","worldNameOriginal":"altis","displayName":"Altis","worldSize":30720,"latitude":-40,"longitude":20,"author":"BIS","workshopID":""}"#;
        let mission = r#"{"missionName":"T","briefingName":"B","author":"A","serverName":"S","serverProfile":"S","tag":"TvT","captureDelay":1.0,"addons":[],"playableSlots":[10,10,5,0,2],"sideFriendly":[false,true,false]}"#;
        let args = vec![
            world.to_string(),
            mission.to_string(),
            "1700000000000000000".to_string(),
        ];
        dispatcher.dispatch(":NEW:MISSION:", args).unwrap();

        for _ in 0..50 {
            if sink
                .events
                .lock()
                .unwrap()
                .iter()
                .any(|(name, _)| name == ":MISSION:OK:")
            {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let events = sink.events.lock().unwrap();
        assert!(events.iter().any(|(name, _)| name == ":STORAGE:OK:"));
        assert!(events.iter().any(|(name, _)| name == ":MISSION:OK:"));
    }

    #[test]
    fn ingest_before_storage_ready_is_backend_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.sqlite.addon_dir = dir.path().to_path_buf();
        let lifecycle = Lifecycle::new(config, Arc::new(NullCallbackSink)).unwrap();

        let args: Vec<String> = vec![
            "42", "0", "Man", "Habib", "Alpha", "WEST", "false", "rifleman", "B_Soldier_F",
            "Habib", "1700000000000000000",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        let err = lifecycle
            .dispatcher()
            .dispatch(":NEW:SOLDIER:", args)
            .unwrap_err();
        assert!(matches!(err, IngestError::BackendFatal(_)));
    }
}
