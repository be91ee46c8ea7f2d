//! Mission ingest pipeline for a game-server recording extension.
//!
//! A dispatcher accepts positional-argument commands from the host,
//! routes each to a pure parser and a cache-aware handler, and forwards
//! the resulting typed record to a pluggable [`storage::StorageBackend`].
//! [`lifecycle::Lifecycle`] wires the whole pipeline together behind a
//! two-stage readiness gate: lifecycle commands are always available,
//! ingest commands queue (and, past capacity, drop) until storage is
//! initialised.
//!
//! ```rust
//! use ocap_ingest::{Lifecycle, Config, NullCallbackSink};
//! use std::sync::Arc;
//!
//! let lifecycle = Lifecycle::new(Config::default(), Arc::new(NullCallbackSink))?;
//! let dispatcher = lifecycle.dispatcher();
//! dispatcher.dispatch(":VERSION:", vec![])?;
//! # Ok::<(), ocap_ingest::error::IngestError>(())
//! ```

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ffi;
pub mod handlers;
pub mod lifecycle;
pub mod parser;
pub mod storage;
pub mod types;

pub use cache::{EntityCache, MarkerCache};
pub use config::Config;
pub use dispatcher::{Dispatcher, HandlerOptions};
pub use error::{IngestError, Result};
pub use lifecycle::{CallbackSink, Lifecycle, NullCallbackSink};

pub use storage::{memory::MemoryBackend, StorageBackend, StorageStats, Uploadable};

#[cfg(feature = "relational-embedded")]
pub use storage::relational_embedded::RelationalEmbeddedBackend;

#[cfg(feature = "relational-server")]
pub use storage::relational_server::RelationalServerBackend;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports for embedders wiring the pipeline behind an FFI boundary.
pub mod prelude {
    pub use crate::{CallbackSink, Config, Dispatcher, IngestError, Lifecycle, Result};

    pub use crate::cache::{EntityCache, MarkerCache};

    pub use crate::storage::{memory::MemoryBackend, StorageBackend};

    #[cfg(feature = "relational-embedded")]
    pub use crate::storage::relational_embedded::RelationalEmbeddedBackend;

    #[cfg(feature = "relational-server")]
    pub use crate::storage::relational_server::RelationalServerBackend;

    pub use std::sync::Arc;
}
