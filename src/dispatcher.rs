//! Command dispatcher.
//!
//! Accepts `(command, args)` pairs and routes each to its registered
//! handler, either synchronously on the caller's thread or through a
//! bounded channel drained by a single dedicated consumer thread per
//! command — the goroutine-equivalent described in the concurrency model.
//! Buffered dispatch never blocks the caller: a full channel increments a
//! drop counter and returns `Ok(())`.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use parking_lot::RwLock;

use crate::error::IngestError;
use crate::types::CommandStatus;

pub type Handler = Box<dyn Fn(Vec<String>) -> Result<(), IngestError> + Send + Sync>;

/// A one-shot signal a gated consumer waits on before draining its
/// backlog. Enqueue is always accepted regardless of whether the gate has
/// opened; only consumption waits.
#[derive(Clone)]
pub struct ReadinessGate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Signals the gate. Idempotent: subsequent calls are a no-op.
    pub fn signal(&self) {
        let (lock, cvar) = &*self.inner;
        let mut opened = lock.lock().unwrap_or_else(|e| e.into_inner());
        *opened = true;
        cvar.notify_all();
    }

    pub fn is_open(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Blocks the calling thread until `signal` has been observed at least
    /// once.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut opened = lock.lock().unwrap_or_else(|e| e.into_inner());
        while !*opened {
            opened = cvar.wait(opened).unwrap_or_else(|e| e.into_inner());
        }
    }
}

enum Mode {
    Sync,
    Buffered { sender: SyncSender<Vec<String>> },
}

struct HandlerDescriptor {
    mode: Mode,
    handler: Option<Handler>,
    processed: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

/// Selects how a registered handler is invoked. Constructed via
/// [`HandlerOptions::sync`] or [`HandlerOptions::buffered`], then
/// optionally gated.
pub struct HandlerOptions {
    buffered_capacity: Option<usize>,
    gate: Option<ReadinessGate>,
}

impl HandlerOptions {
    pub fn sync() -> Self {
        Self {
            buffered_capacity: None,
            gate: None,
        }
    }

    pub fn buffered(capacity: usize) -> Self {
        Self {
            buffered_capacity: Some(capacity),
            gate: None,
        }
    }

    pub fn gated(mut self, gate: ReadinessGate) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<String, HandlerDescriptor>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `command`. Fails hard on a duplicate
    /// registration — this is a startup-time programmer error, not a
    /// runtime condition to recover from.
    pub fn register(
        &self,
        command: impl Into<String>,
        handler: Handler,
        options: HandlerOptions,
    ) -> Result<(), IngestError> {
        let command = command.into();
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&command) {
            return Err(IngestError::DuplicateRegistration(command));
        }

        let processed = Arc::new(AtomicU64::new(0));
        let dropped = Arc::new(AtomicU64::new(0));

        let descriptor = match options.buffered_capacity {
            None => HandlerDescriptor {
                mode: Mode::Sync,
                handler: Some(handler),
                processed,
                dropped,
            },
            Some(capacity) => {
                let (tx, rx) = sync_channel::<Vec<String>>(capacity);
                let gate = options.gate.clone();
                let processed_for_consumer = processed.clone();
                let command_for_consumer = command.clone();

                thread::Builder::new()
                    .name(format!("dispatcher-{command}"))
                    .spawn(move || {
                        if let Some(gate) = &gate {
                            gate.wait();
                        }
                        while let Ok(args) = rx.recv() {
                            let result = panic::catch_unwind(AssertUnwindSafe(|| handler(args)));
                            match result {
                                Ok(Ok(())) => {
                                    processed_for_consumer.fetch_add(1, Ordering::Relaxed);
                                }
                                Ok(Err(err)) => {
                                    processed_for_consumer.fetch_add(1, Ordering::Relaxed);
                                    if err.is_silent() {
                                        tracing::debug!(command = %command_for_consumer, error = %err, "handler dropped event silently");
                                    } else {
                                        tracing::warn!(command = %command_for_consumer, error = %err, "handler error");
                                    }
                                }
                                Err(_) => {
                                    processed_for_consumer.fetch_add(1, Ordering::Relaxed);
                                    tracing::error!(command = %command_for_consumer, "handler panicked, consumer continuing");
                                }
                            }
                        }
                    })
                    .expect("spawning dispatcher consumer thread");

                HandlerDescriptor {
                    mode: Mode::Buffered { sender: tx },
                    handler: None,
                    processed,
                    dropped,
                }
            }
        };

        handlers.insert(command, descriptor);
        Ok(())
    }

    /// Dispatches one event. Sync handlers run inline and their result is
    /// returned to the caller. Buffered handlers never block: a full
    /// channel increments the drop counter and this returns `Ok(())`.
    pub fn dispatch(&self, command: &str, args: Vec<String>) -> Result<(), IngestError> {
        let handlers = self.handlers.read();
        let descriptor = handlers
            .get(command)
            .ok_or_else(|| IngestError::UnregisteredCommand(command.to_string()))?;

        match &descriptor.mode {
            Mode::Sync => {
                let handler = descriptor
                    .handler
                    .as_ref()
                    .expect("sync descriptor always carries a handler");
                let result = handler(args);
                descriptor.processed.fetch_add(1, Ordering::Relaxed);
                result
            }
            Mode::Buffered { sender } => {
                use std::sync::mpsc::TrySendError;
                match sender.try_send(args) {
                    Ok(()) => Ok(()),
                    Err(TrySendError::Full(_)) => {
                        descriptor.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(command = %command, "dispatcher buffer full, event dropped");
                        Ok(())
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        descriptor.dropped.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }
                }
            }
        }
    }

    /// A snapshot of processed/dropped counters per registered command,
    /// consumed by the monitor collaborator. Drop accounting invariant:
    /// `processed + dropped == total enqueue count` for every command.
    pub fn status(&self) -> Vec<CommandStatus> {
        let handlers = self.handlers.read();
        let mut statuses: Vec<CommandStatus> = handlers
            .iter()
            .map(|(command, descriptor)| CommandStatus {
                command: command.clone(),
                processed: descriptor.processed.load(Ordering::Relaxed),
                dropped: descriptor.dropped.load(Ordering::Relaxed),
            })
            .collect();
        statuses.sort_by(|a, b| a.command.cmp(&b.command));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn sync_dispatch_returns_handler_result() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register(
                ":VERSION:",
                Box::new(|_args| Ok(())),
                HandlerOptions::sync(),
            )
            .unwrap();

        assert!(dispatcher.dispatch(":VERSION:", vec![]).is_ok());
    }

    #[test]
    fn duplicate_registration_fails_hard() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register(":VERSION:", Box::new(|_| Ok(())), HandlerOptions::sync())
            .unwrap();
        let err = dispatcher
            .register(":VERSION:", Box::new(|_| Ok(())), HandlerOptions::sync())
            .unwrap_err();
        assert!(matches!(err, IngestError::DuplicateRegistration(_)));
    }

    #[test]
    fn dispatch_of_unknown_command_is_distinguished() {
        let dispatcher = Dispatcher::new();
        let err = dispatcher.dispatch(":NOPE:", vec![]).unwrap_err();
        assert!(matches!(err, IngestError::UnregisteredCommand(_)));
    }

    #[test]
    fn buffered_overflow_drops_and_never_blocks_caller() {
        let dispatcher = Dispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let gate = ReadinessGate::new(); // never signalled: consumer never drains

        let counter_clone = counter.clone();
        dispatcher
            .register(
                ":SLOW:",
                Box::new(move |_args| {
                    counter_clone.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }),
                HandlerOptions::buffered(2).gated(gate),
            )
            .unwrap();

        assert!(dispatcher.dispatch(":SLOW:", vec![]).is_ok());
        assert!(dispatcher.dispatch(":SLOW:", vec![]).is_ok());
        assert!(dispatcher.dispatch(":SLOW:", vec![]).is_ok());

        let status = dispatcher.status();
        let slow = status.iter().find(|s| s.command == ":SLOW:").unwrap();
        assert_eq!(slow.dropped, 1);
    }

    #[test]
    fn gated_consumer_drains_backlog_once_signalled() {
        let dispatcher = Dispatcher::new();
        let gate = ReadinessGate::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        dispatcher
            .register(
                ":NEW:MISSION:",
                Box::new(move |_args| {
                    counter_clone.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }),
                HandlerOptions::buffered(10).gated(gate.clone()),
            )
            .unwrap();

        for _ in 0..5 {
            dispatcher.dispatch(":NEW:MISSION:", vec![]).unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 0);

        gate.signal();
        // best-effort wait for the consumer thread to drain
        for _ in 0..50 {
            if counter.load(Ordering::Relaxed) == 5 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(counter.load(Ordering::Relaxed), 5);
    }
}
