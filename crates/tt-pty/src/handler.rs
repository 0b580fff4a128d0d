//! The PTY/Mux Handler (component A): owns OS child processes, translates
//! byte/resize/signal events, guarantees cleanup. See §4.A.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use portable_pty::{native_pty_system, Child, MasterPty, PtySize};
use thiserror::Error;
use tracing::{debug, warn};

use tt_core::config::{MuxConfig, SecurityConfig};
use tt_core::limits::KILL_GRACE;
use tt_core::types::{CloseReason, Event};
use tt_core::{SpawnError, TerminalId};

use crate::command::{self, Launch};

/// Output reads are done in chunks in this range per the design; 32 KiB
/// sits in the middle of the suggested 8-64 KiB window.
const READ_CHUNK_BYTES: usize = 32 * 1024;

/// Bounded writer queue depth; beyond this, [`PtyHandler::write`] reports
/// backpressure instead of blocking the calling task.
const WRITE_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("terminal not found: {0}")]
    NotFound(TerminalId),
    #[error("write queue full, apply backpressure")]
    Backpressure,
    #[error("pty internal error: {0}")]
    Internal(String),
}

pub enum WriteOutcome {
    Applied,
}

/// What the caller asked to be spawned; mux attach/create decisions are
/// made by the caller (the spawn pipeline, consulting component D) and
/// passed in via `launch_hint`.
pub struct SpawnConfig<'a> {
    pub working_dir: &'a str,
    pub commands: &'a [String],
    pub env: &'a HashMap<String, String>,
    pub use_mux: bool,
    pub session_name: Option<&'a str>,
    pub session_exists: bool,
    pub cols: u16,
    pub rows: u16,
}

pub struct SpawnOutcome {
    pub child_pid: Option<u32>,
    pub mux_pid: Option<u32>,
    pub fresh_mux_session: bool,
}

struct Entry {
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    writer_tx: flume::Sender<Vec<u8>>,
    resize_generation: AtomicU64,
}

/// Owns every live child process for the server. One `PtyHandler` is
/// constructed at composition root and shared (via `Arc`) with the
/// registry, which is the only thing that calls into it.
pub struct PtyHandler {
    mux: MuxConfig,
    security: SecurityConfig,
    entries: DashMap<TerminalId, Arc<Entry>>,
    events_tx: flume::Sender<Event>,
}

impl PtyHandler {
    pub fn new(mux: MuxConfig, security: SecurityConfig, events_tx: flume::Sender<Event>) -> Self {
        Self {
            mux,
            security,
            entries: DashMap::new(),
            events_tx,
        }
    }

    /// Allocate a PTY, determine the command vector, spawn the child in a
    /// sanitized environment, and start the reader/writer background
    /// threads. Synchronous (matches the teacher's `PtyPool::spawn`); call
    /// it from a `spawn_blocking` context.
    pub fn create(&self, id: TerminalId, cfg: SpawnConfig<'_>) -> Result<SpawnOutcome, SpawnError> {
        if !std::path::Path::new(cfg.working_dir).is_dir() {
            return Err(SpawnError::WorkingDirInvalid(cfg.working_dir.to_string()));
        }

        let launch = if cfg.use_mux {
            let session_name = cfg.session_name.ok_or_else(|| {
                SpawnError::PtyAllocFailed("useMux requires a session_name".into())
            })?;
            command::mux_launch(
                &self.mux,
                session_name,
                cfg.working_dir,
                cfg.commands,
                cfg.session_exists,
            )
        } else {
            command::direct_launch(cfg.commands)
        };
        let fresh_mux_session = launch.is_fresh_mux_session();
        let mut command = launch.into_command();

        let env = tt_core::env_sanitize::build_child_env(
            std::env::vars(),
            Some(cfg.env),
            &self.security,
        );
        command::apply_env(&mut command, &env);
        if !cfg.use_mux {
            command.cwd(cfg.working_dir);
        }

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: cfg.rows,
                cols: cfg.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SpawnError::PtyAllocFailed(e.to_string()))?;

        let child = pair
            .slave
            .spawn_command(command)
            .map_err(|e| SpawnError::ExecNotFound(e.to_string()))?;
        let child_pid = child.process_id();

        debug!(%id, use_mux = cfg.use_mux, "spawned pty child");

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SpawnError::PtyAllocFailed(e.to_string()))?;
        let events_tx = self.events_tx.clone();
        let read_id = id;
        std::thread::spawn(move || {
            let mut buf = [0u8; READ_CHUNK_BYTES];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        let _ = events_tx.send(Event::Closed {
                            id: read_id,
                            reason: CloseReason::Exited { code: None },
                        });
                        break;
                    }
                    Ok(n) => {
                        let _ = events_tx.send(Event::Output {
                            id: read_id,
                            bytes: buf[..n].to_vec(),
                        });
                    }
                    Err(e) => {
                        warn!(%read_id, error = %e, "pty read error");
                        let _ = events_tx.send(Event::Closed {
                            id: read_id,
                            reason: CloseReason::Io,
                        });
                        break;
                    }
                }
            }
        });

        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| SpawnError::PtyAllocFailed(e.to_string()))?;
        let (writer_tx, writer_rx) = flume::bounded::<Vec<u8>>(WRITE_QUEUE_CAPACITY);
        std::thread::spawn(move || {
            while let Ok(data) = writer_rx.recv() {
                if writer.write_all(&data).is_err() {
                    break;
                }
                let _ = writer.flush();
            }
        });

        let entry = Arc::new(Entry {
            child: Arc::new(Mutex::new(child)),
            master: Arc::new(Mutex::new(pair.master)),
            writer_tx,
            resize_generation: AtomicU64::new(0),
        });
        self.entries.insert(id, entry);

        Ok(SpawnOutcome {
            child_pid,
            mux_pid: if cfg.use_mux { child_pid } else { None },
            fresh_mux_session,
        })
    }

    /// Enqueue bytes for the PTY master. Non-blocking: returns
    /// [`PtyError::Backpressure`] if the write queue is already at its
    /// high-water mark, signaling the gateway to pause reading from the
    /// producing client momentarily.
    pub fn write(&self, id: TerminalId, bytes: Vec<u8>) -> Result<WriteOutcome, PtyError> {
        let entry = self.entries.get(&id).ok_or(PtyError::NotFound(id))?;
        match entry.writer_tx.try_send(bytes) {
            Ok(()) => Ok(WriteOutcome::Applied),
            Err(flume::TrySendError::Full(_)) => Err(PtyError::Backpressure),
            Err(flume::TrySendError::Disconnected(_)) => {
                Err(PtyError::Internal("writer thread gone".into()))
            }
        }
    }

    /// Schedule a resize with a 300 ms trailing-edge debounce: bursts
    /// collapse to the last value (§4.A, tested by S5).
    pub fn resize(&self, id: TerminalId, cols: u16, rows: u16) -> Result<(), PtyError> {
        let entry = self
            .entries
            .get(&id)
            .map(|e| e.clone())
            .ok_or(PtyError::NotFound(id))?;
        let my_gen = entry.resize_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let debounce = Duration::from_millis(self.mux.resize_debounce_ms);
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if entry.resize_generation.load(Ordering::SeqCst) != my_gen {
                return; // a later resize superseded this one
            }
            let master = entry.master.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = master.resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            }) {
                warn!(%id, error = %e, "pty resize failed");
            }
        });
        Ok(())
    }

    /// `force`: SIGKILL immediately. Else SIGTERM, escalating to SIGKILL
    /// after [`KILL_GRACE`] if the process has not exited.
    pub fn kill(&self, id: TerminalId, force: bool) -> Result<(), PtyError> {
        let entry = self
            .entries
            .get(&id)
            .map(|e| e.clone())
            .ok_or(PtyError::NotFound(id))?;

        if force {
            kill_now(&entry);
            return Ok(());
        }

        let pid = {
            let child = entry.child.lock().unwrap_or_else(|e| e.into_inner());
            child.process_id()
        };
        match pid {
            Some(pid) => {
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
                tokio::spawn(async move {
                    tokio::time::sleep(KILL_GRACE).await;
                    let mut child = entry.child.lock().unwrap_or_else(|e| e.into_inner());
                    if matches!(child.try_wait(), Ok(None)) {
                        let _ = child.kill();
                    }
                });
                Ok(())
            }
            None => {
                kill_now(&entry);
                Ok(())
            }
        }
    }

    /// Fan out `kill(force)` across every owned child; used for graceful
    /// shutdown and `FORCE_CLEANUP`.
    pub fn cleanup_with_grace(&self, force: bool) {
        let ids: Vec<TerminalId> = self.entries.iter().map(|e| *e.key()).collect();
        for id in ids {
            let _ = self.kill(id, force);
        }
    }

    /// Remove bookkeeping for a terminal once the registry has confirmed
    /// it reaped the child. Idempotent.
    pub fn reap(&self, id: TerminalId) {
        self.entries.remove(&id);
    }

    pub fn is_alive(&self, id: TerminalId) -> bool {
        match self.entries.get(&id) {
            Some(entry) => {
                let mut child = entry.child.lock().unwrap_or_else(|e| e.into_inner());
                matches!(child.try_wait(), Ok(None))
            }
            None => false,
        }
    }
}

fn kill_now(entry: &Entry) {
    let mut child = entry.child.lock().unwrap_or_else(|e| e.into_inner());
    let _ = child.kill();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn handler() -> (PtyHandler, flume::Receiver<Event>) {
        let (tx, rx) = flume::unbounded();
        (PtyHandler::new(MuxConfig::default(), SecurityConfig::default(), tx), rx)
    }

    #[tokio::test]
    async fn spawns_and_emits_output() {
        let (handler, rx) = handler();
        let id = TerminalId::new();
        let env = HashMap::new();
        let outcome = handler
            .create(
                id,
                SpawnConfig {
                    working_dir: "/tmp",
                    commands: &["echo hello".to_string()],
                    env: &env,
                    use_mux: false,
                    session_name: None,
                    session_exists: false,
                    cols: 80,
                    rows: 24,
                },
            )
            .expect("spawn should succeed");
        assert!(outcome.child_pid.is_some());

        let mut collected = Vec::new();
        for _ in 0..20 {
            if let Ok(ev) = rx.recv_timeout(Duration::from_millis(500)) {
                if let Event::Output { bytes, .. } = &ev {
                    collected.extend_from_slice(bytes);
                }
                if matches!(ev, Event::Closed { .. }) {
                    break;
                }
            } else {
                break;
            }
        }
        assert!(String::from_utf8_lossy(&collected).contains("hello"));
    }

    #[tokio::test]
    async fn rejects_missing_working_dir() {
        let (handler, _rx) = handler();
        let env = HashMap::new();
        let err = handler
            .create(
                TerminalId::new(),
                SpawnConfig {
                    working_dir: "/does/not/exist/at/all",
                    commands: &[],
                    env: &env,
                    use_mux: false,
                    session_name: None,
                    session_exists: false,
                    cols: 80,
                    rows: 24,
                },
            )
            .unwrap_err();
        assert!(matches!(err, SpawnError::WorkingDirInvalid(_)));
    }

    #[tokio::test]
    async fn write_to_unknown_terminal_not_found() {
        let (handler, _rx) = handler();
        let err = handler.write(TerminalId::new(), b"hi".to_vec()).unwrap_err();
        assert!(matches!(err, PtyError::NotFound(_)));
    }
}
