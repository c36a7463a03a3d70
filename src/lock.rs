//! Singleton guard for the monitor loop.
//!
//! The lock is a small text file holding the owner's PID and start time. A
//! file whose owner is no longer running is stale and gets reclaimed.

use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    Acquired,
    /// Another live process holds the lock. `pid` is `None` while a fresh
    /// lock file has no readable owner yet.
    Contended { pid: Option<u32>, started: Option<String> },
}

pub trait LockResource: Send + Sync {
    fn try_acquire(&self) -> Result<LockStatus>;
    fn release(&self) -> Result<()>;
}

/// Whether a process with `pid` currently exists.
pub fn process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

/// A lock file without a readable PID is only reclaimed once it is this old.
const OWNERLESS_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Default, PartialEq, Eq)]
struct LockContents {
    pid: Option<u32>,
    started: Option<String>,
}

fn parse_contents(text: &str) -> LockContents {
    let mut contents = LockContents::default();
    for line in text.lines() {
        if let Some(value) = line.strip_prefix("PID:") {
            contents.pid = value.trim().parse().ok();
        } else if let Some(value) = line.strip_prefix("Started:") {
            contents.started = Some(value.trim().to_string());
        }
    }
    contents
}

pub struct FileLock {
    path: PathBuf,
    pid: u32,
    held: AtomicBool,
}

impl FileLock {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            pid: std::process::id(),
            held: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the contents to a private file, then hard-link it into place so
    /// the lock never exists without its owner line.
    fn create(&self) -> std::io::Result<()> {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "lock".to_string());
        let staging = self.path.with_file_name(format!("{}.{}.tmp", name, self.pid));

        let mut file = OpenOptions::new().write(true).create(true).truncate(true).open(&staging)?;
        write!(file, "PID: {}\nStarted: {}\n", self.pid, Local::now().to_rfc3339())?;
        file.sync_all()?;
        drop(file);

        let linked = fs::hard_link(&staging, &self.path);
        if let Err(e) = fs::remove_file(&staging) {
            debug!("Could not remove {}: {}", staging.display(), e);
        }
        linked
    }

    /// Whether the lock file was modified within the ownerless grace period.
    fn recently_written(&self) -> bool {
        fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age < OWNERLESS_GRACE)
    }

    fn read_contents(&self) -> Result<LockContents> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(parse_contents(&text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(LockContents::default()),
            Err(e) => Err(RelayError::Lock(format!("Failed to read {}: {}", self.path.display(), e))),
        }
    }
}

impl LockResource for FileLock {
    fn try_acquire(&self) -> Result<LockStatus> {
        // Second pass runs after a stale file was removed
        for _ in 0..2 {
            match self.create() {
                Ok(()) => {
                    self.held.store(true, Ordering::SeqCst);
                    info!("Acquired lock {} (PID {})", self.path.display(), self.pid);
                    return Ok(LockStatus::Acquired);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(RelayError::Lock(format!(
                        "Failed to create {}: {}",
                        self.path.display(),
                        e
                    )));
                }
            }

            let contents = self.read_contents()?;
            match contents.pid {
                Some(pid) if pid == self.pid => {
                    self.held.store(true, Ordering::SeqCst);
                    debug!("Lock {} already held by this process", self.path.display());
                    return Ok(LockStatus::Acquired);
                }
                Some(pid) if process_alive(pid) => {
                    return Ok(LockStatus::Contended {
                        pid: Some(pid),
                        started: contents.started,
                    });
                }
                None if self.recently_written() => {
                    debug!("Lock {} has no owner yet; treating it as held", self.path.display());
                    return Ok(LockStatus::Contended {
                        pid: None,
                        started: contents.started,
                    });
                }
                _ => {
                    warn!(
                        "Reclaiming stale lock {} (owner {:?} not running)",
                        self.path.display(),
                        contents.pid
                    );
                    match fs::remove_file(&self.path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => {
                            return Err(RelayError::Lock(format!(
                                "Failed to remove stale lock {}: {}",
                                self.path.display(),
                                e
                            )));
                        }
                    }
                }
            }
        }

        Err(RelayError::Lock(format!(
            "Lock {} keeps reappearing; another instance is starting",
            self.path.display()
        )))
    }

    fn release(&self) -> Result<()> {
        if !self.held.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let contents = self.read_contents()?;
        if contents.pid != Some(self.pid) {
            warn!("Lock {} is no longer ours; leaving it in place", self.path.display());
            return Ok(());
        }

        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Released lock {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RelayError::Lock(format!("Failed to remove {}: {}", self.path.display(), e))),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release lock on drop: {}", e);
        }
    }
}
