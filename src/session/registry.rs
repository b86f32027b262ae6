use crate::error::{ProfileQueryError, Result};
use crate::logging::{log_session_event, log_warning};
use crate::session::directory::{SessionDirectory, validate_session_id};
use crate::session::liveness::is_process_running;
use crate::session::{SessionMetadata, SessionStatus};
use fs2::FileExt;
use std::fs::File;
use std::io::ErrorKind;

/// Result of checking a session against the filesystem and the OS process table.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Process running and socket present.
    Alive(SessionMetadata),
    /// Process running, metadata claimed, socket not bound yet.
    Starting(SessionMetadata),
    /// Files left behind by a daemon that is no longer running.
    Stale(Option<SessionMetadata>),
    /// Nothing on disk for this id.
    Missing,
}

impl SessionState {
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Alive(_) | SessionState::Starting(_))
    }

    pub fn metadata(&self) -> Option<&SessionMetadata> {
        match self {
            SessionState::Alive(meta) | SessionState::Starting(meta) => Some(meta),
            SessionState::Stale(meta) => meta.as_ref(),
            SessionState::Missing => None,
        }
    }
}

/// Exclusive hold on `<id>.lock`, released on drop.
///
/// Every path that creates or deletes a session's metadata and socket runs
/// under this lock, so a liveness check and the removal it justifies cannot be
/// split by another daemon's claim.
#[derive(Debug)]
pub struct SessionLock {
    _file: File,
}

/// Read/write/validate operations over the session directory.
///
/// Nothing here talks to a running daemon; liveness comes from the pid probe
/// and the presence of the socket file.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    dir: SessionDirectory,
}

impl SessionRegistry {
    pub fn new(dir: SessionDirectory) -> Self {
        Self { dir }
    }

    pub fn directory(&self) -> &SessionDirectory {
        &self.dir
    }

    /// Explicit id if given, otherwise the current-session pointer.
    pub async fn resolve_session_id(&self, explicit: Option<&str>) -> Result<String> {
        if let Some(id) = explicit {
            validate_session_id(id)?;
            return Ok(id.to_string());
        }

        self.read_current()
            .await?
            .ok_or(ProfileQueryError::NoActiveSession)
    }

    pub async fn read_current(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.dir.current_path()).await {
            Ok(content) => {
                let id = content.trim();
                if id.is_empty() || validate_session_id(id).is_err() {
                    return Ok(None);
                }
                Ok(Some(id.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn set_current(&self, id: &str) -> Result<()> {
        validate_session_id(id)?;
        self.dir.ensure().await?;
        self.dir
            .write_atomic(&self.dir.current_path(), format!("{id}\n").as_bytes())
            .await
    }

    /// Remove the current pointer if it names `id`. Returns true if it was cleared.
    pub async fn clear_current_if(&self, id: &str) -> Result<bool> {
        if self.read_current().await?.as_deref() != Some(id) {
            return Ok(false);
        }
        remove_if_exists(&self.dir.current_path()).await?;
        Ok(true)
    }

    pub async fn read_metadata(&self, id: &str) -> Result<Option<SessionMetadata>> {
        match tokio::fs::read(self.dir.metadata_path(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every readable metadata file, oldest first. Says nothing about liveness.
    pub async fn list_sessions(&self) -> Result<Vec<SessionMetadata>> {
        let mut entries = match tokio::fs::read_dir(self.dir.root()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(id) = SessionDirectory::session_id_from_metadata_path(&path) else {
                continue;
            };

            match self.read_metadata(&id).await {
                Ok(Some(meta)) => sessions.push(meta),
                Ok(None) => {} // removed while listing
                Err(e) => log_warning(
                    "registry",
                    &format!("Skipping unreadable metadata for '{id}': {e}"),
                    None,
                ),
            }
        }

        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(sessions)
    }

    pub async fn validate_session(&self, id: &str) -> Result<SessionState> {
        validate_session_id(id)?;

        let socket_exists = tokio::fs::try_exists(self.dir.socket_path(id))
            .await
            .unwrap_or(false);

        let meta = match self.read_metadata(id).await {
            Ok(Some(meta)) => meta,
            Ok(None) if socket_exists => return Ok(SessionState::Stale(None)),
            Ok(None) => return Ok(SessionState::Missing),
            Err(e) => {
                log_warning(
                    "registry",
                    &format!("Metadata for '{id}' is unreadable: {e}"),
                    None,
                );
                return Ok(SessionState::Stale(None));
            }
        };

        if !is_process_running(meta.pid) {
            return Ok(SessionState::Stale(Some(meta)));
        }

        if socket_exists {
            Ok(SessionState::Alive(meta))
        } else if meta.status == SessionStatus::Starting {
            Ok(SessionState::Starting(meta))
        } else {
            Ok(SessionState::Stale(Some(meta)))
        }
    }

    /// Block until this process holds the lock for `id`.
    pub async fn lock_session(&self, id: &str) -> Result<SessionLock> {
        validate_session_id(id)?;
        self.dir.ensure().await?;

        let path = self.dir.lock_path(id);
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            // Never truncate or delete: another process may hold the lock
            let file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(std::io::Error::other)??;

        Ok(SessionLock { _file: file })
    }

    /// Delete the metadata and socket files for `id` without any check. Idempotent.
    ///
    /// Callers must hold the session lock.
    async fn remove_session_files(&self, id: &str) -> Result<()> {
        remove_if_exists(&self.dir.metadata_path(id)).await?;
        remove_if_exists(&self.dir.socket_path(id)).await?;
        log_session_event(id, "removed", "metadata and socket files deleted");
        Ok(())
    }

    /// Remove the files for `id` only if they still belong to a dead daemon.
    ///
    /// Liveness is re-checked under the session lock, so a daemon that claimed
    /// the id after the caller's own check keeps its files. Returns true if
    /// anything was removed.
    pub async fn remove_if_stale(&self, id: &str) -> Result<bool> {
        let _lock = self.lock_session(id).await?;
        match self.validate_session(id).await? {
            SessionState::Stale(_) => {
                self.remove_session_files(id).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Remove the files for `id` if its metadata is missing, unreadable or
    /// names `pid`. Used by a daemon cleaning up after itself and by callers
    /// that just terminated `pid`.
    pub async fn remove_owned(&self, id: &str, pid: u32) -> Result<bool> {
        let _lock = self.lock_session(id).await?;
        let owned = match self.read_metadata(id).await {
            Ok(Some(meta)) => meta.pid == pid,
            Ok(None) | Err(_) => true,
        };

        if !owned {
            log_warning(
                "registry",
                &format!("Session '{id}' now belongs to another process; leaving its files"),
                None,
            );
            return Ok(false);
        }

        self.remove_session_files(id).await?;
        Ok(true)
    }

    /// Create the metadata file for a new daemon.
    ///
    /// Files left behind by a dead daemon are replaced; a live or starting
    /// session yields `AlreadyRunning`.
    pub async fn claim_session(&self, meta: &SessionMetadata) -> Result<()> {
        let _lock = self.lock_session(&meta.id).await?;

        let contents = serde_json::to_vec_pretty(meta)?;
        let path = self.dir.metadata_path(&meta.id);
        if self.dir.create_exclusive(&path, &contents).await? {
            log_session_event(&meta.id, "claimed", &format!("pid {}", meta.pid));
            return Ok(());
        }

        match self.validate_session(&meta.id).await? {
            SessionState::Stale(_) | SessionState::Missing => {
                log_warning(
                    "registry",
                    &format!("Replacing stale session files for '{}'", meta.id),
                    None,
                );
                self.remove_session_files(&meta.id).await?;
            }
            SessionState::Alive(_) | SessionState::Starting(_) => {
                return Err(ProfileQueryError::AlreadyRunning(meta.id.clone()));
            }
        }

        if self.dir.create_exclusive(&path, &contents).await? {
            log_session_event(&meta.id, "claimed", &format!("pid {}", meta.pid));
            Ok(())
        } else {
            Err(ProfileQueryError::AlreadyRunning(meta.id.clone()))
        }
    }

    /// Atomically replace the metadata file for `meta.id`.
    pub async fn write_metadata(&self, meta: &SessionMetadata) -> Result<()> {
        let contents = serde_json::to_vec_pretty(meta)?;
        self.dir
            .write_atomic(&self.dir.metadata_path(&meta.id), &contents)
            .await
    }

    /// Remove every stale session. Returns the ids that were cleaned up.
    pub async fn cleanup_stale(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for meta in self.list_sessions().await? {
            if self.remove_if_stale(&meta.id).await? {
                removed.push(meta.id);
            }
        }
        Ok(removed)
    }
}

async fn remove_if_exists(path: &std::path::Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
