use crate::error::{ProfileQueryError, Result};
use std::path::{Path, PathBuf};

const METADATA_EXT: &str = "json";
const SOCKET_EXT: &str = "sock";
const LOCK_EXT: &str = "lock";
const CURRENT_FILE: &str = "current.txt";
const LOG_DIR: &str = "logs";
const MAX_SESSION_ID_LEN: usize = 64;

/// Filesystem layout of the session directory.
///
/// Every path is derived from the session id, so callers never need to parse
/// a metadata file to find a session's socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDirectory {
    root: PathBuf,
}

impl SessionDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn socket_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.{SOCKET_EXT}"))
    }

    pub fn metadata_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.{METADATA_EXT}"))
    }

    /// Advisory lock serializing claim and removal of one session's files.
    pub fn lock_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.{LOCK_EXT}"))
    }

    pub fn current_path(&self) -> PathBuf {
        self.root.join(CURRENT_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }

    /// Create the directory (owner-only on unix) if it does not exist yet.
    pub async fn ensure(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o700);
            if let Err(e) = tokio::fs::set_permissions(&self.root, permissions).await {
                tracing::warn!(
                    "Could not restrict permissions on {}: {}",
                    self.root.display(),
                    e
                );
            }
        }

        Ok(())
    }

    /// Session id encoded in a metadata file name, if `path` is one.
    pub fn session_id_from_metadata_path(path: &Path) -> Option<String> {
        if path.extension().and_then(|e| e.to_str()) != Some(METADATA_EXT) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        validate_session_id(stem).ok()?;
        Some(stem.to_string())
    }

    /// Replace `target` atomically: write a sibling temp file, then rename over it.
    pub async fn write_atomic(&self, target: &Path, contents: &[u8]) -> Result<()> {
        let tmp = temp_sibling(target);
        tokio::fs::write(&tmp, contents).await?;
        if let Err(e) = tokio::fs::rename(&tmp, target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Create `target` with `contents` only if it does not exist.
    ///
    /// Readers never observe a partially written file: the content is written
    /// to a temp file first and then hard-linked into place, which fails with
    /// `AlreadyExists` if another writer got there first.
    pub async fn create_exclusive(&self, target: &Path, contents: &[u8]) -> Result<bool> {
        let tmp = temp_sibling(target);
        tokio::fs::write(&tmp, contents).await?;
        let linked = tokio::fs::hard_link(&tmp, target).await;
        let _ = tokio::fs::remove_file(&tmp).await;

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn temp_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "session".to_string());
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    target.with_file_name(format!(".{name}.{}.tmp", &nonce[..8]))
}

/// Session ids become file names, so only a conservative character set is allowed.
pub fn validate_session_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && !id.starts_with('.')
        && id != "current"
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(ProfileQueryError::InvalidSessionId(id.to_string()))
    }
}
