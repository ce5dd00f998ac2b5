//! Session persistence.
//!
//! The engine writes through the [`SessionStore`] trait after every logical
//! update. [`JsonFileStore`] keeps one directory per session: small state
//! files are replaced atomically, turns are appended to a JSON-lines log.

use crate::character::CharacterState;
use crate::memory::{ChronicleEntry, WorldState};
use crate::session::Turn;
use crate::world::Scene;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid save format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current save format version.
pub const SAVE_VERSION: u32 = 1;

const META_FILE: &str = "session.json";
const STATS_FILE: &str = "stats.json";
const WORLD_FILE: &str = "world_state.json";
const SCENE_FILE: &str = "scene.json";
const CHRONICLE_FILE: &str = "chronicle.json";
const TURNS_FILE: &str = "turns.jsonl";

/// Identity of a stored session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub version: u32,
    pub session_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl SessionMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: SAVE_VERSION,
            session_id: Uuid::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// Everything needed to resume a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedSession {
    pub meta: SessionMeta,
    pub character: Option<CharacterState>,
    #[serde(default)]
    pub world_state: WorldState,
    #[serde(default)]
    pub chronicle: Vec<ChronicleEntry>,
    pub scene: Option<Scene>,
    #[serde(default)]
    pub turns: Vec<Turn>,
}

/// Durable sink for session state.
///
/// Each call must be durable before it returns `Ok`; callers commit the
/// corresponding in-memory state only afterwards.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_turn(&self, turn: &Turn) -> Result<(), PersistError>;
    async fn save_stats(&self, character: &CharacterState) -> Result<(), PersistError>;
    async fn save_world_state(&self, state: &WorldState) -> Result<(), PersistError>;
    async fn append_chronicle(&self, entry: &ChronicleEntry) -> Result<(), PersistError>;
    async fn save_scene(&self, scene: &Scene) -> Result<(), PersistError>;
    /// Everything stored so far, or `None` for a fresh session.
    async fn load(&self) -> Result<Option<SavedSession>, PersistError>;
}

/// Run a write up to `attempts` times, returning the last error.
pub async fn with_retries<T, F, Fut>(attempts: u32, what: &str, mut op: F) -> Result<T, PersistError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PersistError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!(what, attempt, attempts, error = %e, "write failed, retrying");
                attempt += 1;
            }
            Err(e) => {
                error!(what, attempts, error = %e, "write failed");
                return Err(e);
            }
        }
    }
}

/// Directory for a named session under `root`.
pub fn session_dir(root: impl AsRef<Path>, name: &str) -> PathBuf {
    let sanitized = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect::<String>();
    root.as_ref().join(sanitized)
}

/// File-backed store, one directory per session.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory and write the session identity.
    pub async fn init(&self, meta: &SessionMeta) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir).await?;
        self.write_json(META_FILE, meta).await
    }

    /// Read only the session identity.
    pub async fn peek_metadata(&self) -> Result<Option<SessionMeta>, PersistError> {
        let Some(meta) = read_optional::<SessionMeta>(&self.dir.join(META_FILE)).await? else {
            return Ok(None);
        };
        if meta.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: meta.version,
            });
        }
        Ok(Some(meta))
    }

    async fn write_json<T: Serialize + ?Sized>(&self, file: &str, value: &T) -> Result<(), PersistError> {
        let content = serde_json::to_vec_pretty(value)?;
        write_atomic(&self.dir.join(file), &content).await?;
        debug!(file, bytes = content.len(), "wrote state file");
        Ok(())
    }

    async fn read_turns(&self) -> Result<Vec<Turn>, PersistError> {
        let content = match fs::read_to_string(self.dir.join(TURNS_FILE)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut turns = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str::<Turn>(line) {
                Ok(turn) => turns.push(turn),
                // A torn final line means the process died mid-append; that turn
                // was never acknowledged.
                Err(e) if i + 1 == lines.len() => {
                    warn!(error = %e, "ignoring incomplete last turn record");
                }
                Err(e) => {
                    return Err(PersistError::InvalidFormat(format!(
                        "turn record {}: {e}",
                        i + 1
                    )))
                }
            }
        }
        Ok(turns)
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn save_turn(&self, turn: &Turn) -> Result<(), PersistError> {
        let mut line = serde_json::to_vec(turn)?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(TURNS_FILE))
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn save_stats(&self, character: &CharacterState) -> Result<(), PersistError> {
        self.write_json(STATS_FILE, character).await
    }

    async fn save_world_state(&self, state: &WorldState) -> Result<(), PersistError> {
        self.write_json(WORLD_FILE, state).await
    }

    async fn append_chronicle(&self, entry: &ChronicleEntry) -> Result<(), PersistError> {
        let mut chronicle: Vec<ChronicleEntry> =
            read_optional(&self.dir.join(CHRONICLE_FILE)).await?.unwrap_or_default();
        chronicle.push(entry.clone());
        self.write_json(CHRONICLE_FILE, &chronicle).await
    }

    async fn save_scene(&self, scene: &Scene) -> Result<(), PersistError> {
        self.write_json(SCENE_FILE, scene).await
    }

    async fn load(&self) -> Result<Option<SavedSession>, PersistError> {
        let Some(meta) = self.peek_metadata().await? else {
            return Ok(None);
        };

        Ok(Some(SavedSession {
            meta,
            character: read_optional(&self.dir.join(STATS_FILE)).await?,
            world_state: read_optional(&self.dir.join(WORLD_FILE))
                .await?
                .unwrap_or_default(),
            chronicle: read_optional(&self.dir.join(CHRONICLE_FILE))
                .await?
                .unwrap_or_default(),
            scene: read_optional(&self.dir.join(SCENE_FILE)).await?,
            turns: self.read_turns().await?,
        }))
    }
}

/// List stored sessions under `root`, newest first.
pub async fn list_sessions(root: impl AsRef<Path>) -> Result<Vec<SessionMeta>, PersistError> {
    let mut sessions = Vec::new();
    let mut entries = fs::read_dir(root).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        if let Ok(Some(meta)) = JsonFileStore::new(entry.path()).peek_metadata().await {
            sessions.push(meta);
        }
    }

    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(sessions)
}

async fn read_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write to a sibling temp file, sync, then rename over the target.
async fn write_atomic(path: &Path, content: &[u8]) -> Result<(), PersistError> {
    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(content).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, path).await?;
    Ok(())
}
