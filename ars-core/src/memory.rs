//! Long-term memory: the chronicle of summarized turns and the fact store.
//!
//! The [`Archivist`] decides *when* a summary is due and stores the result; it
//! never talks to the narrator backend itself. Every mutation is staged on a
//! copy, written to the [`SessionStore`], and only then committed in memory,
//! so a failed write leaves the in-memory state untouched.

use crate::persist::{with_retries, PersistError, SessionStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Turns between chronicle entries.
pub const DEFAULT_SUMMARY_INTERVAL: u32 = 15;

/// Characters of a summary shown in notifications.
pub const PREVIEW_CHARS: usize = 200;

const CHRONICLE_HEADER: &str = "=== CHRONIK DER BISHERIGEN EREIGNISSE ===";
const FACTS_HEADER: &str = "=== AKTUELLE FAKTEN ===";

/// Fact key to JSON value. Keys are never removed within a session.
pub type WorldState = BTreeMap<String, serde_json::Value>;

/// One chronicle section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChronicleEntry {
    /// Turn after which the summary was made.
    pub turn_index: u64,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
}

impl ChronicleEntry {
    pub fn new(turn_index: u64, summary: impl Into<String>) -> Self {
        Self {
            turn_index,
            timestamp: Utc::now(),
            summary: summary.into(),
        }
    }

    pub fn preview(&self) -> String {
        self.summary.chars().take(PREVIEW_CHARS).collect()
    }
}

/// A raw player/narrator exchange, the summarizer's input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub input: String,
    pub output: String,
}

/// Owner of the chronicle and the world state.
#[derive(Debug, Clone)]
pub struct Archivist {
    interval: u32,
    persist_attempts: u32,
    chronicle: Vec<ChronicleEntry>,
    world_state: WorldState,
}

impl Default for Archivist {
    fn default() -> Self {
        Self::new(DEFAULT_SUMMARY_INTERVAL)
    }
}

impl Archivist {
    pub fn new(interval: u32) -> Self {
        Self {
            interval: interval.max(1),
            persist_attempts: 1,
            chronicle: Vec::new(),
            world_state: WorldState::new(),
        }
    }

    /// Rebuild from persisted state.
    pub fn restore(interval: u32, chronicle: Vec<ChronicleEntry>, world_state: WorldState) -> Self {
        Self {
            chronicle,
            world_state,
            ..Self::new(interval)
        }
    }

    /// How many times a write is tried before it is reported as failed.
    pub fn with_persist_attempts(mut self, attempts: u32) -> Self {
        self.persist_attempts = attempts.max(1);
        self
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// True iff `turn_index > 0` and it falls on an interval boundary.
    pub fn should_summarize(&self, turn_index: u64) -> bool {
        turn_index > 0 && turn_index % u64::from(self.interval) == 0
    }

    pub fn chronicle(&self) -> &[ChronicleEntry] {
        &self.chronicle
    }

    pub fn world_state(&self) -> &WorldState {
        &self.world_state
    }

    pub fn fact(&self, key: &str) -> Option<&serde_json::Value> {
        self.world_state.get(key)
    }

    /// Append a summary to the chronicle once it is durable.
    pub async fn update_chronicle(
        &mut self,
        store: &dyn SessionStore,
        turn_index: u64,
        summary: impl Into<String>,
    ) -> Result<&ChronicleEntry, PersistError> {
        let entry = ChronicleEntry::new(turn_index, summary);
        with_retries(self.persist_attempts, "chronicle", || {
            store.append_chronicle(&entry)
        })
        .await?;

        info!(
            turn_index,
            chars = entry.summary.len(),
            entries = self.chronicle.len() + 1,
            "chronicle updated"
        );
        self.chronicle.push(entry);
        Ok(&self.chronicle[self.chronicle.len() - 1])
    }

    /// Last-write-wins merge. Either the whole merge lands or none of it.
    pub async fn merge_world_state(
        &mut self,
        store: &dyn SessionStore,
        facts: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), PersistError> {
        if facts.is_empty() {
            return Ok(());
        }
        let mut staged = self.world_state.clone();
        staged.extend(facts.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.commit_world_state(store, staged).await?;
        info!(new = facts.len(), total = self.world_state.len(), "world state updated");
        Ok(())
    }

    /// Merge only keys that are not yet present. Returns the keys added.
    pub async fn merge_missing(
        &mut self,
        store: &dyn SessionStore,
        facts: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<String>, PersistError> {
        let added: Vec<String> = facts
            .keys()
            .filter(|k| !self.world_state.contains_key(*k))
            .cloned()
            .collect();
        if added.is_empty() {
            return Ok(added);
        }

        let mut staged = self.world_state.clone();
        for key in &added {
            if let Some(value) = facts.get(key) {
                staged.insert(key.clone(), value.clone());
            }
        }
        self.commit_world_state(store, staged).await?;
        debug!(added = added.len(), "initial flags merged");
        Ok(added)
    }

    async fn commit_world_state(
        &mut self,
        store: &dyn SessionStore,
        staged: WorldState,
    ) -> Result<(), PersistError> {
        with_retries(self.persist_attempts, "world state", || {
            store.save_world_state(&staged)
        })
        .await?;
        self.world_state = staged;
        Ok(())
    }

    /// Chronicle so far, then the current facts sorted by key.
    ///
    /// Depends only on stored state, so equal state renders equal text.
    pub fn context_for_prompt(&self) -> String {
        let mut sections = Vec::new();

        if !self.chronicle.is_empty() {
            let entries: Vec<String> = self
                .chronicle
                .iter()
                .map(|e| format!("[{}]\n{}", e.timestamp.format("%Y-%m-%d %H:%M"), e.summary))
                .collect();
            sections.push(format!("{CHRONICLE_HEADER}\n{}", entries.join("\n\n")));
        }

        if !self.world_state.is_empty() {
            let lines: Vec<String> = self
                .world_state
                .iter()
                .map(|(key, value)| format!("  - {key}: {}", render_value(value)))
                .collect();
            sections.push(format!("{FACTS_HEADER}\n{}", lines.join("\n")));
        }

        sections.join("\n\n")
    }
}

/// Strings unquoted, everything else as compact JSON.
pub fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
