//! Outbound notifications to presentation and audio consumers.
//!
//! The orchestrator holds one [`EventSink`] handed to it at construction.
//! Emitting is fire-and-forget: a sink error is logged and the turn goes on.

use crate::character::StatChange;
use crate::dice::RollResult;
use crate::protocol::{ControlTag, InventoryState};
use crate::world::GameClock;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Event receiver closed")]
    Closed,

    #[error("Sink failed: {0}")]
    Other(String),
}

/// A discrete notification.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    /// Narrative text, forwarded as soon as it is unambiguous.
    NarrativeSpan(String),
    /// End of one narrator stream (a turn or a roll narration).
    NarrationEnded,
    TagRecognized(ControlTag),
    ProbeRequested { skill: String, target: i32 },
    RollResolved { skill: String, result: RollResult },
    StatChanged(StatChange),
    UnknownStat(String),
    UnknownSkill(String),
    SkillMarked(String),
    XpGained { amount: u32, total: u32 },
    FactsUpdated(serde_json::Map<String, serde_json::Value>),
    ChronicleUpdated { preview: String },
    InventoryChanged { name: String, state: InventoryState },
    TimeChanged(GameClock),
    WeatherChanged(String),
    VoiceChanged(String),
    LocationChanged { id: String, name: String },
    Incapacitated,
    Broken,
    /// The current turn was discarded; the session continues.
    TurnFailed(String),
    /// Free-form system line (command output, notices).
    System(String),
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &GameEvent) -> Result<(), SinkError>;
}

/// Emit and log, never fail.
pub fn notify(sink: &dyn EventSink, event: GameEvent) {
    if let Err(e) = sink.emit(&event) {
        warn!(error = %e, ?event, "event sink failed");
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &GameEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Forwards events to an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<GameEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<GameEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &GameEvent) -> Result<(), SinkError> {
        self.tx.send(event.clone()).map_err(|_| SinkError::Closed)
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<GameEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GameEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    /// Concatenated narrative spans.
    pub fn narrative(&self) -> String {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                GameEvent::NarrativeSpan(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &GameEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .map_err(|e| SinkError::Other(e.to_string()))?
            .push(event.clone());
        Ok(())
    }
}
