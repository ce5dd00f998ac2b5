//! Scene state: clock, weather, location and inventory, plus the adventure
//! description the scene moves through.

use crate::memory::WorldState;
use crate::protocol::InventoryState;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown location: {0}")]
    UnknownLocation(String),
}

// ============================================================================
// Clock
// ============================================================================

/// In-game time, counted in days since the adventure started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameClock {
    pub day: u32,
    pub hour: u8,
    pub minute: u8,
}

impl Default for GameClock {
    fn default() -> Self {
        Self::new(1, 8, 0)
    }
}

impl GameClock {
    pub fn new(day: u32, hour: u8, minute: u8) -> Self {
        Self {
            day: day.max(1),
            hour: hour % 24,
            minute: minute % 60,
        }
    }

    pub fn advance_minutes(&mut self, minutes: u32) {
        let total = u64::from(self.minute) + u64::from(minutes);
        self.minute = (total % 60) as u8;
        let total_hours = u64::from(self.hour) + total / 60;
        self.hour = (total_hours % 24) as u8;
        let days = u32::try_from(total_hours / 24).unwrap_or(u32::MAX);
        self.day = self.day.saturating_add(days);
    }

    /// Advance by fractional hours, rounded to whole minutes.
    pub fn advance_hours(&mut self, hours: f32) {
        if hours.is_finite() && hours > 0.0 {
            self.advance_minutes((hours * 60.0).round() as u32);
        }
    }

    /// Jump to a time of day on the current day.
    pub fn set_time(&mut self, hour: u8, minute: u8) {
        self.hour = hour % 24;
        self.minute = minute % 60;
    }
}

impl fmt::Display for GameClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag {}, {:02}:{:02}", self.day, self.hour, self.minute)
    }
}

// ============================================================================
// Inventory
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub held: BTreeSet<String>,
    pub completed: BTreeSet<String>,
}

impl Inventory {
    /// Apply an inventory event. Returns whether anything changed.
    pub fn apply(&mut self, name: &str, state: InventoryState) -> bool {
        match state {
            InventoryState::Found => self.held.insert(name.to_string()),
            InventoryState::Lost => self.held.remove(name),
            InventoryState::Done => {
                let removed = self.held.remove(name);
                self.completed.insert(name.to_string()) || removed
            }
        }
    }
}

// ============================================================================
// Adventure
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub atmosphere: String,
    /// Target location id to a short description of the way there.
    #[serde(default)]
    pub exits: BTreeMap<String, String>,
    /// Ids of the NPCs found here.
    #[serde(default)]
    pub npcs_present: Vec<String>,
    /// Ids of the clues that can be found here.
    #[serde(default)]
    pub clues_available: Vec<String>,
    /// Narrator-only remarks.
    #[serde(default)]
    pub keeper_notes: String,
    #[serde(default)]
    pub sub_locations: Vec<Location>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Npc {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: String,
}

/// A clue, hidden until its flag is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Clue {
    pub id: String,
    pub name: String,
    /// Skill needed to find it; free when absent.
    #[serde(default)]
    pub probe_required: Option<String>,
    #[serde(default)]
    pub requires_flag: Option<String>,
}

impl Clue {
    pub fn is_available(&self, facts: &WorldState) -> bool {
        self.requires_flag
            .as_deref()
            .map_or(true, |flag| facts.get(flag).is_some_and(is_set))
    }
}

/// JSON truthiness: not null, false, zero or empty.
pub fn is_set(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

/// An in-memory scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Adventure {
    pub title: String,
    #[serde(default)]
    pub intro: Option<String>,
    #[serde(default)]
    pub start_location: Option<String>,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub npcs: Vec<Npc>,
    #[serde(default)]
    pub clues: Vec<Clue>,
    /// Initial world-state flags.
    #[serde(default)]
    pub flags: serde_json::Map<String, serde_json::Value>,
}

impl Adventure {
    pub fn from_json_str(json: &str) -> Result<Self, WorldError> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, WorldError> {
        let json = tokio::fs::read_to_string(path).await?;
        let adventure = Self::from_json_str(&json)?;
        info!(title = %adventure.title, locations = adventure.all_locations().len(), "adventure loaded");
        Ok(adventure)
    }

    /// Every location, sub-locations following their parent.
    pub fn all_locations(&self) -> Vec<&Location> {
        fn walk<'a>(locations: &'a [Location], out: &mut Vec<&'a Location>) {
            for location in locations {
                out.push(location);
                walk(&location.sub_locations, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.locations, &mut out);
        out
    }

    pub fn location(&self, id: &str) -> Option<&Location> {
        self.all_locations().into_iter().find(|l| l.id == id)
    }

    pub fn npc(&self, id: &str) -> Option<&Npc> {
        self.npcs.iter().find(|n| n.id == id)
    }

    pub fn clue(&self, id: &str) -> Option<&Clue> {
        self.clues.iter().find(|c| c.id == id)
    }
}

// ============================================================================
// Scene
// ============================================================================

/// Per-session scene state that is not a fact or a stat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub clock: GameClock,
    pub weather: Option<String>,
    pub location: Option<String>,
    pub inventory: Inventory,
    /// Active narrator voice role.
    pub voice: String,
}

impl Scene {
    pub fn new(voice: impl Into<String>, location: Option<String>) -> Self {
        Self {
            clock: GameClock::default(),
            weather: None,
            location,
            inventory: Inventory::default(),
            voice: voice.into(),
        }
    }

    /// Move to another adventure location.
    pub fn teleport<'a>(
        &mut self,
        adventure: &'a Adventure,
        id: &str,
    ) -> Result<&'a Location, WorldError> {
        let location = adventure
            .location(id)
            .ok_or_else(|| WorldError::UnknownLocation(id.to_string()))?;
        info!(from = ?self.location, to = %id, "location changed");
        self.location = Some(location.id.clone());
        Ok(location)
    }

    /// Location, time, weather and inventory block for the prompt context.
    /// Clues gated by a flag are listed once `facts` has that flag set.
    pub fn context_text(&self, adventure: Option<&Adventure>, facts: &WorldState) -> String {
        let mut parts = Vec::new();

        if let Some(location) = self
            .location
            .as_deref()
            .and_then(|id| adventure.and_then(|a| a.location(id)))
        {
            parts.push(format!("=== AKTUELLER ORT: {} ===", location.name));
            if !location.description.is_empty() {
                parts.push(location.description.clone());
            }
            if !location.atmosphere.is_empty() {
                parts.push(format!("Atmosphaere: {}", location.atmosphere));
            }
            if let Some(adventure) = adventure {
                let npcs: Vec<String> = location
                    .npcs_present
                    .iter()
                    .filter_map(|id| adventure.npc(id))
                    .map(|npc| format!("  - {}: {}", npc.name, npc.role))
                    .collect();
                if !npcs.is_empty() {
                    parts.push(format!("Anwesende Personen:\n{}", npcs.join("\n")));
                }

                let clues: Vec<String> = location
                    .clues_available
                    .iter()
                    .filter_map(|id| adventure.clue(id))
                    .filter(|clue| clue.is_available(facts))
                    .map(|clue| {
                        let probe = clue.probe_required.as_deref().unwrap_or("frei");
                        format!("  - {} (Probe: {probe})", clue.name)
                    })
                    .collect();
                if !clues.is_empty() {
                    parts.push(format!("Moegliche Hinweise:\n{}", clues.join("\n")));
                }
            }
            if !location.exits.is_empty() {
                let exits: Vec<String> = location
                    .exits
                    .iter()
                    .map(|(id, way)| {
                        let name = adventure
                            .and_then(|a| a.location(id))
                            .map_or(id.as_str(), |l| l.name.as_str());
                        format!("  - {name}: {way}")
                    })
                    .collect();
                parts.push(format!("Ausgaenge:\n{}", exits.join("\n")));
            }
            if !location.keeper_notes.is_empty() {
                parts.push(format!("[Keeper-Notiz: {}]", location.keeper_notes));
            }
        }

        let mut time = format!("=== ZEIT ===\n{}", self.clock);
        if let Some(weather) = &self.weather {
            time.push_str(&format!(" | Wetter: {weather}"));
        }
        parts.push(time);

        if !self.inventory.held.is_empty() {
            let items: Vec<&str> = self.inventory.held.iter().map(String::as_str).collect();
            parts.push(format!("Inventar: {}", items.join(", ")));
        }

        parts.join("\n\n")
    }
}
