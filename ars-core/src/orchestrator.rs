//! The turn orchestrator.
//!
//! Runs one turn at a time through a fixed state machine:
//!
//! ```text
//! Idle -> AwaitingInput -> Streaming -> ApplyingEffects
//!      -> [RollRoundTrip -> ApplyingEffects]* -> Persisting
//!      -> [Compacting] -> AwaitingInput
//! ```
//!
//! Narrative is forwarded to the [`EventSink`] while it streams in. Effects
//! are applied only after the narrator finished, on staged copies that are
//! committed once the corresponding write succeeded.

use crate::backend::{BackendError, NarratorBackend, Summarizer};
use crate::character::{CharacterState, StatChange};
use crate::dice::{DiceEngine, RollResult};
use crate::events::{notify, EventSink, GameEvent};
use crate::memory::render_value;
use crate::persist::{with_retries, SessionStore};
use crate::protocol::{extract_tags, strip_tags, ControlTag, Scanner, StatTarget, Token};
use crate::ruleset::Ruleset;
use crate::session::{Session, SessionConfig, SessionError, Turn};
use crate::world::{Adventure, Scene};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Message shown when a turn is discarded after a backend failure.
const TURN_FAILED_MESSAGE: &str =
    "Der Erzaehler ist gerade nicht erreichbar. Bitte versuche es noch einmal.";

/// RNG type used by the orchestrator's dice.
pub type BoxedRng = Box<dyn RngCore + Send>;

/// Where the orchestrator is in its turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingInput,
    Streaming,
    ApplyingEffects,
    RollRoundTrip,
    Persisting,
    Compacting,
    Stopped,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnState::Idle => "idle",
            TurnState::AwaitingInput => "awaiting_input",
            TurnState::Streaming => "streaming",
            TurnState::ApplyingEffects => "applying_effects",
            TurnState::RollRoundTrip => "roll_round_trip",
            TurnState::Persisting => "persisting",
            TurnState::Compacting => "compacting",
            TurnState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Line-oriented player input.
#[async_trait]
pub trait InputSource: Send {
    /// The next line, or `None` once the input is closed.
    async fn next_line(&mut self) -> Option<String>;
}

/// Session-level queries, accepted between turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Facts,
    /// Current values of the adventure's flags.
    Flags,
    Location,
    Locations,
    Teleport(String),
    /// Free roll against a target; `None` when the target did not parse.
    Roll(Option<i32>),
    Quit,
}

impl Command {
    /// Parse a command line. Anything else is player input.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (head, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(h, r)| (h, r.trim()));

        match head.to_lowercase().as_str() {
            "quit" | "exit" | "beenden" | "/quit" => Some(Command::Quit),
            "/status" => Some(Command::Status),
            "/fakten" | "/facts" => Some(Command::Facts),
            "/flags" => Some(Command::Flags),
            "/ort" | "/location" => Some(Command::Location),
            "/orte" | "/locations" => Some(Command::Locations),
            "/teleport" => Some(Command::Teleport(rest.to_string())),
            "/roll" | "/wuerfel" => Some(Command::Roll(rest.parse().ok())),
            _ => None,
        }
    }
}

/// A derived condition reported once per transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Incapacitated,
    Broken,
}

/// A probe resolved during a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProbe {
    pub skill: String,
    pub result: RollResult,
}

/// What one turn did.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub turn_index: u64,
    /// Narration with tags removed, roll narrations included.
    pub narrative: String,
    pub tags: Vec<ControlTag>,
    pub rolls: Vec<ResolvedProbe>,
    pub stat_changes: Vec<StatChange>,
    pub conditions: Vec<Condition>,
    /// A chronicle entry was written after this turn.
    pub compacted: bool,
}

/// The pluggable collaborators of an orchestrator.
#[derive(Clone)]
pub struct Adapters {
    pub narrator: Arc<dyn NarratorBackend>,
    pub summarizer: Arc<dyn Summarizer>,
    pub store: Arc<dyn SessionStore>,
    pub sink: Arc<dyn EventSink>,
}

enum Narration<'a> {
    Turn { input: &'a str, context: String },
    Roll { skill: &'a str, result: &'a RollResult },
}

/// Drives turns for one session.
pub struct TurnOrchestrator {
    config: SessionConfig,
    ruleset: Ruleset,
    adventure: Option<Adventure>,
    session: Session,
    dice: DiceEngine<BoxedRng>,
    adapters: Adapters,
    state: TurnState,
    incapacitated: bool,
    broken: bool,
}

impl TurnOrchestrator {
    pub fn new(config: SessionConfig, ruleset: Ruleset, session: Session, adapters: Adapters) -> Self {
        let dice = DiceEngine::with_rng(ruleset.dice.clone(), Box::new(StdRng::from_entropy()) as BoxedRng);
        let incapacitated = session.character.is_incapacitated();
        let broken = session.character.is_broken();
        Self {
            config,
            ruleset,
            adventure: None,
            session,
            dice,
            adapters,
            state: TurnState::Idle,
            incapacitated,
            broken,
        }
    }

    pub fn with_adventure(mut self, adventure: Adventure) -> Self {
        self.adventure = Some(adventure);
        self
    }

    /// Replace the dice RNG (useful for testing).
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.dice = DiceEngine::with_rng(self.ruleset.dice.clone(), Box::new(rng) as BoxedRng);
        self
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn ruleset(&self) -> &Ruleset {
        &self.ruleset
    }

    pub fn adventure(&self) -> Option<&Adventure> {
        self.adventure.as_ref()
    }

    fn emit(&self, event: GameEvent) {
        notify(self.adapters.sink.as_ref(), event);
    }

    /// Context handed to the narrator with each turn.
    pub fn prompt_context(&self) -> String {
        let memory = self.session.archivist.context_for_prompt();
        let scene = self
            .session
            .scene
            .context_text(self.adventure.as_ref(), self.session.archivist.world_state());
        if memory.is_empty() {
            scene
        } else {
            format!("{memory}\n\n{scene}")
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open the session: intro, initial flags, start location, first save.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.state != TurnState::Idle {
            return Ok(());
        }
        let attempts = self.config.persist_attempts;
        let store = self.adapters.store.clone();

        if let Some(adventure) = &self.adventure {
            // Intro only for a fresh session
            if self.session.turn_counter() == 0 {
                if let Some(intro) = &adventure.intro {
                    notify(self.adapters.sink.as_ref(), GameEvent::NarrativeSpan(intro.clone()));
                    notify(self.adapters.sink.as_ref(), GameEvent::NarrationEnded);
                }
            }

            let added = self
                .session
                .archivist
                .merge_missing(store.as_ref(), &adventure.flags)
                .await?;
            if !added.is_empty() {
                debug!(?added, "adventure flags seeded");
            }

            if self.session.scene.location.is_none() {
                self.session.scene.location = adventure.start_location.clone();
            }
        }

        with_retries(attempts, "stats", || store.save_stats(&self.session.character)).await?;
        with_retries(attempts, "scene", || store.save_scene(&self.session.scene)).await?;

        info!(
            session = %self.session.name(),
            turn = self.session.turn_counter(),
            ruleset = %self.ruleset.name,
            "session started"
        );
        self.emit(GameEvent::System(self.status_text()));
        self.state = TurnState::AwaitingInput;
        Ok(())
    }

    /// Flush state and stop. Further turns are refused.
    pub async fn stop(&mut self) -> Result<(), SessionError> {
        if self.state == TurnState::Stopped {
            return Ok(());
        }
        self.state = TurnState::Stopped;

        let attempts = self.config.persist_attempts;
        let store = self.adapters.store.clone();
        with_retries(attempts, "stats", || store.save_stats(&self.session.character)).await?;
        with_retries(attempts, "world state", || {
            store.save_world_state(self.session.archivist.world_state())
        })
        .await?;
        with_retries(attempts, "scene", || store.save_scene(&self.session.scene)).await?;

        info!(turns = self.session.turn_counter(), "session stopped");
        Ok(())
    }

    /// Read input until it closes or the player quits.
    pub async fn run(&mut self, input: &mut dyn InputSource) -> Result<(), SessionError> {
        self.start().await?;

        loop {
            self.state = TurnState::AwaitingInput;
            let Some(line) = input.next_line().await else {
                info!("input closed");
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(command) = Command::parse(line) {
                if command == Command::Quit {
                    break;
                }
                self.handle_command(command).await?;
                continue;
            }

            match self.play_turn(line).await {
                Ok(_) => {}
                // Already reported, the session goes on
                Err(SessionError::Backend(_)) => {}
                Err(e) => {
                    error!(error = %e, "turn failed, stopping session");
                    self.state = TurnState::Stopped;
                    return Err(e);
                }
            }
        }

        self.stop().await
    }

    // ========================================================================
    // Turns
    // ========================================================================

    /// Play one turn for `input`.
    pub async fn play_turn(&mut self, input: &str) -> Result<TurnReport, SessionError> {
        match self.state {
            TurnState::Stopped => return Err(SessionError::Stopped),
            TurnState::Idle => self.start().await?,
            _ => {}
        }
        let turn_index = self.session.turn_counter() + 1;
        let max_len = self.config.max_tag_len;
        debug!(turn_index, input, "turn started");

        // Stream the narrator's reaction
        self.state = TurnState::Streaming;
        let context = self.prompt_context();
        let main_text = match self.narrate(Narration::Turn { input, context }).await {
            Ok(text) => text,
            Err(e) => return Err(self.fail_turn(e, &[])),
        };

        self.state = TurnState::ApplyingEffects;
        let tags = extract_tags(&main_text, max_len);
        let mut all_tags = tags.clone();
        let mut narrator_output = main_text;
        let mut rolls = Vec::new();
        let mut effects: Vec<ControlTag> = Vec::new();

        // Probes first, each with its own roll narration
        for tag in tags {
            let (skill, target) = match tag {
                ControlTag::Probe { skill, target } => (skill, target),
                other => {
                    effects.push(other);
                    continue;
                }
            };

            self.state = TurnState::RollRoundTrip;
            self.emit(GameEvent::ProbeRequested {
                skill: skill.clone(),
                target,
            });
            let result = self.dice.skill_check(target, 0);
            info!(%skill, roll = result.roll, target = result.target, level = %result.level, "probe resolved");
            self.emit(GameEvent::RollResolved {
                skill: skill.clone(),
                result: result.clone(),
            });
            rolls.push(ResolvedProbe {
                skill: skill.clone(),
                result: result.clone(),
            });

            let narration = match self
                .narrate(Narration::Roll {
                    skill: &skill,
                    result: &result,
                })
                .await
            {
                Ok(text) => text,
                Err(e) => return Err(self.fail_turn(e, &rolls)),
            };
            self.state = TurnState::ApplyingEffects;

            for nested in extract_tags(&narration, max_len) {
                if let ControlTag::Probe { skill: nested_skill, .. } = &nested {
                    warn!(skill = %nested_skill, "ignoring probe inside roll narration");
                } else {
                    effects.push(nested.clone());
                }
                all_tags.push(nested);
            }
            narrator_output.push_str("\n\n");
            narrator_output.push_str(&narration);
        }

        // Remaining effects in application order, tag order within a class
        effects.sort_by_key(ControlTag::apply_rank);
        let staged = self.stage_effects(&effects);

        // Persist, committing each part once it is durable
        self.state = TurnState::Persisting;
        let (stat_changes, conditions) = self.commit(staged).await?;

        let turn = Turn {
            index: turn_index,
            player_input: input.to_string(),
            narrator_output: narrator_output.clone(),
            tags: all_tags.clone(),
            stat_snapshot: self.session.character.stats().clone(),
            timestamp: Utc::now(),
        };
        let store = self.adapters.store.clone();
        with_retries(self.config.persist_attempts, "turn", || store.save_turn(&turn)).await?;
        self.session.record_turn(turn);

        let compacted = self.compact(turn_index).await?;
        self.state = TurnState::AwaitingInput;

        info!(turn_index, tags = all_tags.len(), rolls = rolls.len(), "turn complete");
        Ok(TurnReport {
            turn_index,
            narrative: strip_tags(&narrator_output, max_len),
            tags: all_tags,
            rolls,
            stat_changes,
            conditions,
            compacted,
        })
    }

    /// Stream one narration, forwarding narrative and tags as they appear.
    /// Returns the complete raw text.
    async fn narrate(&self, narration: Narration<'_>) -> Result<String, BackendError> {
        let narrator = self.adapters.narrator.clone();
        let mut stream = match narration {
            Narration::Turn { input, context } => narrator.stream_turn(input, &context).await?,
            Narration::Roll { skill, result } => narrator.narrate_roll(skill, result).await?,
        };

        let mut scanner = Scanner::with_max_len(self.config.max_tag_len);
        let mut full = String::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            full.push_str(&fragment);
            for token in scanner.push(&fragment) {
                self.forward(token);
            }
        }
        for token in scanner.finish() {
            self.forward(token);
        }
        self.emit(GameEvent::NarrationEnded);
        Ok(full)
    }

    fn forward(&self, token: Token) {
        match token {
            Token::Narrative(text) => {
                if !text.is_empty() {
                    self.emit(GameEvent::NarrativeSpan(text));
                }
            }
            Token::Tag(tag) => match tag.decode() {
                Ok(decoded) => {
                    // Voice switches apply to the narration that follows
                    if let ControlTag::VoiceSwitch { role } = &decoded {
                        self.emit(GameEvent::VoiceChanged(role.clone()));
                    }
                    self.emit(GameEvent::TagRecognized(decoded));
                }
                Err(e) => debug!(raw = %tag.raw, error = %e, "malformed tag while streaming"),
            },
        }
    }

    /// Discard the turn. Rolls already made are logged and named in the
    /// failure message.
    fn fail_turn(&mut self, e: BackendError, discarded: &[ResolvedProbe]) -> SessionError {
        warn!(error = %e, state = %self.state, "narrator failed, turn discarded");
        let mut message = TURN_FAILED_MESSAGE.to_string();
        if !discarded.is_empty() {
            let rolls: Vec<String> = discarded
                .iter()
                .map(|p| {
                    warn!(skill = %p.skill, roll = p.result.roll, target = p.result.target, "roll discarded");
                    format!("{} {}/{}", p.skill, p.result.roll, p.result.target)
                })
                .collect();
            message.push_str(&format!(" (Verworfen: {})", rolls.join(", ")));
        }
        self.emit(GameEvent::TurnFailed(message));
        self.state = TurnState::AwaitingInput;
        SessionError::Backend(e)
    }

    /// Apply effects to copies of the character and scene.
    fn stage_effects(&mut self, effects: &[ControlTag]) -> Staged {
        let mut staged = Staged {
            character: self.session.character.clone(),
            scene: self.session.scene.clone(),
            facts: serde_json::Map::new(),
            stat_changes: Vec::new(),
            character_events: Vec::new(),
            scene_events: Vec::new(),
        };

        for effect in effects {
            match effect {
                ControlTag::StatDelta { stat, expr, mode } => {
                    let name = match stat {
                        StatTarget::Health => self.ruleset.vitals.health.clone(),
                        StatTarget::Sanity => self.ruleset.vitals.sanity.clone(),
                    };
                    let amount = self.dice.evaluate_expression(expr).saturating_mul(mode.sign());
                    match staged.character.apply_delta(&name, amount) {
                        Ok(change) => {
                            staged.character_events.push(GameEvent::StatChanged(change.clone()));
                            staged.stat_changes.push(change);
                        }
                        Err(e) => {
                            warn!(stat = %name, error = %e, "stat tag ignored");
                            staged.character_events.push(GameEvent::UnknownStat(name));
                        }
                    }
                }
                ControlTag::SkillUsed { name } => match staged.character.mark_skill_used(name) {
                    Ok(canonical) => staged.character_events.push(GameEvent::SkillMarked(canonical)),
                    Err(_) => {
                        warn!(skill = %name, "unknown skill marked");
                        staged.character_events.push(GameEvent::UnknownSkill(name.clone()));
                    }
                },
                ControlTag::XpGain { amount } => {
                    let total = staged.character.add_xp(*amount);
                    staged.character_events.push(GameEvent::XpGained {
                        amount: *amount,
                        total,
                    });
                }
                ControlTag::Fact { facts } => {
                    // Later tags win within a turn
                    staged.facts.extend(facts.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                ControlTag::InventoryEvent { name, state } => {
                    if staged.scene.inventory.apply(name, *state) {
                        staged.scene_events.push(GameEvent::InventoryChanged {
                            name: name.clone(),
                            state: *state,
                        });
                    }
                }
                ControlTag::TimeAdvance { hours } => {
                    staged.scene.clock.advance_hours(*hours);
                    staged.scene_events.push(GameEvent::TimeChanged(staged.scene.clock));
                }
                ControlTag::TimeSet { hour, minute } => {
                    staged.scene.clock.set_time(*hour, *minute);
                    staged.scene_events.push(GameEvent::TimeChanged(staged.scene.clock));
                }
                ControlTag::WeatherSet { text } => {
                    staged.scene.weather = Some(text.clone());
                    staged.scene_events.push(GameEvent::WeatherChanged(text.clone()));
                }
                // Announced while streaming
                ControlTag::VoiceSwitch { role } => staged.scene.voice = role.clone(),
                ControlTag::RollEcho { text } => debug!(%text, "roll echo"),
                ControlTag::Probe { .. } => {}
            }
        }
        staged
    }

    /// Write the staged state, committing each part after its write.
    async fn commit(&mut self, staged: Staged) -> Result<(Vec<StatChange>, Vec<Condition>), SessionError> {
        let attempts = self.config.persist_attempts;
        let store = self.adapters.store.clone();
        let mut conditions = Vec::new();

        if staged.character != self.session.character {
            with_retries(attempts, "stats", || store.save_stats(&staged.character)).await?;
            self.session.character = staged.character;
            for event in staged.character_events {
                self.emit(event);
            }
            conditions = self.check_conditions();
        } else {
            // Unknown stats or skills only
            for event in staged.character_events {
                self.emit(event);
            }
        }

        if !staged.facts.is_empty() {
            self.session
                .archivist
                .merge_world_state(store.as_ref(), &staged.facts)
                .await?;
            self.emit(GameEvent::FactsUpdated(staged.facts));
        }

        if staged.scene != self.session.scene {
            with_retries(attempts, "scene", || store.save_scene(&staged.scene)).await?;
            self.session.scene = staged.scene;
            for event in staged.scene_events {
                self.emit(event);
            }
        }

        Ok((staged.stat_changes, conditions))
    }

    /// Report conditions that became true, re-arm those that cleared.
    fn check_conditions(&mut self) -> Vec<Condition> {
        let mut conditions = Vec::new();

        let incapacitated = self.session.character.is_incapacitated();
        if incapacitated && !self.incapacitated {
            warn!(character = %self.session.character.name, "character incapacitated");
            self.emit(GameEvent::Incapacitated);
            conditions.push(Condition::Incapacitated);
        }
        self.incapacitated = incapacitated;

        let broken = self.session.character.is_broken();
        if broken && !self.broken {
            warn!(character = %self.session.character.name, "character broken");
            self.emit(GameEvent::Broken);
            conditions.push(Condition::Broken);
        }
        self.broken = broken;

        conditions
    }

    /// Summarize the last interval if this turn closes one.
    ///
    /// A summarizer failure is logged and skipped; the next boundary tries
    /// again. A failed chronicle write is a session error.
    async fn compact(&mut self, turn_index: u64) -> Result<bool, SessionError> {
        if !self.session.archivist.should_summarize(turn_index) {
            return Ok(false);
        }
        self.state = TurnState::Compacting;

        let interval = self.session.archivist.interval() as usize;
        let exchanges = self.session.recent_exchanges(interval);
        let summarizer = self.adapters.summarizer.clone();
        let summary = match summarizer.summarize(&exchanges).await {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => {
                warn!(turn_index, "summarizer returned nothing, chronicle skipped");
                return Ok(false);
            }
            Err(e) => {
                warn!(turn_index, error = %e, "summary failed, chronicle skipped");
                return Ok(false);
            }
        };

        let store = self.adapters.store.clone();
        let preview = self
            .session
            .archivist
            .update_chronicle(store.as_ref(), turn_index, summary.trim())
            .await?
            .preview();
        self.emit(GameEvent::ChronicleUpdated { preview });
        Ok(true)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Answer a session command. The reply is also emitted as a system event.
    pub async fn handle_command(&mut self, command: Command) -> Result<String, SessionError> {
        let reply = match command {
            Command::Status => self.status_text(),
            Command::Facts => self.facts_text(),
            Command::Flags => self.flags_text(),
            Command::Location => self.location_text(),
            Command::Locations => self.locations_text(),
            Command::Teleport(id) => self.teleport(&id).await?,
            Command::Roll(Some(target)) => {
                let result = self.dice.skill_check(target, 0);
                self.emit(GameEvent::RollResolved {
                    skill: "Freier Wurf".to_string(),
                    result: result.clone(),
                });
                result.describe()
            }
            Command::Roll(None) => "Verwendung: /roll <Zielwert>".to_string(),
            Command::Quit => {
                self.stop().await?;
                "Session beendet.".to_string()
            }
        };
        self.emit(GameEvent::System(reply.clone()));
        Ok(reply)
    }

    fn status_text(&self) -> String {
        let character = &self.session.character;
        let mut text = format!("{}: {}", character.name, character.status_line());
        if character.xp() > 0 {
            text.push_str(&format!(" | XP: {}", character.xp()));
        }
        text.push_str(&format!(" | {}", self.session.scene.clock));
        text
    }

    fn facts_text(&self) -> String {
        let state = self.session.archivist.world_state();
        if state.is_empty() {
            return "Noch keine Fakten bekannt.".to_string();
        }
        let lines: Vec<String> = state
            .iter()
            .map(|(key, value)| format!("  {key}: {}", render_value(value)))
            .collect();
        format!("Bekannte Fakten:\n{}", lines.join("\n"))
    }

    fn flags_text(&self) -> String {
        let Some(adventure) = &self.adventure else {
            return "Kein Abenteuer geladen.".to_string();
        };
        if adventure.flags.is_empty() {
            return "Keine Flags definiert.".to_string();
        }
        let state = self.session.archivist.world_state();
        let mut keys: Vec<&String> = adventure.flags.keys().collect();
        keys.sort();
        let lines: Vec<String> = keys
            .into_iter()
            .map(|key| {
                let value = state.get(key).or_else(|| adventure.flags.get(key));
                let value = value.map_or_else(|| "-".to_string(), render_value);
                format!("  {key}: {value}")
            })
            .collect();
        format!("Flags:\n{}", lines.join("\n"))
    }

    fn location_text(&self) -> String {
        let scene = &self.session.scene;
        let name = scene
            .location
            .as_deref()
            .map(|id| {
                self.adventure
                    .as_ref()
                    .and_then(|a| a.location(id))
                    .map_or(id.to_string(), |l| l.name.clone())
            })
            .unwrap_or_else(|| "unbekannt".to_string());
        let mut text = format!("Ort: {name} | {}", scene.clock);
        if let Some(weather) = &scene.weather {
            text.push_str(&format!(" | Wetter: {weather}"));
        }
        text
    }

    fn locations_text(&self) -> String {
        let Some(adventure) = &self.adventure else {
            return "Kein Abenteuer geladen.".to_string();
        };
        let current = self.session.scene.location.as_deref();
        let lines: Vec<String> = adventure
            .all_locations()
            .into_iter()
            .map(|l| {
                let marker = if Some(l.id.as_str()) == current { " <--" } else { "" };
                format!("  {}: {}{marker}", l.id, l.name)
            })
            .collect();
        format!("Orte:\n{}", lines.join("\n"))
    }

    async fn teleport(&mut self, id: &str) -> Result<String, SessionError> {
        let Some(adventure) = &self.adventure else {
            return Ok("Kein Abenteuer geladen.".to_string());
        };
        if id.is_empty() {
            return Ok("Verwendung: /teleport <Ort-ID>".to_string());
        }

        let mut scene: Scene = self.session.scene.clone();
        let location = match scene.teleport(adventure, id) {
            Ok(location) => location.clone(),
            Err(e) => return Ok(e.to_string()),
        };

        let store = self.adapters.store.clone();
        with_retries(self.config.persist_attempts, "scene", || store.save_scene(&scene)).await?;
        self.session.scene = scene;
        self.emit(GameEvent::LocationChanged {
            id: location.id.clone(),
            name: location.name.clone(),
        });
        Ok(format!("Du befindest dich jetzt in: {}", location.name))
    }
}

/// Effects of one turn, applied to copies.
struct Staged {
    character: CharacterState,
    scene: Scene,
    facts: serde_json::Map<String, serde_json::Value>,
    stat_changes: Vec<StatChange>,
    character_events: Vec<GameEvent>,
    scene_events: Vec<GameEvent>,
}
