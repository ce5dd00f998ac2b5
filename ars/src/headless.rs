//! Line-oriented console front end.
//!
//! Player input is read from stdin one line at a time. Narration is printed
//! as it streams in; everything else goes on its own line with a prefix:
//! `[WUERFEL]`, `[HP]`/`[SAN]`/..., `[FAKT]`, `[CHRONIK]`, `[SZENE]`,
//! `[SYSTEM]`, `[FEHLER]`.

use ars_core::events::{EventSink, GameEvent, SinkError};
use ars_core::memory::render_value;
use ars_core::orchestrator::InputSource;
use ars_core::protocol::InventoryState;
use async_trait::async_trait;
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// Player input from stdin.
pub struct StdinInput {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinInput {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InputSource for StdinInput {
    async fn next_line(&mut self) -> Option<String> {
        print!("> ");
        io::stdout().flush().ok();
        match self.lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                None
            }
        }
    }
}

/// Prints events to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    fn line(&self, event: &GameEvent) -> Option<String> {
        let line = match event {
            GameEvent::NarrativeSpan(_) | GameEvent::NarrationEnded | GameEvent::TagRecognized(_) => {
                return None
            }
            GameEvent::ProbeRequested { skill, target } => {
                format!("[WUERFEL] Probe auf {skill} (Ziel {target})")
            }
            GameEvent::RollResolved { skill, result } => format!("[WUERFEL] {skill}: {result}"),
            GameEvent::StatChanged(change) => format!(
                "[{}] {} -> {} / {}",
                change.stat, change.old, change.new, change.max
            ),
            GameEvent::UnknownStat(stat) => format!("[SYSTEM] Unbekannter Wert: {stat}"),
            GameEvent::UnknownSkill(skill) => format!("[SYSTEM] Unbekannte Fertigkeit: {skill}"),
            GameEvent::SkillMarked(skill) => format!("[SYSTEM] Fertigkeit markiert: {skill}"),
            GameEvent::XpGained { amount, total } => format!("[SYSTEM] +{amount} XP (gesamt {total})"),
            GameEvent::FactsUpdated(facts) => facts
                .iter()
                .map(|(key, value)| format!("[FAKT] {key} = {}", render_value(value)))
                .collect::<Vec<_>>()
                .join("\n"),
            GameEvent::ChronicleUpdated { preview } => format!("[CHRONIK] {preview}"),
            GameEvent::InventoryChanged { name, state } => {
                let verb = match state {
                    InventoryState::Found => "gefunden",
                    InventoryState::Lost => "verloren",
                    InventoryState::Done => "erledigt",
                };
                format!("[SZENE] {name}: {verb}")
            }
            GameEvent::TimeChanged(clock) => format!("[SZENE] {clock}"),
            GameEvent::WeatherChanged(weather) => format!("[SZENE] Wetter: {weather}"),
            GameEvent::VoiceChanged(voice) => format!("[SZENE] Stimme: {voice}"),
            GameEvent::LocationChanged { name, .. } => format!("[SZENE] Ort: {name}"),
            GameEvent::Incapacitated => "[SYSTEM] Du bist kampfunfaehig.".to_string(),
            GameEvent::Broken => "[SYSTEM] Dein Verstand zerbricht.".to_string(),
            GameEvent::TurnFailed(message) => format!("[FEHLER] {message}"),
            GameEvent::System(text) => format!("[SYSTEM] {text}"),
        };
        Some(line)
    }
}

impl EventSink for ConsoleSink {
    fn emit(&self, event: &GameEvent) -> Result<(), SinkError> {
        let mut stdout = io::stdout().lock();
        let written = match event {
            GameEvent::NarrativeSpan(text) => write!(stdout, "{text}"),
            GameEvent::NarrationEnded => writeln!(stdout),
            // Voice changes mid-sentence go on their own line
            GameEvent::VoiceChanged(_) => match self.line(event) {
                Some(line) => writeln!(stdout, "\n{line}"),
                None => Ok(()),
            },
            _ => match self.line(event) {
                Some(line) => writeln!(stdout, "{line}"),
                None => Ok(()),
            },
        };
        written
            .and_then(|()| stdout.flush())
            .map_err(|e| SinkError::Other(e.to_string()))
    }
}

/// Printed once at start.
pub fn print_banner(title: &str) {
    println!("=== {title} ===");
    println!();
    println!("Befehle:");
    println!("  /status            - Werte anzeigen");
    println!("  /fakten            - bekannte Fakten");
    println!("  /flags             - Abenteuer-Flags");
    println!("  /ort, /orte        - aktueller Ort, alle Orte");
    println!("  /teleport <id>     - Ort wechseln");
    println!("  /roll <zielwert>   - freier Wurf");
    println!("  beenden            - Session speichern und beenden");
    println!();
}
