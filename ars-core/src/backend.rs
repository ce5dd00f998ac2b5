//! Narrator and summarizer adapters.
//!
//! The engine only consumes fragment streams; transport, authentication and
//! retry policy belong to the adapter. [`ScriptedNarrator`] replays prepared
//! responses and backs both the headless runner and the tests.

use crate::dice::RollResult;
use crate::memory::Exchange;
use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::pin::Pin;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by narrator and summarizer adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Stream interrupted: {0}")]
    Stream(String),

    #[error("No scripted responses left")]
    Exhausted,

    #[error("Summary failed: {0}")]
    Summary(String),

    #[error("Invalid script: {0}")]
    Script(String),
}

/// Ordered text fragments of one narrator response.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send>>;

#[async_trait]
pub trait NarratorBackend: Send + Sync {
    /// Narrate the reaction to a player input. `context` is the archivist's
    /// prompt context plus the scene block.
    async fn stream_turn(&self, input: &str, context: &str) -> Result<FragmentStream, BackendError>;

    /// Narrate the outcome of a resolved probe.
    async fn narrate_roll(&self, skill: &str, result: &RollResult) -> Result<FragmentStream, BackendError>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, turns: &[Exchange]) -> Result<String, BackendError>;
}

/// Wrap already-known fragments as a stream.
pub fn fragments_stream(fragments: Vec<String>) -> FragmentStream {
    Box::pin(stream::iter(fragments.into_iter().map(Ok)))
}

// ============================================================================
// Scripted narrator
// ============================================================================

/// One prepared narrator response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptedResponse {
    /// Delivered exactly as these fragments.
    Fragments(Vec<String>),
    /// Split into fixed-size fragments.
    Text(String),
    /// Some fragments, then the stream breaks.
    Broken { fragments: Vec<String>, error: String },
    /// The backend refuses the request.
    Error { error: String },
}

impl ScriptedResponse {
    fn into_stream(self, fragment_size: usize) -> Result<FragmentStream, BackendError> {
        match self {
            ScriptedResponse::Fragments(fragments) => Ok(fragments_stream(fragments)),
            ScriptedResponse::Text(text) => Ok(fragments_stream(split_fragments(&text, fragment_size))),
            ScriptedResponse::Error { error } => Err(BackendError::Unavailable(error)),
            ScriptedResponse::Broken { fragments, error } => {
                let items = fragments
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(BackendError::Stream(error))));
                Ok(Box::pin(stream::iter(items)))
            }
        }
    }
}

/// Split text into fragments of at most `size` characters.
pub fn split_fragments(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

/// Replays prepared responses in order, one per turn or roll narration.
#[derive(Debug)]
pub struct ScriptedNarrator {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    fragment_size: usize,
    fallback: Option<String>,
    received: Mutex<Vec<String>>,
    contexts: Mutex<Vec<String>>,
}

impl ScriptedNarrator {
    pub fn new(responses: impl IntoIterator<Item = ScriptedResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            fragment_size: 16,
            fallback: None,
            received: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// Plain texts, each split into fixed-size fragments.
    pub fn from_texts<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(|t| ScriptedResponse::Text(t.into())))
    }

    /// A JSON array of responses.
    pub fn from_json_str(json: &str) -> Result<Self, BackendError> {
        let responses: Vec<ScriptedResponse> =
            serde_json::from_str(json).map_err(|e| BackendError::Script(e.to_string()))?;
        Ok(Self::new(responses))
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BackendError::Script(e.to_string()))?;
        Self::from_json_str(&json)
    }

    pub fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size.max(1);
        self
    }

    /// Text narrated once the script runs out, instead of failing.
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    pub fn push(&self, response: ScriptedResponse) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response);
        }
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Every input handed to the narrator, roll results as their wire text.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Context strings passed with each turn.
    pub fn contexts(&self) -> Vec<String> {
        self.contexts.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn next_stream(&self, input: String) -> Result<FragmentStream, BackendError> {
        if let Ok(mut received) = self.received.lock() {
            received.push(input);
        }
        let next = self
            .responses
            .lock()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?
            .pop_front();
        match (next, &self.fallback) {
            (Some(response), _) => response.into_stream(self.fragment_size),
            (None, Some(fallback)) => {
                Ok(fragments_stream(split_fragments(fallback, self.fragment_size)))
            }
            (None, None) => Err(BackendError::Exhausted),
        }
    }
}

#[async_trait]
impl NarratorBackend for ScriptedNarrator {
    async fn stream_turn(&self, input: &str, context: &str) -> Result<FragmentStream, BackendError> {
        if let Ok(mut contexts) = self.contexts.lock() {
            contexts.push(context.to_string());
        }
        debug!(input, "scripted turn");
        self.next_stream(input.to_string())
    }

    async fn narrate_roll(&self, skill: &str, result: &RollResult) -> Result<FragmentStream, BackendError> {
        self.next_stream(result.wire_text(skill))
    }
}

// ============================================================================
// Offline summarizer
// ============================================================================

/// Builds a summary from the turns themselves: one line per exchange with the
/// player input and the first sentence of the narration.
#[derive(Debug, Clone, Default)]
pub struct ExtractiveSummarizer;

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, turns: &[Exchange]) -> Result<String, BackendError> {
        if turns.is_empty() {
            return Err(BackendError::Summary("no turns to summarize".to_string()));
        }
        let lines: Vec<String> = turns
            .iter()
            .map(|t| {
                let narration = crate::protocol::strip_tags(&t.output, crate::protocol::DEFAULT_MAX_TAG_LEN);
                let first = narration
                    .split_inclusive(&['.', '!', '?'][..])
                    .next()
                    .unwrap_or("")
                    .trim()
                    .to_string();
                format!("- {} -> {}", t.input.trim(), first)
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::SuccessLevel;
    use futures::StreamExt;

    async fn collect(stream: FragmentStream) -> Vec<Result<String, BackendError>> {
        stream.collect().await
    }

    #[test]
    fn test_split_fragments() {
        assert_eq!(split_fragments("abcdefg", 3), vec!["abc", "def", "g"]);
        assert_eq!(split_fragments("äöü", 2), vec!["äö", "ü"]);
        assert!(split_fragments("", 4).is_empty());
    }

    #[test]
    fn test_script_json_shapes() {
        let narrator = ScriptedNarrator::from_json_str(
            r#"[
                "Ein ganzer Text.",
                ["Teil eins, ", "Teil zwei."],
                {"error": "Zeitueberschreitung"},
                {"fragments": ["Es beginnt"], "error": "Verbindung weg"}
            ]"#,
        )
        .unwrap();
        assert_eq!(narrator.remaining(), 4);
    }

    #[tokio::test]
    async fn test_responses_in_order() {
        let narrator = ScriptedNarrator::new([
            ScriptedResponse::Fragments(vec!["A".into(), "B".into()]),
            ScriptedResponse::Text("Hallo Welt".into()),
        ])
        .with_fragment_size(4);

        let first = collect(narrator.stream_turn("eins", "ctx").await.unwrap()).await;
        assert_eq!(first, vec![Ok("A".to_string()), Ok("B".to_string())]);

        let second = collect(narrator.stream_turn("zwei", "").await.unwrap()).await;
        let text: String = second.into_iter().map(Result::unwrap).collect();
        assert_eq!(text, "Hallo Welt");

        assert!(matches!(
            narrator.stream_turn("drei", "").await,
            Err(BackendError::Exhausted)
        ));
        assert_eq!(narrator.received(), vec!["eins", "zwei", "drei"]);
        assert_eq!(narrator.contexts()[0], "ctx");
    }

    #[tokio::test]
    async fn test_fallback() {
        let narrator = ScriptedNarrator::new([]).with_fallback("Stille.");
        let items = collect(narrator.stream_turn("?", "").await.unwrap()).await;
        assert_eq!(items, vec![Ok("Stille.".to_string())]);
    }

    #[tokio::test]
    async fn test_broken_stream() {
        let narrator = ScriptedNarrator::new([ScriptedResponse::Broken {
            fragments: vec!["Es beginnt".into()],
            error: "weg".into(),
        }]);
        let items = collect(narrator.stream_turn("x", "").await.unwrap()).await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_roll_narration_records_wire_text() {
        let narrator = ScriptedNarrator::from_texts(["Du findest das Buch."]);
        let result = RollResult {
            roll: 12,
            target: 60,
            level: SuccessLevel::Extreme,
            success: true,
            raw_rolls: vec![12],
        };
        narrator.narrate_roll("Bibliotheksnutzung", &result).await.unwrap();
        assert_eq!(
            narrator.received(),
            vec!["[WUERFELERGEBNIS: Bibliotheksnutzung | Wurf: 12 | Ziel: 60 | Extremer Erfolg]"]
        );
    }

    #[tokio::test]
    async fn test_extractive_summarizer() {
        let turns = vec![
            Exchange {
                input: "Ich öffne die Tür".into(),
                output: "Die Tür knarrt. [FAKT: {\"tuer\": \"offen\"}] Staub rieselt.".into(),
            },
            Exchange {
                input: "Ich gehe hinein".into(),
                output: "Dunkelheit!".into(),
            },
        ];
        let summary = ExtractiveSummarizer.summarize(&turns).await.unwrap();
        assert_eq!(
            summary,
            "- Ich öffne die Tür -> Die Tür knarrt.\n- Ich gehe hinein -> Dunkelheit!"
        );
        assert!(ExtractiveSummarizer.summarize(&[]).await.is_err());
    }
}
