//! Interactive-fiction engine for a streaming AI narrator.
//!
//! This crate provides:
//! - A streaming decoder for the narrator's bracketed control tags
//! - Roll-under percentile checks with graded success levels
//! - Character vitals, skills and experience
//! - A chronicle of summarized turns plus a last-write-wins fact store
//! - A turn orchestrator tying it together, with durable session saves
//!
//! # Quick Start
//!
//! ```ignore
//! use ars_core::testing::MemoryStore;
//! use ars_core::{
//!     Adapters, CharacterState, ExtractiveSummarizer, NullSink, Ruleset, ScriptedNarrator,
//!     Session, SessionConfig, TurnOrchestrator,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::new("Haus am Hang");
//!     let ruleset = Ruleset::default();
//!     let session = Session::new(&config, CharacterState::from_ruleset(&ruleset));
//!     let adapters = Adapters {
//!         narrator: Arc::new(ScriptedNarrator::from_texts(["Regen. [PROBE: Horchen | 40]", "Schritte!"])),
//!         summarizer: Arc::new(ExtractiveSummarizer),
//!         store: Arc::new(MemoryStore::new()),
//!         sink: Arc::new(NullSink),
//!     };
//!
//!     let mut orchestrator = TurnOrchestrator::new(config, ruleset, session, adapters);
//!     let report = orchestrator.play_turn("Ich lausche an der Tuer").await?;
//!     println!("{}", report.narrative);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod character;
pub mod dice;
pub mod events;
pub mod memory;
pub mod orchestrator;
pub mod persist;
pub mod protocol;
pub mod ruleset;
pub mod session;
pub mod testing;
pub mod world;

// Primary public API
pub use backend::{BackendError, ExtractiveSummarizer, NarratorBackend, ScriptedNarrator, Summarizer};
pub use character::{CharacterState, StatChange, StatValue};
pub use dice::{DiceConfig, DiceEngine, RollResult, SuccessLevel};
pub use events::{ChannelSink, EventSink, GameEvent, NullSink, RecordingSink};
pub use memory::{Archivist, ChronicleEntry};
pub use orchestrator::{Adapters, Command, InputSource, TurnOrchestrator, TurnReport, TurnState};
pub use persist::{JsonFileStore, SessionStore};
pub use protocol::{ControlTag, Keyword, Scanner, TagFilter, Token};
pub use ruleset::Ruleset;
pub use session::{Session, SessionConfig, SessionError};
pub use world::{Adventure, Scene};
