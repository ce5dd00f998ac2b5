//! Headless runner for the ars engine.
//!
//! Reads player lines from stdin, narrates from a prepared script and keeps
//! the session on disk so it can be resumed:
//!
//! ```bash
//! cargo run -p ars -- --script demo/script.json --adventure demo/haus.json --character demo/ermittlerin.json --session "Haus am Hang"
//! cargo run -p ars -- --session "Haus am Hang" --resume
//! ```

mod headless;

use anyhow::{bail, Context, Result};
use ars_core::backend::ScriptedNarrator;
use ars_core::character::{CharacterState, CharacterTemplate};
use ars_core::memory::DEFAULT_SUMMARY_INTERVAL;
use ars_core::persist::{list_sessions, session_dir, JsonFileStore, SessionMeta, SessionStore};
use ars_core::{Adapters, Adventure, ExtractiveSummarizer, Ruleset, Session, SessionConfig, TurnOrchestrator};
use clap::Parser;
use headless::{print_banner, ConsoleSink, StdinInput};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Narrated when the script runs out.
const SCRIPT_EXHAUSTED: &str = "Der Erzaehler schweigt.";

#[derive(Debug, Parser)]
#[command(name = "ars")]
#[command(about = "Interactive fiction with a scripted narrator")]
struct Args {
    /// Ruleset JSON; the built-in d100 rules when omitted.
    #[arg(long)]
    ruleset: Option<PathBuf>,

    /// Adventure JSON with locations and initial flags.
    #[arg(long)]
    adventure: Option<PathBuf>,

    /// Prepared character JSON.
    #[arg(long)]
    character: Option<PathBuf>,

    /// Narrator script: a JSON array of responses.
    #[arg(long)]
    script: Option<PathBuf>,

    #[arg(long, default_value = "./saves")]
    data_dir: PathBuf,

    #[arg(long, default_value = "Neue Session")]
    session: String,

    /// Continue the stored session of this name.
    #[arg(long)]
    resume: bool,

    /// List stored sessions and exit.
    #[arg(long)]
    list: bool,

    #[arg(long, default_value_t = DEFAULT_SUMMARY_INTERVAL)]
    summary_interval: u32,

    #[arg(long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.debug);

    if args.list {
        if !args.data_dir.exists() {
            println!("Keine gespeicherten Sessions.");
            return Ok(());
        }
        for meta in list_sessions(&args.data_dir).await? {
            println!("{}  ({})", meta.name, meta.created_at.format("%Y-%m-%d %H:%M"));
        }
        return Ok(());
    }

    let ruleset = match &args.ruleset {
        Some(path) => Ruleset::load(path)
            .await
            .with_context(|| format!("loading ruleset {}", path.display()))?,
        None => Ruleset::default(),
    };
    let adventure = match &args.adventure {
        Some(path) => Some(
            Adventure::load(path)
                .await
                .with_context(|| format!("loading adventure {}", path.display()))?,
        ),
        None => None,
    };
    let character = match &args.character {
        Some(path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading character {}", path.display()))?;
            let template: CharacterTemplate = serde_json::from_str(&json)?;
            CharacterState::from_template(&ruleset, &template)
        }
        None => CharacterState::from_ruleset(&ruleset),
    };
    let narrator = match &args.script {
        Some(path) => ScriptedNarrator::load(path).await?,
        None => ScriptedNarrator::from_texts(Vec::<String>::new()),
    }
    .with_fallback(SCRIPT_EXHAUSTED);

    let config = SessionConfig::new(&args.session).with_summary_interval(args.summary_interval);

    // Open or create the session directory
    let store = JsonFileStore::new(session_dir(&args.data_dir, &args.session));
    let saved = match (store.load().await?, args.resume) {
        (Some(saved), true) => {
            info!(turns = saved.turns.len(), "resuming session");
            saved
        }
        (None, true) => bail!("no stored session named '{}'", args.session),
        (Some(_), false) => bail!(
            "session '{}' already exists, use --resume to continue it",
            args.session
        ),
        (None, false) => {
            store.init(&SessionMeta::new(&args.session)).await?;
            store
                .load()
                .await?
                .context("session directory vanished after creation")?
        }
    };
    let session = Session::restore(&config, saved, character);

    let title = adventure
        .as_ref()
        .map_or_else(|| args.session.clone(), |a| a.title.clone());
    let adapters = Adapters {
        narrator: Arc::new(narrator),
        summarizer: Arc::new(ExtractiveSummarizer),
        store: Arc::new(store),
        sink: Arc::new(ConsoleSink),
    };
    let mut orchestrator = TurnOrchestrator::new(config, ruleset, session, adapters);
    if let Some(adventure) = adventure {
        orchestrator = orchestrator.with_adventure(adventure);
    }

    print_banner(&title);
    orchestrator.run(&mut StdinInput::new()).await?;
    println!("Auf Wiedersehen!");
    Ok(())
}
