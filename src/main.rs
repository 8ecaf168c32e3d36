//! CLI entry point for stepguide.
//!
//! Commands: init, config, build-corpus, match, chat and serve. Provider
//! clients are blocking, so `main` stays synchronous and only `serve`
//! starts a tokio runtime.

use anyhow::{Context, anyhow};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use stepguide::config::EmbeddingProvider;
use stepguide::corpus::{CorpusBuilder, TaskHit};
use stepguide::matching::{OpenAiIntentClassifier, nearest_task};
use stepguide::openai::{ChatClient, OpenAiClient, OpenAiEmbeddingGenerator};
use stepguide::session::SessionStore;
use stepguide::vector::FastEmbedGenerator;
use stepguide::{
    EmbeddingGenerator, IntentClassifier, MatchEngine, MatchResult, SessionId, Settings,
    TaskCorpusIndex, VectorDimension,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Task and step matching for voice-guided instructions
#[derive(Parser)]
#[command(
    name = "stepguide",
    version = env!("CARGO_PKG_VERSION"),
    about = "Match spoken requests to guided instructions and their steps",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up .stepguide directory with default configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Display active settings
    Config,

    /// Embed task folders and write the corpus files
    #[command(
        after_help = "Each sub-directory of <DIR> holding structured_output.json becomes one task.\nOutput goes to corpus.index_path and corpus.meta_path."
    )]
    BuildCorpus {
        /// Directory with one folder per task
        dir: PathBuf,
    },

    /// Find the task closest to a query
    Match {
        /// Query text
        text: String,
    },

    /// Interactive session over stdin
    #[command(after_help = "Commands inside the session:\n  /unlock   drop the current task\n  /history  show recent exchanges\n  /quit     exit")]
    Chat {
        /// Resume or name a session
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Start the HTTP API
    Serve {
        /// Bind address (overrides server.bind)
        #[arg(short, long)]
        bind: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Configuration error loading from {}", path.display())),
        None => Settings::load().context("Configuration error"),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(cli.debug || settings.debug);

    match run(cli.command, settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "stepguide=debug" } else { "stepguide=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(command: Commands, settings: Settings) -> anyhow::Result<()> {
    match command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force).map_err(|e| anyhow!("{e}"))?;
            println!("Edit {} to customize your settings.", path.display());
            Ok(())
        }

        Commands::Config => {
            println!("Current Configuration:");
            println!("{}", "=".repeat(50));
            println!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }

        Commands::BuildCorpus { dir } => build_corpus(&settings, &dir),

        Commands::Match { text } => {
            let embedder = create_embedder(&settings)?;
            match match_query(&settings, embedder.as_ref(), &text)? {
                Some(hit) => println!(
                    "{} ({}) distance {}",
                    hit.task.title, hit.task.id, hit.distance
                ),
                None => println!(
                    "No task within threshold {}",
                    settings.matching.task_threshold
                ),
            }
            Ok(())
        }

        Commands::Chat { session } => {
            let engine = create_engine(&settings)?;
            chat(&engine, session)
        }

        Commands::Serve { bind } => {
            let engine = Arc::new(create_engine(&settings)?);
            let bind = bind.unwrap_or_else(|| settings.server.bind.clone());
            let runtime = tokio::runtime::Runtime::new()?;
            // The engine's blocking HTTP clients must be dropped outside the
            // runtime, so `engine` outlives it here.
            runtime.block_on(stepguide::server::serve(
                Arc::clone(&engine),
                bind,
                settings.session.sweep_interval(),
            ))?;
            drop(runtime);
            Ok(())
        }
    }
}

fn create_embedder(settings: &Settings) -> anyhow::Result<Arc<dyn EmbeddingGenerator>> {
    let config = &settings.embedding;
    let embedder: Arc<dyn EmbeddingGenerator> = match config.provider {
        EmbeddingProvider::OpenAi => {
            let client =
                OpenAiClient::from_env(&config.base_url, config.timeout(), config.retry_policy())?;
            Arc::new(OpenAiEmbeddingGenerator::new(
                client,
                config.model.clone(),
                VectorDimension::new(settings.corpus.dimension)?,
            ))
        }
        EmbeddingProvider::Local => Arc::new(FastEmbedGenerator::new(true)?),
    };

    if embedder.dimension().get() != settings.corpus.dimension {
        warn!(
            "Embedding provider produces {} dimensions but corpus.dimension is {}",
            embedder.dimension(),
            settings.corpus.dimension
        );
    }
    Ok(embedder)
}

fn create_classifier(settings: &Settings) -> anyhow::Result<Arc<dyn IntentClassifier>> {
    let config = &settings.classifier;
    let client = OpenAiClient::from_env(&config.base_url, config.timeout(), config.retry_policy())?;
    Ok(Arc::new(OpenAiIntentClassifier::new(ChatClient::new(
        client,
        config.model.clone(),
    ))))
}

fn load_corpus(settings: &Settings) -> anyhow::Result<TaskCorpusIndex> {
    TaskCorpusIndex::load(
        &settings.resolve_path(&settings.corpus.index_path),
        &settings.resolve_path(&settings.corpus.meta_path),
        VectorDimension::new(settings.corpus.dimension)?,
        settings.matching.task_threshold,
    )
    .map_err(|e| {
        let suggestions = e.recovery_suggestions();
        if suggestions.is_empty() {
            anyhow!(e)
        } else {
            anyhow!("{e}\n  - {}", suggestions.join("\n  - "))
        }
    })
}

/// One-shot corpus search. Only the corpus and the embedder are involved,
/// so no classifier credentials are needed.
fn match_query(
    settings: &Settings,
    embedder: &dyn EmbeddingGenerator,
    text: &str,
) -> anyhow::Result<Option<TaskHit>> {
    let corpus = load_corpus(settings)?;
    Ok(nearest_task(&corpus, embedder, text)?)
}

fn create_engine(settings: &Settings) -> anyhow::Result<MatchEngine> {
    Ok(MatchEngine::new(
        Arc::new(load_corpus(settings)?),
        Arc::new(SessionStore::from_config(&settings.session)),
        create_embedder(settings)?,
        create_classifier(settings)?,
    )
    .with_failure_policy(settings.matching.classifier_failure)
    .with_step_threshold(settings.matching.step_threshold))
}

fn build_corpus(settings: &Settings, dir: &std::path::Path) -> anyhow::Result<()> {
    let embedder = create_embedder(settings)?;
    let dimension = VectorDimension::new(settings.corpus.dimension)?;
    let index_dir = settings.resolve_path(&settings.corpus.index_path);
    let meta_path = settings.resolve_path(&settings.corpus.meta_path);

    let report = CorpusBuilder::new(embedder.as_ref(), dimension)
        .build(dir, &index_dir, &meta_path)
        .with_context(|| format!("Failed to build corpus from {}", dir.display()))?;

    println!("Embedded {} tasks", report.tasks.len());
    for folder in &report.skipped {
        println!("  skipped {} (no task file)", folder.display());
    }
    for (folder, reason) in &report.failed {
        println!("  failed  {}: {reason}", folder.display());
    }
    println!("Vectors:  {}", report.vectors_path.display());
    println!("Metadata: {}", report.meta_path.display());
    Ok(())
}

fn chat(engine: &MatchEngine, session: Option<String>) -> anyhow::Result<()> {
    let id = session.map_or_else(SessionId::generate, SessionId::from);
    let sessions = engine.sessions();
    if !sessions.session_exists(&id) {
        sessions.init(&id);
    }
    println!("Session {id}. Type a request, or /quit to exit.");

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim();
        match text {
            "" => continue,
            "/quit" | "/exit" => break,
            "/unlock" => {
                sessions.unlock(&id)?;
                println!("Task unlocked.");
                continue;
            }
            "/history" => {
                for entry in sessions.get_history(&id) {
                    println!("  you: {}\n  bot: {}", entry.query, entry.reply);
                }
                continue;
            }
            _ => {}
        }

        match engine.process(&id, text) {
            Ok(result) => {
                let reply = result.reply();
                if let MatchResult::Matched { task, step, .. } = &result {
                    println!("[{} / step {}]", task.title, step.step_num);
                }
                println!("{reply}");
                sessions.save_history(&id, text, reply)?;
            }
            Err(e) => {
                eprintln!("Error: {e}");
                for suggestion in e.recovery_suggestions() {
                    eprintln!("  - {suggestion}");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepguide::corpus::{Step, TASK_FILE, Task, TaskId};
    use stepguide::VectorError;
    use tempfile::TempDir;

    /// Two-dimensional embedder: texts mentioning "pump" point up, the
    /// rest point right.
    struct AxisEmbedder;

    impl EmbeddingGenerator for AxisEmbedder {
        fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
            Ok(texts
                .iter()
                .map(|text| {
                    if text.contains("pump") {
                        vec![0.0, 1.0]
                    } else {
                        vec![1.0, 0.0]
                    }
                })
                .collect())
        }

        fn dimension(&self) -> VectorDimension {
            VectorDimension::new(2).unwrap()
        }
    }

    fn write_task(root: &std::path::Path, id: &str, title: &str) {
        let task = Task {
            id: TaskId::new(id),
            title: title.to_string(),
            intro: String::new(),
            steps: vec![Step {
                step_num: 1,
                summary: None,
                text: "do it".to_string(),
                keywords: Vec::new(),
                images: Vec::new(),
            }],
        };
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(TASK_FILE), serde_json::to_string(&task).unwrap()).unwrap();
    }

    #[test]
    fn test_match_query_needs_only_corpus_and_embedder() {
        let workspace = TempDir::new().unwrap();
        let instructions = workspace.path().join("instructions");
        write_task(&instructions, "report", "Export a report");
        write_task(&instructions, "pump", "Prime the pump");

        let mut settings = Settings::default();
        settings.workspace_root = Some(workspace.path().to_path_buf());
        settings.corpus.dimension = 2;
        // Unreachable classifier endpoint: the search must not depend on it
        settings.classifier.base_url = "http://127.0.0.1:9/v1".to_string();

        CorpusBuilder::new(&AxisEmbedder, VectorDimension::new(2).unwrap())
            .build(
                &instructions,
                &settings.resolve_path(&settings.corpus.index_path),
                &settings.resolve_path(&settings.corpus.meta_path),
            )
            .unwrap();

        let hit = match_query(&settings, &AxisEmbedder, "the pump is dry")
            .unwrap()
            .unwrap();
        assert_eq!(hit.task.id.as_str(), "pump");
        assert!(hit.distance.get() < 1e-6);
    }

    #[test]
    fn test_match_query_reports_missing_corpus() {
        let workspace = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.workspace_root = Some(workspace.path().to_path_buf());
        settings.corpus.dimension = 2;

        assert!(match_query(&settings, &AxisEmbedder, "anything").is_err());
    }
}
