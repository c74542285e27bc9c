//! Subcommand handlers for the `veritas` binary.

use crate::progress::ProgressPrinter;
use crate::{Commands, ConfigAction, FeedbackAction, GlobalOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use veritas_core::config::{to_toml, workspace_config_path};
use veritas_core::{FeedbackError, OutputMode, VeritasConfig, create_provider};
use veritas_rag::{
    Document, FeedbackEntry, FeedbackLog, FeedbackStats, HashingEmbedder, MAX_SCORE, Pipeline,
    PipelineResult, RetrievalBackend, SqliteVectorStore,
};
use walkdir::{DirEntry, WalkDir};

/// Dispatch one parsed subcommand against `workspace`.
pub(crate) async fn handle_command(
    command: Commands,
    workspace: &Path,
    options: &GlobalOptions,
) -> anyhow::Result<()> {
    match command {
        Commands::Ask {
            question,
            mode,
            max_iterations,
            top_k,
            json,
            rate,
            corrected,
        } => {
            if let Some(score) = rate
                && score > MAX_SCORE
            {
                return Err(FeedbackError::ScoreOutOfRange { score }.into());
            }
            let mut config = load_settings(workspace, options)?;
            if let Some(max_iterations) = max_iterations {
                config.pipeline.max_iterations = max_iterations;
            }
            if let Some(top_k) = top_k {
                config.retrieval.top_k = top_k;
            }
            let mode = mode.unwrap_or(config.pipeline.output_mode);

            let cancel = CancellationToken::new();
            let watcher = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\nCancelling...");
                    watcher.cancel();
                }
            });

            let feedback_path = config.feedback.path.clone();
            let result = run_ask(config, &question, mode, &cancel, options.quiet).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", render_result(&result, options.verbose));
            }
            if let Some(score) = rate {
                let log = record_rating(&feedback_path, &question, &result, corrected, score)?;
                eprintln!("Rating saved to {}", log.display());
            }
            Ok(())
        }
        Commands::Ingest { path } => {
            let config = load_settings(workspace, options)?;
            let inserted = ingest(&config, &path).await?;
            println!(
                "Indexed {} document(s) into {}",
                inserted,
                config.retrieval.db_path.display()
            );
            Ok(())
        }
        Commands::Feedback { action } => handle_feedback(action, workspace, options),
        Commands::Config { action } => handle_config(action, workspace, options),
    }
}

fn handle_feedback(
    action: FeedbackAction,
    workspace: &Path,
    options: &GlobalOptions,
) -> anyhow::Result<()> {
    let config = load_settings(workspace, options)?;
    let log = FeedbackLog::open(&config.feedback.path)?;
    match action {
        FeedbackAction::Add {
            question,
            answer,
            corrected,
            score,
            meta,
        } => {
            let mut entry = FeedbackEntry::new(question, answer, corrected, score)?;
            for pair in &meta {
                let (key, value) = parse_meta(pair)?;
                entry = entry.with_metadata(key, value);
            }
            log.append(&entry)?;
            println!("Feedback saved to {}", log.path().display());
        }
        FeedbackAction::List { limit } => {
            let entries = log.load()?;
            let skip = limit.map_or(0, |n| entries.len().saturating_sub(n));
            if entries.is_empty() {
                println!("No feedback recorded in {}", log.path().display());
            } else {
                print!("{}", render_entries(&entries[skip..]));
            }
        }
        FeedbackAction::Stats => {
            let stats = log.stats()?;
            print!("{}", render_stats(log.path(), &stats));
        }
    }
    Ok(())
}

/// Save a rating of `result` to the feedback log at `path`. Without a
/// correction the answer given is recorded as its own correction.
pub(crate) fn record_rating(
    path: &Path,
    question: &str,
    result: &PipelineResult,
    corrected: Option<String>,
    score: u8,
) -> anyhow::Result<PathBuf> {
    let corrected = corrected.unwrap_or_else(|| result.final_answer.text.clone());
    let entry = FeedbackEntry::for_result(question, result, corrected, score)?;
    let log = FeedbackLog::open(path)?;
    log.append(&entry)?;
    Ok(log.path().to_path_buf())
}

fn render_entries(entries: &[FeedbackEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!(
            "{}  score {:>2}  {}\n",
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            entry.score,
            entry.question
        ));
        out.push_str(&format!("    given:     {}\n", entry.initial_answer));
        if entry.corrected_answer.trim() != entry.initial_answer.trim() {
            out.push_str(&format!("    corrected: {}\n", entry.corrected_answer));
        }
    }
    out
}

fn render_stats(path: &Path, stats: &FeedbackStats) -> String {
    let mut out = format!("Feedback log: {}\n", path.display());
    out.push_str(&format!("  Entries: {}\n", stats.count));
    if let (Some(avg), Some(min), Some(max)) =
        (stats.average_score, stats.min_score, stats.max_score)
    {
        out.push_str(&format!(
            "  Average score: {:.1} (min {}, max {})\n",
            avg, min, max
        ));
    }
    out.push_str(&format!("  Corrected answers: {}\n", stats.corrected));
    if let Some(last) = stats.last_entry {
        out.push_str(&format!(
            "  Last entry: {}\n",
            last.format("%Y-%m-%d %H:%M UTC")
        ));
    }
    out
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    options: &GlobalOptions,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            if let Some(dir) = config_path.parent() {
                std::fs::create_dir_all(dir)?;
            }

            let toml_str = to_toml(&VeritasConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_settings(workspace, options)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Layered configuration plus CLI overrides, with relative paths anchored at
/// the workspace.
pub(crate) fn load_settings(
    workspace: &Path,
    options: &GlobalOptions,
) -> anyhow::Result<VeritasConfig> {
    let mut config = veritas_core::load_config(Some(workspace))
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(model) = &options.model {
        config.llm.model = model.clone();
    }
    config.retrieval.db_path = anchor(workspace, &config.retrieval.db_path);
    config.feedback.path = anchor(workspace, &config.feedback.path);
    Ok(config)
}

fn anchor(workspace: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

fn open_store(config: &VeritasConfig) -> anyhow::Result<Arc<SqliteVectorStore>> {
    let embedder = Arc::new(HashingEmbedder::new(config.retrieval.embedding_dimensions));
    Ok(Arc::new(SqliteVectorStore::open(
        &config.retrieval.db_path,
        embedder,
    )?))
}

/// Build the pipeline from `config` and answer one question.
///
/// Asking for typed output turns on the JSON typed generator even when the
/// config leaves it off.
pub(crate) async fn run_ask(
    mut config: VeritasConfig,
    question: &str,
    mode: OutputMode,
    cancel: &CancellationToken,
    quiet: bool,
) -> anyhow::Result<PipelineResult> {
    if mode == OutputMode::Typed {
        config.pipeline.typed_generation = true;
    }
    let provider = create_provider(&config.llm)?;
    let store = open_store(&config)?;
    let pipeline = Pipeline::new(&config, provider, store)?
        .with_callback(Arc::new(ProgressPrinter::new(quiet)));

    let result = pipeline.answer_with_cancel(question, mode, cancel).await?;
    info!(
        request_id = %result.request_id,
        status = %result.status,
        iterations = result.iterations(),
        "Question answered"
    );
    Ok(result)
}

/// Human-readable result. With `verbose` set, the model output behind the
/// initial answer follows.
fn render_result(result: &PipelineResult, verbose: u8) -> String {
    let mut out = format!("{}\n\n", result.final_answer.text);
    if let Some(confidence) = result.final_answer.confidence {
        out.push_str(&format!("Confidence: {:.2}\n", confidence));
    }
    if !result.final_answer.sources.is_empty() {
        out.push_str(&format!(
            "Sources: {}\n",
            result.final_answer.sources.join(", ")
        ));
    }
    match result.final_score() {
        Some(score) => out.push_str(&format!(
            "Status: {} after {} round(s), score {:.1}\n",
            result.status,
            result.iterations(),
            score
        )),
        None => out.push_str(&format!("Status: {}\n", result.status)),
    }
    if verbose > 0
        && let Some(raw) = result.raw_output()
    {
        out.push_str(&format!("\nRaw {} output:\n{}\n", result.output_mode, raw));
    }
    out
}

/// Index everything at `path` into the configured store.
pub(crate) async fn ingest(config: &VeritasConfig, path: &Path) -> anyhow::Result<usize> {
    let documents = load_documents(path)?;
    if documents.is_empty() {
        warn!(path = %path.display(), "Nothing to ingest");
        return Ok(0);
    }
    let store = open_store(config)?;
    let inserted = store.insert(documents).await?;
    info!(inserted, total = store.count().await?, "Ingest complete");
    Ok(inserted)
}

/// Read documents from a `.jsonl` file (one `{text, source, metadata}` record
/// per line), a text file (one document, source = file stem), or a directory
/// of either, walked recursively in name order. Hidden entries are skipped.
pub(crate) fn load_documents(path: &Path) -> anyhow::Result<Vec<Document>> {
    let mut documents = Vec::new();
    let walker = WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() {
            documents.extend(load_file(entry.path())?);
        }
    }
    Ok(documents)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

fn load_file(path: &Path) -> anyhow::Result<Vec<Document>> {
    let mut documents = Vec::new();
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            warn!(path = %path.display(), "Skipping non-UTF-8 file");
            return Ok(documents);
        }
        Err(e) => return Err(anyhow::anyhow!("{}: {}", path.display(), e)),
    };

    if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let document: Document = serde_json::from_str(line)
                .map_err(|e| anyhow::anyhow!("{}:{}: {}", path.display(), idx + 1, e))?;
            documents.push(document);
        }
    } else {
        let source = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown");
        documents.push(Document::new(content.trim(), source));
    }

    documents.retain(|d| {
        let keep = !d.text.trim().is_empty();
        if !keep {
            warn!(source = %d.source, "Skipping empty document");
        }
        keep
    });
    Ok(documents)
}

/// Parse a `key=value` pair. Values that parse as JSON keep their type.
pub(crate) fn parse_meta(pair: &str) -> anyhow::Result<(String, serde_json::Value)> {
    let (key, value) = pair
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("metadata '{}' is not key=value", pair))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("metadata '{}' has an empty key", pair);
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use veritas_rag::{Answer, Critique, RefinementStatus, RefinementStep, RewrittenQuery};

    fn offline_options() -> GlobalOptions {
        GlobalOptions::default()
    }

    fn feedback_add(question: &str, answer: &str, corrected: &str, score: u8) -> Commands {
        Commands::Feedback {
            action: FeedbackAction::Add {
                question: question.into(),
                answer: answer.into(),
                corrected: corrected.into(),
                score,
                meta: vec!["reviewer=ana".into()],
            },
        }
    }

    fn ask(question: &str, rate: Option<u8>, corrected: Option<&str>) -> Commands {
        Commands::Ask {
            question: question.into(),
            mode: None,
            max_iterations: None,
            top_k: None,
            json: false,
            rate,
            corrected: corrected.map(String::from),
        }
    }

    fn write_mock_config(workspace: &Path) {
        let dir = workspace.join(".veritas");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("config.toml"),
            "[llm]\nprovider = \"mock\"\n\n[retrieval]\nembedding_dimensions = 64\n",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace, &offline_options())
            .await
            .unwrap();

        let config_path = workspace.join(".veritas").join("config.toml");
        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: VeritasConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.pipeline.max_iterations, 3);
        assert_eq!(parsed.retrieval.top_k, 10);
    }

    #[tokio::test]
    async fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        let config_path = workspace.join(".veritas").join("config.toml");

        handle_command(
            Commands::Config {
                action: ConfigAction::Init,
            },
            workspace,
            &offline_options(),
        )
        .await
        .unwrap();
        std::fs::write(&config_path, "# custom\n").unwrap();

        handle_command(
            Commands::Config {
                action: ConfigAction::Init,
            },
            workspace,
            &offline_options(),
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read_to_string(&config_path).unwrap(), "# custom\n");
    }

    #[test]
    fn test_load_settings_anchors_paths_and_applies_model() {
        let dir = TempDir::new().unwrap();
        let options = GlobalOptions {
            model: Some("llama3".into()),
            quiet: true,
            ..Default::default()
        };
        let config = load_settings(dir.path(), &options).unwrap();
        assert_eq!(config.llm.model, "llama3");
        assert!(config.retrieval.db_path.starts_with(dir.path()));
        assert!(config.feedback.path.starts_with(dir.path()));
    }

    #[test]
    fn test_load_documents_jsonl_and_text() {
        let dir = TempDir::new().unwrap();
        let corpus = dir.path().join("corpus");
        std::fs::create_dir_all(&corpus).unwrap();
        std::fs::write(
            corpus.join("a.jsonl"),
            concat!(
                r#"{"text": "DSPy is a framework.", "source": "dspy_docs", "#,
                r#""metadata": {"page": 1}}"#,
                "\n\n",
                r#"{"text": "Milvus stores vectors.", "source": "milvus_docs"}"#,
                "\n",
            ),
        )
        .unwrap();
        std::fs::write(corpus.join("baml.md"), "BAML defines typed functions.\n").unwrap();
        std::fs::write(corpus.join("empty.txt"), "   \n").unwrap();
        std::fs::write(corpus.join(".hidden"), "ignored").unwrap();

        let docs = load_documents(&corpus).unwrap();
        let sources: Vec<&str> = docs.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(sources, vec!["dspy_docs", "milvus_docs", "baml"]);
        assert_eq!(docs[0].metadata["page"], 1);
        assert_eq!(docs[2].text, "BAML defines typed functions.");
    }

    #[test]
    fn test_load_documents_walks_nested_dirs_in_name_order() {
        // tempdir names start with '.', so the root itself must not count as hidden
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("b_guides")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("c_notes.txt"), "Notes.").unwrap();
        std::fs::write(root.join("a_intro.md"), "Intro.").unwrap();
        std::fs::write(root.join("b_guides").join("z_setup.md"), "Setup.").unwrap();
        std::fs::write(root.join(".git").join("HEAD"), "ref: main").unwrap();

        let docs = load_documents(root).unwrap();
        let sources: Vec<&str> = docs.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(sources, vec!["a_intro", "z_setup", "c_notes"]);
    }

    #[test]
    fn test_load_documents_missing_path_fails() {
        let dir = TempDir::new().unwrap();
        assert!(load_documents(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn test_load_documents_reports_bad_jsonl_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"text\": \"ok\", \"source\": \"s\"}\nnot json\n").unwrap();
        let err = load_documents(&path).unwrap_err().to_string();
        assert!(err.contains("bad.jsonl:2"), "{}", err);
    }

    #[test]
    fn test_parse_meta() {
        assert_eq!(
            parse_meta("reviewer=ana").unwrap(),
            ("reviewer".to_string(), serde_json::json!("ana"))
        );
        assert_eq!(
            parse_meta("round=2").unwrap(),
            ("round".to_string(), serde_json::json!(2))
        );
        assert_eq!(
            parse_meta("note=a=b").unwrap(),
            ("note".to_string(), serde_json::json!("a=b"))
        );
        assert!(parse_meta("novalue").is_err());
        assert!(parse_meta("=x").is_err());
    }

    #[tokio::test]
    async fn test_feedback_command_appends_entry() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        let command = feedback_add("What is DSPy?", "A thing.", "A framework.", 4);
        handle_command(command, workspace, &offline_options())
            .await
            .unwrap();

        let config = load_settings(workspace, &offline_options()).unwrap();
        let entries = FeedbackLog::open(&config.feedback.path)
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].corrected_answer, "A framework.");
        assert_eq!(entries[0].metadata["reviewer"], "ana");
    }

    #[tokio::test]
    async fn test_feedback_command_rejects_bad_score() {
        let dir = TempDir::new().unwrap();
        let command = feedback_add("q", "a", "c", 11);
        assert!(
            handle_command(command, dir.path(), &offline_options())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_feedback_list_and_stats() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        for command in [
            Commands::Feedback {
                action: FeedbackAction::Stats,
            },
            feedback_add("What is DSPy?", "A thing.", "A framework.", 4),
            feedback_add("What is Milvus?", "A vector DB.", "A vector DB.", 9),
            Commands::Feedback {
                action: FeedbackAction::List { limit: Some(1) },
            },
            Commands::Feedback {
                action: FeedbackAction::Stats,
            },
        ] {
            handle_command(command, workspace, &offline_options())
                .await
                .unwrap();
        }

        let config = load_settings(workspace, &offline_options()).unwrap();
        let log = FeedbackLog::open(&config.feedback.path).unwrap();
        let entries = log.load().unwrap();

        let listing = render_entries(&entries);
        assert!(listing.contains("score  4  What is DSPy?"), "{}", listing);
        assert!(listing.contains("    corrected: A framework.\n"));
        // an unchanged answer gets no correction line
        assert_eq!(listing.matches("corrected:").count(), 1);

        let summary = render_stats(log.path(), &log.stats().unwrap());
        assert!(summary.contains("  Entries: 2\n"), "{}", summary);
        assert!(summary.contains("  Average score: 6.5 (min 4, max 9)\n"));
        assert!(summary.contains("  Corrected answers: 1\n"));
        assert!(summary.contains("  Last entry: "));
    }

    #[test]
    fn test_render_stats_empty_log() {
        let summary = render_stats(Path::new("feedback.jsonl"), &FeedbackStats::default());
        assert_eq!(
            summary,
            "Feedback log: feedback.jsonl\n  Entries: 0\n  Corrected answers: 0\n"
        );
    }

    #[tokio::test]
    async fn test_ask_rate_records_feedback() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        write_mock_config(workspace);
        let docs = workspace.join("docs.jsonl");
        std::fs::write(
            &docs,
            "{\"text\": \"DSPy is a framework.\", \"source\": \"dspy_docs\"}\n",
        )
        .unwrap();
        let options = GlobalOptions {
            quiet: true,
            ..Default::default()
        };
        let config = load_settings(workspace, &options).unwrap();
        ingest(&config, &docs).await.unwrap();

        handle_command(ask("What is DSPy?", Some(7), None), workspace, &options)
            .await
            .unwrap();
        handle_command(
            ask("What is DSPy?", Some(2), Some("A prompt framework.")),
            workspace,
            &options,
        )
        .await
        .unwrap();

        let entries = FeedbackLog::open(&config.feedback.path)
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].question, "What is DSPy?");
        assert_eq!(entries[0].score, 7);
        assert_eq!(entries[0].corrected_answer, entries[0].initial_answer);
        assert_eq!(entries[0].metadata["iterations"], 3);
        assert_eq!(entries[0].metadata["sources"], serde_json::json!(["dspy_docs"]));
        assert_eq!(entries[1].corrected_answer, "A prompt framework.");
    }

    #[tokio::test]
    async fn test_ask_rejects_out_of_range_rating_up_front() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        write_mock_config(workspace);

        let err = handle_command(ask("q", Some(11), None), workspace, &offline_options())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("11"), "{}", err);

        let config = load_settings(workspace, &offline_options()).unwrap();
        assert!(!config.feedback.path.exists());
    }

    #[test]
    fn test_render_result_shows_raw_output_when_verbose() {
        let initial = Answer {
            raw: Some("answer: DSPy is a framework.\nconfidence: 0.9".into()),
            ..Answer::from_text("DSPy is a framework.")
        };
        let result = PipelineResult {
            request_id: Default::default(),
            output_mode: OutputMode::Structured,
            status: RefinementStatus::Passed,
            final_answer: initial.clone(),
            history: vec![RefinementStep {
                iteration: 1,
                answer: initial,
                critique: Critique {
                    narrative: "Good.".into(),
                    score: 9.0,
                    passed: true,
                },
            }],
            rewritten_query: RewrittenQuery::default(),
            evidence: Vec::new(),
        };

        let quiet = render_result(&result, 0);
        assert!(quiet.starts_with("DSPy is a framework.\n\n"));
        assert!(quiet.contains("Status: passed after 1 round(s), score 9.0\n"));
        assert!(!quiet.contains("Raw"));

        let verbose = render_result(&result, 1);
        assert!(verbose.ends_with(
            "\nRaw structured output:\nanswer: DSPy is a framework.\nconfidence: 0.9\n"
        ));
    }

    #[tokio::test]
    async fn test_ingest_then_ask_with_mock_provider() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        write_mock_config(workspace);
        let docs = workspace.join("docs.jsonl");
        std::fs::write(
            &docs,
            "{\"text\": \"DSPy is a framework.\", \"source\": \"dspy_docs\"}\n",
        )
        .unwrap();

        let config = load_settings(workspace, &offline_options()).unwrap();
        assert_eq!(ingest(&config, &docs).await.unwrap(), 1);

        let result = run_ask(
            config,
            "What is DSPy?",
            OutputMode::Plain,
            &CancellationToken::new(),
            true,
        )
        .await
        .unwrap();
        // The canned mock reply never passes the critic.
        assert_eq!(result.status, RefinementStatus::Exhausted);
        assert_eq!(result.history.len(), 3);
        assert_eq!(result.evidence.len(), 1);
        assert_eq!(result.evidence[0].source, "dspy_docs");
    }

    #[tokio::test]
    async fn test_ask_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        write_mock_config(dir.path());
        let config = load_settings(dir.path(), &offline_options()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = run_ask(config, "q", OutputMode::Plain, &cancel, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"), "{}", err);
    }
}
