//! CLI binary for edgequake-docscan.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs each file id through one `DocumentAnalyzer` and
//! prints the results.

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use edgequake_docscan::{
    AnalysisEnvelope, CacheConfig, CacheEngine, DocScanError, DocumentAnalyzer, FileSource,
    HttpSource, JsonDirStore, LocalDirSource, PipelineConfig, PipelineOptions,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyse two files from a local archive directory
  docscan --source-dir ./archive letter-1944.pdf photo-017.jpg

  # Fetch from a file service and save each result as a JSON record
  docscan --source-url https://files.local/api/files --save-dir ./records abc123

  # Machine-readable output, ignoring cached results
  docscan --source-dir ./archive --json --force-refresh report.docx

  # Use a specific model
  docscan --provider openai --model gpt-4.1-mini --source-dir ./archive scan.png

SUPPORTED FORMATS:
  application/pdf                first page rendered via pdfium
  .docx (OOXML)                  body text drawn onto a page-sized canvas
  application/msword (.doc)      placeholder image naming the file
  image/jpeg, png, gif, bmp      passed through unchanged

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory or file of an existing libpdfium
  DOCSCAN_*               Fallback for every flag below (e.g. DOCSCAN_DPI)
"#;

/// Analyse documents with Vision LLMs into a strict JSON schema.
#[derive(Parser, Debug)]
#[command(
    name = "docscan",
    version,
    about = "Analyse documents (PDF, DOCX, images) with Vision LLMs",
    long_about = "Analyse archived documents with a Vision Language Model. Each file is turned \
into one image, the model is asked for a title, transcription, document type and named \
entities, and the validated answer is printed (and optionally saved).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP,
    group(ArgGroup::new("source").required(true).args(["source_dir", "source_url"]))
)]
struct Cli {
    /// File ids to analyse, in order. Repeated ids are served from cache.
    #[arg(required = true)]
    file_ids: Vec<String>,

    /// Directory containing the files; ids are file names in it.
    #[arg(long, env = "DOCSCAN_SOURCE_DIR")]
    source_dir: Option<PathBuf>,

    /// Base URL of a file service; ids are fetched from <URL>/<id>.
    #[arg(long, env = "DOCSCAN_SOURCE_URL")]
    source_url: Option<String>,

    /// Save each result as a JSON record in this directory.
    #[arg(long, env = "DOCSCAN_SAVE_DIR")]
    save_dir: Option<PathBuf>,

    /// Ignore cached results.
    #[arg(long, env = "DOCSCAN_FORCE_REFRESH")]
    force_refresh: bool,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI for PDF pages and text canvases (72–600).
    #[arg(long, env = "DOCSCAN_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Path to a text file containing a custom instruction prompt.
    #[arg(long, env = "DOCSCAN_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens.
    #[arg(long, env = "DOCSCAN_MAX_TOKENS", default_value_t = 2048)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DOCSCAN_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Total attempts per file against the LLM, first call included.
    #[arg(long, env = "DOCSCAN_MAX_ATTEMPTS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: u32,

    /// Backoff base in milliseconds; attempt n waits base × 2^n.
    #[arg(long, env = "DOCSCAN_RETRY_BACKOFF_MS", default_value_t = 1000)]
    retry_backoff_ms: u64,

    /// Per-attempt LLM call timeout in seconds.
    #[arg(long, env = "DOCSCAN_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// HTTP download timeout in seconds (--source-url only).
    #[arg(long, env = "DOCSCAN_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Reject files larger than this many bytes.
    #[arg(long, env = "DOCSCAN_MAX_FILE_BYTES", default_value_t = 50 * 1024 * 1024)]
    max_file_bytes: u64,

    /// How long results stay cached, in seconds.
    #[arg(long, env = "DOCSCAN_CACHE_TTL", default_value_t = 3600)]
    cache_ttl: u64,

    /// Directory or file path of the pdfium library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Output results as a JSON array.
    #[arg(long, env = "DOCSCAN_JSON")]
    json: bool,

    /// Keep the base64 image in JSON output.
    #[arg(long, requires = "json")]
    include_image: bool,

    /// Print cache statistics when done.
    #[arg(long)]
    stats: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "DOCSCAN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCSCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except results and errors.
    #[arg(short, long, env = "DOCSCAN_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO logs; verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build pipeline ───────────────────────────────────────────────────
    let config = build_config(&cli).await?;

    let source: Arc<dyn FileSource> = match (&cli.source_dir, &cli.source_url) {
        (Some(dir), _) => Arc::new(LocalDirSource::from_config(dir, &config)),
        (None, Some(url)) => {
            Arc::new(HttpSource::new(url, &config).context("Invalid --source-url")?)
        }
        (None, None) => anyhow::bail!("one of --source-dir or --source-url is required"),
    };

    let cache = Arc::new(CacheEngine::new(
        CacheConfig::default().with_default_ttl(Duration::from_secs(cli.cache_ttl)),
    ));

    let mut analyzer = DocumentAnalyzer::from_config(&config, Arc::clone(&cache), source)
        .context("Failed to initialise LLM provider")?;
    if let Some(ref dir) = cli.save_dir {
        analyzer = analyzer.with_store(Arc::new(JsonDirStore::new(dir)));
    }

    let options = PipelineOptions {
        force_refresh: cli.force_refresh,
        auto_save: cli.save_dir.is_some(),
    };

    // ── Run ──────────────────────────────────────────────────────────────
    let started = Instant::now();
    let mut results = Vec::new();
    let mut failures = 0usize;

    for file_id in &cli.file_ids {
        let spinner = show_progress.then(|| spinner(file_id));
        let t0 = Instant::now();
        let outcome = analyzer.process(file_id, options).await;
        if let Some(bar) = spinner {
            bar.finish_and_clear();
        }

        match outcome {
            Ok(envelope) => {
                if !cli.quiet && !cli.json {
                    eprintln!(
                        "{} {}  {}",
                        green("✓"),
                        bold(file_id),
                        dim(&format!("{:.1}s", t0.elapsed().as_secs_f64()))
                    );
                }
                if cli.json {
                    results.push(envelope_json(&envelope, cli.include_image)?);
                } else {
                    print_envelope(&envelope);
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("{} {}  {}", red("✗"), bold(file_id), red(&e.to_string()));
                // The analysis itself succeeded; show it anyway.
                if let DocScanError::Persistence { envelope, .. } = e {
                    if cli.json {
                        results.push(envelope_json(&envelope, cli.include_image)?);
                    } else {
                        print_envelope(&envelope);
                    }
                }
            }
        }
    }

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&results).context("Failed to serialise output")?
        );
    }

    if cli.stats {
        let s = cache.stats();
        eprintln!(
            "cache: {} hits / {} misses ({:.0}% hit rate), {} entries, {} evictions",
            s.hits,
            s.misses,
            s.hit_rate() * 100.0,
            s.size,
            s.evictions
        );
    }

    let total = cli.file_ids.len();
    if !cli.quiet {
        eprintln!(
            "{} {}/{} files analysed in {:.1}s",
            if failures == 0 { green("✔") } else { red("✘") },
            total - failures,
            total,
            started.elapsed().as_secs_f64()
        );
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {total} files failed");
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .dpi(cli.dpi)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_attempts(cli.max_attempts)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .max_file_bytes(cli.max_file_bytes)
        .cache_ttl_secs(cli.cache_ttl);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref path) = cli.pdfium_lib {
        builder = builder.pdfium_lib_path(path);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}

fn spinner(file_id: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    bar.set_prefix("Analysing");
    bar.set_message(file_id.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn envelope_json(envelope: &AnalysisEnvelope, include_image: bool) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(envelope).context("Failed to serialise result")?;
    if !include_image {
        if let Some(obj) = value.as_object_mut() {
            obj.remove("image");
        }
    }
    Ok(value)
}

fn print_envelope(envelope: &AnalysisEnvelope) {
    let a = &envelope.analysis;
    println!("{}", bold(&a.title));
    println!("  File:      {} ({})", envelope.file_name, envelope.file_id);
    println!("  Type:      {}", a.document_type);
    if !a.entities.is_empty() {
        let entities: Vec<String> = a
            .entities
            .iter()
            .map(|e| match &e.date {
                Some(date) => format!("{} [{}, {}]", e.name, e.entity_type, date),
                None => format!("{} [{}]", e.name, e.entity_type),
            })
            .collect();
        println!("  Entities:  {}", entities.join("; "));
    }
    if let Some(ref record) = envelope.saved_record {
        println!("  Saved:     {}", record.id);
    }
    println!();
    println!("{}", a.content.trim_end());
    println!();
}
