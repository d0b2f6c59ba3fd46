//! CLI binary for edgequake-docbundle.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ProcessingConfig` and prints the run summary.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_docbundle::{
    inspect, process, ArtifactId, CancelToken, ProcessProgressCallback, ProcessingConfig,
    ProgressCallback, RunSummary, Stage, StageError, TableMatchMode,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar per stage plus a log line per artifact.
/// Description events arrive out of order from concurrent tasks.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Resolving input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, prefix: &str, total: usize, unit: &str) {
        let template = format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {unit}  ⏱ {{elapsed_precise}}"
        );
        let style = ProgressStyle::with_template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(style);
        self.bar.set_prefix(prefix.to_string());
        self.bar.reset_eta();
    }
}

impl ProcessProgressCallback for CliProgressCallback {
    fn on_run_start(&self, source: &str) {
        self.bar.set_message(format!("Decoding {source}…"));
    }

    fn on_stage_start(&self, stage: Stage, items: usize) {
        match stage {
            Stage::Decode => self.bar.set_prefix("Decoding"),
            Stage::Tables => self.activate_bar("Tables", items, "tables"),
            Stage::Pictures => self.activate_bar("Pictures", items, "pictures"),
            Stage::Descriptions => self.activate_bar("Describing", items, "pictures"),
            Stage::Assemble => self.bar.set_prefix("Assembling"),
        }
    }

    fn on_artifact_complete(&self, id: ArtifactId, token: &str) {
        self.bar
            .println(format!("  {} {:<12} {}", green("✓"), id.to_string(), dim(token)));
        self.bar.inc(1);
    }

    fn on_artifact_error(&self, id: ArtifactId, error: &StageError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = error.to_string();
        let msg = if msg.chars().count() > 80 {
            format!("{}…", msg.chars().take(79).collect::<String>())
        } else {
            msg
        };
        self.bar
            .println(format!("  {} {:<12} {}", red("✗"), id.to_string(), red(&msg)));
        self.bar.inc(1);
    }

    fn on_description_complete(&self, id: ArtifactId, described: bool) {
        if !described {
            self.errors.fetch_add(1, Ordering::SeqCst);
            self.bar.println(format!(
                "  {} {:<12} {}",
                cyan("⚠"),
                id.to_string(),
                dim("no description")
            ));
        }
        self.bar.inc(1);
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} artifacts written",
                green("✔"),
                bold(&summary.artifacts.len().to_string())
            );
        } else {
            eprintln!(
                "{} {} artifacts written  ({} problems)",
                cyan("⚠"),
                bold(&summary.artifacts.len().to_string()),
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Full bundle with picture descriptions
  doc2bundle report.pdf -o output

  # Local-only run, no remote calls
  doc2bundle --no-remote-services report.pdf

  # Tables only
  doc2bundle --no-pictures report.pdf

  # From a docling JSON export
  doc2bundle report.json -o output

  # What would a run produce? (no writes, no API key needed)
  doc2bundle --inspect-only report.pdf

  # Machine-readable summary
  doc2bundle --json report.pdf > summary.json

OUTPUT LAYOUT:
  {output}/{doc}_output.{ext}/{doc}-table-{n}.csv
  {output}/{doc}_output.{ext}/{doc}-picture-{n}.png
  {output}/{doc}_output.{ext}/{doc}.md

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (default description provider)
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium
  RUST_LOG                Log filter (overrides -v / -q)

  Variables may also be set in a .env file in the working directory.
"#;

/// Turn a document into a Markdown + CSV + PNG bundle.
#[derive(Parser, Debug)]
#[command(
    name = "doc2bundle",
    version,
    about = "Turn a document into a Markdown + CSV + PNG bundle",
    long_about = "Convert a paged document (PDF, or a docling JSON export) into a self-contained \
bundle: one Markdown content file, one CSV per table, one PNG per picture, with optional \
picture descriptions from a vision model.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local document path or HTTP/HTTPS URL.
    input: String,

    /// Directory the output scope is created in.
    #[arg(short, long, env = "DOC2BUNDLE_OUTPUT", default_value = "output")]
    output_dir: PathBuf,

    /// Never call the remote description service.
    #[arg(long, env = "DOC2BUNDLE_NO_REMOTE")]
    no_remote_services: bool,

    /// Do not render page images.
    #[arg(long)]
    no_page_images: bool,

    /// Skip table-structure recognition and table extraction.
    #[arg(long)]
    no_table_structure: bool,

    /// Skip picture extraction (implies no descriptions).
    #[arg(long)]
    no_pictures: bool,

    /// Extract pictures but do not describe them.
    #[arg(long)]
    no_picture_description: bool,

    /// Disable OCR in the decoder.
    #[arg(long)]
    no_ocr: bool,

    /// Table-structure accuracy passed to the decoder.
    #[arg(long, value_enum, default_value = "accurate")]
    table_mode: TableModeArg,

    /// Disable matching predicted table cells back to document text.
    #[arg(long)]
    no_cell_matching: bool,

    /// Vision model ID for descriptions (default: gpt-4o-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Maximum concurrent description requests.
    #[arg(short, long, env = "DOC2BUNDLE_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Per-request description timeout in seconds.
    #[arg(long, env = "DOC2BUNDLE_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Extra attempts per failed description (0 = single attempt, at most 10).
    #[arg(long, env = "DOC2BUNDLE_MAX_RETRIES", default_value_t = 0, value_parser = clap::value_parser!(u32).range(0..=10))]
    max_retries: u32,

    /// Path to a text file containing a custom description prompt.
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// Max output tokens per description.
    #[arg(long, default_value_t = 300)]
    max_tokens: usize,

    /// Sampling temperature for descriptions.
    #[arg(long, default_value_t = 0.1)]
    temperature: f32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "DOC2BUNDLE_PASSWORD")]
    password: Option<String>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DOC2BUNDLE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print the run summary as JSON.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOC2BUNDLE_NO_PROGRESS")]
    no_progress: bool,

    /// Decode and report what a run would produce; write nothing.
    #[arg(long)]
    inspect_only: bool,

    /// Exit with an error if any table or picture failed.
    #[arg(long)]
    strict: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum TableModeArg {
    Fast,
    Accurate,
}

impl From<TableModeArg> for TableMatchMode {
    fn from(v: TableModeArg) -> Self {
        match v {
            TableModeArg::Fast => TableMatchMode::Fast,
            TableModeArg::Accurate => TableMatchMode::Accurate,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs are suppressed while the progress bar is active.
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

    let config = build_config(&cli, show_progress && !cli.inspect_only).await?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let overview = inspect(&cli.input, &config)
            .await
            .context("Failed to inspect document")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&overview).context("Failed to serialise overview")?
            );
        } else {
            println!("Source:       {}", overview.source);
            println!("Decoder:      {}", overview.decoder);
            println!("Pages:        {}", overview.pages);
            println!("Text blocks:  {}", overview.text_blocks);
            println!("Tables:       {}", overview.tables);
            println!("Pictures:     {}", overview.pictures);
            println!("Scope:        {}", overview.scope_name);
            println!("Content:      {}", overview.content_file);
            for token in &overview.planned_artifacts {
                println!("  {}", token);
            }
        }
        return Ok(());
    }

    // ── Ctrl-C cancels the run ───────────────────────────────────────────
    let token = config.cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", cyan("Cancelling…"));
            token.cancel();
        }
    });

    // ── Run ──────────────────────────────────────────────────────────────
    let summary = process(&cli.input, &cli.output_dir, &config)
        .await
        .context("Processing failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        for failure in &summary.failures {
            eprintln!("  {} {}", red("✗"), failure);
        }
        eprintln!(
            "{}  {} tables, {} pictures ({} described)  {}ms  →  {}",
            if summary.is_complete() {
                green("✔")
            } else {
                cyan("⚠")
            },
            summary.stats.tables_extracted,
            summary.stats.pictures_extracted,
            summary.stats.pictures_described,
            summary.stats.total_duration_ms,
            bold(&summary.content_path.display().to_string()),
        );
        if summary.stats.total_input_tokens > 0 {
            eprintln!(
                "   {} tokens in  /  {} tokens out",
                dim(&summary.stats.total_input_tokens.to_string()),
                dim(&summary.stats.total_output_tokens.to_string()),
            );
        }
    }

    if cli.strict {
        summary.into_result().context("Run finished with failures")?;
    }
    Ok(())
}

/// Map CLI args to `ProcessingConfig`.
async fn build_config(cli: &Cli, show_progress: bool) -> Result<ProcessingConfig> {
    let mut builder = ProcessingConfig::builder()
        .enable_remote_services(!cli.no_remote_services)
        .generate_page_images(!cli.no_page_images)
        .do_table_structure(!cli.no_table_structure)
        .do_picture_extraction(!cli.no_pictures)
        .do_picture_description(!cli.no_picture_description)
        .do_ocr(!cli.no_ocr)
        .table_mode(cli.table_mode.into())
        .do_cell_matching(!cli.no_cell_matching)
        .concurrency(cli.concurrency)
        .api_timeout_secs(cli.api_timeout)
        .max_retries(cli.max_retries)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .download_timeout_secs(cli.download_timeout)
        .cancellation(CancelToken::new());

    if let Some(ref path) = cli.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.description_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
