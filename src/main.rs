//! # Query Sandbox REPL
//!
//! Interactive shell over one [`Sandbox`].
//!
//! ## Usage
//!
//! ```bash
//! query-sandbox --schema schema.sql --seed seed.sql
//! query-sandbox --target postgres --server http://localhost:8080/api
//! ```
//!
//! Statements run when a line ends with `;`. Dot-commands:
//! - `.reset` - Rebuild the database from schema and seed
//! - `.target <name>` - Switch engine (sqlite, postgres, mysql, mongodb, redis)
//! - `.json` - Toggle JSON output
//! - `.help` - Show help
//! - `.quit` - Exit

use anyhow::{Context, Result};
use clap::Parser;
use query_sandbox::config::LoggingConfig;
use query_sandbox::{Config, Dataset, ExecutionResult, Sandbox, SandboxTarget, SqlValue};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static TRACE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(
    name = "query-sandbox",
    version,
    about = "Run queries against a disposable sandbox database"
)]
struct Args {
    /// Engine to run queries on
    #[arg(long, short, default_value = "sqlite")]
    target: SandboxTarget,

    /// Schema script applied to every fresh database
    #[arg(long, value_name = "FILE")]
    schema: Option<PathBuf>,

    /// Seed script applied after the schema
    #[arg(long, value_name = "FILE")]
    seed: Option<PathBuf>,

    /// Remote sandbox server base URL (overrides config)
    #[arg(long, value_name = "URL")]
    server: Option<String>,

    /// Configuration file (defaults to query-sandbox.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().unwrap_or_else(|e| {
            eprintln!("Using default configuration ({e})");
            Config::default()
        }),
    };
    if let Some(server) = args.server {
        config.remote.base_url = server;
    }

    init_tracing(&config.logging);

    let dataset = Dataset::new(
        read_script(args.schema.as_deref())?,
        read_script(args.seed.as_deref())?,
    );
    let sandbox = Sandbox::from_config("repl", &config).context("failed to create sandbox")?;
    sandbox.configure(args.target, dataset).await;

    println!("Query Sandbox ({})", args.target);
    println!("Enter .help for commands. Statements end with ';'.");
    println!();

    let mut repl = Repl {
        sandbox,
        json: args.json,
    };
    repl.run().await?;
    repl.sandbox.close().await;
    Ok(())
}

fn read_script(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
        }
        None => Ok(String::new()),
    }
}

/// Install a file-backed subscriber when `QUERY_SANDBOX_TRACE` is set. The
/// REPL owns the terminal, so traces never go to stdout.
fn init_tracing(logging_config: &LoggingConfig) {
    let enabled = env::var("QUERY_SANDBOX_TRACE")
        .ok()
        .is_some_and(|v| v != "0");
    if !enabled {
        return;
    }

    let log_path =
        env::var("QUERY_SANDBOX_TRACE_FILE").unwrap_or_else(|_| "query_sandbox_trace.log".to_string());

    let json = env::var("QUERY_SANDBOX_TRACE_JSON")
        .ok()
        .map_or_else(|| logging_config.format == "json", |v| v != "0");

    let level = env::var("QUERY_SANDBOX_TRACE_LEVEL")
        .ok()
        .unwrap_or_else(|| logging_config.level.clone());

    let file = match fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!("ERROR: Unable to open QUERY_SANDBOX_TRACE_FILE '{log_path}': {e}");
            return;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let _ = TRACE_GUARD.set(guard);

    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let base = || {
        tracing_subscriber::fmt()
            .with_env_filter(filter.clone())
            .with_ansi(false)
            .with_thread_names(true)
            .with_writer(non_blocking.clone())
    };

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if json {
        Box::new(base().json().finish())
    } else {
        Box::new(base().compact().finish())
    };

    let _ = tracing::subscriber::set_global_default(subscriber);
}

struct Repl {
    sandbox: Sandbox,
    json: bool,
}

enum Flow {
    Continue,
    Quit,
}

impl Repl {
    async fn run(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new().context("failed to start line editor")?;
        let mut buffer = String::new();

        loop {
            let prompt = if buffer.is_empty() {
                format!("{}> ", self.target_name().await)
            } else {
                "   ...> ".to_string()
            };

            match editor.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if buffer.is_empty() && trimmed.starts_with('.') {
                        let _ = editor.add_history_entry(trimmed);
                        if let Flow::Quit = self.command(trimmed).await {
                            break;
                        }
                        continue;
                    }
                    if trimmed.is_empty() && buffer.is_empty() {
                        continue;
                    }

                    if !buffer.is_empty() {
                        buffer.push('\n');
                    }
                    buffer.push_str(&line);
                    if trimmed.ends_with(';') {
                        let query = std::mem::take(&mut buffer);
                        let _ = editor.add_history_entry(query.as_str());
                        let result = self.sandbox.execute(&query).await;
                        self.print(&result);
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    // Ctrl-C drops a half-typed statement
                    buffer.clear();
                }
                Err(ReadlineError::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn target_name(&self) -> String {
        self.sandbox
            .target()
            .await
            .map_or_else(|| "sandbox".to_string(), |t| t.to_string())
    }

    async fn command(&mut self, input: &str) -> Flow {
        let mut parts = input.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next();

        match name {
            ".quit" | ".exit" => return Flow::Quit,
            ".help" => print_help(),
            ".json" => {
                self.json = !self.json;
                println!("JSON output {}", if self.json { "on" } else { "off" });
            }
            ".reset" => match self.sandbox.reset().await {
                Ok(()) => println!("Database reset"),
                Err(e) => println!("Error: {e}"),
            },
            ".target" => match arg.map(str::parse::<SandboxTarget>) {
                Some(Ok(target)) => {
                    let dataset = self.sandbox.dataset().await;
                    self.sandbox.configure(target, dataset).await;
                    println!("Target: {target}");
                }
                Some(Err(e)) => println!("Error: {e}"),
                None => println!("Target: {}", self.target_name().await),
            },
            other => println!("Unknown command: {other} (try .help)"),
        }
        Flow::Continue
    }

    fn print(&self, result: &ExecutionResult) {
        if self.json {
            match serde_json::to_string_pretty(result) {
                Ok(json) => println!("{json}"),
                Err(e) => println!("Error: {e}"),
            }
            return;
        }
        println!("{}", format_result(result));
    }
}

fn print_help() {
    println!("Commands:");
    println!("  .reset           Rebuild the database from schema and seed");
    println!("  .target <name>   Switch engine: sqlite, postgres, mysql, mongodb, redis");
    println!("  .json            Toggle JSON output");
    println!("  .help            Show this help");
    println!("  .quit            Exit");
}

fn format_result(result: &ExecutionResult) -> String {
    if !result.success {
        let message = result.error_message.as_deref().unwrap_or("query failed");
        return format!("Error: {message}");
    }
    let timing = format!("{:.2} ms", result.execution_time_ms);
    if !result.has_result_set() {
        return format!("OK, {} row(s) affected ({timing})", result.affected_rows);
    }
    let plural = if result.row_count == 1 { "row" } else { "rows" };
    format!(
        "{}\n({} {plural}, {timing})",
        render_table(&result.columns, &result.rows),
        result.row_count
    )
}

/// Bare `NULL` is SQL NULL; text that spells null is shown quoted.
fn cell_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Text(text) if text.trim().eq_ignore_ascii_case("null") => format!("'{text}'"),
        other => other.to_string(),
    }
}

fn render_table(columns: &[String], rows: &[Vec<SqlValue>]) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();

    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let line = |values: &[String]| {
        values
            .iter()
            .zip(&widths)
            .map(|(v, &w)| format!(" {v:<w$} "))
            .collect::<Vec<_>>()
            .join("|")
    };
    let separator = widths
        .iter()
        .map(|w| "-".repeat(w + 2))
        .collect::<Vec<_>>()
        .join("+");

    let mut out = vec![line(columns), separator];
    out.extend(cells.iter().map(|row| line(row)));
    out.iter()
        .map(|l| l.trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
