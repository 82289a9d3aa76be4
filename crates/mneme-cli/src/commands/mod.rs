use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use mneme_config::{ConfigLoader, MnemeConfig, WarningSeverity};
use mneme_core::{Category, MnemeError, Tier};
use mneme_memory::{MemoryEntry, MemoryStats, RecordStore, SqliteStore};

mod memory;
mod sweep;

/// Mneme: hierarchical memory for autonomous agents
#[derive(Parser)]
#[command(name = "mneme", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to mneme.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the memories of a finished task (JSON with `task` and `outcome`)
    Record {
        /// Task record file, or `-` for stdin
        file: PathBuf,
        /// Output stored entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Retrieve the most relevant memories of an agent
    Recall {
        /// Agent whose memories to search
        agent: String,
        /// Match entries carrying any of these tags (repeatable)
        #[arg(short, long)]
        tag: Vec<String>,
        /// Match entries whose content mentions any of these words
        #[arg(short = 's', long)]
        text: Option<String>,
        /// Only this tier: working, episodic, semantic
        #[arg(long)]
        tier: Option<Tier>,
        /// Only this category: conversation, task, knowledge, solution
        #[arg(long)]
        category: Option<Category>,
        /// Minimum importance (0.0-1.0)
        #[arg(long)]
        min_importance: Option<f64>,
        /// Maximum number of results (0 = configured default)
        #[arg(short = 'n', long, default_value = "0")]
        limit: usize,
        /// Print the results as a prompt context block
        #[arg(long, conflicts_with = "json")]
        prompt: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one decay & consolidation sweep
    Sweep {
        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sweep periodically until interrupted (Ctrl-C)
    Run,
    /// Show memory statistics (all agents if none given)
    Stats {
        agent: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a single memory
    Get {
        id: Uuid,
        /// Also resolve and show related memories
        #[arg(long)]
        related: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Validate and list warnings instead of printing the config
        #[arg(long)]
        check: bool,
    },
}

impl Cli {
    pub async fn run(self) -> mneme_core::Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // Resolve log level: --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level
                .as_deref()
                .unwrap_or(config.logging.level.as_str())
        };
        init_tracing(&config.logging.format, log_level);

        match self.command {
            Commands::Record { file, json } => {
                if !config.memory.enabled {
                    info!("memory.enabled is false, not recording");
                    println!("Memory recording is disabled; nothing stored.");
                    return Ok(());
                }
                let store = open_store(&config, config_loader.path())?;
                memory::cmd_record(&config, store, &file, json)
            }
            Commands::Recall {
                agent,
                tag,
                text,
                tier,
                category,
                min_importance,
                limit,
                prompt,
                json,
            } => {
                let store = open_store(&config, config_loader.path())?;
                let query = memory::build_query(tag, text, tier, category, min_importance);
                memory::cmd_recall(&config, store, &agent, &query, limit, prompt, json)
            }
            Commands::Sweep { json } => {
                let store = open_store(&config, config_loader.path())?;
                sweep::cmd_sweep(&config, store, json).await
            }
            Commands::Run => {
                let store = open_store(&config, config_loader.path())?;
                sweep::cmd_run(config_loader, store).await
            }
            Commands::Stats { agent, json } => {
                let store = open_store(&config, config_loader.path())?;
                Self::cmd_stats(store.as_ref(), agent, json)
            }
            Commands::Get { id, related, json } => {
                let store = open_store(&config, config_loader.path())?;
                Self::cmd_get(store.as_ref(), id, related, json)
            }
            Commands::Config { json, check } => Self::cmd_config(&config, json, check),
        }
    }

    fn cmd_stats(store: &dyn RecordStore, agent: Option<String>, json: bool) -> mneme_core::Result<()> {
        let owners = match agent {
            Some(agent) => vec![agent],
            None => store.owners()?,
        };
        let stats = owners
            .iter()
            .map(|owner| store.stats(owner))
            .collect::<mneme_core::Result<Vec<MemoryStats>>>()?;

        if json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
            return Ok(());
        }
        if stats.is_empty() {
            println!("No memories stored.");
            return Ok(());
        }

        println!(
            "{:<24} {:>8} {:>8} {:>8} {:>8} {:>10}",
            "AGENT", "WORKING", "EPISODIC", "SEMANTIC", "TOTAL", "AVG IMP"
        );
        for s in &stats {
            println!(
                "{:<24} {:>8} {:>8} {:>8} {:>8} {:>10.3}",
                s.owner_agent_id, s.working, s.episodic, s.semantic, s.total, s.average_importance
            );
        }
        Ok(())
    }

    fn cmd_get(store: &dyn RecordStore, id: Uuid, related: bool, json: bool) -> mneme_core::Result<()> {
        let entry = store.get(id)?;
        let related = if related {
            store.related(&entry)?
        } else {
            Vec::new()
        };

        if json {
            let out = serde_json::json!({ "memory": entry, "related": related });
            println!("{}", serde_json::to_string_pretty(&out)?);
            return Ok(());
        }

        print_entry(&entry);
        println!("   tags: {}", join_tags(&entry));
        println!("   context: {}", entry.context);
        println!("   created: {}  accessed: {}", entry.created_at, entry.accessed_at);
        if let Some(at) = entry.last_consolidated_at {
            println!("   consolidated: {at}");
        }
        if !related.is_empty() {
            println!();
            println!("Related ({}):", related.len());
            for r in &related {
                print_entry(r);
            }
        }
        Ok(())
    }

    fn cmd_config(config: &MnemeConfig, json: bool, check: bool) -> mneme_core::Result<()> {
        if check {
            // Load already rejected hard errors, so only warnings remain
            let warnings = config.validate().map_err(MnemeError::Config)?;
            if warnings.is_empty() {
                println!("Configuration OK.");
            }
            for w in &warnings {
                println!("{w}");
            }
            let suggestions = warnings
                .iter()
                .filter(|w| w.severity == WarningSeverity::Info)
                .count();
            println!(
                "{} warnings, {suggestions} suggestions",
                warnings.len() - suggestions
            );
            return Ok(());
        }

        if json {
            println!("{}", serde_json::to_string_pretty(config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(config).map_err(|e| MnemeError::Config(e.to_string()))?
            );
        }
        Ok(())
    }
}

/// Install the global tracing subscriber. Logs go to stderr so command output
/// on stdout stays machine-readable. A subscriber that is already installed
/// is kept.
fn init_tracing(format: &str, level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let _ = match format {
        "json" => builder.json().with_target(true).try_init(),
        "compact" => builder.compact().with_target(false).try_init(),
        _ => builder.with_target(false).try_init(),
    };
}

/// Relative database paths live next to the config file.
pub fn resolve_db_path(config: &MnemeConfig, config_path: &Path) -> PathBuf {
    let db_path = &config.memory.db_path;
    if db_path.is_absolute() {
        return db_path.clone();
    }
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(db_path),
        _ => db_path.clone(),
    }
}

fn open_store(config: &MnemeConfig, config_path: &Path) -> mneme_core::Result<Arc<SqliteStore>> {
    let db_path = resolve_db_path(config, config_path);
    if db_path.is_dir() {
        return Err(MnemeError::ConfigValidation {
            field: "memory.db_path".into(),
            reason: format!("{} is a directory", db_path.display()),
        });
    }
    if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    info!(db_path = %db_path.display(), "using memory database");
    Ok(Arc::new(SqliteStore::open(&db_path)?))
}

fn join_tags(entry: &MemoryEntry) -> String {
    entry
        .tags
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_entry(entry: &MemoryEntry) {
    println!(
        "{}  [{}/{}] importance {:.2}, accessed {}x",
        entry.id, entry.tier, entry.category, entry.importance, entry.access_count
    );
    println!("   {}", truncate_output(&entry.content, 160));
}

/// Truncate a string to `max` characters, appending "..." if truncated.
fn truncate_output(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.replace('\n', " "),
        Some((idx, _)) => format!("{}...", s[..idx].replace('\n', " ")),
    }
}
