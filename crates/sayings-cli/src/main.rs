use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use sayings_core::{
    AddError, CatalogStore, Category, LoadReport, SayingId, SelectionEngine,
    StoreConfig,
};
use sayings_store_sqlite::SqliteStorage;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const MAX_PICKS_PER_CALL: i64 = 1_000;

type Catalog = CatalogStore<SqliteStorage>;

#[derive(Debug, Parser)]
#[command(name = "sayings")]
#[command(about = "Curated sayings by category, never repeated until a category is exhausted")]
struct Cli {
    #[arg(long, default_value = "./sayings.sqlite3")]
    db: PathBuf,

    /// Run without durable storage; the catalog starts from the built-in defaults.
    #[arg(long, default_value_t = false)]
    in_memory: bool,

    /// Seed for reproducible selection order.
    #[arg(long)]
    seed: Option<u64>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Next(NextArgs),
    Stats(StatsArgs),
    List(ListArgs),
    Add(AddArgs),
    Remove(RemoveArgs),
    Info,
    ResetStorage,
    Session,
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
}

#[derive(Debug, Args)]
struct NextArgs {
    #[arg(value_parser = parse_category)]
    category: Category,
    /// Number of successive picks, 1 to 1000.
    #[arg(
        long,
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..=MAX_PICKS_PER_CALL)
    )]
    count: u32,
}

#[derive(Debug, Args)]
struct StatsArgs {
    #[arg(value_parser = parse_category)]
    category: Option<Category>,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(value_parser = parse_category)]
    category: Option<Category>,
}

#[derive(Debug, Args)]
struct AddArgs {
    #[arg(long)]
    text: String,
    #[arg(long)]
    translation: String,
    #[arg(long, value_parser = parse_category)]
    category: Category,
    #[arg(long)]
    usage_context: String,
}

#[derive(Debug, Args)]
struct RemoveArgs {
    id: String,
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Backup(DbBackupArgs),
    Restore(DbRestoreArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct DbRestoreArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, PartialEq, Eq)]
enum SessionCommand {
    Next(Category),
    Stats(Option<Category>),
    Reset(Category),
    ResetAll,
    Quit,
}

fn parse_category(value: &str) -> Result<Category, String> {
    let normalized = value.trim().to_lowercase();
    if let Ok(position) = normalized.parse::<usize>() {
        return Category::from_position(position).ok_or_else(|| {
            format!("category shortcut must be between 1 and {}", Category::COUNT)
        });
    }
    Category::parse(&normalized).ok_or_else(|| {
        let known = Category::ALL.map(Category::as_str).join(", ");
        format!("unknown category `{value}` (expected one of: {known})")
    })
}

fn parse_session_command(line: &str) -> Result<SessionCommand, String> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    let argument = parts.next();
    if parts.next().is_some() {
        return Err(format!("too many arguments: {line}"));
    }

    match (verb, argument) {
        ("next", Some(raw)) => parse_category(raw).map(SessionCommand::Next),
        ("stats", raw) => raw.map(parse_category).transpose().map(SessionCommand::Stats),
        ("reset", Some(raw)) => parse_category(raw).map(SessionCommand::Reset),
        ("reset-all", None) => Ok(SessionCommand::ResetAll),
        ("quit" | "exit", None) => Ok(SessionCommand::Quit),
        ("next" | "reset", None) => Err(format!("`{verb}` needs a category")),
        _ => Err(format!("unknown session command: {line}")),
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn emit_json_line(out: &mut impl Write, value: Value) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string(&with_contract_version(value))?)
        .context("failed to write session output")?;
    out.flush().context("failed to flush session output")
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Command::Db { command } => {
            if cli.in_memory {
                return Err(anyhow!("db commands require durable storage; drop --in-memory"));
            }
            let mut storage = SqliteStorage::open(&cli.db)?;
            run_db(*command, &mut storage)
        }
        command => {
            let (mut catalog, report) = open_catalog(&cli.db, cli.in_memory);
            let mut engine = cli.seed.map_or_else(SelectionEngine::new, SelectionEngine::seeded);
            run_catalog(command, &mut catalog, &report, &mut engine)
        }
    }
}

fn open_catalog(db: &Path, in_memory: bool) -> (Catalog, LoadReport) {
    let mut catalog = if in_memory {
        CatalogStore::detached(StoreConfig::default())
    } else {
        match SqliteStorage::open_migrated(db) {
            Ok(storage) => CatalogStore::new(storage, StoreConfig::default()),
            Err(err) => {
                tracing::warn!(
                    db = %db.display(),
                    error = %format!("{err:#}"),
                    "storage unavailable; running in memory with default sayings"
                );
                CatalogStore::detached(StoreConfig::default())
            }
        }
    };
    let report = catalog.load();
    (catalog, report)
}

fn run_catalog(
    command: Command,
    catalog: &mut Catalog,
    report: &LoadReport,
    engine: &mut SelectionEngine,
) -> Result<()> {
    match command {
        Command::Next(args) => run_next(&args, catalog, engine),
        Command::Stats(args) => emit_json(stats_value(args.category, catalog, engine)),
        Command::List(args) => {
            let sayings = match args.category {
                Some(category) => catalog.list_by_category(category),
                None => catalog.all().iter().collect(),
            };
            emit_json(serde_json::json!({
                "count": sayings.len(),
                "sayings": sayings
            }))
        }
        Command::Add(args) => run_add(&args, catalog),
        Command::Remove(args) => run_remove(&args, catalog),
        Command::Info => {
            let info = catalog.get_info();
            emit_json(serde_json::json!({
                "storage": info,
                "load": report
            }))
        }
        Command::ResetStorage => {
            catalog.clear_storage().context("failed to clear stored sayings")?;
            emit_json(serde_json::json!({ "cleared": true }))
        }
        Command::Session => {
            let stdin = io::stdin();
            let stdout = io::stdout();
            run_session(stdin.lock(), &mut stdout.lock(), catalog, engine)
        }
        Command::Db { .. } => Err(anyhow!("db commands are dispatched before the catalog opens")),
    }
}

fn run_next(args: &NextArgs, catalog: &Catalog, engine: &mut SelectionEngine) -> Result<()> {
    let mut picks = Vec::new();
    for _ in 0..args.count {
        let Some(saying) = engine.next(catalog, args.category) else {
            break;
        };
        picks.push(serde_json::json!({
            "saying": saying,
            "shown": engine.history(args.category).len()
        }));
    }

    let stats = engine.stats(catalog, args.category);
    emit_json(serde_json::json!({
        "category": args.category,
        "empty": stats.total == 0,
        "picks": picks,
        "stats": stats
    }))
}

fn stats_value(
    category: Option<Category>,
    catalog: &Catalog,
    engine: &SelectionEngine,
) -> Value {
    match category {
        Some(category) => serde_json::json!({ "stats": engine.stats(catalog, category) }),
        None => {
            let categories = Category::ALL
                .into_iter()
                .map(|category| engine.stats(catalog, category))
                .collect::<Vec<_>>();
            serde_json::json!({
                "categories": categories,
                "overall": engine.overall_stats(catalog)
            })
        }
    }
}

fn run_add(args: &AddArgs, catalog: &mut Catalog) -> Result<()> {
    let id = catalog
        .add(&args.text, &args.translation, args.category, &args.usage_context)
        .map_err(|err| {
            if let AddError::Duplicate { existing, .. } = &err {
                return anyhow!("{err} (existing id: {existing})");
            }
            anyhow!(err)
        })?;
    let saying = catalog.get(&id).ok_or_else(|| anyhow!("added saying {id} is missing"))?;
    emit_json(serde_json::json!({ "added": saying }))
}

fn run_remove(args: &RemoveArgs, catalog: &mut Catalog) -> Result<()> {
    let removal = catalog.remove(&SayingId::from(args.id.as_str()))?;
    emit_json(serde_json::json!({
        "removed": removal.saying,
        "persisted": removal.persisted
    }))
}

fn run_session(
    input: impl BufRead,
    out: &mut impl Write,
    catalog: &Catalog,
    engine: &mut SelectionEngine,
) -> Result<()> {
    for line in input.lines() {
        let line = line.context("failed to read session input")?;
        if line.trim().is_empty() {
            continue;
        }

        let value = match parse_session_command(&line) {
            Ok(SessionCommand::Quit) => break,
            Ok(SessionCommand::Next(category)) => match engine.next(catalog, category) {
                Some(saying) => serde_json::json!({
                    "category": category,
                    "saying": saying,
                    "stats": engine.stats(catalog, category)
                }),
                None => serde_json::json!({
                    "category": category,
                    "saying": Value::Null,
                    "stats": engine.stats(catalog, category)
                }),
            },
            Ok(SessionCommand::Stats(category)) => stats_value(category, catalog, engine),
            Ok(SessionCommand::Reset(category)) => {
                engine.reset_history(category);
                serde_json::json!({ "reset": [category] })
            }
            Ok(SessionCommand::ResetAll) => {
                engine.reset_all();
                serde_json::json!({ "reset": Category::ALL })
            }
            Err(message) => serde_json::json!({ "error": message }),
        };
        emit_json_line(out, value)?;
    }
    Ok(())
}

fn run_db(command: DbCommand, storage: &mut SqliteStorage) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = storage.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => run_db_migrate(&args, storage),
        DbCommand::Backup(args) => {
            storage.migrate()?;
            let report = storage.backup_to(&args.out)?;
            emit_json(serde_json::to_value(&report).context("failed to serialize backup report")?)
        }
        DbCommand::Restore(args) => {
            let status = storage.restore_from(&args.input)?;
            emit_json(serde_json::json!({
                "restored_from": args.input,
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions
            }))
        }
        DbCommand::IntegrityCheck => {
            let report = storage.integrity_check()?;
            emit_json(
                serde_json::to_value(&report).context("failed to serialize integrity report")?,
            )
        }
    }
}

fn run_db_migrate(args: &DbMigrateArgs, storage: &mut SqliteStorage) -> Result<()> {
    let before = storage.schema_status()?;
    if args.dry_run {
        return emit_json(serde_json::json!({
            "dry_run": true,
            "current_version": before.current_version,
            "target_version": before.target_version,
            "would_apply_versions": before.pending_versions
        }));
    }

    storage.migrate()?;
    let after = storage.schema_status()?;
    emit_json(serde_json::json!({
        "dry_run": false,
        "before_version": before.current_version,
        "applied_versions": before.pending_versions,
        "after_version": after.current_version,
        "target_version": after.target_version,
        "up_to_date": after.pending_versions.is_empty()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_accepts_names_and_shortcuts() {
        assert_eq!(parse_category("Wise"), Ok(Category::Wise));
        assert_eq!(parse_category(" 2 "), Ok(Category::Sarcastic));
        assert!(parse_category("6").is_err());
        assert!(parse_category("grumpy").is_err());
    }

    #[test]
    fn session_commands_parse() {
        assert_eq!(parse_session_command("next 1"), Ok(SessionCommand::Next(Category::Warm)));
        assert_eq!(parse_session_command("stats"), Ok(SessionCommand::Stats(None)));
        assert_eq!(
            parse_session_command("stats formal"),
            Ok(SessionCommand::Stats(Some(Category::Formal)))
        );
        assert_eq!(parse_session_command("reset 4"), Ok(SessionCommand::Reset(Category::Humorous)));
        assert_eq!(parse_session_command("reset-all"), Ok(SessionCommand::ResetAll));
        assert_eq!(parse_session_command("exit"), Ok(SessionCommand::Quit));
        assert!(parse_session_command("next").is_err());
        assert!(parse_session_command("next warm wise").is_err());
        assert!(parse_session_command("dance").is_err());
    }

    #[test]
    fn session_writes_one_line_per_command_until_quit() {
        let mut catalog = Catalog::detached(StoreConfig::default());
        catalog.load();
        let mut engine = SelectionEngine::seeded(1);
        let mut out = Vec::new();

        let script = "next formal\n\nbogus\nquit\nnext formal\n";
        if let Err(err) = run_session(script.as_bytes(), &mut out, &catalog, &mut engine) {
            panic!("session should succeed: {err:#}");
        }

        let text = String::from_utf8_lossy(&out);
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"category\":\"formal\""));
        assert!(lines[1].contains("unknown session command: bogus"));
        assert_eq!(engine.history(Category::Formal).len(), 1);
    }
}
