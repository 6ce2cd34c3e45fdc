use anyhow::{anyhow, bail, Context, Result};
use chi_forms::form::FormSession;
use chi_forms::model::SortOrder;
use chi_forms::services::cache::{CachedStore, FileStorage, KeyValueStorage, MemoryStorage};
use chi_forms::services::command_store::CommandStore;
use chi_forms::services::loader::{load_document, load_form_schema, load_table_schema};
use chi_forms::services::store::{RecordStore, StoreRegistry};
use chi_forms::table::query::{build_list_params, build_query_url, FilterModel, TableState};
use chi_forms::table::{render_cell, visible_columns, TableController};
use chi_forms::{EngineConfig, TableSchema};
use clap::{Parser, Subcommand};
use serde_json::{json, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chi-forms", version, about = "Check schemas and preview form and table requests")]
struct Cli {
    /// Engine config file (YAML)
    #[arg(long, env = "CHI_FORMS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a form or table schema
    Check { schema: PathBuf },
    /// Print the list query parameters for a table state
    Params {
        schema: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long)]
        rows: Option<usize>,
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        desc: bool,
        #[arg(long)]
        search: Option<String>,
        /// Column filter as key=value (value parsed as JSON when possible)
        #[arg(long = "filter", value_parser = parse_key_value)]
        filters: Vec<(String, JsonValue)>,
        /// Also print `<base-url>?<query>`
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Hydrate a record, apply edits, print validation and the payload
    Diff {
        schema: PathBuf,
        #[arg(long, conflicts_with = "create")]
        record: Option<PathBuf>,
        /// JSON/YAML object of field key → new value
        #[arg(long)]
        edits: PathBuf,
        #[arg(long)]
        create: bool,
    },
    /// Fetch one page through a record command and print the visible columns
    List {
        schema: PathBuf,
        /// Record command, e.g. "${APP_BIN} business"
        #[arg(long = "cmd")]
        cmdline: String,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long)]
        search: Option<String>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, JsonValue), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    let value = serde_json::from_str(v).unwrap_or_else(|_| JsonValue::String(v.to_string()));
    Ok((k.trim().to_string(), value))
}

fn print_json(v: &JsonValue) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

fn check(path: &Path) -> Result<()> {
    let doc = load_document(path)?;
    if doc.get("columns").is_some() {
        let schema = load_table_schema(path)?;
        println!(
            "table '{}': {} columns, {} visible",
            schema.name,
            schema.columns.len(),
            visible_columns(&schema).len()
        );
    } else {
        let schema = load_form_schema(path)?;
        let fields: usize = schema
            .sections
            .iter()
            .flat_map(|s| &s.rows)
            .map(|r| r.cols.len())
            .sum();
        println!(
            "form '{}': {} sections, {} fields",
            schema.name,
            schema.sections.len(),
            fields
        );
    }
    Ok(())
}

fn initial_state(schema: &TableSchema, config: &EngineConfig) -> TableState {
    let mut state = TableState {
        rows_per_page: schema.page_size.unwrap_or(config.page_size),
        ..Default::default()
    };
    if let Some(d) = &schema.default_sort {
        state.sort_field = Some(d.field.clone());
        state.sort_order = d.order;
    }
    state
}

#[allow(clippy::too_many_arguments)]
fn params(
    config: &EngineConfig,
    path: &Path,
    page: usize,
    rows: Option<usize>,
    sort: Option<String>,
    desc: bool,
    search: Option<String>,
    filters: Vec<(String, JsonValue)>,
    base_url: Option<String>,
) -> Result<()> {
    let schema = load_table_schema(path)?;
    let mut state = initial_state(&schema, config);
    if let Some(rows) = rows.filter(|r| *r > 0) {
        state.rows_per_page = rows;
    }
    state.first = page.saturating_sub(1) * state.rows_per_page;
    if let Some(field) = sort {
        state.sort_field = Some(field);
        state.sort_order = SortOrder::Asc;
    }
    if desc {
        state.sort_order = SortOrder::Desc;
    }
    state.search_value = search.unwrap_or_default();
    for (k, v) in filters {
        state.filters.insert(k, FilterModel::value(v));
    }
    let query = build_list_params(&schema, &state);
    print_json(&JsonValue::Object(query.clone()))?;
    if let Some(base) = base_url {
        println!("{}", build_query_url(&base, &query));
    }
    Ok(())
}

fn diff(
    config: EngineConfig,
    path: &Path,
    record: Option<PathBuf>,
    edits: &Path,
    create: bool,
) -> Result<()> {
    let schema = load_form_schema(path)?;
    let record = match (record, create) {
        (Some(p), _) => Some(load_document(&p)?),
        (None, true) => None,
        (None, false) => bail!("pass --record <file> or --create"),
    };
    let edits = load_document(edits)?;
    let edits = edits
        .as_object()
        .ok_or_else(|| anyhow!("edits must be an object of field key → value"))?;

    let mut session = FormSession::new(
        schema,
        Arc::new(StoreRegistry::new()),
        config,
        record.as_ref(),
    )?;
    for (key, value) in edits {
        session
            .set(key, value)
            .with_context(|| format!("applying edit to '{key}'"))?;
    }
    let valid = session.validate();
    let errors: serde_json::Map<String, JsonValue> = session
        .visible_errors()
        .into_iter()
        .map(|(k, msg)| (k, JsonValue::String(msg)))
        .collect();
    print_json(&json!({
        "mode": format!("{:?}", session.mode()).to_lowercase(),
        "valid": valid,
        "dirty": session.is_dirty(),
        "errors": errors,
        "payload": session.payload(),
    }))
}

fn list(
    config: EngineConfig,
    path: &Path,
    cmdline: &str,
    page: usize,
    search: Option<String>,
) -> Result<()> {
    let schema = load_table_schema(path)?;
    let name = schema.store.clone().unwrap_or_else(|| schema.name.clone());
    let storage: Arc<dyn KeyValueStorage> = match &config.cache_dir {
        Some(dir) => Arc::new(FileStorage::new(dir)?),
        None => Arc::new(MemoryStorage::default()),
    };
    let inner: Arc<dyn RecordStore> = Arc::new(CommandStore::new(&name, cmdline)?);
    let store = Arc::new(CachedStore::new(&name, inner, storage, config.cache_ttl));

    let mut table = TableController::new(schema, store, &config)?;
    table.filters.search_value = search.unwrap_or_default();
    table.pagination.start_at_page(page);
    table.load()?;

    let cols = visible_columns(table.schema());
    let header: Vec<&str> = cols
        .iter()
        .map(|c| c.header.as_deref().or(c.key()).unwrap_or(""))
        .collect();
    println!("{}", header.join("\t"));
    for row in table.rows() {
        let cells: Vec<String> = cols.iter().map(|c| render_cell(c, row).text).collect();
        println!("{}", cells.join("\t"));
    }
    let p = &table.pagination;
    println!(
        "{}-{} of {} (page {}/{})",
        p.start_item(),
        p.end_item(),
        p.total_records,
        p.current_page(),
        p.total_pages()
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Check { schema } => check(&schema),
        Commands::Params {
            schema,
            page,
            rows,
            sort,
            desc,
            search,
            filters,
            base_url,
        } => params(&config, &schema, page, rows, sort, desc, search, filters, base_url),
        Commands::Diff {
            schema,
            record,
            edits,
            create,
        } => diff(config, &schema, record, &edits, create),
        Commands::List {
            schema,
            cmdline,
            page,
            search,
        } => list(config, &schema, &cmdline, page, search),
    }
}
