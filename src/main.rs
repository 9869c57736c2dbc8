//! tracedb: load, inspect, query and convert WTF trace files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use tracedb::db::cursor::EventIter;
use tracedb::db::SourceStatus;
use tracedb::synth::{generate_trace, SynthOptions};
use tracedb::{export_container, load_file, Config, Database, EventCursor, Filter, FilterOutcome, SortMode};

#[derive(Parser)]
#[command(name = "tracedb")]
#[command(about = "Load, query and convert WTF trace files")]
#[command(version)]
struct Cli {
    /// Engine config file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Events per storage chunk
    #[arg(long, global = true)]
    chunk_capacity: Option<usize>,

    /// Width of the initial summary root, in microseconds
    #[arg(long, global = true)]
    summary_root_granularity: Option<u64>,

    /// Narrowest summary node, in microseconds
    #[arg(long, global = true)]
    summary_finest_granularity: Option<u64>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show sources, zones and totals of a trace
    Info {
        /// Trace file (binary container or JSON)
        trace: PathBuf,
    },

    /// Print events in time order, indented by scope depth
    Dump {
        trace: PathBuf,

        /// Only events of the zone with this name
        #[arg(long)]
        zone: Option<String>,

        /// First start time to include, in microseconds
        #[arg(long)]
        start: Option<u64>,

        /// Start times at or past this are excluded, in microseconds
        #[arg(long)]
        end: Option<u64>,

        /// Filter expression
        #[arg(long)]
        filter: Option<String>,

        /// Include builtin and internal events
        #[arg(long)]
        all: bool,

        /// Output format: table, csv, json
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Run a filter expression against every zone
    Query {
        trace: PathBuf,

        /// Filter expression, e.g. `/^app#/(frame > 10)`
        expression: String,

        /// Output format: table, csv, json
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Count events starting in a time range using the summary index
    Summary {
        trace: PathBuf,
        start: u64,
        end: u64,
    },

    /// List time ranges intersecting a time range
    Ranges {
        trace: PathBuf,

        #[arg(long)]
        start: Option<u64>,

        #[arg(long)]
        end: Option<u64>,

        /// Output format: table, csv, json
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Per-event-type statistics
    Stats {
        trace: PathBuf,

        /// Sort order: any, count, total, mean, own
        #[arg(long, default_value = "count")]
        sort: SortMode,

        /// Filter expression
        #[arg(long)]
        filter: Option<String>,

        #[arg(long)]
        start: Option<u64>,

        #[arg(long)]
        end: Option<u64>,

        /// Output format: table, csv, json
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Re-encode a trace as a chunked binary container
    Convert {
        input: PathBuf,
        output: PathBuf,
    },

    /// Write a random, well-nested trace
    Generate {
        output: PathBuf,

        #[arg(long, default_value_t = 10_000)]
        events: usize,

        #[arg(long, default_value_t = 8)]
        max_depth: usize,

        #[arg(long, default_value_t = 1)]
        zones: usize,

        /// RNG seed; random when omitted
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::metadata::LevelFilter::WARN,
        1 => tracing::metadata::LevelFilter::INFO,
        2 => tracing::metadata::LevelFilter::DEBUG,
        _ => tracing::metadata::LevelFilter::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(value) = cli.chunk_capacity {
        config.chunk_capacity = value;
    }
    if let Some(value) = cli.summary_root_granularity {
        config.summary_root_granularity = value;
    }
    if let Some(value) = cli.summary_finest_granularity {
        config.summary_finest_granularity = value;
    }
    config.validate().context("Invalid config overrides")?;
    Ok(config)
}

fn open_trace(trace: &Path, config: &Config) -> Result<Database> {
    if !trace.exists() {
        bail!("Trace not found: {}", trace.display());
    }
    let mut db = Database::new(config);
    load_file(&mut db, trace, config)?;
    Ok(db)
}

fn build_filter(expression: Option<&str>) -> Result<Filter> {
    let mut filter = Filter::new();
    if let Some(expression) = expression {
        if let FilterOutcome::Failed(detail) = filter.set_from_string(expression) {
            bail!("Invalid filter '{}': {}", expression, detail);
        }
    }
    Ok(filter)
}

fn time_bounds(db: &Database, start: Option<u64>, end: Option<u64>) -> (u64, u64) {
    let start = start.unwrap_or(0);
    let end = end.unwrap_or(db.last_event_time().saturating_add(1));
    (start, end)
}

fn status_text(status: &SourceStatus) -> String {
    match status {
        SourceStatus::Loading => "loading".to_string(),
        SourceStatus::Loaded => "loaded".to_string(),
        SourceStatus::Failed(detail) => format!("failed: {detail}"),
    }
}

fn args_text(event: &EventCursor<'_>) -> String {
    event.args().map(|a| a.to_json().to_string()).unwrap_or_default()
}

fn event_row(zone: &str, event: &EventCursor<'_>, indent: bool) -> Vec<String> {
    let name = if indent {
        format!("{}{}", "  ".repeat(event.depth() as usize), event.name())
    } else {
        event.name().to_string()
    };
    let (total, own) = if event.is_scope() {
        (event.total_duration().to_string(), event.own_duration().to_string())
    } else {
        (String::new(), String::new())
    };
    vec![
        zone.to_string(),
        event.time().to_string(),
        name,
        total,
        own,
        event.depth().to_string(),
        args_text(event),
    ]
}

const EVENT_COLUMNS: [&str; 7] = ["zone", "time", "name", "total", "own", "depth", "args"];

fn run_info(trace: &Path, config: &Config) -> Result<()> {
    let db = open_trace(trace, config)?;

    let headers = columns(&["source", "status", "units", "timebase_ms", "offset_us"]);
    let rows: Vec<Vec<String>> = db
        .sources()
        .iter()
        .map(|s| {
            vec![
                s.name.clone(),
                status_text(&s.status),
                s.units.to_string(),
                s.timebase.to_string(),
                s.time_offset.to_string(),
            ]
        })
        .collect();
    print_table(&headers, &rows);
    println!();

    let headers = columns(&["zone", "name", "type", "location", "events", "max_depth", "ranges", "marks", "frames"]);
    let rows: Vec<Vec<String>> = db
        .zones()
        .iter()
        .map(|z| {
            vec![
                z.id.to_string(),
                z.name.clone(),
                z.zone_type.clone(),
                z.location.clone(),
                z.store().total_event_count().to_string(),
                z.store().maximum_scope_depth().to_string(),
                z.time_ranges().len().to_string(),
                z.marks().len().to_string(),
                z.frames().len().to_string(),
            ]
        })
        .collect();
    print_table(&headers, &rows);
    println!();

    println!("units:        {}", db.units());
    println!("event types:  {}", db.types().len());
    println!("events:       {}", db.total_event_count());
    println!("first time:   {}us", db.first_event_time());
    println!("last time:    {}us", db.last_event_time());
    println!("resources:    {}", db.resources().len());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_dump(
    trace: &Path,
    config: &Config,
    zone: Option<&str>,
    start: Option<u64>,
    end: Option<u64>,
    filter: Option<&str>,
    all: bool,
    format: &str,
) -> Result<()> {
    let db = open_trace(trace, config)?;
    let filter = build_filter(filter)?;
    if let Some(name) = zone {
        if db.find_zone(name).is_none() {
            bail!("No zone named '{}'", name);
        }
    }
    let (start, end) = time_bounds(&db, start, end);

    let mask = filter.type_mask(db.types());
    let mut rows = Vec::new();
    for z in db.zones() {
        if zone.is_some_and(|name| z.name != name) {
            continue;
        }
        let store = z.store();
        for event in EventIter::new(store, store.range(start, end)?) {
            if !all && event.event_type().is_hidden() {
                continue;
            }
            if !filter.matches_with(&mask, &event) {
                continue;
            }
            rows.push(event_row(&z.name, &event, format == "table"));
        }
    }
    output_rows(&columns(&EVENT_COLUMNS), &rows, format)
}

fn run_query(trace: &Path, config: &Config, expression: &str, format: &str) -> Result<()> {
    let db = open_trace(trace, config)?;
    let result = db.query(expression)?;

    if format == "csv" {
        println!("{}", result.dump_csv(db.zones()));
    } else {
        let mut rows = Vec::new();
        for zone in db.zones() {
            for event in result.events(zone) {
                rows.push(event_row(&zone.name, &event, false));
            }
        }
        output_rows(&columns(&EVENT_COLUMNS), &rows, format)?;
    }
    eprintln!(
        "\n{} matches for '{}' in {:?}",
        result.len(),
        result.expression(),
        result.duration()
    );
    Ok(())
}

fn run_summary(trace: &Path, config: &Config, start: u64, end: u64) -> Result<()> {
    if end < start {
        bail!("End time {} is before start time {}", end, start);
    }
    let db = open_trace(trace, config)?;
    let summary = db.query_summary(start, end);
    println!("time_start:        {}", summary.time_start);
    println!("time_end:          {}", summary.time_end);
    println!("total_event_count: {}", summary.total_event_count);
    Ok(())
}

fn run_ranges(
    trace: &Path,
    config: &Config,
    start: Option<u64>,
    end: Option<u64>,
    format: &str,
) -> Result<()> {
    let db = open_trace(trace, config)?;
    let (start, end) = time_bounds(&db, start, end);

    let mut rows = Vec::new();
    for zone in db.zones() {
        zone.time_ranges().for_each_intersecting(start, end, |range| {
            rows.push(vec![
                zone.name.clone(),
                range.id.to_string(),
                range.name.clone(),
                range.time.to_string(),
                range.end_time.map(|t| t.to_string()).unwrap_or_default(),
                range.duration().map(|d| d.to_string()).unwrap_or_default(),
                range.level.to_string(),
            ]);
        });
    }
    let headers = columns(&["zone", "id", "name", "time", "end_time", "duration", "level"]);
    output_rows(&headers, &rows, format)
}

#[allow(clippy::too_many_arguments)]
fn run_stats(
    trace: &Path,
    config: &Config,
    sort: SortMode,
    filter: Option<&str>,
    start: Option<u64>,
    end: Option<u64>,
    format: &str,
) -> Result<()> {
    let db = open_trace(trace, config)?;
    let filter = build_filter(filter)?;
    let (start, end) = time_bounds(&db, start, end);
    let mut table = db.statistics(start, end, Some(&filter))?;
    table.sort(sort);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(table.entries())?);
        return Ok(());
    }
    let rows: Vec<Vec<String>> = table
        .entries()
        .iter()
        .map(|e| {
            let (total, own, user) = match &e.scope {
                Some(t) => (t.total_time.to_string(), t.own_time.to_string(), t.user_time.to_string()),
                None => Default::default(),
            };
            let mean = if e.is_scope() {
                format!("{:.1}", e.mean_time())
            } else {
                String::new()
            };
            vec![e.name().to_string(), e.count.to_string(), total, own, user, mean]
        })
        .collect();
    let headers = columns(&["name", "count", "total", "own", "user", "mean"]);
    output_rows(&headers, &rows, format)?;
    eprintln!(
        "\n{} events in [{}, {})",
        table.event_count(),
        table.start_time(),
        table.end_time()
    );
    Ok(())
}

fn run_convert(input: &Path, output: &Path, config: &Config) -> Result<()> {
    let db = open_trace(input, config)?;
    let bytes = export_container(&db).with_context(|| format!("Failed to encode {}", input.display()))?;
    fs::write(output, &bytes).with_context(|| format!("Failed to write {}", output.display()))?;
    eprintln!(
        "Wrote {} events ({} bytes) to {}",
        db.total_event_count(),
        bytes.len(),
        output.display()
    );
    Ok(())
}

fn run_generate(output: &Path, options: SynthOptions, seed: Option<u64>) -> Result<()> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let (bytes, summary) = generate_trace(&options, &mut rng)?;
    fs::write(output, &bytes).with_context(|| format!("Failed to write {}", output.display()))?;
    eprintln!(
        "Wrote {} scopes, {} instances and {} marks to {}",
        summary.scopes,
        summary.instances,
        summary.marks,
        output.display()
    );
    Ok(())
}

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn output_rows(headers: &[String], rows: &[Vec<String>], format: &str) -> Result<()> {
    match format {
        "csv" => {
            println!("{}", headers.join(","));
            for row in rows {
                let quoted: Vec<String> = row.iter().map(|v| csv_field(v)).collect();
                println!("{}", quoted.join(","));
            }
        }
        "json" => {
            let json_rows: Vec<Value> = rows
                .iter()
                .map(|row| {
                    let obj: serde_json::Map<String, Value> = headers
                        .iter()
                        .zip(row.iter())
                        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                        .collect();
                    Value::Object(obj)
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json_rows)?);
        }
        "table" => print_table(headers, rows),
        other => bail!("Unknown output format '{}'", other),
    }
    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

const MAX_COLUMN_WIDTH: usize = 60;

fn print_table(headers: &[String], rows: &[Vec<String>]) {
    if rows.is_empty() {
        println!("(no results)");
        return;
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, val) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(val.chars().count());
            }
        }
    }

    for w in &mut widths {
        *w = (*w).min(MAX_COLUMN_WIDTH);
    }

    let header_line: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths.get(i).copied().unwrap_or(10)))
        .collect();
    println!("{}", header_line.join(" | "));

    let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    println!("{}", sep.join("-+-"));

    for row in rows {
        let row_line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let width = widths.get(i).copied().unwrap_or(10);
                let truncated = if v.chars().count() > width && width > 3 {
                    let head: String = v.chars().take(width - 3).collect();
                    format!("{head}...")
                } else {
                    v.clone()
                };
                format!("{truncated:width$}")
            })
            .collect();
        println!("{}", row_line.join(" | "));
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Info { trace } => run_info(&trace, &config),
        Commands::Dump {
            trace,
            zone,
            start,
            end,
            filter,
            all,
            format,
        } => run_dump(
            &trace,
            &config,
            zone.as_deref(),
            start,
            end,
            filter.as_deref(),
            all,
            &format,
        ),
        Commands::Query {
            trace,
            expression,
            format,
        } => run_query(&trace, &config, &expression, &format),
        Commands::Summary { trace, start, end } => run_summary(&trace, &config, start, end),
        Commands::Ranges {
            trace,
            start,
            end,
            format,
        } => run_ranges(&trace, &config, start, end, &format),
        Commands::Stats {
            trace,
            sort,
            filter,
            start,
            end,
            format,
        } => run_stats(&trace, &config, sort, filter.as_deref(), start, end, &format),
        Commands::Convert { input, output } => run_convert(&input, &output, &config),
        Commands::Generate {
            output,
            events,
            max_depth,
            zones,
            seed,
        } => run_generate(
            &output,
            SynthOptions {
                events,
                max_depth,
                zones,
                ..SynthOptions::default()
            },
            seed,
        ),
    }
}
