//! SeriesDB CLI
//!
//! Command-line interface over the read path:
//! - Generate a sample series file
//! - Inspect file, device and chunk metadata
//! - Query series files with a filter expression
//! - Expand schema path patterns

use anyhow::{bail, Context};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use seriesdb::config::{generate_default_config, Config, LoggingConfig};
use seriesdb::metadata::{
    ChunkMetadataResolver, FileMetadataReader, SeriesFileReader, SeriesFileWriter,
};
use seriesdb::query::{
    parse_expression, DataSource, FileSource, QueryContext, SourceRegistry, TimeGenerator,
};
use seriesdb::schema::{
    Compression, DataType, Encoding, MeasurementSchema, SchemaError, SchemaTree, SeriesPath,
    TimeValuePair, Value,
};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Base timestamp of generated data: 2024-01-01T00:00:00Z
const SAMPLE_EPOCH_MS: i64 = 1_704_067_200_000;

#[derive(Parser)]
#[command(name = "seriesdb")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Read-path tools for SeriesDB series files")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (default: standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a sample series file
    Generate {
        /// Output file
        file: PathBuf,
        /// Storage group of the generated devices
        #[arg(long, default_value = "root.sg")]
        storage_group: String,
        /// Number of devices
        #[arg(long, default_value = "2")]
        devices: usize,
        /// Points per chunk
        #[arg(long, default_value = "100")]
        points: usize,
        /// Chunk groups per device
        #[arg(long, default_value = "2")]
        groups: usize,
        /// Version of the first chunk group
        #[arg(long, default_value = "1")]
        version: u64,
        /// Added to every generated value
        #[arg(long, default_value = "0")]
        offset: i64,
    },

    /// Show file, device and chunk metadata
    Inspect {
        /// Series file
        file: PathBuf,
        /// Byte window start (exclusive)
        #[arg(long, requires = "partition_end")]
        partition_start: Option<u64>,
        /// Byte window end (inclusive)
        #[arg(long, requires = "partition_start")]
        partition_end: Option<u64>,
    },

    /// Evaluate a filter expression over series files
    Query {
        /// Sequence series file
        file: PathBuf,
        /// Filter expression, e.g. "root.sg.d0.s0 > 10 OR root.sg.d1.s0"
        #[arg(short, long = "where")]
        expression: String,
        /// Storage group governing the files
        #[arg(short, long)]
        storage_group: String,
        /// Unsequence series files, in arrival order
        #[arg(short, long)]
        overflow: Vec<PathBuf>,
        /// Output format (table, csv, json)
        #[arg(short, long, default_value = "table")]
        format: String,
        /// Maximum rows (default: from config)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Expand a path pattern against the schema of a file
    Schema {
        /// Path pattern, e.g. "root.sg.*.s0"
        pattern: String,
        /// Series file
        #[arg(long)]
        file: PathBuf,
        /// Storage group governing the file
        #[arg(long)]
        storage_group: String,
    },

    /// Print or write a default configuration file
    Config {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Generate {
            file,
            storage_group,
            devices,
            points,
            groups,
            version,
            offset,
        } => {
            let layout = SampleLayout {
                storage_group,
                devices,
                points,
                groups,
                version,
                offset,
            };
            generate_sample(&file, &layout)?;
            println!(
                "Wrote {} devices x {} groups x {} points to {:?}",
                devices, groups, points, file
            );
        }

        Commands::Inspect {
            file,
            partition_start,
            partition_end,
        } => {
            inspect(&file, &config, partition_start, partition_end)?;
        }

        Commands::Query {
            file,
            expression,
            storage_group,
            overflow,
            format,
            limit,
        } => {
            let limit = limit.unwrap_or(config.query.row_limit);
            let (paths, rows) =
                run_query(&config, &file, &overflow, &storage_group, &expression, limit)?;
            match format.as_str() {
                "table" => print_table(&paths, &rows),
                "csv" => print_csv(&paths, &rows)?,
                "json" => print_json(&paths, &rows)?,
                other => bail!("Unknown output format: {} (use table, csv or json)", other),
            }
        }

        Commands::Schema {
            pattern,
            file,
            storage_group,
        } => {
            let schema = SchemaTree::new(config.schema.root_name.clone());
            schema.set_storage_group(&storage_group)?;
            let reader = SeriesFileReader::open(&file)?;
            declare_file_schema(&schema, &reader, &storage_group)?;

            let expanded = schema.expand_wildcard(&pattern)?;
            if expanded.is_empty() {
                println!("No series match {}", pattern);
            }
            for (device, measurements) in expanded {
                println!("{}", device);
                for measurement in measurements {
                    let path = format!("{}.{}", device, measurement);
                    let record = schema.schema_of(&path)?;
                    println!(
                        "  {:<16} {:<8} {:<8} {}",
                        measurement, record.data_type, record.encoding, record.compression
                    );
                }
            }
        }

        Commands::Config { output } => {
            let config = generate_default_config();

            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("seriesdb={}", config.level)));

    let writer = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .init();
    }
    Ok(())
}

// ==================== Generate ====================

struct SampleLayout {
    storage_group: String,
    devices: usize,
    points: usize,
    groups: usize,
    version: u64,
    offset: i64,
}

/// Device `d{i}` gets an INT64 series `s0` and a DOUBLE series `s1`
fn generate_sample(path: &Path, layout: &SampleLayout) -> anyhow::Result<()> {
    if layout.points == 0 {
        bail!("--points must be at least 1");
    }

    let mut writer = SeriesFileWriter::create(path)?;
    writer.register_measurement(
        "s0",
        MeasurementSchema::new(DataType::Int64, Encoding::Ts2diff, Compression::Lz4),
    );
    writer.register_measurement(
        "s1",
        MeasurementSchema::new(DataType::Double, Encoding::Gorilla, Compression::Lz4),
    );

    for group in 0..layout.groups {
        for device in 0..layout.devices {
            let device_id = format!("{}.d{}", layout.storage_group, device);
            writer.start_chunk_group(&device_id, layout.version + group as u64)?;

            let base = (group * layout.points) as i64;
            let s0: Vec<TimeValuePair> = (0..layout.points as i64)
                .map(|i| {
                    let n = base + i;
                    TimeValuePair::new(
                        SAMPLE_EPOCH_MS + n * 1000,
                        Value::Int64(n * (device as i64 + 1) + layout.offset),
                    )
                })
                .collect();
            let s1: Vec<TimeValuePair> = s0
                .iter()
                .map(|p| {
                    let n = (p.timestamp - SAMPLE_EPOCH_MS) / 1000;
                    TimeValuePair::new(
                        p.timestamp,
                        Value::Double((n as f64 / 10.0).sin() * 100.0 + layout.offset as f64),
                    )
                })
                .collect();

            writer.write_chunk("s0", &s0)?;
            writer.write_chunk("s1", &s1)?;
            writer.end_chunk_group()?;
        }
    }

    writer.finish()?;
    Ok(())
}

// ==================== Inspect ====================

fn inspect(
    path: &Path,
    config: &Config,
    partition_start: Option<u64>,
    partition_end: Option<u64>,
) -> anyhow::Result<()> {
    let reader = Arc::new(SeriesFileReader::open(path)?);
    let mut options = config.metadata.resolver_options();
    if let (Some(start), Some(end)) = (partition_start, partition_end) {
        options = options.partition(start, end);
    }
    let resolver = ChunkMetadataResolver::with_options(reader.clone(), options)?;
    let metadata = resolver.file_metadata();

    println!("File: {:?} ({} bytes)", reader.path(), reader.len());
    if let Some(created_by) = &metadata.created_by {
        println!("Created by: {}", created_by);
    }
    if let Some(window) = resolver.partition() {
        println!("Partition: ({}, {}]", window.start, window.end);
    }

    println!();
    println!("{:<16} {:<8} {:<8} {}", "Measurement", "Type", "Encoding", "Compression");
    println!("{}", "-".repeat(48));
    let mut measurements: Vec<_> = metadata.measurements.iter().collect();
    measurements.sort_by(|a, b| a.0.cmp(b.0));
    for (name, schema) in measurements {
        println!(
            "{:<16} {:<8} {:<8} {}",
            name, schema.data_type, schema.encoding, schema.compression
        );
    }

    println!();
    println!(
        "{:<24} {:<24} {:<24} {:>7} {:>7}",
        "Series", "Start", "End", "Chunks", "Points"
    );
    println!("{}", "-".repeat(90));
    for (device_id, entry) in &metadata.devices {
        let device = reader.read_device_metadata(entry)?;
        let mut names: Vec<&str> = device
            .chunk_groups
            .iter()
            .flat_map(|g| g.chunks.iter().map(|c| c.measurement_id.as_str()))
            .collect();
        names.sort_unstable();
        names.dedup();

        for name in names {
            let path = SeriesPath::from_device(device_id, name)?;
            let chunks = resolver.chunk_descriptors(&path)?;
            let points: u64 = chunks.iter().map(|c| c.num_points).sum();
            let start = chunks.iter().map(|c| c.start_time).min();
            let end = chunks.iter().map(|c| c.end_time).max();
            println!(
                "{:<24} {:<24} {:<24} {:>7} {:>7}",
                path.to_string(),
                start.map(format_timestamp).unwrap_or_else(|| "-".to_string()),
                end.map(format_timestamp).unwrap_or_else(|| "-".to_string()),
                chunks.len(),
                points
            );
        }
    }

    let stats = resolver.cache_stats();
    tracing::debug!("Resolver cache: {} entries, {} misses", stats.entries, stats.misses);
    Ok(())
}

// ==================== Query ====================

/// Declare every series of `reader` in `schema` under `storage_group`
fn declare_file_schema(
    schema: &SchemaTree,
    reader: &SeriesFileReader,
    storage_group: &str,
) -> anyhow::Result<usize> {
    let metadata = reader.read_file_metadata()?;
    let mut declared = 0;

    for (device_id, entry) in &metadata.devices {
        if schema.storage_group_of(device_id).ok().as_deref() != Some(storage_group) {
            tracing::warn!(
                "Device {} of {:?} is outside storage group {}, skipping",
                device_id,
                reader.path(),
                storage_group
            );
            continue;
        }

        let device = reader.read_device_metadata(entry)?;
        for chunk in device.chunk_groups.iter().flat_map(|g| g.chunks.iter()) {
            let record = metadata
                .measurements
                .get(&chunk.measurement_id)
                .cloned()
                .unwrap_or_else(|| {
                    MeasurementSchema::new(chunk.data_type, Encoding::Plain, Compression::Lz4)
                });
            let path = format!("{}.{}", device_id, chunk.measurement_id);
            match schema.add_measurement(&path, record) {
                Ok(()) => declared += 1,
                Err(SchemaError::Conflict(reason)) => {
                    tracing::warn!("Keeping existing schema of {}: {}", path, reason)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(declared)
}

type Row = (i64, Vec<Option<Value>>);

fn run_query(
    config: &Config,
    file: &Path,
    overflow: &[PathBuf],
    storage_group: &str,
    expression: &str,
    limit: usize,
) -> anyhow::Result<(Vec<SeriesPath>, Vec<Row>)> {
    let expression = parse_expression(expression)?;

    let schema = match &config.schema.snapshot_path {
        Some(snapshot) => SchemaTree::load(snapshot)?,
        None => SchemaTree::new(config.schema.root_name.clone()),
    };
    if !schema.is_storage_group(storage_group) {
        schema.set_storage_group(storage_group)?;
    }

    let open = |path: &Path| -> anyhow::Result<(Arc<SeriesFileReader>, Arc<ChunkMetadataResolver>)> {
        let reader = Arc::new(
            SeriesFileReader::open(path).with_context(|| format!("Failed to open {:?}", path))?,
        );
        declare_file_schema(&schema, &reader, storage_group)?;
        let resolver = Arc::new(ChunkMetadataResolver::with_options(
            reader.clone(),
            config.metadata.resolver_options(),
        )?);
        Ok((reader, resolver))
    };

    let (reader, resolver) = open(file)?;
    let mut sources = vec![(file.to_path_buf(), reader, resolver, false)];
    for path in overflow {
        let (reader, resolver) = open(path)?;
        sources.push((path.clone(), reader, resolver, true));
    }

    let registry = Arc::new(SourceRegistry::new(Arc::new(schema)));
    for (path, reader, resolver, unsequence) in sources {
        let source = DataSource::File(FileSource::new(
            path.to_string_lossy(),
            resolver,
            reader,
        ));
        if unsequence {
            registry.register_unsequence(storage_group, source)?;
        } else {
            registry.register_sequence(storage_group, source)?;
        }
    }

    let context = QueryContext::new();
    tracing::info!("Query {} started: {}", context.id, expression);

    let paths = expression.series_paths();
    let mut generator =
        TimeGenerator::new(registry, &expression, context, config.query.prefetch)?;

    let mut rows = Vec::new();
    while rows.len() < limit && generator.has_next()? {
        let timestamp = generator.next_timestamp()?;
        let values = paths.iter().map(|p| generator.value(p).cloned()).collect();
        rows.push((timestamp, values));
    }

    tracing::info!("Query {} returned {} rows", generator.context().id, rows.len());
    Ok((paths, rows))
}

// ==================== Output ====================

fn format_timestamp(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn format_value(value: &Option<Value>) -> String {
    match value {
        Some(Value::Double(v)) => format!("{:.3}", v),
        Some(Value::Float(v)) => format!("{:.3}", v),
        Some(v) => v.to_string(),
        None => "-".to_string(),
    }
}

fn print_table(paths: &[SeriesPath], rows: &[Row]) {
    if rows.is_empty() {
        println!("No matching timestamps");
        return;
    }

    // Header
    print!("{:<24}", "Time");
    for path in paths {
        print!(" | {:<16}", path.to_string());
    }
    println!();

    // Separator
    println!("{}", "-".repeat(24 + paths.len() * 19));

    // Data rows
    for (timestamp, values) in rows {
        print!("{:<24}", format_timestamp(*timestamp));
        for value in values {
            print!(" | {:<16}", format_value(value));
        }
        println!();
    }
    println!();
    println!("{} rows", rows.len());
}

fn print_csv(paths: &[SeriesPath], rows: &[Row]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(std::io::stdout());

    let mut header = vec!["timestamp".to_string()];
    header.extend(paths.iter().map(|p| p.to_string()));
    writer.write_record(&header)?;

    for (timestamp, values) in rows {
        let mut record = vec![timestamp.to_string()];
        record.extend(values.iter().map(|v| match v {
            Some(value) => value.to_string(),
            None => String::new(),
        }));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn json_value(value: &Option<Value>) -> serde_json::Value {
    match value {
        None => serde_json::Value::Null,
        Some(Value::Boolean(v)) => serde_json::json!(v),
        Some(Value::Int32(v)) => serde_json::json!(v),
        Some(Value::Int64(v)) => serde_json::json!(v),
        Some(Value::Float(v)) => serde_json::json!(v),
        Some(Value::Double(v)) => serde_json::json!(v),
        Some(Value::Text(v)) => serde_json::json!(v),
    }
}

fn print_json(paths: &[SeriesPath], rows: &[Row]) -> anyhow::Result<()> {
    let rows: Vec<serde_json::Value> = rows
        .iter()
        .map(|(timestamp, values)| {
            let mut row = serde_json::Map::new();
            row.insert("timestamp".to_string(), serde_json::json!(timestamp));
            row.insert("time".to_string(), serde_json::json!(format_timestamp(*timestamp)));
            for (path, value) in paths.iter().zip(values) {
                row.insert(path.to_string(), json_value(value));
            }
            serde_json::Value::Object(row)
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}
