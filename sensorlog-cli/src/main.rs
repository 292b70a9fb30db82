//! CLI for the sensorlog store.
//!
//! Runs the relay server, sends readings, simulates sensors, and inspects
//! or queries a log directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{Local, TimeDelta};
use clap::{Parser, Subcommand, ValueEnum};
use sensorlog::relay::{RelayClient, RelayServer, ShutdownHandle};
use sensorlog::retention::RetentionSweeper;
use sensorlog::sensor::{Sensor, SensorKind, SensorSpec};
use sensorlog::{LogConfig, LogEntry, LogStore};
use tracing_subscriber::EnvFilter;

/// sensorlog — Rotating, compressed, queryable log store for sensor readings.
#[derive(Parser)]
#[command(name = "sensorlog", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Start the store and accept readings over TCP.
    ///
    /// Type `q` and Enter to stop; buffered rows are flushed on the way out.
    Serve {
        /// Path to the JSON config file.
        #[arg(long, default_value = "config.json")]
        config: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "5000")]
        port: u16,

        /// Seconds between latest/average reports.
        #[arg(long, default_value = "5")]
        report_every: u64,
    },

    /// Send one reading to a running server.
    Send {
        /// Server host.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Server port.
        #[arg(long, default_value = "5000")]
        port: u16,

        /// Sensor identifier.
        #[arg(long)]
        sensor: String,

        /// Measured value.
        #[arg(long, allow_hyphen_values = true)]
        value: f64,

        /// Unit of the value.
        #[arg(long)]
        unit: String,

        /// Number of send attempts.
        #[arg(long, default_value = "3")]
        retries: u32,

        /// Connect and read timeout in seconds.
        #[arg(long, default_value = "5")]
        timeout: u64,
    },

    /// Drive simulated sensors into a store.
    Simulate {
        /// Path to the JSON config file.
        #[arg(long, default_value = "config.json")]
        config: PathBuf,

        /// Readings per sensor.
        #[arg(long, default_value = "10")]
        ticks: u32,

        /// Milliseconds between ticks.
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },

    /// Query readings from a log directory.
    Query {
        /// Path to the JSON config file.
        #[arg(long, default_value = "config.json")]
        config: PathBuf,

        /// Only readings of this sensor.
        #[arg(long)]
        sensor: Option<String>,

        /// Time range to query, ending now (e.g., "1h", "30m", "7d").
        #[arg(long, default_value = "1h")]
        range: String,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,

        /// Order rows by timestamp instead of file order.
        #[arg(long)]
        sorted: bool,
    },

    /// List live files and archives with their sizes.
    Info {
        /// Path to the JSON config file.
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },

    /// Delete archives past the retention period.
    Sweep {
        /// Path to the JSON config file.
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
}

/// Output format for query results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON array of objects.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            config,
            port,
            report_every,
        } => cmd_serve(&config, port, report_every),
        Commands::Send {
            host,
            port,
            sensor,
            value,
            unit,
            retries,
            timeout,
        } => cmd_send(&host, port, &sensor, value, &unit, retries, timeout),
        Commands::Simulate {
            config,
            ticks,
            interval_ms,
        } => cmd_simulate(&config, ticks, interval_ms),
        Commands::Query {
            config,
            sensor,
            range,
            format,
            sorted,
        } => cmd_query(&config, sensor.as_deref(), &range, &format, sorted),
        Commands::Info { config } => cmd_info(&config),
        Commands::Sweep { config } => cmd_sweep(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `sensorlog serve`.
fn cmd_serve(config: &Path, port: u16, report_every: u64) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(LogStore::from_config_file(config)?);
    store.start()?;

    let reporter = Arc::clone(&store);
    let interval = Duration::from_secs(report_every.max(1));
    thread::spawn(move || {
        loop {
            thread::sleep(interval);
            report(&reporter);
        }
    });

    let server = RelayServer::bind(format!("0.0.0.0:{port}"), Arc::clone(&store))?;
    let shutdown = server.shutdown_handle();
    thread::spawn(move || watch_stdin(&shutdown));

    let result = server.run();
    tracing::info!("relay stopped, closing store");
    store.close()?;
    result.map_err(Into::into)
}

/// Stops the relay when a quit command is read from stdin.
///
/// End of input only ends the watch, so a detached server keeps running.
fn watch_stdin(shutdown: &ShutdownHandle) {
    for line in std::io::stdin().lines() {
        match line {
            Ok(line) if is_quit_command(&line) => {
                shutdown.shutdown();
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "stdin unreadable; stop via 'q' disabled");
                return;
            }
        }
    }
}

fn is_quit_command(line: &str) -> bool {
    matches!(line.trim(), "q" | "quit" | "stop")
}

/// Logs the latest value and the 1h / 12h averages of every sensor.
fn report(store: &LogStore) {
    for (sensor_id, latest) in store.latest() {
        let avg_1h = store.average(&sensor_id, 1.0);
        let avg_12h = store.average(&sensor_id, 12.0);
        tracing::info!(
            sensor_id = %sensor_id,
            last = latest.last_value,
            unit = %latest.unit,
            at = %latest.timestamp,
            avg_1h = %avg_1h.map(|v| format!("{v:.2}")).unwrap_or_default(),
            avg_12h = %avg_12h.map(|v| format!("{v:.2}")).unwrap_or_default(),
            "sensor report"
        );
    }
}

/// Implements `sensorlog send`.
fn cmd_send(
    host: &str,
    port: u16,
    sensor: &str,
    value: f64,
    unit: &str,
    retries: u32,
    timeout: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = RelayClient::new(format!("{host}:{port}"))
        .with_retries(retries.max(1))
        .with_timeout(Duration::from_secs(timeout.max(1)));

    let entry = LogEntry::new(sensor, Local::now().naive_local(), value, unit);
    if !client.send(&entry)? {
        return Err(format!("no acknowledgement from {host}:{port}").into());
    }
    client.close();

    println!("ACK");
    Ok(())
}

/// Implements `sensorlog simulate`.
fn cmd_simulate(config: &Path, ticks: u32, interval_ms: u64) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(LogStore::from_config_file(config)?);
    store.start()?;

    let specs = [
        (SensorKind::Temperature, SensorSpec::new("T01", "temperature", "°C", -10.0, 50.0)),
        (SensorKind::Humidity, SensorSpec::new("H01", "humidity", "%", 20.0, 90.0)),
        (SensorKind::Pressure, SensorSpec::new("P01", "pressure", "hPa", 980.0, 1040.0)),
        (SensorKind::AirQuality, SensorSpec::new("A01", "air_quality", "AQI", 0.0, 300.0)),
    ];

    let mut sensors = Vec::with_capacity(specs.len());
    for (kind, spec) in specs {
        let mut sensor = Sensor::new(kind, spec)?;
        let sink = Arc::clone(&store);
        sensor.register_callback(move |entry| {
            if let Err(e) = sink.ingest_entry(entry.clone()) {
                tracing::warn!(sensor_id = %entry.sensor_id, "dropped reading: {e}");
            }
        });
        sensors.push(sensor);
    }

    println!("Simulating {} sensors for {ticks} ticks...", sensors.len());
    for tick in 0..ticks {
        for sensor in &mut sensors {
            sensor.read_value()?;
        }
        if tick + 1 < ticks {
            thread::sleep(Duration::from_millis(interval_ms));
        }
    }

    store.close()?;

    for sensor in &sensors {
        if let Some(value) = sensor.last_value() {
            println!("  {:<12} {value:.2} {}", sensor.reading_id(), sensor.spec().unit);
        }
    }
    Ok(())
}

/// Implements `sensorlog query`.
fn cmd_query(
    config: &Path,
    sensor: Option<&str>,
    range: &str,
    format: &OutputFormat,
    sorted: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = LogStore::from_config_file(config)?;

    let end = Local::now().naive_local();
    let start = end - parse_duration(range)?;

    let mut entries = Vec::new();
    let mut errors = 0usize;
    if sorted {
        entries = store.read_sorted(start, end, sensor)?;
    } else {
        for entry in store.read(start, end, sensor)? {
            match entry {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    errors += 1;
                    eprintln!("warning: {e}");
                }
            }
        }
    }

    match format {
        OutputFormat::Csv => {
            println!(
                "# sensor={}, range={range}, rows={}",
                sensor.unwrap_or("*"),
                entries.len()
            );
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            writer.write_record(sensorlog::entry::HEADER)?;
            for entry in &entries {
                writer.write_record(entry.to_record())?;
            }
            writer.flush()?;
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "sensor": sensor,
                "range": range,
                "count": entries.len(),
                "data": entries,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    if errors > 0 {
        eprintln!("{errors} source(s) could not be fully read");
    }
    Ok(())
}

/// Implements `sensorlog info`.
fn cmd_info(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = LogConfig::load(config_path)?;

    println!("Log directory: {}", config.log_dir.display());
    println!("  Pattern: {}", config.filename_pattern);
    println!("  Buffer size: {}", config.buffer_size);
    let lines = config
        .rotate_after_lines
        .map_or_else(|| "-".to_string(), |n| n.to_string());
    println!(
        "  Rotation: every {}h, at {} MB, after {lines} lines",
        config.rotate_every_hours, config.max_size_mb
    );
    println!("  Retention: {} days", config.retention_days);
    println!();

    let live = list_files(&config.log_dir, ".csv")?;
    println!("Live files: {}", live.len());
    for (path, size) in &live {
        println!("  {} ({})", display_name(path), format_bytes(*size));
    }

    let archives = list_files(&config.archive_dir(), ".zip")?;
    println!("Archives: {}", archives.len());
    for (path, size) in &archives {
        println!("  {} ({})", display_name(path), format_bytes(*size));
    }

    let total: u64 = live.iter().chain(&archives).map(|(_, size)| size).sum();
    println!();
    println!("Total disk usage: {} ({total} bytes)", format_bytes(total));
    Ok(())
}

/// Implements `sensorlog sweep`.
fn cmd_sweep(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = LogConfig::load(config_path)?;
    let sweeper = RetentionSweeper::new(config.archive_dir(), config.retention_days);
    let report = sweeper.sweep(Local::now().naive_local());

    for path in &report.deleted {
        println!("deleted {}", display_name(path));
    }
    for (path, e) in &report.failures {
        eprintln!("failed {}: {e}", path.display());
    }
    println!(
        "{} deleted, {} retained, {} failed",
        report.deleted.len(),
        report.retained,
        report.failures.len()
    );
    Ok(())
}

/// Parses a human-readable duration string (e.g., "1h", "30m", "7d").
fn parse_duration(s: &str) -> Result<TimeDelta, Box<dyn std::error::Error>> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Empty duration string".into());
    }

    let Some((unit_start, _)) = s.char_indices().next_back() else {
        return Err("Empty duration string".into());
    };
    let (num_str, unit) = s.split_at(unit_start);
    let num: i64 = num_str.parse()?;
    if num < 0 {
        return Err(format!("Negative duration: '{s}'").into());
    }

    let delta = match unit {
        "s" => TimeDelta::try_seconds(num),
        "m" => TimeDelta::try_minutes(num),
        "h" => TimeDelta::try_hours(num),
        "d" => TimeDelta::try_days(num),
        _ => return Err(format!("Unknown duration unit: '{unit}'. Use s, m, h, or d.").into()),
    };
    delta.ok_or_else(|| format!("Duration out of range: '{s}'").into())
}

/// Regular files in `dir` ending in `extension`, sorted, with their sizes.
fn list_files(dir: &Path, extension: &str) -> Result<Vec<(PathBuf, u64)>, Box<dyn std::error::Error>> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        let path = entry.path();
        if metadata.is_file() && path.to_string_lossy().ends_with(extension) {
            files.push((path, metadata.len()));
        }
    }
    files.sort();
    Ok(files)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
