//! CLI entry point for the ALDL logger
//!
//! ```bash
//! aldl ports
//! aldl library import 1227747.json
//! aldl poll --port /dev/ttyUSB0 --log-dir ./logs
//! aldl poll --demo --duration 30
//! aldl explain "Code 14" --service http://localhost:8080
//! ```

use aldl_core::analysis::{Advisor, HttpAnalyst};
use aldl_core::decode::TelemetrySample;
use aldl_core::definition::{Definition, DefinitionLibrary, JsonDefinitionSource};
use aldl_core::demo::DemoProvider;
use aldl_core::protocol::{
    list_ports, Connection, ConnectionConfig, OpenOptions, SerialProvider, TcpProvider,
    TransportProvider, MAX_PACKET_SIZE,
};
use aldl_core::scheduler::{PollConfig, PollOutcome, PollScheduler};
use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aldl")]
#[command(about = "Poll, decode and log ALDL engine data", version = aldl_core::VERSION)]
struct Cli {
    /// Definition library directory (defaults to the app data directory)
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports, USB adapters first
    Ports,

    /// Poll the ECM until interrupted
    Poll(PollArgs),

    /// Manage stored definitions
    #[command(subcommand)]
    Library(LibraryCommands),

    /// Ask the analysis service to explain a trouble code
    Explain {
        /// Trouble code, e.g. "Code 14"
        code: String,
        /// Analysis service base URL
        #[arg(long)]
        service: String,
    },
}

#[derive(Args)]
struct PollArgs {
    /// Serial port of the ALDL cable
    #[arg(long, conflicts_with_all = ["tcp", "demo"], required_unless_present_any = ["tcp", "demo"])]
    port: Option<String>,

    /// Network bridge address, host:port
    #[arg(long, conflicts_with = "demo")]
    tcp: Option<String>,

    /// Simulated ECM
    #[arg(long)]
    demo: bool,

    /// Definition JSON file; stored in the library and made active
    #[arg(long)]
    definition: Option<PathBuf>,

    /// Record the session and write a CSV log here when polling ends
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,

    /// Pause between polls, in milliseconds
    #[arg(long, default_value = "120")]
    interval_ms: u64,

    /// Upper bound on one read, in milliseconds
    #[arg(long, default_value = "250")]
    read_timeout_ms: u64,

    /// Analysis service base URL; the last sample is analysed on exit
    #[arg(long)]
    analyze: Option<String>,

    /// Do not print samples
    #[arg(long, short)]
    quiet: bool,
}

#[derive(Subcommand)]
enum LibraryCommands {
    /// List stored definitions
    List,
    /// Import a definition JSON file and make it active
    Import {
        /// Path to the definition file
        file: PathBuf,
    },
    /// Remove a definition
    Remove {
        /// Definition name
        name: String,
    },
    /// Select the active definition
    Activate {
        /// Definition name
        name: String,
    },
    /// Point a gauge slot at another parameter
    Gauge {
        /// Definition name
        name: String,
        /// Gauge slot, zero-based
        slot: usize,
        /// Parameter id to show
        parameter: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Samples go to stdout, logs to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let library = cli.library.as_deref();

    match cli.command {
        Commands::Ports => {
            show_ports();
            Ok(())
        }
        Commands::Poll(args) => run_poll(args, library).await,
        Commands::Library(cmd) => run_library(cmd, library),
        Commands::Explain { code, service } => {
            let advisor = Advisor::new(HttpAnalyst::new(service)?);
            match advisor.explain_code(&code).await {
                Some(text) => println!("{text}"),
                None => bail!("no trouble code given"),
            }
            Ok(())
        }
    }
}

fn show_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        let usb = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" [{vid:04x}:{pid:04x}]"),
            _ => String::new(),
        };
        println!(
            "{}{} {}",
            port.name,
            usb,
            port.product.as_deref().unwrap_or("")
        );
    }
}

fn run_library(cmd: LibraryCommands, dir: Option<&Path>) -> Result<()> {
    let mut library = DefinitionLibrary::open(dir).context("opening definition library")?;

    match cmd {
        LibraryCommands::List => {
            if library.is_empty() {
                println!("Library is empty");
            }
            for def in library.iter() {
                let marker = if library.active_name() == Some(def.name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {} ({} parameters, {} baud)",
                    def.name,
                    def.parameters.len(),
                    def.baud_rate
                );
            }
            return Ok(());
        }
        LibraryCommands::Import { file } => {
            let name = import_definition(&mut library, &file)?.name.clone();
            println!("Imported and activated '{name}'");
        }
        LibraryCommands::Remove { name } => {
            if library.remove(&name).is_none() {
                bail!("no definition named '{name}'");
            }
            println!("Removed '{name}'");
        }
        LibraryCommands::Activate { name } => {
            library.set_active(&name)?;
            println!("Active definition: '{name}'");
        }
        LibraryCommands::Gauge {
            name,
            slot,
            parameter,
        } => {
            let definition = library
                .get_mut(&name)
                .with_context(|| format!("no definition named '{name}'"))?;
            definition.rebind_gauge(slot, &parameter)?;
            let range = definition
                .gauge_range(slot)
                .context("gauge slot vanished after rebind")?;
            println!(
                "Gauge {slot} of '{name}' shows '{parameter}' ({}..{})",
                range.min, range.max
            );
        }
    }

    library.save().context("saving definition library")
}

fn import_definition<'a>(library: &'a mut DefinitionLibrary, file: &Path) -> Result<&'a Definition> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("reading definition {}", file.display()))?;
    let display_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("definition")
        .to_string();
    library
        .load(&JsonDefinitionSource, &text, &display_name)
        .with_context(|| format!("loading definition {}", file.display()))
}

fn resolve_definition(file: Option<&Path>, dir: Option<&Path>) -> Result<Definition> {
    let mut library = DefinitionLibrary::open(dir).context("opening definition library")?;
    match file {
        Some(file) => {
            let definition = import_definition(&mut library, file)?.clone();
            library.save().context("saving definition library")?;
            Ok(definition)
        }
        None => library
            .active()
            .cloned()
            .context("no active definition; pass --definition or run `aldl library activate`"),
    }
}

fn provider_for(args: &PollArgs, definition: &Definition) -> Box<dyn TransportProvider> {
    let read_timeout = Duration::from_millis(args.read_timeout_ms);
    if args.demo {
        return Box::new(DemoProvider::new(definition.clone()));
    }
    if let Some(addr) = &args.tcp {
        return Box::new(TcpProvider {
            addr: addr.clone(),
            read_timeout,
            buf_len: MAX_PACKET_SIZE,
        });
    }
    Box::new(SerialProvider::new(ConnectionConfig {
        port_name: args.port.clone().unwrap_or_default(),
        read_timeout,
        ..ConnectionConfig::default()
    }))
}

fn format_sample(sample: &TelemetrySample) -> String {
    let mut line = sample
        .timestamp
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    for (id, value) in sample.iter() {
        line.push_str(&format!(" {id}={value:.2}"));
    }
    line
}

async fn run_poll(args: PollArgs, library: Option<&Path>) -> Result<()> {
    let definition = resolve_definition(args.definition.as_deref(), library)?;
    info!(definition = %definition.name, parameters = definition.parameters.len(), "definition ready");

    let mut provider = provider_for(&args, &definition);
    let mut conn = Connection::new();
    conn.open(provider.as_mut(), OpenOptions::for_definition(Some(&definition)))
        .context("opening ECM link")?;

    let scheduler = PollScheduler::new(PollConfig {
        interval: Duration::from_millis(args.interval_ms),
    });
    let handle = scheduler.handle();
    if args.log_dir.is_some() {
        handle.logger().start();
    }

    let mut rx = handle.subscribe();
    let quiet = args.quiet;
    let printer = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let latest = rx.borrow_and_update().clone();
            if let (false, Some(sample)) = (quiet, latest) {
                println!("{}", format_sample(&sample));
            }
        }
    });

    let duration = args.duration;
    let deadline = async move {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    let mut task = scheduler.spawn(conn, definition);
    let finished = tokio::select! {
        joined = &mut task => Some(joined?),
        _ = signal::ctrl_c() => {
            info!("interrupted");
            None
        }
        _ = deadline => None,
    };
    let (mut conn, outcome) = match finished {
        Some(result) => result,
        None => {
            handle.stop();
            task.await?
        }
    };
    conn.close();
    printer.abort();

    let (tx, rx_count) = handle.stats().snapshot();
    info!(tx, rx = rx_count, "polling finished");

    if let Some(dir) = &args.log_dir {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let written = handle
            .logger()
            .finish(dir, Utc::now())
            .context("writing session log")?;
        match written {
            Some(path) => println!("Session log written to {}", path.display()),
            None => warn!("nothing was recorded; no log written"),
        }
    }

    if let Some(service) = args.analyze {
        match handle.latest() {
            Some(sample) => {
                let advisor = Advisor::new(HttpAnalyst::new(service)?);
                println!("{}", advisor.analyze(&sample).await);
            }
            None => warn!("no sample to analyse"),
        }
    }

    match outcome {
        PollOutcome::Failed(e) => bail!("polling stopped: {e}"),
        PollOutcome::NotStarted => bail!("polling did not start"),
        PollOutcome::Stopped => Ok(()),
    }
}
