//! MAAS Node Manager
//!
//! Creates or wipes a numbered range of libvirt nodes that PXE boot into
//! MAAS. One invocation performs one pass and exits.
//!
//! ```text
//! maas-node-manager --create --count 3              # maas-node-01 .. maas-node-03
//! maas-node-manager --create -C 3 -s 5 -e 100       # end clamped to 7
//! maas-node-manager --wipe   -C 3
//! ```

use clap::{ArgGroup, Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use maas_node_manager::{
    plan_detailed, BackendFactory, BackendKind, BarProgress, BatchReport, FleetConfig,
    LoggingProgress, NetworkBinding, NodeOutcome, Operation, Orchestrator, ProgressObserverRef,
    Result, VolumeFormat,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Summary format printed after the pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// MAAS Node Manager - provision and wipe libvirt nodes for MAAS
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("mode").required(true).args(["create", "wipe"])))]
struct Args {
    /// Create nodes to manage
    #[arg(short = 'c', long)]
    create: bool,

    /// Wipe nodes created previously
    #[arg(short = 'w', long)]
    wipe: bool,

    /// Number of nodes (clamped to 1..=5000)
    #[arg(short = 'C', long)]
    count: u32,

    /// First node index
    #[arg(short = 's', long, default_value_t = 1)]
    start: u32,

    /// Last node index, limited to start + count - 1
    #[arg(short = 'e', long)]
    end: Option<u32>,

    /// Memory per node in MiB
    #[arg(short = 'm', long)]
    memory: Option<u64>,

    /// Libvirt network to attach nodes to
    #[arg(short = 'n', long, conflicts_with = "bridge")]
    network: Option<String>,

    /// Host bridge to attach nodes to instead of a network
    #[arg(long)]
    bridge: Option<String>,

    /// vCPUs per node
    #[arg(long)]
    vcpu: Option<u32>,

    /// NIC device model
    #[arg(long)]
    nic_model: Option<String>,

    /// Interfaces per node
    #[arg(long)]
    interfaces: Option<u32>,

    /// Node name prefix
    #[arg(long, env = "MAAS_NODE_PREFIX")]
    prefix: Option<String>,

    /// Root directory for node storage pools
    #[arg(long, env = "MAAS_STORAGE_ROOT")]
    storage_root: Option<PathBuf>,

    /// Volume format (qcow2, raw)
    #[arg(long)]
    volume_format: Option<VolumeFormat>,

    /// YAML configuration file
    #[arg(long, env = "MAAS_NODE_CONFIG")]
    config: Option<PathBuf>,

    /// Libvirt connection URI
    #[arg(long, env = "LIBVIRT_DEFAULT_URI")]
    connect: Option<String>,

    /// Control plane backend (virsh, memory)
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Pause after each domain definition, in milliseconds [default: 100]
    #[arg(long)]
    define_delay_ms: Option<u64>,

    /// Increase debug verbosity for all outputs
    #[arg(short = 'd', long)]
    debug: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Summary format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,
}

impl Args {
    fn operation(&self) -> Operation {
        if self.create {
            Operation::Create
        } else {
            Operation::Destroy
        }
    }
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;
    let operation = args.operation();

    info!("Starting MAAS Node Manager");
    info!("  Version: {}", maas_node_manager::VERSION);
    info!("  Operation: {}", operation);
    info!("  Storage root: {}", config.storage_root.display());
    info!("  Network: {}", config.network);

    let planned = match plan_detailed(args.start, args.count, args.end) {
        Ok(planned) => planned,
        Err(e) if e.is_empty_range() => {
            println!("Nothing to do: {}", e);
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let control_plane = match BackendFactory::connect(&config.connection) {
        Ok(control_plane) => control_plane,
        Err(e) => {
            error!("Cannot reach the control plane, no nodes were touched: {}", e);
            return Err(e);
        }
    };

    let observer: ProgressObserverRef = if args.no_progress || args.output == OutputFormat::Json {
        Arc::new(LoggingProgress)
    } else {
        Arc::new(BarProgress::new())
    };

    let orchestrator = Orchestrator::new(control_plane, config).with_observer(observer);
    let report = orchestrator.run(operation, planned.range);

    if let Err(e) = orchestrator.close() {
        warn!("Closing the control plane connection failed: {}", e);
    }

    print_summary(&report, args.output)?;
    Ok(())
}

// =============================================================================
// Configuration
// =============================================================================

fn load_config(args: &Args) -> Result<FleetConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            FleetConfig::from_yaml_file(path)?
        }
        None => FleetConfig::default(),
    };

    if let Some(memory) = args.memory {
        config.memory_mib = memory;
    }
    if let Some(vcpu) = args.vcpu {
        config.vcpus = vcpu;
    }
    if let Some(network) = &args.network {
        config.network = NetworkBinding::network(network.clone());
    }
    if let Some(bridge) = &args.bridge {
        config.network = NetworkBinding::bridge(bridge.clone());
    }
    if let Some(model) = &args.nic_model {
        config.nic_model = model.clone();
    }
    if let Some(interfaces) = args.interfaces {
        config.interfaces = interfaces;
    }
    if let Some(prefix) = &args.prefix {
        config.prefix = prefix.clone();
    }
    if let Some(root) = &args.storage_root {
        config.storage_root = root.clone();
    }
    if let Some(format) = args.volume_format {
        config.volume_format = format;
    }
    if let Some(uri) = &args.connect {
        config.connection.uri = uri.clone();
    }
    if let Some(backend) = args.backend {
        config.connection.backend = backend;
    }
    if let Some(delay) = args.define_delay_ms {
        config.define_delay_ms = delay;
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// Summary
// =============================================================================

fn print_summary(report: &BatchReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Text => {
            let verb = match report.operation {
                Operation::Create => "Created",
                Operation::Destroy => "Wiped",
            };
            println!(
                "{} {} of {} nodes in {} ({} attempted, {:.1}s)",
                verb,
                report.succeeded,
                report.total(),
                report.range,
                report.attempted,
                report.duration().num_milliseconds() as f64 / 1000.0
            );
            for node in report.failures() {
                if let NodeOutcome::Failed { step, reason } = &node.outcome {
                    println!("  {} failed at {}: {}", node.identity, step, reason);
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = if args.debug {
        Level::DEBUG
    } else {
        match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use maas_node_manager::Error;
    use std::io::Write;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_mode_is_required_and_exclusive() {
        assert!(Args::try_parse_from(["maas-node-manager", "-C", "3"]).is_err());
        assert!(Args::try_parse_from(["maas-node-manager", "-c", "-w", "-C", "3"]).is_err());

        let args = Args::try_parse_from(["maas-node-manager", "-w", "-C", "3"]).unwrap();
        assert_eq!(args.operation(), Operation::Destroy);
        assert_eq!(args.start, 1);
        assert_eq!(args.end, None);
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let args = Args::try_parse_from([
            "maas-node-manager",
            "--create",
            "--count",
            "2",
            "--memory",
            "4096",
            "--bridge",
            "br-maas",
            "--backend",
            "memory",
            "--define-delay-ms",
            "0",
        ])
        .unwrap();

        let config = load_config(&args).unwrap();
        assert_eq!(config.memory_mib, 4096);
        assert_eq!(config.network, NetworkBinding::bridge("br-maas"));
        assert_eq!(config.connection.backend, BackendKind::Memory);
        assert_eq!(config.define_delay_ms, 0);
        assert_eq!(config.vcpus, 1);
    }

    #[test]
    fn test_config_file_delay_is_kept() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "define_delay_ms: 750").unwrap();
        let path = file.path().to_str().unwrap();

        let args =
            Args::try_parse_from(["maas-node-manager", "-c", "-C", "1", "--config", path]).unwrap();
        assert_eq!(load_config(&args).unwrap().define_delay_ms, 750);

        let args = Args::try_parse_from([
            "maas-node-manager",
            "-c",
            "-C",
            "1",
            "--config",
            path,
            "--define-delay-ms",
            "5",
        ])
        .unwrap();
        assert_eq!(load_config(&args).unwrap().define_delay_ms, 5);
    }

    #[test]
    fn test_default_delay_without_config() {
        let args = Args::try_parse_from(["maas-node-manager", "-c", "-C", "1"]).unwrap();
        assert_eq!(load_config(&args).unwrap().define_delay_ms, 100);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let args =
            Args::try_parse_from(["maas-node-manager", "-c", "-C", "1", "--vcpu", "0"]).unwrap();
        assert!(matches!(load_config(&args), Err(Error::Configuration(_))));
    }
}
