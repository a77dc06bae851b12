//! replink CLI - talk to a microcontroller interpreter over a serial line
//!
//! Interactive console pass-through plus one-shot program execution in raw
//! REPL mode, for scripting and automation.

use anyhow::Context;
use clap::{Parser, Subcommand};
use replink_core::{
    exit_code_description, exit_code_for, list_ports, AppConfig, CliResult, ConfigError, DeviceLink,
    DeviceSimulator, ExitCodes, LinkError, OutputFormat, SerialTransport, SimulatorConfig,
    TransportTrait,
};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// replink CLI
#[derive(Parser, Debug)]
#[command(
    name = "replink",
    version,
    about = "Serial console and raw REPL runner for microcontroller interpreters",
    long_about = None
)]
struct Cli {
    /// Serial port (e.g., COM3, /dev/ttyACM0); overrides the config file
    #[arg(short, long, env = "REPLINK_PORT", global = true)]
    port: Option<String>,

    /// Baud rate; overrides the config file
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Talk to the built-in interpreter simulator instead of a port
    #[arg(long, global = true)]
    simulate: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    Ports,

    /// Interactive console: stdin to the device, device output to stdout
    Repl,

    /// Run a snippet in raw REPL mode and print its output
    Exec {
        /// Code to run
        #[arg(short = 'c', long)]
        code: String,
    },

    /// Run a file in raw REPL mode and print its output
    Run {
        /// Program file
        file: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };
    init_logging(&cli, &config);

    let result = match run(&cli, config).await {
        Ok(result) => result,
        Err(e) => failure(&e),
    };

    if let (CliResult::Error(code, msg), false) = (&result, cli.quiet) {
        eprintln!("Error: {msg} ({})", exit_code_description(*code));
    }
    result.to_exit_code()
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    Ok(config)
}

fn init_logging(cli: &Cli, config: &AppConfig) {
    let default = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn failure(err: &anyhow::Error) -> CliResult {
    let code = if let Some(link) = err.downcast_ref::<LinkError>() {
        exit_code_for(link)
    } else if err.downcast_ref::<ConfigError>().is_some() {
        ExitCodes::CONFIG_ERROR
    } else if err.downcast_ref::<std::io::Error>().is_some() {
        ExitCodes::FILE_NOT_FOUND
    } else {
        ExitCodes::ERROR
    };
    CliResult::error(code, format!("{err:#}"))
}

async fn run(cli: &Cli, config: AppConfig) -> anyhow::Result<CliResult> {
    match &cli.command {
        Commands::Ports => show_ports(cli),
        Commands::Config { action } => handle_config(cli, &config, action),
        Commands::Repl => {
            let link = open_link(cli, &config)?;
            link.connect().await?;
            let result = repl(cli, &link).await;
            link.disconnect().await?;
            result
        }
        Commands::Exec { code } => execute(cli, &config, code).await,
        Commands::Run { file } => {
            let code = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            execute(cli, &config, &code).await
        }
    }
}

fn open_link(cli: &Cli, config: &AppConfig) -> anyhow::Result<DeviceLink> {
    let transport: Arc<dyn TransportTrait> = if cli.simulate {
        Arc::new(DeviceSimulator::new(SimulatorConfig::default()).into_transport())
    } else {
        let mut settings = config.serial.clone();
        if let Some(baud) = cli.baud {
            settings.baud_rate = baud;
        }
        let serial = settings
            .to_serial_config(cli.port.as_deref())
            .context("no serial port given (use --port or set serial.port in the config file)")?;
        Arc::new(SerialTransport::new(serial))
    };

    let timings = if cli.simulate {
        config.timings.clone().without_pauses()
    } else {
        config.timings.clone()
    };
    Ok(DeviceLink::with_timings(transport, timings))
}

fn show_ports(cli: &Cli) -> anyhow::Result<CliResult> {
    let ports = list_ports()?;

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if ports.is_empty() && !cli.quiet {
                println!("No serial ports found.");
            }
            for port in &ports {
                println!("{}", port.port_name);
            }
        }
    }
    Ok(CliResult::success())
}

fn handle_config(
    cli: &Cli,
    config: &AppConfig,
    action: &ConfigAction,
) -> anyhow::Result<CliResult> {
    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => replink_core::config::config_path(),
    };

    match action {
        ConfigAction::Show => match cli.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
            OutputFormat::Text => print!("{}", config.to_toml()?),
        },
        ConfigAction::Path => match path {
            Some(path) => println!("{}", path.display()),
            None => return Ok(CliResult::error(ExitCodes::CONFIG_ERROR, "no config directory")),
        },
        ConfigAction::Init { force } => {
            let path = path.context("no config directory")?;
            if path.exists() && !force {
                return Ok(CliResult::error(
                    ExitCodes::CONFIG_ERROR,
                    format!("{} already exists (use --force)", path.display()),
                ));
            }
            AppConfig::default().save_to(&path)?;
            if !cli.quiet {
                eprintln!("Wrote {}", path.display());
            }
        }
    }
    Ok(CliResult::success())
}

async fn repl(cli: &Cli, link: &DeviceLink) -> anyhow::Result<CliResult> {
    let console = link.console();
    console.on_data(|text| {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    });

    if !cli.quiet {
        eprintln!(
            "Connected to {}. Press Ctrl+C to exit.",
            link.connection_info().unwrap_or_default()
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::debug!("interrupted");
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) => console.send(&format!("{line}\r")).await?,
                None => break,
            },
        }
    }

    console.clear_on_data();
    if !cli.quiet {
        eprintln!("Disconnected.");
    }
    Ok(CliResult::success())
}

async fn execute(cli: &Cli, config: &AppConfig, code: &str) -> anyhow::Result<CliResult> {
    let link = open_link(cli, config)?;
    link.connect().await?;

    let result = exec_in_session(cli, &link, code).await;
    link.disconnect().await?;
    result
}

async fn exec_in_session(cli: &Cli, link: &DeviceLink, code: &str) -> anyhow::Result<CliResult> {
    let session = link.open_session("exec").await?;
    tracing::debug!("Session capability: {}", session.capability());

    let output = session.exec(code).await;
    session.close().await?;
    let output = output?;

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            print!("{}", output.stdout);
            if output.is_error() {
                eprint!("{}", output.stderr);
            }
        }
    }

    if output.is_error() {
        Ok(CliResult::error(ExitCodes::SCRIPT_ERROR, "program raised an exception"))
    } else {
        Ok(CliResult::success())
    }
}
