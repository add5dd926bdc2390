//! Headless link monitor.
//!
//! Lists serial ports, or opens a link to the heater controller and prints each
//! decoded frame by field name until Ctrl-C, then runs the sentinel shutdown.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use thermolink_lib::device::{discover_ports, watch_ports, PortEvent, PortWatcher};
use thermolink_lib::{ConnectionState, Field, Frame, Link, LinkBuilder, LinkConfig, LinkNotice, OnBadToken};

#[derive(Parser)]
#[command(name = "thermolink", version, about = "Serial link monitor for the PWCL heater controller")]
struct Cli {
    /// Also write logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports
    Ports,
    /// Open a link and print decoded frames until Ctrl-C
    Monitor(MonitorArgs),
}

#[derive(clap::Args)]
struct MonitorArgs {
    /// Port to open; defaults to the first port listed, waiting for one when none is present
    #[arg(short, long)]
    port: Option<String>,

    /// JSON link configuration; overrides --protocol and --on-bad-token
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Protocol::V1)]
    protocol: Protocol,

    #[arg(long, value_enum, default_value_t = BadToken::Fail)]
    on_bad_token: BadToken,

    /// Command field to send once connected, e.g. `--set kc=2.5`; repeatable
    #[arg(long = "set", value_name = "NAME=VALUE")]
    set: Vec<String>,

    /// Port polling interval while waiting for a device
    #[arg(long, default_value_t = 1000)]
    poll_ms: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum Protocol {
    V1,
    V2,
}

#[derive(Clone, Copy, ValueEnum)]
enum BadToken {
    Unchanged,
    Fail,
}

impl From<BadToken> for OnBadToken {
    fn from(policy: BadToken) -> Self {
        match policy {
            BadToken::Unchanged => OnBadToken::TreatAsUnchanged,
            BadToken::Fail => OnBadToken::Fail,
        }
    }
}

fn init_logging(log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr));

    match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().context("log file path has no file name")?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()?;
            Ok(Some(guard))
        }
        None => {
            registry.try_init()?;
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_file.as_deref())?;

    match cli.command {
        Command::Ports => list_ports(),
        Command::Monitor(args) => monitor(args).await,
    }
}

fn list_ports() -> anyhow::Result<()> {
    let ports = discover_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  {:04x}:{:04x}  {}",
                port.port_name,
                vid,
                pid,
                port.product.as_deref().unwrap_or("")
            ),
            _ => println!("{}", port.port_name),
        }
    }
    Ok(())
}

fn load_config(args: &MonitorArgs) -> anyhow::Result<LinkConfig> {
    match &args.config {
        Some(path) => Ok(LinkConfig::from_json_file(path)?),
        None => Ok(match args.protocol {
            Protocol::V1 => LinkConfig::v1(args.on_bad_token.into()),
            Protocol::V2 => LinkConfig::v2(args.on_bad_token.into()),
        }),
    }
}

fn parse_assignment(assignment: &str) -> anyhow::Result<(&str, Field)> {
    let (name, value) = assignment
        .split_once('=')
        .with_context(|| format!("expected NAME=VALUE, got {:?}", assignment))?;
    let value = value.trim();
    let field = match value {
        "_" => Field::Unchanged,
        v if v.eq_ignore_ascii_case("nan") => Field::NotANumber,
        v => Field::Number(v.parse().with_context(|| format!("{:?} is not a number", v))?),
    };
    Ok((name.trim(), field))
}

async fn wait_for_port(poll: Duration) -> anyhow::Result<String> {
    log::info!("No port given, using the first serial port found");
    let mut events = watch_ports(PortWatcher::new(), poll);
    while let Some(event) = events.recv().await {
        if let PortEvent::PortAdded(port) = event {
            return Ok(port);
        }
    }
    bail!("port watcher stopped")
}

/// Send the one-shot command frame, if any. The frame is consumed either way.
fn queue_command(link: &Link, pending: &mut Option<Frame>) -> anyhow::Result<()> {
    if let Some(frame) = pending.take() {
        if let Err(e) = link.send_frame(&frame) {
            log::error!("Could not queue command frame: {}", e);
            return Err(e).context("sending command frame");
        }
        log::info!("Queued command frame");
    }
    Ok(())
}

async fn monitor(args: MonitorArgs) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let inbound = config.inbound_layout();
    let command = if args.set.is_empty() {
        None
    } else {
        let values = args
            .set
            .iter()
            .map(|s| parse_assignment(s))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Some(config.outbound_layout().frame_from(values)?)
    };

    let port = match args.port.clone() {
        Some(port) => port,
        None => wait_for_port(Duration::from_millis(args.poll_ms)).await?,
    };

    let mut link = LinkBuilder::new(config)
        .on_frame(move |frame| {
            let stamp = chrono::Local::now().format("%H:%M:%S%.3f");
            let values: Vec<String> = inbound
                .named(&frame)
                .map(|(name, field)| match field {
                    Field::Number(v) => format!("{}={}", name, v),
                    Field::NotANumber => format!("{}=NaN", name),
                    Field::Unchanged => format!("{}=_", name),
                })
                .collect();
            println!("{} {}", stamp, values.join(" "));
        })
        .on_event(|line| {
            let stamp = chrono::Local::now().format("%H:%M:%S%.3f");
            println!("{} EVENT {}", stamp, line.trim());
        })
        .build();

    let mut notices = link.subscribe_notices();
    link.open(&port)?;

    let mut pending_command = command;
    let outcome: anyhow::Result<()> = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, parking the controller");
                break Ok(());
            }
            notice = notices.recv() => match notice {
                Ok(LinkNotice::StateChanged(ConnectionState::Connected)) => {
                    if let Err(e) = queue_command(&link, &mut pending_command) {
                        break Err(e);
                    }
                }
                Ok(LinkNotice::OpenFailed { port, reason }) => break Err(anyhow::anyhow!("could not open {}: {}", port, reason)),
                // Resuming silently could resend stale commands; the operator restarts instead
                Ok(LinkNotice::Disconnected { reason }) => break Err(anyhow::anyhow!("device disconnected: {}", reason)),
                Ok(LinkNotice::DecodeFailed { line, error }) => log::warn!("Dropped {:?}: {}", line, error),
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => log::warn!("Missed {} link notices", missed),
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    tokio::task::spawn_blocking(move || link.shutdown()).await?;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment() {
        let (name, field) = parse_assignment("kc = 2.5").unwrap();
        assert_eq!(name, "kc");
        assert_eq!(field, Field::Number(2.5));
        assert_eq!(parse_assignment("tau_i=_").unwrap().1, Field::Unchanged);
        assert_eq!(parse_assignment("tau_d=NaN").unwrap().1, Field::NotANumber);
        assert!(parse_assignment("kc").is_err());
        assert!(parse_assignment("kc=fast").is_err());
    }

    #[test]
    fn test_queue_command_on_dead_link_is_an_error() {
        let config = LinkConfig::v1(OnBadToken::Fail);
        let link = LinkBuilder::new(config.clone()).build();
        let mut pending = Some(Frame::unchanged(config.outbound_len));

        assert!(queue_command(&link, &mut pending).is_err());
        assert!(pending.is_none());
        // Nothing left to send on the next Connected notice
        assert!(queue_command(&link, &mut pending).is_ok());
    }
}
