use crate::domain::models::{AppEvent, ConnectionStatus, MessageSeverity};
use crate::domain::settings::SettingsService;
use crate::infrastructure::error_sink;
use crate::infrastructure::logging;
use crate::infrastructure::service::{EventErrorHandler, WiimoteService};
use crate::infrastructure::wiimote::{bridge, RwFlags};
use anyhow::Context;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(clap::Parser, Debug, Clone)]
#[command(name = "wiimote-rw", version, about = "Read and write Wii Remote memory")]
pub struct Cli {
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub control_socket: Option<String>,
    #[arg(long)]
    pub interrupt_socket: Option<String>,
    /// Give up on a register transaction after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Print read results as JSON
    #[arg(long)]
    pub json: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Dump `len` bytes starting at `offset`
    Read {
        #[arg(value_parser = parse_offset)]
        offset: u32,
        len: usize,
        /// Register space instead of EEPROM
        #[arg(long)]
        register: bool,
        /// Decode obfuscated calibration bytes
        #[arg(long)]
        decode: bool,
    },
    /// Write hex bytes (e.g. `0a1b2c`) starting at `offset`
    Write {
        #[arg(value_parser = parse_offset)]
        offset: u32,
        #[arg(value_parser = parse_hex_bytes)]
        data: HexBytes,
        #[arg(long)]
        register: bool,
    },
    /// Play a short tone on the speaker
    Beep {
        #[arg(long)]
        reports: Option<usize>,
    },
    Rumble {
        #[arg(action = clap::ArgAction::Set)]
        on: bool,
    },
    /// Light the LEDs in the low four bits of `mask`
    Led { mask: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

fn parse_offset(s: &str) -> Result<u32, String> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    value.map_err(|e| format!("invalid offset '{s}': {e}"))
}

fn parse_hex_bytes(s: &str) -> Result<HexBytes, String> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace() && *c != ':').collect();
    if !digits.is_ascii() {
        return Err(format!("invalid hex data '{s}'"));
    }
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in '{s}'"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16))
        .collect::<Result<Vec<u8>, _>>()
        .map(HexBytes)
        .map_err(|e| format!("invalid hex data '{s}': {e}"))
}

fn hex_dump(offset: u32, data: &[u8]) -> String {
    data.chunks(16)
        .enumerate()
        .map(|(i, row)| {
            let bytes: Vec<String> = row.iter().map(|b| format!("{b:02x}")).collect();
            format!("{:06x}: {}", offset as usize + i * 16, bytes.join(" "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let mut settings_service = match &cli.config {
        Some(path) => SettingsService::with_path(path.clone()),
        None => SettingsService::new()?,
    };
    {
        let settings = settings_service.get_mut();
        if let Some(path) = &cli.control_socket {
            settings.bridge.control_socket = path.clone();
        }
        if let Some(path) = &cli.interrupt_socket {
            settings.bridge.interrupt_socket = path.clone();
        }
        if cli.timeout_ms.is_some() {
            settings.rw_timeout_ms = cli.timeout_ms;
        }
    }
    let settings = settings_service.get().clone();

    let level = match cli.verbose {
        0 => None,
        1 => Some("debug"),
        _ => Some("trace"),
    };
    let _log_guard = logging::init_logger(&settings.log_settings, level)?;

    let connection = bridge::connect(settings.device_id, &settings.bridge, settings.rw_timeout())
        .context("Failed to connect to the Bluetooth bridge")?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    // Installed once per run; the sink keeps handlers for the process lifetime.
    error_sink::set_error_handler(Box::leak(Box::new(EventErrorHandler::new(event_tx.clone()))));
    let _ = event_tx.send(AppEvent::ConnectionStatus(ConnectionStatus::Connected));

    let json = cli.json;
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async move {
            let service = WiimoteService::new(connection.wiimote.clone(), event_tx);
            let result = match cli.command {
                Command::Read {
                    offset,
                    len,
                    register,
                    decode,
                } => {
                    let mut flags = if register { RwFlags::REGISTER } else { RwFlags::EEPROM };
                    if decode {
                        flags = flags | RwFlags::DECODE;
                    }
                    service.read(flags, offset, len).await.map(|_| ())
                }
                Command::Write {
                    offset,
                    data,
                    register,
                } => {
                    let flags = if register { RwFlags::REGISTER } else { RwFlags::EEPROM };
                    service.write(flags, offset, data.0).await
                }
                Command::Beep { reports } => service.beep(reports.unwrap_or(settings.beep_reports)).await,
                Command::Rumble { on } => service.set_rumble(on).await,
                Command::Led { mask } => service.set_led(mask).await,
            };

            if connection.listener.is_finished() {
                service.send_event(AppEvent::ConnectionStatus(ConnectionStatus::Disconnected));
            }

            // Events are queued synchronously, so everything is in by now.
            // The leaked sink handler keeps a sender, so drain instead of
            // waiting for the channel to close.
            error_sink::reset_error_handler();
            while let Ok(event) = event_rx.try_recv() {
                handle_event(event, json);
            }
            result.map_err(anyhow::Error::from)
        })
}

fn handle_event(event: AppEvent, json: bool) {
    match event {
        AppEvent::DeviceError { device_id, message } => error!(device = device_id, "{}", message),
        AppEvent::LogMessage(msg) => match msg.severity {
            MessageSeverity::Warning | MessageSeverity::Error => warn!("{}", msg.message),
            _ => info!("{}", msg.message),
        },
        AppEvent::MemoryRead(dump) if json => match serde_json::to_string(&dump) {
            Ok(line) => println!("{line}"),
            Err(e) => error!("Failed to serialize read result: {}", e),
        },
        AppEvent::MemoryRead(dump) => println!("{}", hex_dump(dump.offset, &dump.data)),
        AppEvent::ConnectionStatus(status) => info!(?status, "Connection status"),
    }
}
