//! # Braillink CLI
//!
//! Command-line interface for Braille translation and embossing.
//!
//! ## Usage
//!
//! ```bash
//! # Translate text to Unicode Braille
//! braillink encode "Hello 42"
//!
//! # Translate Unicode Braille back to text
//! braillink decode "⠠⠓⠑⠇⠇⠕"
//!
//! # Power on the Bluetooth adapter, then list nearby embossers
//! braillink power-on
//! braillink scan
//!
//! # Emboss text on the strongest device found (or a given one)
//! braillink print "Hello" --device 00:11:62:AA:BB:CC
//!
//! # Try everything without hardware
//! braillink --simulate print "Hello"
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::debug;

use braillink::{
    BraillinkConfig, BraillinkError, Device, Event, JobStatus, Session,
    braille,
    device::{Radio, rfcomm::RfcommRadio, simulated::SimulatedRadio},
    pairing::JsonFilePairingStore,
};

/// Braillink - Braille embosser utility
#[derive(Parser, Debug)]
#[command(name = "braillink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON config file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use the built-in simulated embossers instead of Bluetooth
    #[arg(long, global = true)]
    simulate: bool,

    /// Offer reference devices when a scan finds nothing
    #[arg(long, global = true)]
    allow_fallback: bool,

    /// Remember connected devices in this JSON file
    #[arg(long, global = true, value_name = "FILE")]
    pairings: Option<PathBuf>,

    /// User the pairing records belong to
    #[arg(long, global = true, default_value = "default")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate text to Unicode Braille
    Encode {
        text: String,

        /// Print wire bytes (hex) instead of glyphs
        #[arg(long)]
        bytes: bool,
    },

    /// Translate Unicode Braille to text
    Decode { braille: String },

    /// Discover nearby embossers
    Scan {
        /// Scan duration in milliseconds (defaults to config)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// List bonded devices instead of scanning
        #[arg(long)]
        bonded: bool,
    },

    /// Power on the Bluetooth adapter
    PowerOn,

    /// Emboss text
    Print {
        text: String,

        /// Device address (defaults to the strongest device found)
        #[arg(long)]
        device: Option<String>,
    },

    /// Show battery, paper and error state
    Status {
        /// Device address (defaults to the strongest device found)
        #[arg(long)]
        device: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), BraillinkError> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Encode { text, bytes } => {
            let translation = braille::encode(text);
            if *bytes {
                let hex: Vec<String> = translation
                    .to_bytes()
                    .iter()
                    .map(|b| format!("{:02X}", b))
                    .collect();
                println!("{}", hex.join(" "));
            } else {
                println!("{}", translation.unicode_string);
            }
            if !translation.skipped.is_empty() {
                eprintln!("Skipped untranslatable characters: {:?}", translation.skipped);
            }
            Ok(())
        }

        Commands::Decode { braille: input } => {
            println!("{}", braille::decode_unicode(input));
            Ok(())
        }

        Commands::Scan { timeout_ms, bonded } => {
            let session = open_session(&cli)?;
            let manager = session.manager();
            if *bonded {
                print_devices(&manager.bonded_devices().await?);
                return Ok(());
            }
            let timeout = timeout_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or_else(|| session.config().discovery.scan_timeout());
            let result = manager.scan(timeout).await?;
            if result.is_fallback() {
                println!("No devices found; showing reference devices (demo only).");
            }
            print_devices(&result.devices);
            Ok(())
        }

        Commands::PowerOn => {
            let session = open_session(&cli)?;
            session.manager().enable_radio().await?;
            println!("Bluetooth is on.");
            Ok(())
        }

        Commands::Print { text, device } => {
            let session = open_session(&cli)?;
            let connected = connect(&session, device.as_deref()).await?;
            println!("Connected to {} ({})", connected.display_name, connected.id);

            let mut events = session.subscribe();
            let mut job = session.submit_print_request_text(text)?;
            let job_id = job.id();
            let progress = tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    match event {
                        Event::PrintProgress { job_id: id, percent } if id == job_id => {
                            println!("  {:>3}%", percent);
                        }
                        Event::PrintCompleted { job_id: id } | Event::PrintError { job_id: id, .. }
                            if id == job_id =>
                        {
                            break;
                        }
                        _ => {}
                    }
                }
            });

            let status = job.wait().await;
            let _ = progress.await;
            session.manager().disconnect().await;

            match status {
                JobStatus::Completed => {
                    println!("Done.");
                    Ok(())
                }
                JobStatus::Error(reason) => Err(BraillinkError::Transfer(reason.to_string())),
                other => Err(BraillinkError::Transfer(format!("job ended as {:?}", other))),
            }
        }

        Commands::Status { device } => {
            let session = open_session(&cli)?;
            let connected = connect(&session, device.as_deref()).await?;
            let status = session.poller().read_status().await;
            session.manager().disconnect().await;

            println!("Device:  {} ({})", connected.display_name, connected.id);
            if let Some(firmware) = &connected.firmware_version {
                println!("Firmware: {}", firmware);
            }
            println!("Battery: {}%", status.battery_level);
            println!("Paper:   {}", if status.paper_loaded { "loaded" } else { "empty" });
            match status.error {
                Some(code) => println!("Error:   {}", code),
                None => println!("Error:   none"),
            }
            if status.stale {
                println!("(last known values, device did not answer)");
            }
            Ok(())
        }
    }
}

fn open_session(cli: &Cli) -> Result<Session, BraillinkError> {
    let mut config = match &cli.config {
        Some(path) => BraillinkConfig::load(path)?,
        None => BraillinkConfig::default(),
    };
    if cli.allow_fallback {
        config.discovery.allow_fallback_devices = true;
    }
    debug!("Config: {:?}", config);

    let radio: Arc<dyn Radio> = if cli.simulate {
        Arc::new(SimulatedRadio::reference())
    } else {
        Arc::new(RfcommRadio::default())
    };

    Ok(match &cli.pairings {
        Some(path) => Session::with_pairing_store(
            radio,
            config,
            Arc::new(JsonFilePairingStore::new(path)),
            cli.user.clone(),
        ),
        None => Session::new(radio, config),
    })
}

/// Connect to `device`, scanning first if it is not known yet. Without an
/// address, picks the strongest device a scan finds.
async fn connect(session: &Session, device: Option<&str>) -> Result<Device, BraillinkError> {
    let manager = session.manager();
    let timeout = session.config().discovery.scan_timeout();

    if let Some(id) = device {
        return match manager.connect(id).await {
            Err(BraillinkError::DeviceNotFound(_)) => {
                manager.scan(timeout).await?;
                manager.connect(id).await
            }
            other => other,
        };
    }

    let result = manager.scan(timeout).await?;
    let strongest = result
        .devices
        .first()
        .ok_or_else(|| BraillinkError::DeviceNotFound("no devices found".to_string()))?;
    manager.connect(&strongest.id).await
}

fn print_devices(devices: &[Device]) {
    if devices.is_empty() {
        println!("No devices found.");
        return;
    }
    for device in devices {
        println!(
            "  {}  {:<28} {:>4} dBm{}{}",
            device.id,
            device.display_name,
            device.signal_strength,
            if device.paired { "  paired" } else { "" },
            if device.source == braillink::DiscoverySource::Fallback {
                "  (demo)"
            } else {
                ""
            }
        );
    }
}
