//! Command line client for the BLE door lock.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use doorlock_ble::domain::models::{AppEvent, MessageSeverity};
use doorlock_ble::domain::settings::{LockSettings, SettingsService};
use doorlock_ble::infrastructure::bluetooth::scanner::PeripheralScanner;
use doorlock_ble::infrastructure::bluetooth::{BtleplugRadio, SessionController};
use doorlock_ble::infrastructure::identity_cache::{IdentityCache, JsonFileStore};
use doorlock_ble::infrastructure::logging::init_logger;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "doorlock")]
#[command(about = "Unlock an ESP32 door lock over Bluetooth LE")]
struct Cli {
    /// Log at debug level (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the lock, send the unlock command and disconnect (default)
    Unlock,
    /// List named peripherals in range
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "10")]
        seconds: u64,
    },
    /// Forget the remembered lock so the next unlock scans again
    Forget,
    /// Show or change the lock settings
    Config(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// Advertised name of the lock
    #[arg(long)]
    device_name: Option<String>,
    /// GATT service UUID
    #[arg(long)]
    service_uuid: Option<String>,
    /// Command characteristic UUID
    #[arg(long)]
    char_uuid: Option<String>,
    /// Press duration in milliseconds
    #[arg(long)]
    press_time: Option<String>,
    /// Release duration in milliseconds
    #[arg(long)]
    release_time: Option<String>,
    /// Restore every lock setting to its default
    #[arg(long, conflicts_with_all = ["device_name", "service_uuid", "char_uuid", "press_time", "release_time"])]
    reset: bool,
}

impl ConfigArgs {
    fn apply(self, lock: &mut LockSettings) -> bool {
        let mut changed = false;
        for (field, value) in [
            (&mut lock.device_name, self.device_name),
            (&mut lock.service_uuid, self.service_uuid),
            (&mut lock.command_char_uuid, self.char_uuid),
            (&mut lock.press_time, self.press_time),
            (&mut lock.release_time, self.release_time),
        ] {
            if let Some(value) = value {
                *field = value;
                changed = true;
            }
        }
        changed
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match SettingsService::new() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let mut log_settings = settings.get().log_settings.clone();
    if cli.verbose {
        log_settings.level = "debug".to_string();
    }
    if Path::new(&log_settings.log_dir).is_relative() {
        if let Some(dir) = settings.path().parent() {
            log_settings.log_dir = dir.join(&log_settings.log_dir).display().to_string();
        }
    }
    let _log_guard = match init_logger(&log_settings) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("warning: logging disabled: {e:#}");
            None
        }
    };

    let outcome = match cli.command.unwrap_or(Commands::Unlock) {
        Commands::Unlock => unlock(settings).await,
        Commands::Scan { seconds } => scan(seconds).await,
        Commands::Forget => forget(),
        Commands::Config(args) => configure(settings, args),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn identity_cache() -> anyhow::Result<IdentityCache> {
    let path = SettingsService::config_dir()?.join("identity.json");
    Ok(IdentityCache::new(Arc::new(JsonFileStore::new(path))))
}

async fn unlock(settings: SettingsService) -> anyhow::Result<ExitCode> {
    let radio = Arc::new(
        BtleplugRadio::new()
            .await
            .context("bluetooth is unavailable")?,
    );
    let (event_sender, mut events) = mpsc::unbounded_channel();
    let controller = SessionController::new(radio, Arc::new(settings), identity_cache()?, event_sender);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    let result = {
        let request = controller.request_unlock();
        tokio::pin!(request);
        tokio::select! {
            result = &mut request => result,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling unlock");
                let (_, result) = tokio::join!(controller.shutdown(), &mut request);
                result
            }
        }
    };

    // Closing the event channel lets the printer drain and exit.
    drop(controller);
    let _ = printer.await;

    Ok(match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    })
}

fn print_event(event: &AppEvent) {
    match event {
        AppEvent::PhaseChanged(phase) => info!("Phase: {}", phase),
        AppEvent::LockStateChanged(true) => println!("Unlocked"),
        AppEvent::LockStateChanged(false) => println!("Locked"),
        AppEvent::SessionFinished(Ok(())) => println!("Done"),
        AppEvent::SessionFinished(Err(e)) => eprintln!("Unlock failed: {}", e),
        AppEvent::LogMessage(status) => match status.severity {
            MessageSeverity::Info => println!("{}", status.message),
            MessageSeverity::Success => println!("✓ {}", status.message),
            MessageSeverity::Warning => eprintln!("! {}", status.message),
            MessageSeverity::Error => eprintln!("✗ {}", status.message),
        },
    }
}

async fn scan(seconds: u64) -> anyhow::Result<ExitCode> {
    let radio = Arc::new(
        BtleplugRadio::new()
            .await
            .context("bluetooth is unavailable")?,
    );
    let scanner = PeripheralScanner::new(radio);

    println!("Scanning for {} seconds...", seconds);
    let found = scanner
        .collect_named(Duration::from_secs(seconds))
        .await
        .context("scan failed")?;

    println!("\nFound {} named devices:", found.len());
    for peripheral in found {
        println!("  {} ({})", peripheral.display_name, peripheral.address);
    }
    Ok(ExitCode::SUCCESS)
}

fn forget() -> anyhow::Result<ExitCode> {
    identity_cache()?
        .forget()
        .context("could not clear the remembered lock")?;
    println!("Remembered lock cleared");
    Ok(ExitCode::SUCCESS)
}

fn configure(mut settings: SettingsService, args: ConfigArgs) -> anyhow::Result<ExitCode> {
    if args.reset {
        settings.reset_lock_to_defaults()?;
        println!("Lock settings reset to defaults");
    } else {
        let mut lock = settings.get().lock.clone();
        if args.apply(&mut lock) {
            settings
                .update_lock(lock)
                .context("settings were not saved")?;
            println!("Lock settings saved");
        }
    }

    let lock = &settings.get().lock;
    println!("Settings file: {}", settings.path().display());
    println!("  device name:       {}", lock.device_name);
    println!("  service uuid:      {}", lock.service_uuid);
    println!("  command char uuid: {}", lock.command_char_uuid);
    println!("  press time (ms):   {}", lock.press_time);
    println!("  release time (ms): {}", lock.release_time);

    if let Err(e) = lock.validate() {
        eprintln!("warning: current settings are invalid: {}", e);
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
