use clap::Parser;
use euc_wheel_link::domain::models::{WheelState, WheelType};
use euc_wheel_link::domain::settings::SettingsService;
use euc_wheel_link::infrastructure::capture::read_capture;
use euc_wheel_link::infrastructure::logging::init_logger;
use euc_wheel_link::infrastructure::protocol::create_decoder;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info};

/// Replay a captured notification stream through a wheel decoder.
#[derive(Parser, Debug)]
#[command(name = "wheel-replay", version)]
struct Args {
    /// Wheel protocol (gotway, kingsong, veteran, inmotion, inmotion-v2, ninebot, ninebot-z)
    #[arg(short, long)]
    wheel: WheelType,

    /// Hex capture, one notification per line
    #[arg(short, long)]
    capture: PathBuf,

    /// Settings file; defaults to the user's config directory
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Print the state after every decoded notification, not only new data
    #[arg(long)]
    all: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let settings_service = match &args.settings {
        Some(path) => SettingsService::load_from(path),
        None => SettingsService::new()?,
    };
    let _logging_guard = init_logger(&settings_service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    let mut decoder = create_decoder(args.wheel)
        .ok_or_else(|| anyhow::anyhow!("No decoder for wheel type {}", args.wheel.as_str()))?;
    let config = settings_service.decoder_config();
    let capture = read_capture(&args.capture)?;
    info!(
        "Replaying {} notifications from {} as {}",
        capture.len(),
        args.capture.display(),
        args.wheel.as_str()
    );

    let mut state = WheelState::new(args.wheel);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut decoded = 0usize;

    for entry in capture {
        let Some(result) = decoder.decode(&entry.data, &state, &config) else {
            debug!("Line {}: nothing decoded", entry.line);
            continue;
        };
        decoded += 1;
        for command in &result.commands {
            info!(
                "Line {}: decoder would send {} (after {} ms)",
                entry.line,
                hex::encode(command.bytes()),
                command.delay_ms()
            );
        }
        state = result.state;
        if result.has_new_data || args.all {
            serde_json::to_writer(&mut out, &state)?;
            writeln!(out)?;
        }
    }

    info!(
        "Replay finished: {} notifications decoded, decoder ready: {}",
        decoded,
        decoder.is_ready()
    );
    Ok(())
}
