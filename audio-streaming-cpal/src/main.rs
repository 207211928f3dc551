use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use crossbeam_channel::{select, unbounded, Sender};

use audio_streaming_core::{
    AuthorizationStatus, StreamState, StreamingConfiguration, StreamingDelegate, StreamingSession,
};
use audio_streaming_cpal::{create_session_on, install_probe_authorization, DeviceEnumerator};

/// Stream the microphone to an ingest endpoint.
#[derive(Parser, Debug)]
#[command(name = "audio-stream", version)]
struct Args {
    /// Ingest URL (rtmp://, rtmps:// or tcp://host:port/path)
    #[arg(required_unless_present = "list_devices")]
    url: Option<String>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output sample rate in Hz
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Output channel count (1 or 2)
    #[arg(long)]
    channels: Option<u16>,

    /// Input device name (defaults to the host default input)
    #[arg(long)]
    device: Option<String>,

    /// Start muted
    #[arg(long)]
    muted: bool,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,
}

enum Event {
    State(StreamState),
    Interrupt,
}

struct StateLogger {
    events: Sender<Event>,
}

impl StreamingDelegate for StateLogger {
    fn on_state_changed(&self, state: StreamState) {
        log::info!("Stream state: {}", state);
        let _ = self.events.send(Event::State(state));
    }

    fn on_authorization_status(&self, status: AuthorizationStatus) {
        log::info!("Microphone authorization: {:?}", status);
    }
}

fn load_configuration(args: &Args) -> Result<StreamingConfiguration, String> {
    let mut config = match &args.config {
        Some(path) => StreamingConfiguration::load(path).map_err(|e| e.to_string())?,
        None => StreamingConfiguration::default(),
    };
    if let Some(sample_rate) = args.sample_rate {
        config.sample_rate = sample_rate;
        config.bitrate = sample_rate * 16 * config.channels as u32;
    }
    if let Some(channels) = args.channels {
        config.channels = channels;
        config.bitrate = config.sample_rate * 16 * channels as u32;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: Args) -> Result<(), String> {
    if args.list_devices {
        let devices = DeviceEnumerator::new().list_input_devices().map_err(|e| e.to_string())?;
        for device in devices {
            println!("{:?}\t{}", device.role, device.name);
        }
        return Ok(());
    }
    let url = args.url.clone().ok_or("missing ingest URL")?;

    let config = load_configuration(&args)?;
    install_probe_authorization().map_err(|e| e.to_string())?;
    let session: StreamingSession =
        create_session_on(config, args.device.as_deref()).map_err(|e| e.to_string())?;
    session.set_muted(args.muted);

    let (events, event_rx) = unbounded();
    let delegate: Arc<dyn StreamingDelegate> = Arc::new(StateLogger { events });
    session.set_delegate(&delegate);

    let (interrupt_tx, interrupt_rx) = unbounded();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(Event::Interrupt);
    })
    .map_err(|e| format!("failed to install Ctrl-C handler: {}", e))?;

    session.start(&url, |ok| {
        if ok {
            log::info!("Streaming; press Ctrl-C to stop");
        } else {
            log::error!("Failed to start streaming");
        }
    });

    let mut failed = false;
    loop {
        let event = select! {
            recv(event_rx) -> event => event.map_err(|e| e.to_string())?,
            recv(interrupt_rx) -> event => event.map_err(|e| e.to_string())?,
        };
        match event {
            Event::Interrupt => {
                log::info!("Stopping");
                session.stop();
            }
            Event::State(StreamState::Error) => {
                failed = true;
                session.stop();
            }
            Event::State(StreamState::Disconnected) => break,
            Event::State(_) => {}
        }
    }

    let diagnostics = session.diagnostics();
    match serde_json::to_string_pretty(&diagnostics) {
        Ok(json) => println!("{}", json),
        Err(e) => log::warn!("Failed to serialize diagnostics: {}", e),
    }

    match (failed, session.last_error()) {
        (true, Some(error)) => Err(error.to_string()),
        (true, None) => Err("stream failed".into()),
        _ => Ok(()),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
