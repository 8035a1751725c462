//! Livescribe host process.
//!
//! Bridges a `RecognitionSession` to newline-delimited JSON on stdin/stdout
//! (see `protocol`). Commands are dispatched on the blocking pool because
//! `stop` and `dispose` join threads; events are forwarded from a broadcast
//! channel by a separate task. Logs go to stderr so stdout stays pure JSON.

mod cli;
mod protocol;
mod settings;

use std::sync::Arc;

use anyhow::Context;
use livescribe_core::{
    dispatch, CaptureBackend, CommandResponse, CpalBackend, ErrorKind, ErrorPayload,
    RecognitionSession, SessionConfig, SessionEvent, StubEngine, WavFileBackend,
};
use settings::{default_settings_path, load_settings, save_settings, CaptureSource, HostSettings};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, broadcast::error::RecvError, mpsc};
use tracing::{debug, error, info, warn};

use protocol::{InitDefaults, Request};

const EVENT_CHANNEL_CAPACITY: usize = 256;

struct Host {
    session: Arc<RecognitionSession>,
    sink: Arc<broadcast::Sender<SessionEvent>>,
    defaults: InitDefaults,
}

impl Host {
    async fn handle_line(&self, line: &str) -> String {
        let inbound = protocol::parse_line(line, &self.defaults);
        let response = match inbound.request {
            Ok(Request::Listen) => {
                self.session.subscribe(&self.sink);
                debug!("event stream attached");
                CommandResponse::success(self.session.status())
            }
            Ok(Request::Cancel) => {
                self.session.unsubscribe();
                debug!("event stream detached");
                CommandResponse::success(self.session.status())
            }
            Ok(Request::Session(command)) => {
                let session = Arc::clone(&self.session);
                match tokio::task::spawn_blocking(move || dispatch(&session, &command)).await {
                    Ok(response) => response,
                    Err(e) => {
                        error!("command task failed: {e}");
                        CommandResponse::failure(
                            None,
                            ErrorPayload {
                                kind: ErrorKind::Internal,
                                message: e.to_string(),
                            },
                        )
                    }
                }
            }
            Err(error) => {
                warn!(kind = ?error.kind, message = %error.message, "rejected request");
                CommandResponse::failure(None, error)
            }
        };

        protocol::response_line(inbound.id.as_ref(), &response).unwrap_or_else(|e| {
            error!("failed to serialize response: {e}");
            r#"{"type":"response","ok":false}"#.to_string()
        })
    }
}

fn build_backend(settings: &HostSettings) -> Arc<dyn CaptureBackend> {
    match (settings.capture_source, &settings.wav_path) {
        (CaptureSource::Wav, Some(path)) => {
            info!(path = %path.display(), realtime = settings.wav_realtime, "capture source: WAV replay");
            Arc::new(WavFileBackend::new(path.clone()).realtime(settings.wav_realtime))
        }
        _ => {
            info!(device = ?settings.preferred_input_device, "capture source: microphone");
            match &settings.preferred_input_device {
                Some(name) => Arc::new(CpalBackend::with_preferred_device(name.clone())),
                None => Arc::new(CpalBackend::new()),
            }
        }
    }
}

async fn forward_events(
    mut rx: broadcast::Receiver<SessionEvent>,
    out: mpsc::UnboundedSender<String>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => match protocol::event_line(&event) {
                Ok(line) => {
                    if out.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("failed to serialize event: {e}"),
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event forwarder lagged; events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = match cli::parse_args(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(msg) => {
            eprintln!("{msg}\n\n{}", cli::USAGE);
            std::process::exit(2);
        }
    };
    if cli.help {
        println!("{}", cli::USAGE);
        return Ok(());
    }

    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    cli.apply(&mut settings);
    settings.normalize();

    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_filter)),
        )
        .init();

    info!(
        settings_path = ?settings_path,
        source = ?settings.capture_source,
        default_model = %settings.default_model_path,
        default_sample_rate = settings.default_sample_rate,
        "livescribe host starting"
    );
    if cli.save_settings {
        match save_settings(&settings_path, &settings) {
            Ok(()) => info!(path = %settings_path.display(), "settings saved"),
            Err(e) => warn!(path = %settings_path.display(), "failed to save settings: {e}"),
        }
    }

    // ── Session ───────────────────────────────────────────────────────────
    let session = Arc::new(
        RecognitionSession::new(
            Arc::new(StubEngine),
            build_backend(&settings),
            SessionConfig::from_env(),
        )
        .context("failed to create recognition session")?,
    );

    let (events_tx, events_rx) = broadcast::channel::<SessionEvent>(EVENT_CHANNEL_CAPACITY);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(mut line) = out_rx.recv().await {
            line.push('\n');
            if let Err(e) = stdout.write_all(line.as_bytes()).await {
                error!("stdout closed: {e}");
                break;
            }
            let _ = stdout.flush().await;
        }
    });
    let forwarder = tokio::spawn(forward_events(events_rx, out_tx.clone()));

    let host = Host {
        session: Arc::clone(&session),
        sink: Arc::new(events_tx),
        defaults: InitDefaults {
            model_path: settings.default_model_path.clone(),
            sample_rate: settings.default_sample_rate,
        },
    };

    // ── Request loop ──────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = host.handle_line(&line).await;
        if out_tx.send(reply).is_err() {
            break;
        }
    }

    info!("input closed; disposing session");
    tokio::task::spawn_blocking(move || session.dispose())
        .await
        .context("dispose task failed")?;

    // Dropping the last broadcast sender ends the forwarder, then the writer.
    drop(host);
    let _ = forwarder.await;
    drop(out_tx);
    let _ = writer.await;
    info!("livescribe host stopped");
    Ok(())
}
