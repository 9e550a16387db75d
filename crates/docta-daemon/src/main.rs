mod http;
mod mpv;

use std::sync::Arc;
use std::time::Duration;

use docta_core::fallback::FallbackFetcher;
use docta_core::feeds::FeedRelay;
use docta_core::transport::{Fetcher, HttpFetcher};
use docta_core::{SessionEvent, StateManager, StationSession};
use docta_proto::config::Config;
use docta_proto::protocol::StateEvent;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Forwards WARN and ERROR events to session listeners as `StateEvent::Log`.
struct NoticeLayer {
    sender: broadcast::Sender<StateEvent>,
}

impl NoticeLayer {
    fn new(sender: broadcast::Sender<StateEvent>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for NoticeLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is fine
        let _ = self.sender.send(StateEvent::Log { message });
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Channel first so the log layer can feed it
    let (events_tx, _) = broadcast::channel::<StateEvent>(100);

    let data_dir = docta_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(NoticeLayer::new(events_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,docta_core=debug,doctad=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let state_manager = Arc::new(StateManager::with_sender(
        &config.station,
        config.playback.default_volume,
        events_tx,
    ));
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config.fetch.user_agent)?);

    // All external inputs funnel into the session loop
    let (session_tx, session_rx) = mpsc::channel::<SessionEvent>(256);

    let media = Arc::new(
        mpv::MpvElement::launch(
            config.playback.default_volume,
            Duration::from_secs(config.playback.connect_timeout_secs),
            session_tx.clone(),
        )
        .await?,
    );

    if config.http.enabled {
        let relay = Arc::new(FeedRelay::new(
            fetcher.clone(),
            FallbackFetcher::new(config.fetch.attempt_timeout()),
            &config.relay,
        ));
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state_manager.clone(),
            session_tx.clone(),
            relay,
        );
    }

    let shutdown_tx = session_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                let _ = shutdown_tx.send(SessionEvent::Shutdown).await;
            }
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
    });

    // No receiver SDK is available to a headless daemon
    let session = StationSession::new(config, media.clone(), fetcher, None, state_manager);

    info!("Daemon initialised, running session");
    session.run(session_rx).await;

    media.shutdown().await;
    Ok(())
}
