mod client;
mod core;
mod http;
mod launcher;
mod liked;
mod playback;
mod synth;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use feed_proto::config::Config;
use feed_proto::protocol::Command;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    Log(String),
    /// The bearer credential was rejected; the session has ended.
    AuthExpired,
    /// A track that couldn't be played remotely, as a web link.
    OpenExternal(String),
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // WARN and ERROR only
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is fine.
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
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
    // Setup broadcast channel first so we can use it for logging
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = feed_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("tastefeed.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,feed_daemon=debug,hyper_util=warn,reqwest=warn",
                )
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let token = feed_proto::platform::read_token(&config.auth.token_file).ok_or_else(|| {
        anyhow::anyhow!(
            "no access token: set {} or write one to {}",
            feed_proto::platform::TOKEN_ENV,
            config.auth.token_file.display()
        )
    })?;
    let service = Arc::new(client::WebApiClient::new(&config.api, token)?);

    // Event channel: all external inputs funnel into SessionCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::SessionEvent>(256);

    let session_core = core::SessionCore::new(
        config.clone(),
        service,
        broadcast_tx.clone(),
        event_tx.clone(),
    );
    let state_manager = session_core.state_manager();

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state_manager.clone(),
            event_tx.clone(),
            broadcast_tx.clone(),
        );
    }

    if config.playback.open_browser {
        let _launcher_handle = launcher::start(broadcast_tx.subscribe());
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(core::SessionEvent::Shutdown).await;
        }
    });

    if event_tx
        .send(core::SessionEvent::Command(Command::StartSession))
        .await
        .is_err()
    {
        warn!("Session loop closed before start");
    }
    drop(event_tx);

    info!("tastefeed initialised, running session loop");
    session_core.run(event_rx).await?;

    Ok(())
}
