mod core;
mod http;
mod mpv;
mod socket;
#[cfg(test)]
mod testing;

use clap::Parser;
use rockcast_proto::config::Config;
use rockcast_proto::protocol::TrackSnapshot;
use rockcast_proto::state::StateManager;
use rockcast_session::{volume_to_gain, LoggingObserver, SessionController, SessionObserver, StatusClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "rockcastd", about = "Rock radio streaming daemon")]
struct Args {
    /// Start playback as soon as the daemon is up.
    #[arg(long)]
    autostart: bool,

    /// Do not serve the HTTP API even if the config enables it.
    #[arg(long)]
    no_http: bool,
}

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    Snapshot(TrackSnapshot),
    Failure(String),
    Log(String),
}

/// Forwards WARN and ERROR events to connected clients.
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        event.record(&mut MessageVisitor(&mut message));

        // no receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
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

fn init_logging(broadcast_tx: broadcast::Sender<BroadcastMessage>) -> anyhow::Result<std::path::PathBuf> {
    let data_dir = rockcast_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(log_file).with_ansi(false))
        .with(BroadcastLayer { sender: broadcast_tx })
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,rockcast_daemon=debug,rockcast_session=debug")
            }),
        )
        .init();

    Ok(log_path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);
    let log_path = init_logging(broadcast_tx.clone())?;
    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let state_manager = Arc::new(StateManager::new(
        config.daemon.state_file.clone(),
        config.session.candidates.clone(),
        config.session.default_volume,
    ));
    let volume = state_manager.get_state().await.volume;
    info!("Starting volume {}%", volume);

    let (sink, sink_task) = mpv::MpvSink::spawn(volume_to_gain(volume));
    let status = StatusClient::new(config.session.status_url.clone(), config.session.status_timeout())?;

    let (update_tx, update_rx) = mpsc::unbounded_channel();
    let observers: Vec<Arc<dyn SessionObserver>> = vec![
        Arc::new(core::ViewObserver::new(update_tx)),
        Arc::new(LoggingObserver),
    ];

    let (controller, controller_task) = SessionController::spawn(
        &config.session,
        volume,
        Arc::new(sink),
        Arc::new(status),
        Arc::new(observers),
    )?;

    let core_task = tokio::spawn(core::DaemonCore::new(state_manager.clone(), broadcast_tx.clone()).run(update_rx));

    let control = core::Control {
        controller: controller.clone(),
        state_manager: state_manager.clone(),
        broadcast_tx: broadcast_tx.clone(),
    };

    let _socket_handle = socket::start_server(
        config.http.bind_address.clone(),
        rockcast_proto::platform::DAEMON_TCP_PORT,
        control.clone(),
    );

    if config.http.enabled && !args.no_http {
        let _http_handle = http::start_server(config.http.bind_address.clone(), config.http.port, control.clone());
    }

    if args.autostart {
        info!("Autostart requested");
        controller.start();
    }

    info!("Daemon initialised, waiting for Ctrl-C");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    controller.stop();
    controller.shutdown();
    if let Err(e) = controller_task.await {
        warn!("Controller task ended abnormally: {}", e);
    }

    // the controller held the last sink handle and the only observer, so
    // both the mpv driver and the core are winding down now
    if tokio::time::timeout(Duration::from_secs(3), sink_task).await.is_err() {
        warn!("mpv driver did not stop in time");
    }
    let _ = core_task.await;
    Ok(())
}
