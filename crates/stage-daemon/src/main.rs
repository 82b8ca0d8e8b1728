mod channel;
mod core;
mod http;
mod openlp;

use clap::Parser;
use stage_proto::config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Connection id on the channel hub.  Ids handed to WebSocket clients start
/// at 1; [`SERVER_CLIENT_ID`] marks payloads posted over plain HTTP.
pub type ClientId = usize;
pub const SERVER_CLIENT_ID: ClientId = 0;

#[derive(Debug, Clone)]
pub enum HubMessage {
    /// A client's payload, fanned out to every other client.
    Relay { from: ClientId, payload: Arc<str> },
    /// A payload every client receives (e.g. `init` replies).
    Frame(Arc<str>),
    /// The published view changed; receivers read it from the StateManager.
    ViewUpdated,
    Log(String),
}

#[derive(Parser, Debug)]
#[command(name = "openlp-stage", version, about = "Stage display and control panel for OpenLP")]
struct Args {
    /// Config file (defaults to ~/.config/openlp-stage/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// OpenLP remote base URL, e.g. http://192.168.1.20:4316
    #[arg(long)]
    openlp_url: Option<String>,
    #[arg(long)]
    bind: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Also log to stderr
    #[arg(long)]
    foreground: bool,
}

/// A custom tracing layer that forwards log messages to channel clients
struct BroadcastLayer {
    sender: broadcast::Sender<HubMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<HubMessage>) -> Self {
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
        // Only WARN and ERROR reach the control page
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = String::new();
        let now = chrono::Local::now();
        message.push_str(&format!("{} ", now.format("%H:%M:%S")));
        message.push_str(&format!("[{}] ", level));

        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is fine
        let _ = self.sender.send(HubMessage::Log(message));
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
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let config_path = args.config.clone().unwrap_or_else(Config::config_path);
    if let Some(url) = args.openlp_url {
        config.openlp.base_url = url;
    }
    if let Some(bind) = args.bind {
        config.http.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.http.port = port;
    }

    // Hub first so the log layer can feed it
    let (hub_tx, _) = broadcast::channel::<HubMessage>(config.channel.capacity.max(1));

    let data_dir = stage_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = args
        .foreground
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(BroadcastLayer::new(hub_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,stage_daemon=debug,stage_proto=debug,hyper=warn,reqwest=warn",
                )
            }),
        )
        .init();

    if !args.foreground {
        eprintln!("openlp-stage log: {}", log_path.display());
    }
    info!("Config loaded from: {:?}", config_path);

    let state_manager = Arc::new(stage_proto::state::StateManager::new());

    // Event channel: every input funnels into StageCore
    let (event_tx, event_rx) = mpsc::channel::<core::StageEvent>(256);
    // Requests from StageCore to the OpenLP worker
    let (fetch_tx, fetch_rx) = mpsc::channel::<core::FetchRequest>(64);

    let client = openlp::OpenLpClient::new(
        &config.openlp.base_url,
        Duration::from_millis(config.openlp.request_timeout_ms),
    )?;
    info!("Polling OpenLP at {}", client.base_url());
    let _worker_handle = openlp::start_worker(client, fetch_rx, event_tx.clone());

    let stage_core =
        core::StageCore::new(&config, state_manager.clone(), fetch_tx, hub_tx.clone());

    let app = http::AppState::new(
        state_manager,
        event_tx.clone(),
        hub_tx.clone(),
        &config.channel.name,
    );
    let _http_handle = http::start_server(
        config.http.bind_address.clone(),
        config.http.port,
        app,
    );

    let mut core_handle = tokio::spawn(stage_core.run(event_rx));

    tokio::select! {
        result = &mut core_handle => return result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }

    // Let the core stop its poll ticker before the runtime goes away
    let _ = event_tx.send(core::StageEvent::Shutdown).await;
    core_handle.await?
}
