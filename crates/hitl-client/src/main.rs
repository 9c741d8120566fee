use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use hitl_client::config::ConsoleConfig;
use hitl_client::console::Console;
use hitl_client::{AgentService, ApprovalQueue, EventBus, MockAgentFeed, listener};
use hitl_protocol::{AgentEvent, EventKind};

#[derive(Debug, Parser)]
#[command(
    name = "hitl-console",
    version,
    about = "Review and answer agent approval requests from the terminal"
)]
struct Cli {
    /// WebSocket URL of the agent backend (overrides config and HITL_SERVER_URL)
    #[arg(long)]
    url: Option<String>,
    /// Authentication token sent as a query parameter
    #[arg(long)]
    token: Option<String>,
    /// Config file to read instead of ~/.hitl-console/config.toml
    #[arg(long, env = "HITL_CONFIG")]
    config: Option<PathBuf>,
    /// Use the built-in fake agent feed instead of a backend
    #[arg(long, default_value_t = false)]
    mock: bool,
    /// Tick interval of the fake feed
    #[arg(long, default_value_t = 4000)]
    mock_interval_ms: u64,
    /// Start with the bundled example approval in the queue
    #[arg(long, default_value_t = false)]
    seed_example: bool,
}

enum Source {
    Live(AgentService),
    Mock(Arc<MockAgentFeed>),
}

impl Source {
    fn bus(&self) -> Arc<dyn EventBus> {
        match self {
            Source::Live(service) => Arc::new(service.clone()) as Arc<dyn EventBus>,
            Source::Mock(feed) => feed.clone() as Arc<dyn EventBus>,
        }
    }

    fn shutdown(&self) {
        match self {
            Source::Live(service) => service.disconnect(),
            Source::Mock(feed) => feed.stop(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they do not interleave with prompts
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConsoleConfig::load_from(path)?,
        None => ConsoleConfig::load()?,
    };
    if let Some(url) = cli.url {
        config.server.url = Some(url);
    }
    if let Some(token) = cli.token {
        config.server.token = Some(token);
    }
    if cli.seed_example {
        config.approvals.seed_example = true;
    }

    let source = if cli.mock {
        let feed = Arc::new(MockAgentFeed::new());
        feed.start(Duration::from_millis(cli.mock_interval_ms.max(1)));
        tracing::info!("hitl-console starting with mock agent feed");
        Source::Mock(feed)
    } else {
        let url = config.server_url()?;
        let service = AgentService::with_options(config.channel_options());
        tracing::info!(url = %url, "hitl-console starting");
        service.connect(Some(&url));
        Source::Live(service)
    };
    let bus = source.bus();

    bus.on(
        EventKind::AgentMessage,
        listener(|event| {
            if let AgentEvent::AgentMessage(msg) = event {
                println!("\n[{}] {}", msg.agent, msg.message);
            }
        }),
    );
    bus.on(
        EventKind::ActionRequest,
        listener(|_| println!("\nnew approval request, type `list` to see it")),
    );
    bus.on(
        EventKind::WorkspaceUpdate,
        listener(|event| {
            if let AgentEvent::WorkspaceUpdate(update) = event {
                tracing::info!(id = %update.id, rollback = update.rollback, "workspace updated");
            }
        }),
    );

    let queue = if config.approvals.seed_example {
        ApprovalQueue::seeded_with_example(bus.clone())
    } else {
        ApprovalQueue::new(bus.clone())
    };
    queue.attach();
    let queue = Arc::new(queue);

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let result = Console::new(queue.clone(), stdin, std::io::stdout())
        .run()
        .await;

    queue.detach();
    source.shutdown();
    tracing::info!("hitl-console stopped");
    result
}
