use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use callcenter_core::contacts::RetryPolicy;
use callcenter_core::prelude::*;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Call center server: provider webhooks, campaign dialers and agent event streams
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address for the HTTP surface (overrides the config file)
    #[arg(long)]
    listen: Option<String>,

    /// SQLite URL for the durable call mirror, e.g. sqlite://callcenter.db
    #[arg(long)]
    db: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Seed a demo campaign with this many agents and ten contacts per agent
    #[arg(long, default_value_t = 0)]
    demo_agents: usize,

    /// Delay between simulated ringing and answer pushes
    #[arg(long, default_value_t = 1500)]
    progress_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},callcenter_core=debug", args.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&args)?;

    info!("🚀 Call center v{} starting", env!("CARGO_PKG_VERSION"));
    info!("==========================================");
    info!("   🆔 Instance:  {}", config.general.instance_id);
    info!("   🌐 Listen:    {}", config.general.listen_addr);
    info!(
        "   💾 Database:  {}",
        if config.database.enabled { config.database.database_url.as_str() } else { "disabled" }
    );
    info!("   📝 Log Level: {}", args.log_level);
    info!("==========================================");

    let provider = Arc::new(if config.provider.webhook_secret.is_empty() {
        SimulatedProvider::new()
    } else {
        SimulatedProvider::with_secret(&config.provider.webhook_secret)
    });
    provider.enable_auto_progress(Duration::from_millis(args.progress_ms));

    let agents = Arc::new(InMemoryAgentDirectory::new());
    let contacts = Arc::new(InMemoryContactStore::with_policy(RetryPolicy::from_config(
        &config.dialer,
    )));

    let engine = CallCenterEngine::builder()
        .with_config(config.clone())
        .with_provider(provider.clone())
        .with_agent_directory(agents.clone())
        .with_contact_store(contacts.clone())
        .build()
        .await?;
    engine.start().await?;

    let status_feed = spawn_status_feed(engine.clone(), provider.clone());

    if args.demo_agents > 0 {
        seed_demo(&engine, &agents, &contacts, args.demo_agents).await?;
    }

    let listener = tokio::net::TcpListener::bind(&config.general.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.general.listen_addr))?;
    info!("✅ Listening on {}", config.general.listen_addr);

    axum::serve(listener, callcenter_core::api::router(engine.clone()))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for ctrl-c: {}", e);
            }
            info!("🛑 Shutdown signal received");
        })
        .await?;

    status_feed.abort();
    engine.shutdown().await;
    info!("👋 Call center stopped");
    Ok(())
}

/// Config file (or defaults) with the command-line overrides applied, validated
fn load_config(args: &Args) -> Result<CallCenterConfig> {
    let mut config = match &args.config {
        Some(path) => CallCenterConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CallCenterConfig::default(),
    };
    if let Some(listen) = &args.listen {
        config.general.listen_addr = listen.clone();
    }
    if let Some(db) = &args.db {
        config.database.enabled = true;
        config.database.database_url = db.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Feed the simulated provider's status pushes into the registry, as the status
/// webhook would for a real provider
fn spawn_status_feed(
    engine: Arc<CallCenterEngine>,
    provider: Arc<SimulatedProvider>,
) -> tokio::task::JoinHandle<()> {
    let mut feed = provider.subscribe_status();
    tokio::spawn(async move {
        loop {
            match feed.recv().await {
                Ok(push) => {
                    if let Err(e) = engine
                        .registry()
                        .apply_provider_status_by_provider_id(&push.provider_call_id, push.status)
                        .await
                    {
                        debug!("Status push for {} ignored: {}", push.provider_call_id, e);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("⚠️ Status feed lagged, {} pushes dropped", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn seed_demo(
    engine: &CallCenterEngine,
    agents: &InMemoryAgentDirectory,
    contacts: &InMemoryContactStore,
    agent_count: usize,
) -> Result<()> {
    const CAMPAIGN: &str = "demo";

    engine
        .dialer()
        .add_campaign(Campaign::new(CAMPAIGN, "Demo campaign", PacingStrategy::Progressive))
        .await?;

    for i in 0..agent_count {
        let id = format!("agent-{:03}", i + 1);
        let agent_id = agents.register_agent(Agent::new(id.as_str(), id.as_str()).with_campaign(CAMPAIGN))?;
        agents.login(&agent_id)?;
    }

    let campaign = CampaignId::from(CAMPAIGN);
    for i in 0..agent_count * 10 {
        let contact = Contact::new(format!("demo-{:04}", i), CAMPAIGN, format!("+1555020{:04}", i));
        let contact_id = contact.id.clone();
        contacts.insert(contact);
        engine.dialer().enqueue(&campaign, contact_id, 5, None).await?;
    }

    engine.dialer().start_campaign(&campaign).await?;
    info!(
        "🎬 Demo campaign seeded with {} agents and {} contacts",
        agent_count,
        agent_count * 10
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("callcenter").chain(extra.iter().copied())).unwrap()
    }

    #[test]
    fn test_missing_config_file_names_the_path() {
        let err = load_config(&args(&["--config", "/nonexistent/callcenter.toml"])).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("loading /nonexistent/callcenter.toml"), "{}", message);
    }

    #[test]
    fn test_command_line_overrides_apply() {
        let config = load_config(&args(&["--db", "sqlite://calls.db", "--listen", "127.0.0.1:9090"])).unwrap();
        assert!(config.database.enabled);
        assert_eq!(config.database.database_url, "sqlite://calls.db");
        assert_eq!(config.general.listen_addr, "127.0.0.1:9090");
    }

    #[test]
    fn test_invalid_override_surfaces_configuration_error() {
        let err = load_config(&args(&["--db", ""])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CallCenterError>(),
            Some(CallCenterError::Configuration(_))
        ));
    }

    #[test]
    fn test_defaults_without_arguments() {
        let config = load_config(&args(&[])).unwrap();
        assert!(!config.database.enabled);
    }
}
