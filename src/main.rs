use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use colmeia::agents::Backends;
use colmeia::anthropic::AnthropicClient;
use colmeia::cli::{self, Cli, Command, PollError};
use colmeia::config::{ColmeiaConfig, StoreBackend};
use colmeia::coordinator::Coordinator;
use colmeia::jobs::{FileJobStore, JobManager, JobStore, MemoryJobStore};
use colmeia::retrieval::{InMemoryKnowledge, KnowledgeRetrieval};
use colmeia::{server, telemetry, ui};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.verbose)?;
    let config = ColmeiaConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Serve { host, port } => {
            let manager = build_manager(&config).await?;
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            server::run_server(manager, &host, port).await
        }
        Command::Run {
            query,
            mode,
            agents,
            scopes,
        } => {
            let manager = build_manager(&config).await?;
            let receipt = manager
                .submit(cli::build_request(query, mode, agents, scopes))
                .await?;
            info!(job_id = %receipt.job_id, eta_secs = receipt.estimated_completion_seconds, "job accepted");

            let progress = ui::JobProgress::start(&receipt.job_id);
            let waited = cli::wait_for_job(
                &manager,
                &receipt.job_id,
                Duration::from_millis(config.polling.interval_ms),
                config.polling.max_attempts,
                |snapshot| progress.update(snapshot),
            )
            .await;

            let outcome = match waited {
                Ok(view) => {
                    progress.finish(&view);
                    Ok(())
                }
                Err(PollError::ClientTimeout { job_id, attempts }) => {
                    progress.client_timeout(&job_id, attempts);
                    Ok(())
                }
                Err(e) => Err(e.into()),
            };
            manager.shutdown().await;
            outcome
        }
        Command::Agents { query } => {
            let registry = config.registry()?;
            ui::print_agents(&server::describe_agents(&registry, query.as_deref()));
            Ok(())
        }
    }
}

async fn build_manager(config: &ColmeiaConfig) -> Result<Arc<JobManager>> {
    if config.api_key.is_empty() {
        bail!("no API key: set ANTHROPIC_API_KEY or api_key in colmeia.toml");
    }
    let model = AnthropicClient::new(config.api_key.clone(), config.models.clone())
        .context("failed to build Anthropic client")?;

    let knowledge = match &config.knowledge_path {
        Some(path) => {
            let kb = InMemoryKnowledge::from_json_file(path)
                .with_context(|| format!("failed to load knowledge from {}", path.display()))?;
            info!(snippets = kb.len(), path = %path.display(), "knowledge loaded");
            Some(Arc::new(kb) as Arc<dyn KnowledgeRetrieval>)
        }
        None => None,
    };

    let coordinator = Coordinator::new(
        Arc::new(config.registry()?),
        Backends {
            model: Arc::new(model),
            knowledge,
        },
        config.coordinator_settings(),
    );

    let store: Arc<dyn JobStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryJobStore::new()),
        StoreBackend::File => Arc::new(FileJobStore::open(&config.store.path).await?),
    };

    let manager = JobManager::start(store, Arc::new(coordinator), config.job_settings()).await?;
    Ok(manager)
}
