//! Interface de linha de comando do colmeia baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (serve, run, agents)
//! e flags globais (--config, --verbose), além do laço de polling usado
//! pelo subcomando `run`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;

use crate::coordinator::{CoordinationMode, CoordinationRequest};
use crate::error::JobError;
use crate::jobs::{JobManager, JobResultView, JobSnapshot};

/// colmeia: coordenação assíncrona de múltiplos agentes de IA.
#[derive(Debug, Parser)]
#[command(name = "colmeia", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./colmeia.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Modo de coordenação aceito pela CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Agentes em ordem, cada um vendo as saídas anteriores.
    Sequential,
    /// Agentes em paralelo sobre o mesmo contexto.
    Parallel,
    /// O primeiro agente consulta os demais e responde.
    Collaborative,
    /// Duas rodadas de debate e uma síntese final.
    Debate,
}

impl From<ModeArg> for CoordinationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Sequential => CoordinationMode::Sequential,
            ModeArg::Parallel => CoordinationMode::Parallel,
            ModeArg::Collaborative => CoordinationMode::Collaborative,
            ModeArg::Debate => CoordinationMode::Debate,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sobe a API HTTP de jobs.
    Serve {
        /// Endereço de escuta (sobrepõe `server.host`).
        #[arg(long)]
        host: Option<String>,

        /// Porta de escuta (sobrepõe `server.port`).
        #[arg(long)]
        port: Option<u16>,
    },

    /// Submete uma requisição e acompanha o job até o fim.
    Run {
        /// O pedido em texto livre.
        query: String,

        #[arg(long, value_enum, default_value_t = ModeArg::Sequential)]
        mode: ModeArg,

        /// Papel explícito, na ordem de execução. Repetível.
        #[arg(long = "agent", value_name = "ROLE")]
        agents: Vec<String>,

        /// Escopo de conhecimento para o agente de recuperação. Repetível.
        #[arg(long = "scope", value_name = "ID")]
        scopes: Vec<String>,
    },

    /// Lista os agentes registrados.
    Agents {
        /// Mostra a confiança de cada agente para este texto.
        #[arg(long)]
        query: Option<String>,
    },
}

/// Monta a requisição de coordenação a partir dos argumentos de `run`.
pub fn build_request(
    query: String,
    mode: ModeArg,
    agents: Vec<String>,
    scopes: Vec<String>,
) -> CoordinationRequest {
    let mut request = CoordinationRequest::new(query, mode.into());
    if !agents.is_empty() {
        request.agents = Some(agents);
    }
    request.scope = scopes;
    request
}

/// Why polling stopped without a terminal result.
#[derive(Debug, Error)]
pub enum PollError {
    /// The client gave up; the job itself may still finish.
    #[error("job {job_id} still not finished after {attempts} polls")]
    ClientTimeout { job_id: String, attempts: u32 },

    #[error(transparent)]
    Job(#[from] JobError),
}

/// Polls `status` every `interval` until the job is terminal, for at most
/// `max_attempts` polls, and returns its result payload.
pub async fn wait_for_job(
    manager: &JobManager,
    job_id: &str,
    interval: Duration,
    max_attempts: u32,
    mut on_status: impl FnMut(&JobSnapshot),
) -> Result<JobResultView, PollError> {
    for attempt in 1..=max_attempts {
        let snapshot = manager.status(job_id).await?;
        on_status(&snapshot);
        if snapshot.status.is_terminal() {
            return Ok(manager.result(job_id).await?);
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(PollError::ClientTimeout {
        job_id: job_id.to_string(),
        attempts: max_attempts,
    })
}
