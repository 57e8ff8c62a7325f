//! Interface de terminal do colmeia: spinner e saída colorida.
//!
//! Usa as crates `indicatif` para o spinner de progresso e `console` para
//! estilização com cores. O [`JobProgress`] acompanha visualmente o
//! polling de um job no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::jobs::{JobResultView, JobSnapshot, JobStatus};
use crate::server::AgentInfo;

/// Indicador visual de progresso para um job acompanhado via polling.
///
/// Exibe um spinner animado enquanto o job está pendente ou em execução e
/// mensagens coloridas para sucesso (verde), falha (vermelho) e saída
/// parcial ou timeout do cliente (amarelo).
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    /// Inicia o spinner com o id do job.
    pub fn start(job_id: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("job {job_id} queued"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a mensagem do spinner a cada snapshot recebido.
    pub fn update(&self, snapshot: &JobSnapshot) {
        self.pb.set_message(status_line(snapshot));
    }

    /// Finaliza o spinner e imprime o resultado do job.
    pub fn finish(&self, view: &JobResultView) {
        self.pb.finish_and_clear();
        match (&view.result, &view.error) {
            (Some(outcome), _) => {
                match &outcome.partial_failure {
                    None => println!("  {} Job completed", self.green.apply_to("✓")),
                    Some(cause) => println!(
                        "  {} Job completed with partial output: {cause}",
                        self.yellow.apply_to("!")
                    ),
                }
                println!();
                println!("{}", render_outcome(view));
            }
            (None, Some(failure)) => {
                println!("  {} Job failed: {failure}", self.red.apply_to("✗"));
            }
            (None, None) => {
                println!("  {} Job {} is {}", self.yellow.apply_to("?"), view.job_id, view.status);
            }
        }
    }

    /// O cliente desistiu de esperar; o job continua no servidor.
    pub fn client_timeout(&self, job_id: &str, attempts: u32) {
        self.pb.finish_and_clear();
        println!(
            "  {} Gave up after {attempts} polls; job {job_id} is still running",
            self.yellow.apply_to("↻")
        );
    }
}

/// Linha de status exibida pelo spinner.
pub fn status_line(snapshot: &JobSnapshot) -> String {
    let eta = match snapshot.status {
        JobStatus::Pending | JobStatus::Processing => {
            format!(" (~{}s left)", snapshot.estimated_remaining_seconds)
        }
        JobStatus::Completed | JobStatus::Failed => String::new(),
    };
    format!(
        "[{:>3}%] {}: {}{eta}",
        snapshot.progress, snapshot.status, snapshot.message
    )
}

/// Texto final seguido de um resumo por agente.
pub fn render_outcome(view: &JobResultView) -> String {
    let Some(outcome) = &view.result else {
        return String::new();
    };
    let dim = Style::new().dim();
    let mut out = outcome.final_text.trim_end().to_string();
    out.push_str("\n\n");
    out.push_str(
        &dim.apply_to(format!("─── {} · {} ───", outcome.mode, outcome.agents.join(", ")))
            .to_string(),
    );
    for response in &outcome.responses {
        out.push_str(&format!(
            "\n{}",
            dim.apply_to(format!(
                "{} [{}] {}ms",
                response.role, response.phase, response.duration_ms
            ))
        ));
    }
    out
}

/// Imprime a tabela de agentes, com a confiança quando houver.
pub fn print_agents(agents: &[AgentInfo]) {
    let bold = Style::new().bold();
    for agent in agents {
        let score = agent
            .confidence
            .map(|c| format!(" {:.2}", c))
            .unwrap_or_default();
        let kind = if agent.retrieval { "retrieval" } else { "model" };
        println!(
            "{:<10}{score} {} {} {}",
            bold.apply_to(&agent.role),
            kind,
            agent.tier,
            agent.keywords.join(", ")
        );
    }
}
