//! Configuração do colmeia carregada a partir de `colmeia.toml`.
//!
//! A struct [`ColmeiaConfig`] contém todos os parâmetros configuráveis,
//! agrupados por seção. Valores não presentes no arquivo usam defaults
//! sensíveis. A variável de ambiente `ANTHROPIC_API_KEY` tem precedência
//! sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::agents::AgentRegistry;
use crate::anthropic::ModelMap;
use crate::context::ContextLimits;
use crate::coordinator::CoordinatorSettings;
use crate::error::ColmeiaError;
use crate::jobs::JobSettings;

/// Arquivo procurado no diretório atual quando `--config` não é passado.
pub const DEFAULT_CONFIG_FILE: &str = "colmeia.toml";

/// Configuração de nível superior carregada de `colmeia.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ColmeiaConfig {
    /// Chave da API Anthropic.
    #[serde(default)]
    pub api_key: String,

    /// Identificador de modelo para cada nível.
    #[serde(default)]
    pub models: ModelMap,

    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub server: ServerConfig,

    /// Arquivo JSON com snippets de conhecimento. Sem ele, o agente
    /// `retrieval` falha ao ser usado.
    #[serde(default)]
    pub knowledge_path: Option<PathBuf>,
}

/// Seção `[jobs]`: pool de workers, teto por job e retenção.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub workers: usize,
    pub job_timeout_secs: u64,
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_query_chars: usize,
    /// Duração estimada de uma chamada ao modelo, usada nas estimativas.
    pub estimate_per_call_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            job_timeout_secs: 1_800,
            retention_secs: 86_400,
            sweep_interval_secs: 300,
            max_query_chars: 20_000,
            estimate_per_call_secs: 20,
        }
    }
}

/// Seção `[coordinator]`: roteamento, concorrência e política de retentativa.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub max_units: usize,
    pub min_confidence: f32,
    pub default_role: String,
    pub synthesizer_role: String,
    pub max_in_flight: usize,
    pub call_timeout_secs: u64,
    pub retry_backoff_ms: u64,
    pub max_tokens: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_units: 3,
            min_confidence: 0.3,
            default_role: "general".to_string(),
            synthesizer_role: "general".to_string(),
            max_in_flight: 5,
            call_timeout_secs: 120,
            retry_backoff_ms: 2_000,
            max_tokens: 4_096,
        }
    }
}

/// Seção `[context]`: limites do bundle de contexto e do contexto compartilhado.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_chars: usize,
    pub background_items: usize,
    pub background_item_chars: usize,
    pub prior_items: usize,
    pub conversation_turns: usize,
    pub shared_max_entries: usize,
    pub shared_entry_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        let limits = ContextLimits::default();
        Self {
            max_chars: limits.max_chars,
            background_items: limits.background_items,
            background_item_chars: limits.background_item_chars,
            prior_items: limits.prior_items,
            conversation_turns: limits.conversation_turns,
            shared_max_entries: 50,
            shared_entry_chars: 4_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
}

/// Seção `[store]`: onde os jobs são persistidos.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Diretório usado pelo backend `file`.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: PathBuf::from(".colmeia/jobs"),
        }
    }
}

/// Seção `[polling]`: contrato de polling do cliente da CLI.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3_000,
            max_attempts: 200,
        }
    }
}

/// Seção `[server]`: endereço do servidor HTTP.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ColmeiaConfig {
    /// Carrega a configuração de `path`, ou de `colmeia.toml` no diretório
    /// atual. Um arquivo padrão ausente resulta nos valores padrão; um
    /// arquivo explícito ausente é erro.
    pub fn load(path: Option<&Path>) -> Result<Self, ColmeiaError> {
        let (path, explicit) = match path {
            Some(p) => (p, true),
            None => (Path::new(DEFAULT_CONFIG_FILE), false),
        };
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<ColmeiaConfig>(&contents)?
        } else if explicit {
            return Err(ColmeiaError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração para a chave API.
        config.apply_api_key_override(std::env::var("ANTHROPIC_API_KEY").ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_api_key_override(&mut self, key: Option<String>) {
        if let Some(key) = key
            && !key.is_empty()
        {
            self.api_key = key;
        }
    }

    /// Rejeita combinações sem sentido antes de qualquer coisa iniciar.
    pub fn validate(&self) -> Result<(), ColmeiaError> {
        let fail = |msg: &str| Err(ColmeiaError::Config(msg.to_string()));
        let jobs = &self.jobs;
        let coord = &self.coordinator;

        if jobs.workers == 0 {
            return fail("jobs.workers must be at least 1");
        }
        if jobs.job_timeout_secs == 0 {
            return fail("jobs.job_timeout_secs must be positive");
        }
        if jobs.retention_secs <= jobs.job_timeout_secs {
            return fail("jobs.retention_secs must be longer than jobs.job_timeout_secs");
        }
        if jobs.sweep_interval_secs == 0 {
            return fail("jobs.sweep_interval_secs must be positive");
        }
        if jobs.max_query_chars == 0 {
            return fail("jobs.max_query_chars must be positive");
        }
        if !(coord.min_confidence > 0.0 && coord.min_confidence <= 1.0) {
            return fail("coordinator.min_confidence must be in (0, 1]");
        }
        if coord.max_units == 0 || coord.max_in_flight == 0 {
            return fail("coordinator.max_units and coordinator.max_in_flight must be at least 1");
        }
        if coord.call_timeout_secs == 0 || coord.max_tokens == 0 {
            return fail("coordinator.call_timeout_secs and coordinator.max_tokens must be positive");
        }
        if self.context.max_chars == 0 || self.context.shared_max_entries == 0 {
            return fail("context.max_chars and context.shared_max_entries must be positive");
        }
        if self.polling.interval_ms == 0 || self.polling.max_attempts == 0 {
            return fail("polling.interval_ms and polling.max_attempts must be positive");
        }
        Ok(())
    }

    /// Registro embutido com os papéis padrão e sintetizador configurados.
    pub fn registry(&self) -> Result<AgentRegistry, ColmeiaError> {
        let mut registry = AgentRegistry::builtin();
        registry
            .set_default_role(&self.coordinator.default_role)
            .map_err(|e| ColmeiaError::Config(format!("coordinator.default_role: {e}")))?;
        registry
            .set_synthesizer_role(&self.coordinator.synthesizer_role)
            .map_err(|e| ColmeiaError::Config(format!("coordinator.synthesizer_role: {e}")))?;
        Ok(registry)
    }

    pub fn context_limits(&self) -> ContextLimits {
        ContextLimits {
            max_chars: self.context.max_chars,
            background_items: self.context.background_items,
            background_item_chars: self.context.background_item_chars,
            prior_items: self.context.prior_items,
            conversation_turns: self.context.conversation_turns,
        }
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        let coord = &self.coordinator;
        CoordinatorSettings {
            max_units: coord.max_units,
            min_confidence: coord.min_confidence,
            max_in_flight: coord.max_in_flight,
            call_timeout: Duration::from_secs(coord.call_timeout_secs),
            retry_backoff: Duration::from_millis(coord.retry_backoff_ms),
            max_tokens: coord.max_tokens,
            max_query_chars: self.jobs.max_query_chars,
            shared_max_entries: self.context.shared_max_entries,
            shared_entry_chars: self.context.shared_entry_chars,
            context: self.context_limits(),
        }
    }

    pub fn job_settings(&self) -> JobSettings {
        let jobs = &self.jobs;
        JobSettings {
            workers: jobs.workers,
            job_timeout: Duration::from_secs(jobs.job_timeout_secs),
            retention: Duration::from_secs(jobs.retention_secs),
            sweep_interval: Duration::from_secs(jobs.sweep_interval_secs),
            estimate_per_call: Duration::from_secs(jobs.estimate_per_call_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = ColmeiaConfig::default();
        assert!(config.api_key.is_empty());
        assert_eq!(config.jobs.workers, 4);
        assert_eq!(config.jobs.job_timeout_secs, 1_800);
        assert_eq!(config.coordinator.max_units, 3);
        assert_eq!(config.coordinator.min_confidence, 0.3);
        assert_eq!(config.coordinator.retry_backoff_ms, 2_000);
        assert_eq!(config.context.max_chars, 12_000);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.polling.interval_ms, 3_000);
        assert!(config.knowledge_path.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            api_key = "sk-test-123"
            knowledge_path = "kb.json"

            [jobs]
            workers = 8

            [coordinator]
            synthesizer_role = "analysis"

            [store]
            backend = "file"
            path = "/var/lib/colmeia"

            [models]
            fast = "claude-haiku-custom"
        "#;
        let config: ColmeiaConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api_key, "sk-test-123");
        assert_eq!(config.jobs.workers, 8);
        assert_eq!(config.jobs.retention_secs, 86_400);
        assert_eq!(config.coordinator.synthesizer_role, "analysis");
        assert_eq!(config.coordinator.default_role, "general");
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.store.path, PathBuf::from("/var/lib/colmeia"));
        assert_eq!(config.models.fast, "claude-haiku-custom");
        assert_eq!(config.models.standard, ModelMap::default().standard);
        assert_eq!(config.knowledge_path, Some(PathBuf::from("kb.json")));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let res = toml::from_str::<ColmeiaConfig>("[store]\nbackend = \"redis\"");
        assert!(res.is_err());
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("colmeia.toml");
        std::fs::write(&path, "[polling]\ninterval_ms = 500\n").unwrap();

        let config = ColmeiaConfig::load(Some(&path)).unwrap();
        assert_eq!(config.polling.interval_ms, 500);
        assert_eq!(config.polling.max_attempts, 200);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let res = ColmeiaConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(res, Err(ColmeiaError::Config(_))));
    }

    #[test]
    fn env_key_overrides_file_key() {
        let mut config = ColmeiaConfig {
            api_key: "from-file".into(),
            ..ColmeiaConfig::default()
        };
        config.apply_api_key_override(Some(String::new()));
        assert_eq!(config.api_key, "from-file");
        config.apply_api_key_override(Some("from-env".into()));
        assert_eq!(config.api_key, "from-env");
    }

    #[test]
    fn validate_rejects_nonsense() {
        let mut config = ColmeiaConfig::default();
        config.jobs.workers = 0;
        assert!(config.validate().is_err());

        let mut config = ColmeiaConfig::default();
        config.jobs.retention_secs = config.jobs.job_timeout_secs;
        assert!(config.validate().is_err());

        let mut config = ColmeiaConfig::default();
        config.coordinator.min_confidence = 1.5;
        assert!(config.validate().is_err());

        let mut config = ColmeiaConfig::default();
        config.coordinator.min_confidence = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn registry_applies_configured_roles() {
        let mut config = ColmeiaConfig::default();
        config.coordinator.synthesizer_role = "analysis".into();
        let registry = config.registry().unwrap();
        assert_eq!(registry.synthesizer().role, "analysis");
        assert_eq!(registry.default_unit().role, "general");

        config.coordinator.default_role = "ghost".into();
        assert!(config.registry().is_err());
    }

    #[test]
    fn registry_rejects_retrieval_as_answering_role() {
        let mut config = ColmeiaConfig::default();
        config.coordinator.default_role = "retrieval".into();
        let err = config.registry().unwrap_err().to_string();
        assert!(err.contains("coordinator.default_role"));

        let mut config = ColmeiaConfig::default();
        config.coordinator.synthesizer_role = "retrieval".into();
        let err = config.registry().unwrap_err().to_string();
        assert!(err.contains("coordinator.synthesizer_role"));
    }

    #[test]
    fn settings_carry_config_values() {
        let mut config = ColmeiaConfig::default();
        config.coordinator.retry_backoff_ms = 250;
        config.jobs.max_query_chars = 99;
        config.context.max_chars = 4_000;

        let settings = config.coordinator_settings();
        assert_eq!(settings.retry_backoff, Duration::from_millis(250));
        assert_eq!(settings.max_query_chars, 99);
        assert_eq!(settings.context.max_chars, 4_000);
        assert_eq!(config.job_settings().job_timeout, Duration::from_secs(1_800));
    }
}
