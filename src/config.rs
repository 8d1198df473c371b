use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub engine: EngineConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

/// Federation engine (Trino coordinator) settings
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub url: String,
    pub user: String,
    pub source: String,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub default_row_limit: u64,
    pub schema_cache_ttl_secs: u64,
    pub answer_sample_rows: usize,
    pub exploration_limit: u64,
    /// `sqlite` (shared, survives restarts) or `memory`
    pub schema_cache_backend: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub style: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Pick up .env before reading overrides
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("database.url", "./vkg.db")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("llm.gateway_url", "")?
            .set_default("llm.model", "gpt-4o-mini")?
            .set_default("llm.temperature", 0.1)?
            .set_default("llm.max_tokens", 2000)?
            .set_default("llm.timeout_secs", 60)?
            .set_default("engine.url", "http://localhost:8080")?
            .set_default("engine.user", "vkg")?
            .set_default("engine.source", "vkg-query-backend")?
            .set_default("engine.poll_interval_ms", 500)?
            .set_default("engine.max_poll_attempts", 120)?
            .set_default("engine.request_timeout_secs", 30)?
            .set_default("pipeline.default_row_limit", 100)?
            .set_default("pipeline.schema_cache_ttl_secs", 600)?
            .set_default("pipeline.answer_sample_rows", 20)?
            .set_default("pipeline.exploration_limit", 25)?
            .set_default("pipeline.schema_cache_backend", "sqlite")?
            .set_default("logging.level", "info")?
            .set_default("logging.style", "auto")?;

        if let Ok(database_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", database_url)?;
        }

        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(3000))?;
        }

        if let Ok(gateway_url) = env::var("LLM_GATEWAY_URL") {
            builder = builder.set_override("llm.gateway_url", gateway_url)?;
        }

        if let Ok(api_key) = env::var("LLM_API_KEY") {
            builder = builder.set_override("llm.api_key", Some(api_key))?;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            builder = builder.set_override("llm.model", model)?;
        }

        if let Ok(trino_url) = env::var("TRINO_URL") {
            builder = builder.set_override("engine.url", trino_url)?;
        }

        if let Ok(trino_user) = env::var("TRINO_USER") {
            builder = builder.set_override("engine.user", trino_user)?;
        }

        if let Ok(backend) = env::var("SCHEMA_CACHE_BACKEND") {
            builder = builder.set_override("pipeline.schema_cache_backend", backend)?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        if let Ok(log_style) = env::var("RUST_LOG_STYLE") {
            builder = builder.set_override("logging.style", log_style)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
impl Config {
    /// Deterministic configuration for unit tests (no environment lookups)
    pub fn for_tests() -> Self {
        Self {
            database: DatabaseConfig {
                url: ":memory:".to_string(),
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            llm: LlmConfig {
                gateway_url: String::new(),
                api_key: None,
                model: "test-model".to_string(),
                temperature: 0.0,
                max_tokens: 512,
                timeout_secs: 5,
            },
            engine: EngineConfig {
                url: "http://127.0.0.1:1".to_string(),
                user: "test".to_string(),
                source: "vkg-tests".to_string(),
                poll_interval_ms: 1,
                max_poll_attempts: 5,
                request_timeout_secs: 1,
            },
            pipeline: PipelineConfig {
                default_row_limit: 100,
                schema_cache_ttl_secs: 600,
                answer_sample_rows: 20,
                exploration_limit: 25,
                schema_cache_backend: "memory".to_string(),
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                style: "never".to_string(),
            },
        }
    }
}
