use std::{path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};

use crate::{
    apis::{
        groq_api::{DEFAULT_MODEL, DEFAULT_TEMPERATURE, GROQ_BASE_URL},
        GroqConfig,
    },
    prompt::{PromptTemplate, DEFAULT_SYSTEM_MESSAGE},
};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Startup options of the `server` binary. Every flag falls back to an
/// environment variable.
#[derive(Parser, Clone)]
#[command(author, version, about = "Ask a Groq-hosted model over HTTP", long_about = None)]
pub struct ServerArgs {
    /// Address to listen on.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// API key of the completion provider.
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub groq_api_key: String,

    /// Key of the tracing provider. Only its presence is reported.
    #[arg(long, env = "LANGCHAIN_API_KEY", hide_env_values = true)]
    pub langchain_api_key: Option<String>,

    /// Model identifier sent with every completion.
    #[arg(long, env = "GROQ_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Sampling temperature.
    #[arg(long, env = "GROQ_TEMPERATURE", default_value_t = DEFAULT_TEMPERATURE)]
    pub temperature: f32,

    /// OpenAI-compatible API root.
    #[arg(long, env = "GROQ_BASE_URL", default_value = GROQ_BASE_URL)]
    pub base_url: String,

    /// System instruction placed before the question. `{name}` placeholders
    /// other than `{question}` make every request fail.
    #[arg(long, env = "SYSTEM_PROMPT", default_value = DEFAULT_SYSTEM_MESSAGE)]
    pub system_prompt: String,

    /// Give up on the provider after this many seconds. Waits forever if unset.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    /// Seconds to wait for in-flight requests after Ctrl-C.
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 30)]
    pub shutdown_grace_secs: u64,

    /// Worker threads to use for tokio runtime.
    #[arg(long, env = "SERVER_THREADS", default_value_t = 4)]
    pub threads: usize,

    /// Log level, `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info", value_enum)]
    pub log_level: LogLevel,
}

/// Load `.env` from the working directory or its parents into the process
/// environment. Variables already set are not overridden.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

impl ServerArgs {
    /// `host:port`, resolved when bound.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn groq_config(&self) -> GroqConfig {
        GroqConfig {
            api_key: self.groq_api_key.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            base_url: self.base_url.clone(),
            timeout: self.request_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn prompt_template(&self) -> PromptTemplate {
        PromptTemplate::ask(self.system_prompt.clone())
    }
}

impl std::fmt::Debug for ServerArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerArgs")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("groq_api_key", &"<redacted>")
            .field(
                "langchain_api_key",
                &self.langchain_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("shutdown_grace_secs", &self.shutdown_grace_secs)
            .field("threads", &self.threads)
            .field("log_level", &self.log_level)
            .finish()
    }
}
