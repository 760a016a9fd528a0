use std::net::SocketAddr;
use thiserror::Error;
use tracing::info;

const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY not found. Please set it in your .env file")]
    MissingApiKey,
    #[error("OPENAI_API_KEY found but doesn't start with 'sk-'. Please check your .env file")]
    InvalidApiKey,
    #[error("invalid GAB_BIND_ADDR '{0}': {1}")]
    InvalidBindAddr(String, std::net::AddrParseError),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub api_key: String,
    pub model: String,
    pub api_base: Option<String>,
    pub bind_addr: SocketAddr,
    /// Used for chats that have no system prompt of their own.
    pub default_system_prompt: Option<String>,
}

impl ServerConfig {
    /// Reads the configuration from the environment, after loading `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = match lookup("OPENAI_API_KEY") {
            Some(key) if key.starts_with("sk-") => {
                info!("OpenAI API key loaded successfully");
                key
            }
            Some(_) => return Err(ConfigError::InvalidApiKey),
            None => return Err(ConfigError::MissingApiKey),
        };

        let model = lookup("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_base = lookup("OPENAI_BASE_URL").filter(|s| !s.is_empty());

        let addr = lookup("GAB_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidBindAddr(addr.clone(), e))?;

        let default_system_prompt =
            lookup("GAB_DEFAULT_SYSTEM_PROMPT").filter(|s| !s.trim().is_empty());

        Ok(Self {
            api_key,
            model,
            api_base,
            bind_addr,
            default_system_prompt,
        })
    }
}
