use anyhow::{Context, Result};
use std::path::PathBuf;
use url::Url;

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_LOG_FILE: &str = "gab.log";

pub struct CliConfig {
    pub server_url: Url,
    pub log_file: PathBuf,
}

impl CliConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let server_url =
            std::env::var("GAB_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
        let server_url = Url::parse(&server_url)
            .with_context(|| format!("GAB_SERVER_URL is not a valid url: {}", server_url))?;

        let log_file = std::env::var("GAB_LOG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_FILE));

        Ok(Self {
            server_url,
            log_file,
        })
    }
}
