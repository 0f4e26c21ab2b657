//! Configuration for Salesdesk
//!
//! CLI arguments and environment variable handling using clap. Backend
//! settings are validated once into a [`BackendConfig`].

use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::aggregator::SyncStrategy;
use crate::auth::TokenMinter;
use crate::records::RecordKind;
use crate::types::{CrmError, Result};

/// Salesdesk - clients, opportunities, interactions and tasks
#[derive(Parser, Debug, Clone)]
#[command(name = "salesdesk")]
#[command(about = "CRM service over a hosted realtime store")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080", global = true)]
    pub listen: SocketAddr,

    /// Development mode: in-process backend seeded with an admin account
    #[arg(long, env = "DEV_MODE", default_value = "false", global = true)]
    pub dev_mode: bool,

    /// Realtime database base URL (e.g. https://project.example-db.app)
    #[arg(long, env = "BACKEND_URL", global = true)]
    pub backend_url: Option<String>,

    /// Web API key for the hosted backend
    #[arg(long, env = "BACKEND_API_KEY", global = true)]
    pub backend_api_key: Option<String>,

    /// Identity toolkit base URL
    #[arg(
        long,
        env = "IDENTITY_URL",
        default_value = "https://identitytoolkit.googleapis.com",
        global = true
    )]
    pub identity_url: String,

    /// Secret for signing login tokens (required outside dev mode)
    #[arg(long, env = "TOKEN_SECRET", global = true)]
    pub token_secret: Option<String>,

    /// Login token expiry in seconds
    #[arg(long, env = "TOKEN_EXPIRY_SECONDS", default_value = "3600", global = true)]
    pub token_expiry_seconds: u64,

    /// Login attempts allowed per email per minute
    #[arg(long, env = "LOGIN_RATE_LIMIT", default_value = "5", global = true)]
    pub login_rate_limit: u32,

    /// How collections are kept in sync after sign-in
    #[arg(long, env = "SYNC_STRATEGY", value_enum, default_value_t = SyncStrategy::Pull, global = true)]
    pub sync_strategy: SyncStrategy,

    /// Fallback language for translations
    #[arg(long, env = "DEFAULT_LANGUAGE", default_value = "en", global = true)]
    pub default_language: String,

    /// File holding persisted preferences (language)
    #[arg(
        long,
        env = "PREFERENCES_PATH",
        default_value = ".salesdesk/preferences.json",
        global = true
    )]
    pub preferences_path: PathBuf,

    /// OpenAI-compatible generation API base URL
    #[arg(long, env = "LLM_BASE_URL", default_value = "https://api.openai.com/v1", global = true)]
    pub llm_base_url: String,

    /// Model used for drafting
    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o-mini", global = true)]
    pub llm_model: String,

    /// API key for the generation API
    #[arg(long, env = "LLM_API_KEY", global = true)]
    pub llm_api_key: Option<String>,

    /// Email used by the one-shot commands to sign in
    #[arg(long, env = "SALESDESK_EMAIL", global = true)]
    pub email: Option<String>,

    /// Password used by the one-shot commands to sign in
    #[arg(long, env = "SALESDESK_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Dev mode admin account email
    #[arg(long, env = "DEV_ADMIN_EMAIL", default_value = "admin@salesdesk.local", global = true)]
    pub dev_admin_email: String,

    /// Dev mode admin account password
    #[arg(long, env = "DEV_ADMIN_PASSWORD", default_value = "admin123", hide_env_values = true, global = true)]
    pub dev_admin_password: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,
}

/// Subcommands; `serve` is the default
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP login endpoint
    Serve,

    /// Export a collection as CSV
    Export {
        #[arg(value_enum)]
        kind: RecordKind,

        /// Output file (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Read a CSV file and display its raw contents
    Import { file: PathBuf },

    /// Draft a follow-up email for a client
    Draft {
        /// Client id
        client_id: String,

        /// Output language (defaults to the persisted preference)
        #[arg(long)]
        language: Option<String>,
    },

    /// Resolve a translation key, optionally with `name=value` parameters
    Translate {
        key: String,

        params: Vec<String>,

        /// Switch (and persist) the active language first
        #[arg(long)]
        language: Option<String>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Validated backend selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// In-process backend
    Memory,
    /// Hosted realtime database + identity toolkit
    Rest {
        database_url: String,
        identity_url: String,
        api_key: String,
    },
    /// Missing or invalid configuration; every backend call fails
    Disabled(String),
}

impl Args {
    /// Effective subcommand
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    /// Decide the backend once
    pub fn backend_config(&self) -> BackendConfig {
        if self.dev_mode {
            return BackendConfig::Memory;
        }

        let Some(database_url) = self.backend_url.as_deref().filter(|u| !u.is_empty()) else {
            return BackendConfig::Disabled("BACKEND_URL is not set".into());
        };
        if !database_url.starts_with("http://") && !database_url.starts_with("https://") {
            return BackendConfig::Disabled(format!(
                "BACKEND_URL must be an http(s) URL, got '{}'",
                database_url
            ));
        }
        let Some(api_key) = self.backend_api_key.as_deref().filter(|k| !k.is_empty()) else {
            return BackendConfig::Disabled("BACKEND_API_KEY is not set".into());
        };

        BackendConfig::Rest {
            database_url: database_url.to_string(),
            identity_url: self.identity_url.clone(),
            api_key: api_key.to_string(),
        }
    }

    /// Token minter for the login endpoint
    pub fn token_minter(&self) -> Result<TokenMinter> {
        match (&self.token_secret, self.dev_mode) {
            (Some(secret), _) => TokenMinter::new(secret.clone(), self.token_expiry_seconds),
            (None, true) => Ok(TokenMinter::new_dev()),
            (None, false) => Err(CrmError::Configuration(
                "TOKEN_SECRET is required outside dev mode".into(),
            )),
        }
    }
}
