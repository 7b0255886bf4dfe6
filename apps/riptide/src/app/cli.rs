use clap::{Args, Parser};
use std::path::PathBuf;

use crate::app::error::CliError;
use crate::config::{self, Config};
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "riptide",
    about = "Drive a live server-rendered page from the terminal",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "RIPTIDE_PAGE_URL",
        value_name = "URL",
        help = "Page to load; the live channel connects to the same host"
    )]
    pub url: Option<String>,

    #[arg(
        long = "ws-path",
        env = "RIPTIDE_WS_PATH",
        value_name = "PATH",
        help = "Path of the live websocket endpoint"
    )]
    pub ws_path: Option<String>,

    #[arg(
        long,
        env = "RIPTIDE_SESSION_COOKIE",
        value_name = "NAME",
        help = "Cookie that carries the session id into the websocket handshake"
    )]
    pub cookie: Option<String>,

    #[arg(
        long = "max-reloads",
        env = "RIPTIDE_MAX_RELOADS",
        value_name = "COUNT",
        help = "Give up after this many server-requested reloads"
    )]
    pub max_reloads: Option<u32>,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

impl Cli {
    /// Environment defaults with command-line flags applied on top.
    pub fn config(&self) -> Result<Config, CliError> {
        let mut config = Config::from_env()?;
        if let Some(url) = &self.url {
            config.page_url = config::parse_url("--url", url)?;
        }
        if let Some(path) = &self.ws_path {
            config.ws_path = config::normalize_path(path);
        }
        if let Some(cookie) = &self.cookie {
            config.session_cookie = cookie.clone();
        }
        if let Some(max_reloads) = self.max_reloads {
            config.max_reloads = max_reloads;
        }
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "RIPTIDE_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "RIPTIDE_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}
