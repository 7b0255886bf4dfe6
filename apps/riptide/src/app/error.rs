use thiserror::Error;

use crate::channel::ChannelError;
use crate::config::ConfigError;
use crate::page::PageError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Page(#[from] PageError),
    #[error("live channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("server requested more than {limit} reloads; giving up")]
    ReloadLimit { limit: u32 },
}
