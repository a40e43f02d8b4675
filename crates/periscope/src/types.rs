use periscope_runtime::PluginError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unsupported call: {0}")]
    UnsupportedCall(String),

    #[error("unsupported plugin: {0}")]
    UnsupportedPlugin(String),

    #[error("device already connected: {0}")]
    DeviceConflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid plugin scope: {0}")]
    InvalidScope(String),

    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("channel closed")]
    ChannelClosed,
}
