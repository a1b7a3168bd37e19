use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Channel send failed ({channel}): {reason}")]
    SendFailed { channel: String, reason: String },

    #[error("Channel disconnected: {0}")]
    Disconnected(String),
}
