use std::time::Duration;

use thiserror::Error;

/// Everything that can go wrong between the probe and the server.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Malformed frame header. The stream has no resynchronization point
    /// after this, so the scenario treats it as fatal.
    #[error("malformed frame: {0}")]
    Framing(String),

    /// The payload was not valid UTF-8 JSON. The frame itself was consumed,
    /// so the stream stays aligned.
    #[error("payload is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// The server closed the channel, cleanly or mid-frame.
    #[error("server closed the channel")]
    TransportClosed,

    /// Well-formed message that violates the session contract: unsolicited
    /// reply id, non-integer reply id, error reply where success was
    /// expected, or a send attempted in the wrong session state.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The awaited reply did not arrive within the bound.
    #[error("no reply to '{method}' within {waited:?}")]
    Timeout { method: String, waited: Duration },

    #[error("channel i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    /// Fatal errors halt the scenario; the rest fail a single step.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProbeError::Framing(_) | ProbeError::TransportClosed | ProbeError::Io(_)
        )
    }
}
