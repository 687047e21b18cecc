//! Domain-specific error types for the GroovyMiSTer link.
//!
//! All fallible operations return `Result<T, GmzError>`.
//! No panics on invalid input — every error is typed and recoverable.
//! Receive-side transient errors are deliberately *not* represented here:
//! the drain loops absorb them and keep the last-seen FPGA status intact.

use thiserror::Error;

/// The canonical error type for the GroovyMiSTer host library.
#[derive(Debug, Error)]
pub enum GmzError {
    // ── Connection establishment ─────────────────────────────────
    /// The host string is not a valid IPv4 literal (no DNS is attempted).
    #[error("cannot resolve {0:?}: expected an IPv4 literal")]
    ResolveFailed(String),

    /// The OS refused to create the UDP socket.
    #[error("socket creation failed: {0}")]
    SocketCreateFailed(#[source] std::io::Error),

    /// `SO_SNDBUF` could not be applied. Fatal at open: an undersized
    /// send buffer silently drops frame fragments under load.
    #[error("could not size send buffer to {requested} bytes: {source}")]
    SetSendBufFailed {
        requested: usize,
        #[source]
        source: std::io::Error,
    },

    /// The configured MTU leaves no room for the UDP/IPv4 headers.
    #[error("mtu {0} is too small: must exceed the 28-byte UDP/IPv4 allowance")]
    InvalidMtu(u16),

    // ── Streaming ────────────────────────────────────────────────
    /// `sendto` reported an error; the caller may retry the whole frame.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// PCM payload exceeds the 16-bit length field of the audio header.
    #[error("audio payload too large: {size} bytes (max {max})")]
    AudioTooLarge { size: usize, max: usize },

    /// LZ4 produced no output — the compression buffer is too small
    /// for this frame.
    #[error("compression failed for {size}-byte frame")]
    CompressFailed { size: usize },

    // ── Validation ───────────────────────────────────────────────
    /// A numeric value did not map to any known wire enum variant.
    #[error("unknown {type_name} value: {value}")]
    InvalidEnum { type_name: &'static str, value: u8 },

    /// A modeline violated the h/v ordering or pixel clock invariants.
    #[error("invalid modeline: {0}")]
    InvalidModeline(&'static str),
}
