//! Connection configuration.
//!
//! All tunables for an output connection live here; the wire-level enums
//! themselves are defined next to their encodings in [`crate::protocol`].

use crate::protocol::{Lz4Mode, RgbMode, SoundChannels, SoundRate};

/// Default remote port of the FPGA's video/audio/command endpoint.
pub const OUTPUT_PORT: u16 = 32100;

/// Default remote port of the FPGA's input (joystick/PS2) endpoint.
pub const INPUT_PORT: u16 = 32101;

/// Bytes reserved for the IPv4 (20) + UDP (8) headers within the MTU.
pub const UDP_IP_HEADROOM: u16 = 28;

/// Kernel send buffer requested at open. Sized for several frames of
/// chunked payload in flight on a GbE LAN.
pub const SEND_BUF_BYTES: usize = 2 * 1024 * 1024;

/// Default upper bound on a single raw frame; compression and delta
/// buffers are allocated against this at open (1080p, 4 bytes/pixel).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1920 * 1080 * 4;

// ── ConnectConfig ────────────────────────────────────────────────

/// Configuration for [`OutputConnection::open`](crate::OutputConnection::open).
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// FPGA address as an IPv4 literal; no DNS resolution is performed.
    pub host: String,
    /// Remote UDP port of the command/video endpoint.
    pub port: u16,
    /// Path MTU. Payload fragments never exceed `mtu - 28`.
    pub mtu: u16,
    /// Pixel layout the FPGA should expect.
    pub rgb_mode: RgbMode,
    /// PCM sample rate advertised in the init packet.
    pub sound_rate: SoundRate,
    /// PCM channel layout advertised in the init packet.
    pub sound_channels: SoundChannels,
    /// Host-side compression choice. On the wire only off/on is signalled.
    pub lz4_mode: Lz4Mode,
    /// Largest raw frame the connection must accept; sizes the owned
    /// compression and delta buffers.
    pub max_frame_size: usize,
    /// Delta-mode keyframe cadence in frames per field. 0 disables
    /// periodic keyframes (the first frame of each field is always full).
    pub keyframe_interval: u32,
}

impl ConnectConfig {
    /// Config targeting `host` with every other field at its default.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Maximum UDP payload per fragment: `mtu - 28`.
    pub fn mtu_eff(&self) -> usize {
        usize::from(self.mtu.saturating_sub(UDP_IP_HEADROOM))
    }
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: OUTPUT_PORT,
            mtu: 1500,
            rgb_mode: RgbMode::Bgr888,
            sound_rate: SoundRate::Off,
            sound_channels: SoundChannels::Off,
            lz4_mode: Lz4Mode::Off,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            keyframe_interval: 60,
        }
    }
}
