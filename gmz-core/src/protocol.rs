//! Wire protocol for the Groovy_MiSTer firmware.
//!
//! Everything on the wire is little-endian; floats are IEEE 754 binary64
//! bit-for-bit. The first byte of every outbound datagram is the opcode.
//!
//! ## Command packets (host → FPGA, port 32100)
//!
//! ```text
//! close        1 byte    opcode 1
//! init         5 bytes   opcode 2 | lz4_on u8 | sound_rate u8 | sound_channels u8 | rgb_mode u8
//! switch_res  26 bytes   opcode 3 | pixel_clock f64 | h_active..h_total 4×u16
//!                                 | v_active..v_total 4×u16 | interlaced u8
//! audio        3 bytes   opcode 4 | sample_bytes u16   (PCM follows in fragments)
//! get_status   1 byte    opcode 5
//! blit      8/12/13 B    opcode 7 | frame header, see [`BlitHeader`]
//! get_version  1 byte    opcode 8
//! ```
//!
//! ## ACK packet (FPGA → host, 13 bytes)
//!
//! ```text
//! frame_echo   u32  (4)
//! vcount_echo  u16  (2)
//! frame        u32  (4)
//! vcount       u16  (2)
//! bits         u8   (1)   bit 0 vram_ready … bit 7 vram_queue
//! ```
//!
//! ## Input packets (FPGA → host, port 32101), dispatched by length
//!
//! ```text
//!  9 bytes  joy digital   frame u32 | order u8 | joy1 u16 | joy2 u16
//! 17 bytes  joy analog    … | 8 × i8 axes
//! 37 bytes  ps2 keyboard  frame u32 | order u8 | keys [u8; 32]
//! 41 bytes  ps2 kb+mouse  … | buttons u8 | dx i8 | dy i8 | dz i8
//! ```

use crate::error::GmzError;
use crate::modeline::Modeline;

// ── Opcodes ──────────────────────────────────────────────────────

pub const CMD_CLOSE: u8 = 1;
pub const CMD_INIT: u8 = 2;
pub const CMD_SWITCHRES: u8 = 3;
pub const CMD_AUDIO: u8 = 4;
pub const CMD_GET_STATUS: u8 = 5;
pub const CMD_BLIT: u8 = 7;
pub const CMD_GET_VERSION: u8 = 8;

// ── Wire enums ───────────────────────────────────────────────────

/// Pixel layout advertised in the init packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RgbMode {
    Bgr888 = 0,
    Bgra8888 = 1,
    Rgb565 = 2,
}

impl TryFrom<u8> for RgbMode {
    type Error = GmzError;

    fn try_from(value: u8) -> Result<Self, GmzError> {
        match value {
            0 => Ok(Self::Bgr888),
            1 => Ok(Self::Bgra8888),
            2 => Ok(Self::Rgb565),
            _ => Err(GmzError::InvalidEnum {
                type_name: "rgb_mode",
                value,
            }),
        }
    }
}

/// PCM sample rate advertised in the init packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SoundRate {
    Off = 0,
    Hz22050 = 1,
    Hz44100 = 2,
    Hz48000 = 3,
}

impl TryFrom<u8> for SoundRate {
    type Error = GmzError;

    fn try_from(value: u8) -> Result<Self, GmzError> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::Hz22050),
            2 => Ok(Self::Hz44100),
            3 => Ok(Self::Hz48000),
            _ => Err(GmzError::InvalidEnum {
                type_name: "sound_rate",
                value,
            }),
        }
    }
}

/// PCM channel layout advertised in the init packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SoundChannels {
    Off = 0,
    Mono = 1,
    Stereo = 2,
}

impl TryFrom<u8> for SoundChannels {
    type Error = GmzError;

    fn try_from(value: u8) -> Result<Self, GmzError> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::Mono),
            2 => Ok(Self::Stereo),
            _ => Err(GmzError::InvalidEnum {
                type_name: "sound_channels",
                value,
            }),
        }
    }
}

/// Host-side compression choice.
///
/// The firmware clamps the init packet's LZ4 byte to one bit; the HC and
/// adaptive variants only steer which host-side compressor runs and
/// whether delta encoding is layered on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lz4Mode {
    Off = 0,
    Lz4 = 1,
    Lz4Delta = 2,
    Lz4Hc = 3,
    Lz4HcDelta = 4,
    Adaptive = 5,
    AdaptiveDelta = 6,
}

impl Lz4Mode {
    /// The single on/off bit that actually goes on the wire.
    pub fn wire_flag(self) -> u8 {
        u8::from(self != Self::Off)
    }

    /// Whether any compression runs on the host.
    pub fn is_enabled(self) -> bool {
        self != Self::Off
    }

    /// Whether frames are delta-encoded against the previous field.
    pub fn is_delta(self) -> bool {
        matches!(self, Self::Lz4Delta | Self::Lz4HcDelta | Self::AdaptiveDelta)
    }
}

impl TryFrom<u8> for Lz4Mode {
    type Error = GmzError;

    fn try_from(value: u8) -> Result<Self, GmzError> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::Lz4),
            2 => Ok(Self::Lz4Delta),
            3 => Ok(Self::Lz4Hc),
            4 => Ok(Self::Lz4HcDelta),
            5 => Ok(Self::Adaptive),
            6 => Ok(Self::AdaptiveDelta),
            _ => Err(GmzError::InvalidEnum {
                type_name: "lz4_mode",
                value,
            }),
        }
    }
}

// ── Command builders ─────────────────────────────────────────────

/// Build `close`: the FPGA releases the stream.
pub fn close() -> [u8; 1] {
    [CMD_CLOSE]
}

/// Build `init`, advertising compression, sound and pixel layout.
pub fn init(
    lz4_mode: Lz4Mode,
    sound_rate: SoundRate,
    sound_channels: SoundChannels,
    rgb_mode: RgbMode,
) -> [u8; 5] {
    [
        CMD_INIT,
        lz4_mode.wire_flag(),
        sound_rate as u8,
        sound_channels as u8,
        rgb_mode as u8,
    ]
}

/// Build `switch_res`, programming the scanout engine with a new modeline.
pub fn switch_res(m: &Modeline) -> [u8; 26] {
    let mut buf = [0u8; 26];
    buf[0] = CMD_SWITCHRES;
    buf[1..9].copy_from_slice(&m.pixel_clock.to_le_bytes());
    buf[9..11].copy_from_slice(&m.h_active.to_le_bytes());
    buf[11..13].copy_from_slice(&m.h_begin.to_le_bytes());
    buf[13..15].copy_from_slice(&m.h_end.to_le_bytes());
    buf[15..17].copy_from_slice(&m.h_total.to_le_bytes());
    buf[17..19].copy_from_slice(&m.v_active.to_le_bytes());
    buf[19..21].copy_from_slice(&m.v_begin.to_le_bytes());
    buf[21..23].copy_from_slice(&m.v_end.to_le_bytes());
    buf[23..25].copy_from_slice(&m.v_total.to_le_bytes());
    buf[25] = u8::from(m.interlaced);
    buf
}

/// Build the `audio` header that precedes `sample_bytes` of PCM fragments.
pub fn audio_header(sample_bytes: u16) -> [u8; 3] {
    let mut buf = [0u8; 3];
    buf[0] = CMD_AUDIO;
    buf[1..3].copy_from_slice(&sample_bytes.to_le_bytes());
    buf
}

/// Build `get_status`, asking the FPGA for an ACK.
pub fn get_status() -> [u8; 1] {
    [CMD_GET_STATUS]
}

/// Build `get_version`, asking the firmware for its version blob.
pub fn get_version() -> [u8; 1] {
    [CMD_GET_VERSION]
}

// ── BlitHeader ───────────────────────────────────────────────────

/// Per-frame metadata sent as the first datagram of each blit.
///
/// Three encodings share a common prefix: the LZ4 variant extends the
/// raw variant with the compressed size, and the delta variant extends
/// the LZ4 variant with a one-byte delta flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlitHeader {
    /// Host frame counter.
    pub frame: u32,
    /// Field index for interlaced modes (0 or 1).
    pub field: u8,
    /// Scanline at which the FPGA should start scanning this frame out.
    pub vsync_line: u16,
}

impl BlitHeader {
    /// Uncompressed frame header size.
    pub const RAW_SIZE: usize = 8;
    /// LZ4 frame header size.
    pub const LZ4_SIZE: usize = 12;
    /// LZ4 delta frame header size.
    pub const LZ4_DELTA_SIZE: usize = 13;

    /// Encode the raw (uncompressed payload) variant.
    pub fn encode_raw(&self) -> [u8; Self::RAW_SIZE] {
        let mut buf = [0u8; Self::RAW_SIZE];
        buf[0] = CMD_BLIT;
        buf[1..5].copy_from_slice(&self.frame.to_le_bytes());
        buf[5] = self.field;
        buf[6..8].copy_from_slice(&self.vsync_line.to_le_bytes());
        buf
    }

    /// Encode the LZ4 variant: raw header plus the compressed size.
    pub fn encode_lz4(&self, compressed_size: u32) -> [u8; Self::LZ4_SIZE] {
        let mut buf = [0u8; Self::LZ4_SIZE];
        buf[..Self::RAW_SIZE].copy_from_slice(&self.encode_raw());
        buf[8..12].copy_from_slice(&compressed_size.to_le_bytes());
        buf
    }

    /// Encode the LZ4 delta variant: LZ4 header plus the delta flag.
    pub fn encode_lz4_delta(&self, compressed_size: u32) -> [u8; Self::LZ4_DELTA_SIZE] {
        let mut buf = [0u8; Self::LZ4_DELTA_SIZE];
        buf[..Self::LZ4_SIZE].copy_from_slice(&self.encode_lz4(compressed_size));
        buf[12] = 0x01;
        buf
    }
}

// ── FpgaStatus ───────────────────────────────────────────────────

/// The parsed 13-byte ACK. Overwritten on every drain; callers read a
/// snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FpgaStatus {
    /// Last frame number the FPGA acknowledged.
    pub frame_echo: u32,
    /// Scanline position when the FPGA sent the ACK.
    pub vcount_echo: u16,
    /// The FPGA's current frame counter.
    pub frame: u32,
    /// The FPGA's current scanline position.
    pub vcount: u16,
    /// VRAM can accept a new frame without dropping the scanout.
    pub vram_ready: bool,
    /// The FPGA finished displaying the current frame.
    pub vram_end_frame: bool,
    /// VRAM is in sync with the host.
    pub vram_synced: bool,
    /// The FPGA skipped a frame (host too slow).
    pub vga_frameskip: bool,
    /// The FPGA is currently in vertical blank.
    pub vga_vblank: bool,
    /// Current field for interlaced modes.
    pub vga_f1: bool,
    /// The audio pipeline is active.
    pub audio_active: bool,
    /// Frames are queued in FPGA VRAM.
    pub vram_queue: bool,
}

impl FpgaStatus {
    /// Exact ACK size; longer datagrams are valid, the excess is ignored.
    pub const SIZE: usize = 13;

    /// Parse an ACK datagram. Returns `None` for anything shorter than
    /// 13 bytes; such datagrams are discarded silently by the caller.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        let bits = data[12];
        Some(Self {
            frame_echo: u32::from_le_bytes(data[0..4].try_into().ok()?),
            vcount_echo: u16::from_le_bytes(data[4..6].try_into().ok()?),
            frame: u32::from_le_bytes(data[6..10].try_into().ok()?),
            vcount: u16::from_le_bytes(data[10..12].try_into().ok()?),
            vram_ready: bits & 0x01 != 0,
            vram_end_frame: bits & 0x02 != 0,
            vram_synced: bits & 0x04 != 0,
            vga_frameskip: bits & 0x08 != 0,
            vga_vblank: bits & 0x10 != 0,
            vga_f1: bits & 0x20 != 0,
            audio_active: bits & 0x40 != 0,
            vram_queue: bits & 0x80 != 0,
        })
    }
}

// ── Input packets ────────────────────────────────────────────────

/// Joystick digital packet length.
pub const JOY_DIGITAL_SIZE: usize = 9;
/// Joystick digital + analog axes packet length.
pub const JOY_ANALOG_SIZE: usize = 17;
/// PS/2 keyboard packet length.
pub const PS2_KEYBOARD_SIZE: usize = 37;
/// PS/2 keyboard + mouse packet length.
pub const PS2_FULL_SIZE: usize = 41;

/// Latest joystick state captured on the FPGA.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoystickState {
    /// FPGA frame the sample was taken on.
    pub frame: u32,
    /// Intra-frame sample ordinal.
    pub order: u8,
    /// Player 1 button bitmask.
    pub joy1: u16,
    /// Player 2 button bitmask.
    pub joy2: u16,
    /// Signed analog axes; all zero for digital-only packets.
    pub axes: [i8; 8],
}

impl JoystickState {
    /// Parse a 9-byte digital or 17-byte analog joystick packet.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() != JOY_DIGITAL_SIZE && data.len() != JOY_ANALOG_SIZE {
            return None;
        }
        let mut state = Self {
            frame: u32::from_le_bytes(data[0..4].try_into().ok()?),
            order: data[4],
            joy1: u16::from_le_bytes(data[5..7].try_into().ok()?),
            joy2: u16::from_le_bytes(data[7..9].try_into().ok()?),
            axes: [0; 8],
        };
        if data.len() == JOY_ANALOG_SIZE {
            for (axis, &byte) in state.axes.iter_mut().zip(&data[9..17]) {
                *axis = byte as i8;
            }
        }
        Some(state)
    }
}

/// Latest PS/2 keyboard + mouse state captured on the FPGA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ps2State {
    /// FPGA frame the sample was taken on.
    pub frame: u32,
    /// Intra-frame sample ordinal.
    pub order: u8,
    /// 256-bit scancode bitfield: scancode `n` is byte `n/8`, bit `n%8`.
    pub keys: [u8; 32],
    /// Mouse button/status byte; zero for keyboard-only packets.
    pub mouse_buttons: u8,
    /// Mouse X delta.
    pub mouse_x: i8,
    /// Mouse Y delta.
    pub mouse_y: i8,
    /// Mouse wheel delta.
    pub mouse_z: i8,
}

impl Default for Ps2State {
    fn default() -> Self {
        Self {
            frame: 0,
            order: 0,
            keys: [0; 32],
            mouse_buttons: 0,
            mouse_x: 0,
            mouse_y: 0,
            mouse_z: 0,
        }
    }
}

impl Ps2State {
    /// Parse a 37-byte keyboard or 41-byte keyboard+mouse packet.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() != PS2_KEYBOARD_SIZE && data.len() != PS2_FULL_SIZE {
            return None;
        }
        let mut state = Self {
            frame: u32::from_le_bytes(data[0..4].try_into().ok()?),
            order: data[4],
            ..Self::default()
        };
        state.keys.copy_from_slice(&data[5..37]);
        if data.len() == PS2_FULL_SIZE {
            state.mouse_buttons = data[37];
            state.mouse_x = data[38] as i8;
            state.mouse_y = data[39] as i8;
            state.mouse_z = data[40] as i8;
        }
        Some(state)
    }

    /// Whether scancode `code` is currently held.
    pub fn key_down(&self, code: u8) -> bool {
        self.keys[usize::from(code) / 8] & (1 << (code % 8)) != 0
    }
}

// ── Tests ────────────────────────────────────────────────────────
