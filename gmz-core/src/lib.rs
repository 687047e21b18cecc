//! Host-side streaming core for the Groovy_MiSTer FPGA.
//!
//! Two independent UDP endpoints: an output channel carrying display
//! timing, compressed or raw frames, and PCM audio to the FPGA's scanout
//! engine, and an input channel carrying joystick and PS/2 state back.
//! The library is the wire between a frame producer and the FPGA — it
//! does not render, emulate, or own a display.
//!
//! Everything is synchronous and single-threaded per connection: no
//! internal threads, no internal tasks, no locks. Drive one connection
//! per thread from your own loop.

mod config;
mod connection;
mod delta;
mod error;
mod health;
mod input;
mod lz4;
mod modeline;
mod pacer;
mod protocol;

pub use config::{
    ConnectConfig, DEFAULT_MAX_FRAME_SIZE, INPUT_PORT, OUTPUT_PORT, SEND_BUF_BYTES,
    UDP_IP_HEADROOM,
};
pub use connection::{OutputConnection, MAX_AUDIO_BYTES};
pub use delta::DeltaEncoder;
pub use error::GmzError;
pub use health::{HealthWindow, WINDOW};
pub use input::InputConnection;
pub use lz4::{compress, compress_bound};
pub use modeline::{FrameTiming, Modeline};
pub use pacer::{
    calc_vsync_line, pace_multiplier, raster_offset_ns, FrameOutcome, DRIFT_GAIN,
    MAX_CONSECUTIVE_DROPS, MAX_CONSECUTIVE_TIMEOUTS, MULT_MAX, MULT_MIN, SETTLE_FRAMES,
    TARGET_DRIFT,
};
pub use protocol::{
    BlitHeader, FpgaStatus, JoystickState, Lz4Mode, Ps2State, RgbMode, SoundChannels, SoundRate,
};
