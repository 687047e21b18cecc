//! Stream a synthetic 320×240 test pattern to a Groovy_MiSTer FPGA.
//!
//! ```sh
//! cargo run --example stream -- 192.168.1.99
//! ```

use std::time::Instant;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gmz_core::{
    ConnectConfig, FrameOutcome, Lz4Mode, Modeline, OutputConnection, RgbMode, SoundChannels,
    SoundRate,
};

const WIDTH: usize = 320;
const HEIGHT: usize = 240;

fn modeline_320x240_60() -> Modeline {
    Modeline {
        pixel_clock: 6.7,
        h_active: 320,
        h_begin: 336,
        h_end: 367,
        h_total: 426,
        v_active: 240,
        v_begin: 244,
        v_end: 247,
        v_total: 262,
        interlaced: false,
    }
}

/// BGR888 gradient that scrolls one pixel per frame.
fn render(frame: &mut [u8], t: u32) {
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let i = (y * WIDTH + x) * 3;
            frame[i] = ((x + t as usize) % 256) as u8;
            frame[i + 1] = (y % 256) as u8;
            frame[i + 2] = (t % 256) as u8;
        }
    }
}

fn main() -> Result<(), gmz_core::GmzError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let host = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1".into());
    let cfg = ConnectConfig {
        lz4_mode: Lz4Mode::Lz4Delta,
        rgb_mode: RgbMode::Bgr888,
        sound_rate: SoundRate::Off,
        sound_channels: SoundChannels::Off,
        max_frame_size: WIDTH * HEIGHT * 3,
        ..ConnectConfig::new(host)
    };

    let mut conn = OutputConnection::open(cfg)?;
    conn.send_init()?;
    conn.switch_res(&modeline_320x240_60())?;

    let ping_ns = match conn.ping_ms(100) {
        Some(rtt) => {
            info!(rtt_ms = rtt, "FPGA answered");
            (rtt * 1e6) as u64
        }
        None => {
            warn!("no ACK yet, streaming blind until the FPGA wakes up");
            1_000_000
        }
    };

    let mut frame_buf = vec![0u8; WIDTH * HEIGHT * 3];
    let mut frame: u32 = 0;
    let mut last_report = Instant::now();
    // Stream budget: how long the previous submit spent handing the
    // frame to the socket.
    let mut last_submit_ns: u64 = 0;

    loop {
        match conn.begin_frame() {
            FrameOutcome::Ready => {}
            FrameOutcome::Skip => continue,
            FrameOutcome::Stalled => {
                warn!("FPGA stalled, giving up");
                break;
            }
        }

        frame += 1;
        render(&mut frame_buf, frame);
        let timing = conn.timing().expect("modeline was set");
        let vsync = gmz_core::calc_vsync_line(&timing, ping_ns, 2_000_000, 0, last_submit_ns);
        let submit_start = Instant::now();
        conn.send_frame(&frame_buf, frame, 0, vsync)?;
        last_submit_ns = submit_start.elapsed().as_nanos() as u64;

        if last_report.elapsed().as_secs() >= 1 {
            let h = conn.health();
            info!(
                frames = conn.frames_sent(),
                mib = conn.bytes_sent() / (1024 * 1024),
                avg_sync_ms = h.avg_sync_wait_ms(),
                ready_rate = h.vram_ready_rate(),
                "streaming"
            );
            last_report = Instant::now();
        }
    }

    conn.close();
    Ok(())
}
