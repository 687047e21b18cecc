//! Print joystick and PS/2 events streamed back from the FPGA.
//!
//! ```sh
//! cargo run --example input -- 192.168.1.99
//! ```

use std::thread;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use gmz_core::InputConnection;

fn main() -> Result<(), gmz_core::GmzError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let host = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1".into());
    let mut input = InputConnection::bind(&host)?;
    info!(host = %host, "listening for input");

    let mut last_joy = *input.joystick();
    let mut last_ps2_frame = 0u32;

    loop {
        if input.poll() {
            let joy = input.joystick();
            if (joy.joy1, joy.joy2) != (last_joy.joy1, last_joy.joy2) {
                info!(frame = joy.frame, joy1 = joy.joy1, joy2 = joy.joy2, "joystick");
            }
            last_joy = *joy;

            let ps2 = input.ps2();
            if ps2.frame != last_ps2_frame {
                let held: Vec<u8> = (0..=255u8).filter(|&c| ps2.key_down(c)).collect();
                if !held.is_empty() || ps2.mouse_x != 0 || ps2.mouse_y != 0 {
                    info!(
                        frame = ps2.frame,
                        keys = ?held,
                        mouse = ?(ps2.mouse_x, ps2.mouse_y, ps2.mouse_z),
                        "ps2"
                    );
                }
                last_ps2_frame = ps2.frame;
            }
        }
        thread::sleep(Duration::from_millis(2));
    }
}
