//! CRT sync math and the frame pacer.
//!
//! The pure primitives (raster offset, vsync-line budgeting, the drift
//! controller) are free functions with no I/O so their behavior is
//! testable in closed form. [`OutputConnection::begin_frame`] composes
//! them with the sync request, the backpressure observer, and a
//! precision sleep into the per-frame cadence:
//!
//! 1. `wait_sync`: request an ACK, bounded wait.
//! 2. Fold the outcome into `ready` / `skip` / `stalled`.
//! 3. Sleep to the drift-corrected pace anchor (coarse sleep, spin tail).

use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::connection::OutputConnection;
use crate::modeline::FrameTiming;
use crate::protocol::FpgaStatus;

// ── Tuning ───────────────────────────────────────────────────────

/// How far ahead of the FPGA the host aims to run, in frames. Three
/// frames absorb LAN jitter without starving the scanout queue.
pub const TARGET_DRIFT: f64 = 3.0;

/// First-order drift gain; converges in roughly a second at 60 Hz.
pub const DRIFT_GAIN: f64 = 0.02;

/// Frames of grace before sync timeouts count toward stall detection.
pub const SETTLE_FRAMES: u32 = 30;

/// Consecutive sync timeouts (past settle) that declare a stall.
pub const MAX_CONSECUTIVE_TIMEOUTS: u32 = 3;

/// Consecutive VRAM-not-ready skips that declare a stall.
pub const MAX_CONSECUTIVE_DROPS: u32 = 60;

/// Multiplier clamp: never pace below 92 % or above 105 % of nominal.
pub const MULT_MIN: f64 = 0.92;
pub const MULT_MAX: f64 = 1.05;

/// Sync timeout while settling vs in steady state, in milliseconds.
const SETTLE_TIMEOUT_MS: u32 = 50;
const RUN_TIMEOUT_MS: u32 = 16;

/// Precision sleep hands the tail of the wait to a spin loop.
const SPIN_SLACK: Duration = Duration::from_millis(2);

// ── FrameOutcome ─────────────────────────────────────────────────

/// What the caller should do with the upcoming frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Submit the frame now.
    Ready,
    /// Transient backpressure; do not submit this frame.
    Skip,
    /// The FPGA is unresponsive; close and reconnect.
    Stalled,
}

// ── PacerState ───────────────────────────────────────────────────

/// Mutable pacing state owned by the output connection.
#[derive(Debug, Clone)]
pub struct PacerState {
    /// Frames the host has paced since open.
    pub client_frame: u32,
    /// Drift-free sleep anchor: the previous pace target.
    pub(crate) last_pace: Option<Instant>,
    /// Last instant a frame came out `ready`, for real-drop detection.
    pub(crate) last_ready: Option<Instant>,
    /// Frames judged lost to scheduling gaps. Monotonic.
    pub dropped_frames: u64,
    pub(crate) consecutive_timeouts: u32,
    pub(crate) consecutive_drops: u32,
}

impl PacerState {
    pub fn new() -> Self {
        Self {
            client_frame: 0,
            last_pace: None,
            last_ready: None,
            dropped_frames: 0,
            consecutive_timeouts: 0,
            consecutive_drops: 0,
        }
    }
}

impl Default for PacerState {
    fn default() -> Self {
        Self::new()
    }
}

// ── Pure primitives ──────────────────────────────────────────────

/// Signed nanoseconds between where the FPGA's raster is and where the
/// host predicted it, dampened by half.
///
/// Returns 0 unless the ACK echoes `submitted_frame`: a stale echo says
/// nothing about the frame in flight. Positive means the FPGA is behind
/// (headroom); negative means the host is late. The halving is a
/// first-order low-pass over the measurement.
pub fn raster_offset_ns(timing: &FrameTiming, status: &FpgaStatus, submitted_frame: u32) -> i64 {
    if status.frame_echo != submitted_frame {
        return 0;
    }
    let shift = u32::from(timing.interlaced);
    let v_total = i64::from(timing.v_total);
    let v1 = ((i64::from(status.frame_echo) - 1) * v_total + i64::from(status.vcount_echo)) >> shift;
    let v2 = (i64::from(status.frame) * v_total + i64::from(status.vcount)) >> shift;
    let dif = (v1 - v2) / 2;
    timing.line_time_ns as i64 * dif
}

/// Latest scanline at which a blit can still be scheduled this frame,
/// given the caller's latency budget (all nanoseconds).
///
/// `budget = ping + margin + emulation`; when the budget already exceeds
/// the frame period the frame cannot be met and line 1 is returned.
pub fn calc_vsync_line(
    timing: &FrameTiming,
    ping_ns: u64,
    margin_ns: u64,
    emulation_ns: u64,
    stream_ns: u64,
) -> u16 {
    let v_total = u64::from(timing.v_total);
    let budget = ping_ns + margin_ns + emulation_ns;
    if budget >= timing.frame_time_ns {
        return 1;
    }
    let time_calc = budget.saturating_sub(stream_ns);
    let line = v_total - v_total * time_calc / timing.frame_time_ns;
    line.clamp(1, v_total.max(1)) as u16
}

/// Drift controller: the factor applied to the frame period for the next
/// pace sleep. Pure, so convergence is provable by iteration.
///
/// `drift = client_frame − fpga_frame`; the controller steers it toward
/// [`TARGET_DRIFT`]. For interlaced modes a field-parity mismatch pulls
/// the multiplier down by `DRIFT_GAIN + 3 / field_rate`, the coupling
/// that lets drift and phase converge together. The result is clamped
/// to [`MULT_MIN`]..[`MULT_MAX`].
pub fn pace_multiplier(client_frame: u32, timing: &FrameTiming, status: &FpgaStatus) -> f64 {
    let drift = f64::from(client_frame) - f64::from(status.frame);
    let error = TARGET_DRIFT - drift;
    let mut mult = 1.0 - error * DRIFT_GAIN;

    if timing.interlaced {
        let expected_f1 = client_frame & 1 == 1;
        if expected_f1 != status.vga_f1 {
            let field_rate_hz = 1e9 / timing.frame_time_ns as f64;
            mult -= DRIFT_GAIN + 3.0 / field_rate_hz;
        }
    }

    mult.clamp(MULT_MIN, MULT_MAX)
}

// ── Pacing loop ──────────────────────────────────────────────────

impl OutputConnection {
    /// Gate the next frame: sync with the FPGA, observe backpressure,
    /// and sleep to the drift-corrected submission instant.
    ///
    /// `Ready` means submit now; `Skip` means VRAM is still full (do not
    /// submit); `Stalled` means the FPGA has been unresponsive for
    /// [`MAX_CONSECUTIVE_TIMEOUTS`] syncs past settle or
    /// [`MAX_CONSECUTIVE_DROPS`] skips, and the caller should close.
    pub fn begin_frame(&mut self) -> FrameOutcome {
        let Some(timing) = self.timing else {
            return FrameOutcome::Stalled;
        };
        if timing.frame_time_ns == 0 {
            return FrameOutcome::Stalled;
        }
        let frame_time = Duration::from_nanos(timing.frame_time_ns);
        let settling = self.pacer.client_frame < SETTLE_FRAMES;
        let timeout_ms = if settling {
            SETTLE_TIMEOUT_MS
        } else {
            RUN_TIMEOUT_MS
        };

        let t0 = Instant::now();
        let synced = self.wait_sync(timeout_ms);
        let elapsed = t0.elapsed();

        if !synced {
            self.pacer.consecutive_timeouts += 1;
            if !settling && self.pacer.consecutive_timeouts >= MAX_CONSECUTIVE_TIMEOUTS {
                warn!(
                    timeouts = self.pacer.consecutive_timeouts,
                    "no ACKs from FPGA, reporting stall"
                );
                return FrameOutcome::Stalled;
            }
            // Free-run one frame at the nominal rate and re-arm the
            // anchor so recovery does not burst.
            thread::sleep(frame_time);
            self.pacer.last_pace = Some(Instant::now());
            self.pacer.client_frame += 1;
            return FrameOutcome::Ready;
        }

        self.pacer.consecutive_timeouts = 0;
        self.health
            .record(elapsed.as_secs_f64() * 1e3, self.status.vram_ready);

        if !self.status.vram_ready {
            self.pacer.consecutive_drops += 1;
            if self.pacer.consecutive_drops >= MAX_CONSECUTIVE_DROPS {
                warn!(
                    drops = self.pacer.consecutive_drops,
                    "VRAM blocked, reporting stall"
                );
                return FrameOutcome::Stalled;
            }
            return FrameOutcome::Skip;
        }
        self.pacer.consecutive_drops = 0;

        let mult = pace_multiplier(self.pacer.client_frame, &timing, &self.status);
        let paced = Duration::from_nanos((timing.frame_time_ns as f64 * mult) as u64);
        let now = Instant::now();

        // Gaps well past one period mean frames were really dropped, not
        // merely paced late.
        if let Some(last_ready) = self.pacer.last_ready {
            let gap = now.duration_since(last_ready).as_nanos() as u64;
            if gap as f64 > 1.5 * timing.frame_time_ns as f64 {
                self.pacer.dropped_frames += gap / timing.frame_time_ns - 1;
            }
        }

        let target = match self.pacer.last_pace {
            Some(anchor) if anchor + paced > now => anchor + paced,
            // First frame, or the anchor fell behind realtime: re-anchor.
            _ => now,
        };
        sleep_until(target);

        self.pacer.last_pace = Some(target);
        self.pacer.last_ready = Some(Instant::now());
        self.pacer.client_frame += 1;
        FrameOutcome::Ready
    }
}

/// Sleep to `target` with a coarse `thread::sleep` up to 2 ms before the
/// deadline, then spin for the tail.
fn sleep_until(target: Instant) {
    loop {
        let now = Instant::now();
        if now >= target {
            return;
        }
        let remaining = target - now;
        if remaining > SPIN_SLACK {
            thread::sleep(remaining - SPIN_SLACK);
        } else {
            std::hint::spin_loop();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectConfig;
    use crate::modeline::Modeline;
    use std::net::UdpSocket;

    fn timing_progressive() -> FrameTiming {
        FrameTiming {
            line_time_ns: 63_582,
            frame_time_ns: 16_658_484,
            v_total: 262,
            interlaced: false,
        }
    }

    fn timing_interlaced() -> FrameTiming {
        FrameTiming {
            line_time_ns: 31_777,
            frame_time_ns: 16_683_450 / 2,
            v_total: 525,
            interlaced: true,
        }
    }

    // ── raster_offset_ns ─────────────────────────────────────────

    #[test]
    fn raster_offset_zero_for_stale_echo() {
        let status = FpgaStatus {
            frame_echo: 41,
            ..FpgaStatus::default()
        };
        assert_eq!(raster_offset_ns(&timing_progressive(), &status, 42), 0);
    }

    #[test]
    fn raster_offset_positive_when_fpga_behind() {
        // Host submitted frame 10; FPGA still displays frame 9, line 50.
        let status = FpgaStatus {
            frame_echo: 10,
            vcount_echo: 100,
            frame: 9,
            vcount: 50,
            ..FpgaStatus::default()
        };
        let t = timing_progressive();
        // v1 = 9·262 + 100 = 2458, v2 = 9·262 + 50 = 2408, dif = 25.
        assert_eq!(raster_offset_ns(&t, &status, 10), 25 * t.line_time_ns as i64);
    }

    #[test]
    fn raster_offset_negative_when_host_late() {
        let status = FpgaStatus {
            frame_echo: 10,
            vcount_echo: 0,
            frame: 10,
            vcount: 100,
            ..FpgaStatus::default()
        };
        let t = timing_progressive();
        // v1 = 9·262, v2 = 10·262 + 100 → dif = −181.
        assert_eq!(
            raster_offset_ns(&t, &status, 10),
            -181 * t.line_time_ns as i64
        );
    }

    #[test]
    fn raster_offset_interlace_halves_positions() {
        let status = FpgaStatus {
            frame_echo: 4,
            vcount_echo: 200,
            frame: 4,
            vcount: 100,
            ..FpgaStatus::default()
        };
        let t = timing_interlaced();
        // v1 = (3·525 + 200) >> 1 = 887, v2 = (4·525 + 100) >> 1 = 1100,
        // dif = (887 − 1100)/2 = −106 (truncating).
        assert_eq!(
            raster_offset_ns(&t, &status, 4),
            -106 * t.line_time_ns as i64
        );
    }

    // ── calc_vsync_line ──────────────────────────────────────────

    #[test]
    fn vsync_line_mid_budget() {
        let t = FrameTiming {
            line_time_ns: 31_778,
            frame_time_ns: 16_683_450,
            v_total: 525,
            interlaced: false,
        };
        let line = calc_vsync_line(&t, 1_000_000, 2_000_000, 4_000_000, 2_000_000);
        assert!(line > 300 && line < 425, "line = {line}");
    }

    #[test]
    fn vsync_line_one_when_budget_exceeds_frame() {
        let t = timing_progressive();
        let line = calc_vsync_line(&t, 10_000_000, 5_000_000, 5_000_000, 0);
        assert_eq!(line, 1);
    }

    #[test]
    fn vsync_line_full_when_no_budget() {
        let t = timing_progressive();
        let line = calc_vsync_line(&t, 0, 0, 0, 0);
        assert_eq!(line, t.v_total);
    }

    #[test]
    fn vsync_line_stream_time_recovers_budget() {
        let t = timing_progressive();
        // Stream time larger than the budget clamps time_calc to 0.
        let line = calc_vsync_line(&t, 1_000_000, 0, 0, 5_000_000);
        assert_eq!(line, t.v_total);
    }

    // ── pace_multiplier ──────────────────────────────────────────

    #[test]
    fn multiplier_is_unity_at_target_drift() {
        let status = FpgaStatus {
            frame: 7,
            ..FpgaStatus::default()
        };
        let mult = pace_multiplier(10, &timing_progressive(), &status);
        assert!((mult - 1.0).abs() < 1e-12);
    }

    #[test]
    fn multiplier_clamps_for_extreme_drift() {
        let t = timing_progressive();
        let far_behind = FpgaStatus {
            frame: 0,
            ..FpgaStatus::default()
        };
        assert_eq!(pace_multiplier(1000, &t, &far_behind), MULT_MAX);
        let far_ahead = FpgaStatus {
            frame: 1000,
            ..FpgaStatus::default()
        };
        assert_eq!(pace_multiplier(0, &t, &far_ahead), MULT_MIN);
    }

    #[test]
    fn field_phase_mismatch_slows_the_pace() {
        let t = timing_interlaced();
        let status = FpgaStatus {
            frame: 8, // drift = 3 → base mult 1.0
            vga_f1: false,
            ..FpgaStatus::default()
        };
        // client_frame 11 is odd → expected field 1 ≠ vga_f1.
        let slowed = pace_multiplier(11, &t, &status);
        let field_rate = 1e9 / t.frame_time_ns as f64;
        let expected = 1.0 - (DRIFT_GAIN + 3.0 / field_rate);
        assert!((slowed - expected).abs() < 1e-9);

        // Matching parity leaves the base multiplier untouched.
        let matched = FpgaStatus {
            vga_f1: true,
            ..status
        };
        assert!((pace_multiplier(11, &t, &matched) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn drift_converges_from_a_cold_start() {
        // Passive FPGA advancing by `mult` per tick, host one frame per
        // tick: drift must settle to TARGET_DRIFT ± 0.5 within 300
        // iterations from any start in [−50, +50].
        let t = timing_progressive();
        for start in [-50i32, -10, 0, 10, 50] {
            let mut client: f64 = 60.0;
            let mut fpga: f64 = 60.0 - start as f64;
            for _ in 0..300 {
                let status = FpgaStatus {
                    frame: fpga as u32,
                    ..FpgaStatus::default()
                };
                let mult = pace_multiplier(client as u32, &t, &status);
                client += 1.0;
                fpga += mult;
            }
            let drift = client - fpga;
            assert!(
                (drift - TARGET_DRIFT).abs() < 0.5,
                "start {start}: drift {drift}"
            );
        }
    }

    // ── begin_frame ──────────────────────────────────────────────

    /// A connection whose peer socket exists but never answers.
    fn silent_connection() -> (UdpSocket, OutputConnection) {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let cfg = ConnectConfig {
            port: peer.local_addr().unwrap().port(),
            ..ConnectConfig::new("127.0.0.1")
        };
        let conn = OutputConnection::open(cfg).unwrap();
        (peer, conn)
    }

    fn small_modeline() -> Modeline {
        // ~2 ms frame period keeps timeout-path tests quick.
        Modeline {
            pixel_clock: 50.0,
            h_active: 320,
            h_begin: 336,
            h_end: 367,
            h_total: 400,
            v_active: 240,
            v_begin: 244,
            v_end: 247,
            v_total: 250,
            interlaced: false,
        }
    }

    /// A ready/blocked ACK the fake FPGA can fire at the connection.
    fn send_ack(fpga: &UdpSocket, conn: &OutputConnection, vram_ready: bool) {
        let mut ack = [0u8; 13];
        ack[12] = u8::from(vram_ready);
        fpga.send_to(&ack, conn.local_addr().unwrap()).unwrap();
    }

    #[test]
    fn begin_frame_without_modeline_is_stalled() {
        let (_peer, mut conn) = silent_connection();
        assert_eq!(conn.begin_frame(), FrameOutcome::Stalled);
    }

    #[test]
    fn begin_frame_free_runs_during_settle() {
        let (_peer, mut conn) = silent_connection();
        conn.switch_res(&small_modeline()).unwrap();
        // No peer ACKs, but settle suppresses the stall verdict.
        for i in 0..4 {
            assert_eq!(conn.begin_frame(), FrameOutcome::Ready, "frame {i}");
        }
        assert_eq!(conn.pacer.client_frame, 4);
    }

    #[test]
    fn three_timeouts_past_settle_stall() {
        let (_peer, mut conn) = silent_connection();
        conn.switch_res(&small_modeline()).unwrap();
        conn.pacer.client_frame = SETTLE_FRAMES; // settle cleared

        assert_eq!(conn.begin_frame(), FrameOutcome::Ready);
        assert_eq!(conn.begin_frame(), FrameOutcome::Ready);
        assert_eq!(conn.begin_frame(), FrameOutcome::Stalled);
    }

    #[test]
    fn an_ack_resets_the_timeout_counter() {
        let (fpga, mut conn) = silent_connection();
        conn.switch_res(&small_modeline()).unwrap();
        conn.pacer.client_frame = SETTLE_FRAMES;
        conn.pacer.consecutive_timeouts = 2;

        send_ack(&fpga, &conn, true);
        assert_eq!(conn.begin_frame(), FrameOutcome::Ready);
        assert_eq!(conn.pacer.consecutive_timeouts, 0);
    }

    #[test]
    fn vram_blocked_yields_skip_then_stall() {
        let (fpga, mut conn) = silent_connection();
        conn.switch_res(&small_modeline()).unwrap();

        for i in 1..MAX_CONSECUTIVE_DROPS {
            send_ack(&fpga, &conn, false);
            assert_eq!(conn.begin_frame(), FrameOutcome::Skip, "drop {i}");
        }
        send_ack(&fpga, &conn, false);
        assert_eq!(conn.begin_frame(), FrameOutcome::Stalled);
    }

    #[test]
    fn late_ready_frames_are_credited_as_drops() {
        let (fpga, mut conn) = silent_connection();
        conn.switch_res(&small_modeline()).unwrap();

        send_ack(&fpga, &conn, true);
        assert_eq!(conn.begin_frame(), FrameOutcome::Ready);
        assert_eq!(conn.pacer.dropped_frames, 0);

        // Stall the "producer" for several frame periods.
        thread::sleep(Duration::from_millis(12));
        send_ack(&fpga, &conn, true);
        assert_eq!(conn.begin_frame(), FrameOutcome::Ready);
        assert!(conn.pacer.dropped_frames >= 1, "gap must credit drops");
    }

    #[test]
    fn a_ready_ack_clears_the_drop_streak() {
        let (fpga, mut conn) = silent_connection();
        conn.switch_res(&small_modeline()).unwrap();
        conn.pacer.consecutive_drops = MAX_CONSECUTIVE_DROPS - 1;

        send_ack(&fpga, &conn, true);
        assert_eq!(conn.begin_frame(), FrameOutcome::Ready);
        assert_eq!(conn.pacer.consecutive_drops, 0);
    }
}
