//! C ABI for the GroovyMiSTer host library.
//!
//! A thin, null-safe shell over [`gmz_core`]: opaque handles, fixed
//! `#[repr(C)]` marshalling structs, and integer status returns. The
//! struct layouts here must match `include/groovy_mister.h` byte for
//! byte — binaries built against the header link against this crate
//! without recompilation, so the offsets are locked by const asserts.
//!
//! Conventions: functions taking a handle accept null and fail soft
//! (`-1`, a zeroed struct, or a no-op); functions returning a handle
//! return null on any failure, with everything allocated up to that
//! point released.

use std::ffi::{c_char, c_int, CStr};

use gmz_core::{
    calc_vsync_line, raster_offset_ns, ConnectConfig, FrameOutcome, InputConnection, Lz4Mode,
    Modeline, OutputConnection, RgbMode, SoundChannels, SoundRate,
};

// ── Opaque handles ───────────────────────────────────────────────

/// Opaque output-connection handle (`gmz_conn_t`).
pub struct GmzConn {
    conn: OutputConnection,
}

/// Opaque input-connection handle (`gmz_input_t`).
pub struct GmzInput {
    input: InputConnection,
}

// ── Marshalling structs ──────────────────────────────────────────

/// Mirror of `gmz_modeline_t` (C ABI, natural alignment, 32 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GmzModeline {
    pub pixel_clock: f64,
    pub h_active: u16,
    pub h_begin: u16,
    pub h_end: u16,
    pub h_total: u16,
    pub v_active: u16,
    pub v_begin: u16,
    pub v_end: u16,
    pub v_total: u16,
    pub interlaced: u8,
    pub _pad: [u8; 6],
}

/// Mirror of `gmz_state_t` (C ABI, natural alignment, 56 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GmzState {
    pub frame: u32,
    pub frame_echo: u32,
    pub vcount: u16,
    pub vcount_echo: u16,
    pub vram_ready: u8,
    pub vram_end_frame: u8,
    pub vram_synced: u8,
    pub vga_frameskip: u8,
    pub vga_vblank: u8,
    pub vga_f1: u8,
    pub audio_active: u8,
    pub vram_queue: u8,
    pub avg_sync_wait_ms: f64,
    pub p95_sync_wait_ms: f64,
    pub vram_ready_rate: f64,
    pub stall_threshold_ms: f64,
}

/// Mirror of `gmz_joystick_t`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GmzJoystick {
    pub frame: u32,
    pub order: u8,
    pub joy1: u16,
    pub joy2: u16,
    pub axes: [i8; 8],
}

/// Mirror of `gmz_ps2_t`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GmzPs2 {
    pub frame: u32,
    pub order: u8,
    pub keys: [u8; 32],
    pub mouse_buttons: u8,
    pub mouse_x: i8,
    pub mouse_y: i8,
    pub mouse_z: i8,
}

// The header is the contract; a drifted layout must not compile.
const _: () = assert!(std::mem::size_of::<GmzState>() == 56);
const _: () = assert!(std::mem::align_of::<GmzState>() == 8);
const _: () = assert!(std::mem::size_of::<GmzModeline>() == 32);

impl From<&GmzModeline> for Modeline {
    fn from(m: &GmzModeline) -> Self {
        Modeline {
            pixel_clock: m.pixel_clock,
            h_active: m.h_active,
            h_begin: m.h_begin,
            h_end: m.h_end,
            h_total: m.h_total,
            v_active: m.v_active,
            v_begin: m.v_begin,
            v_end: m.v_end,
            v_total: m.v_total,
            interlaced: m.interlaced != 0,
        }
    }
}

// ── Connection lifecycle ─────────────────────────────────────────

unsafe fn parse_host(host: *const c_char) -> Option<String> {
    if host.is_null() {
        return None;
    }
    CStr::from_ptr(host).to_str().ok().map(str::to_owned)
}

fn connect_impl(
    host: String,
    mtu: u16,
    rgb_mode: u8,
    sound_rate: u8,
    sound_channels: u8,
    lz4_mode: u8,
) -> Option<Box<GmzConn>> {
    let config = ConnectConfig {
        host,
        mtu,
        rgb_mode: RgbMode::try_from(rgb_mode).ok()?,
        sound_rate: SoundRate::try_from(sound_rate).ok()?,
        sound_channels: SoundChannels::try_from(sound_channels).ok()?,
        lz4_mode: Lz4Mode::try_from(lz4_mode).ok()?,
        ..ConnectConfig::default()
    };
    let mut conn = OutputConnection::open(config).ok()?;
    // Open failure after this point still releases the socket: the
    // connection drops before we return null.
    conn.send_init().ok()?;
    Some(Box::new(GmzConn { conn }))
}

/// Connect without compression and send `init`.
#[no_mangle]
pub unsafe extern "C" fn gmz_connect(
    host: *const c_char,
    mtu: u16,
    rgb_mode: u8,
    sound_rate: u8,
    sound_channels: u8,
) -> *mut GmzConn {
    gmz_connect_ex(host, mtu, rgb_mode, sound_rate, sound_channels, 0)
}

/// Connect with an explicit LZ4 mode and send `init`. Invalid enum
/// values return null.
#[no_mangle]
pub unsafe extern "C" fn gmz_connect_ex(
    host: *const c_char,
    mtu: u16,
    rgb_mode: u8,
    sound_rate: u8,
    sound_channels: u8,
    lz4_mode: u8,
) -> *mut GmzConn {
    let Some(host) = parse_host(host) else {
        return std::ptr::null_mut();
    };
    match connect_impl(host, mtu, rgb_mode, sound_rate, sound_channels, lz4_mode) {
        Some(handle) => Box::into_raw(handle),
        None => std::ptr::null_mut(),
    }
}

/// Send `close` and free every buffer the handle owns. Null-safe.
#[no_mangle]
pub unsafe extern "C" fn gmz_disconnect(conn: *mut GmzConn) {
    if conn.is_null() {
        return;
    }
    let mut handle = Box::from_raw(conn);
    handle.conn.close();
}

// ── Per-tick status ──────────────────────────────────────────────

/// Drain ACKs, record a VRAM-ready sample, and return the combined
/// FPGA status + link health. A null handle yields a zeroed state.
#[no_mangle]
pub unsafe extern "C" fn gmz_tick(conn: *mut GmzConn) -> GmzState {
    let Some(handle) = conn.as_mut() else {
        return GmzState::default();
    };
    handle.conn.poll();
    handle.conn.record_ready();

    let s = handle.conn.status();
    let h = handle.conn.health();
    let period_ms = handle
        .conn
        .timing()
        .map_or(0.0, |t| t.frame_time_ns as f64 / 1e6);

    GmzState {
        frame: s.frame,
        frame_echo: s.frame_echo,
        vcount: s.vcount,
        vcount_echo: s.vcount_echo,
        vram_ready: u8::from(s.vram_ready),
        vram_end_frame: u8::from(s.vram_end_frame),
        vram_synced: u8::from(s.vram_synced),
        vga_frameskip: u8::from(s.vga_frameskip),
        vga_vblank: u8::from(s.vga_vblank),
        vga_f1: u8::from(s.vga_f1),
        audio_active: u8::from(s.audio_active),
        vram_queue: u8::from(s.vram_queue),
        avg_sync_wait_ms: h.avg_sync_wait_ms(),
        p95_sync_wait_ms: h.p95_sync_wait_ms(),
        vram_ready_rate: h.vram_ready_rate(),
        stall_threshold_ms: h.stall_threshold_ms(period_ms),
    }
}

// ── Streaming ────────────────────────────────────────────────────

/// Send `switch_res` with the given modeline. Returns 0 on success.
#[no_mangle]
pub unsafe extern "C" fn gmz_set_modeline(
    conn: *mut GmzConn,
    modeline: *const GmzModeline,
) -> c_int {
    let (Some(handle), Some(m)) = (conn.as_mut(), modeline.as_ref()) else {
        return -1;
    };
    match handle.conn.switch_res(&Modeline::from(m)) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Submit one frame and record its sync wait. Returns 0 on success.
#[no_mangle]
pub unsafe extern "C" fn gmz_submit(
    conn: *mut GmzConn,
    data: *const u8,
    len: usize,
    frame: u32,
    field: u8,
    vsync_line: u16,
    sync_wait_ms: f64,
) -> c_int {
    let Some(handle) = conn.as_mut() else {
        return -1;
    };
    if data.is_null() && len != 0 {
        return -1;
    }
    let bytes = if len == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(data, len)
    };
    handle.conn.record_sync_wait(sync_wait_ms);
    match handle.conn.send_frame(bytes, frame, field, vsync_line) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Submit raw 16-bit PCM (interleaved if stereo). Returns 0 on success.
#[no_mangle]
pub unsafe extern "C" fn gmz_submit_audio(
    conn: *mut GmzConn,
    data: *const u8,
    len: usize,
) -> c_int {
    let Some(handle) = conn.as_mut() else {
        return -1;
    };
    if data.is_null() && len != 0 {
        return -1;
    }
    let pcm = if len == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(data, len)
    };
    match handle.conn.send_audio(pcm) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Block until an ACK arrives or `timeout_ms` expires.
/// Returns 0 = ACK, 1 = timeout, −1 = null handle.
#[no_mangle]
pub unsafe extern "C" fn gmz_wait_sync(conn: *mut GmzConn, timeout_ms: c_int) -> c_int {
    let Some(handle) = conn.as_mut() else {
        return -1;
    };
    if handle.conn.wait_sync(timeout_ms.max(0) as u32) {
        0
    } else {
        1
    }
}

/// Run one pacer iteration. Returns 0 = ready, 1 = stalled, 2 = skip.
#[no_mangle]
pub unsafe extern "C" fn gmz_begin_frame(conn: *mut GmzConn) -> c_int {
    let Some(handle) = conn.as_mut() else {
        return 1;
    };
    match handle.conn.begin_frame() {
        FrameOutcome::Ready => 0,
        FrameOutcome::Stalled => 1,
        FrameOutcome::Skip => 2,
    }
}

/// Measure the round trip to the FPGA. Returns the RTT in milliseconds,
/// or a negative value on timeout or a null handle.
#[no_mangle]
pub unsafe extern "C" fn gmz_ping_ms(conn: *mut GmzConn, timeout_ms: c_int) -> f64 {
    let Some(handle) = conn.as_mut() else {
        return -1.0;
    };
    handle.conn.ping_ms(timeout_ms.max(0) as u32).unwrap_or(-1.0)
}

// ── Timing primitives ────────────────────────────────────────────

/// Frame (or field) period in nanoseconds; 0 when no modeline is set.
#[no_mangle]
pub unsafe extern "C" fn gmz_frame_time_ns(conn: *mut GmzConn) -> u64 {
    conn.as_ref()
        .and_then(|h| h.conn.timing())
        .map_or(0, |t| t.frame_time_ns)
}

/// Dampened raster offset against `submitted_frame` in nanoseconds;
/// 0 when no modeline is set.
#[no_mangle]
pub unsafe extern "C" fn gmz_raster_offset_ns(conn: *mut GmzConn, submitted_frame: u32) -> i64 {
    let Some(handle) = conn.as_ref() else {
        return 0;
    };
    let Some(timing) = handle.conn.timing() else {
        return 0;
    };
    raster_offset_ns(&timing, &handle.conn.status(), submitted_frame)
}

/// Latest safe vsync line for the caller's latency budget. Falls back
/// to `v_total / 2` when the modeline's timing is degenerate, and to 0
/// when no modeline was ever set.
#[no_mangle]
pub unsafe extern "C" fn gmz_calc_vsync(
    conn: *mut GmzConn,
    ping_ns: u64,
    margin_ns: u64,
    emulation_ns: u64,
    stream_ns: u64,
) -> u16 {
    let Some(handle) = conn.as_ref() else {
        return 0;
    };
    match handle.conn.timing() {
        Some(t) if t.frame_time_ns > 0 => {
            calc_vsync_line(&t, ping_ns, margin_ns, emulation_ns, stream_ns)
        }
        Some(t) => (t.v_total / 2).max(1),
        None => 0,
    }
}

// ── Version ──────────────────────────────────────────────────────

static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

/// Library version string, null-terminated, static storage.
#[no_mangle]
pub extern "C" fn gmz_version() -> *const c_char {
    VERSION.as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn gmz_version_major() -> u32 {
    env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn gmz_version_minor() -> u32 {
    env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn gmz_version_patch() -> u32 {
    env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0)
}

// ── Input channel ────────────────────────────────────────────────

/// Bind the input channel and say hello to the FPGA. Returns null on
/// failure.
#[no_mangle]
pub unsafe extern "C" fn gmz_input_bind(host: *const c_char) -> *mut GmzInput {
    let Some(host) = parse_host(host) else {
        return std::ptr::null_mut();
    };
    match InputConnection::bind(&host) {
        Ok(input) => Box::into_raw(Box::new(GmzInput { input })),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Close the input channel and free the handle. Null-safe.
#[no_mangle]
pub unsafe extern "C" fn gmz_input_close(input: *mut GmzInput) {
    if !input.is_null() {
        drop(Box::from_raw(input));
    }
}

/// Drain pending input. Returns 1 if a fresh packet was accepted,
/// 0 if not, −1 on a null handle.
#[no_mangle]
pub unsafe extern "C" fn gmz_input_poll(input: *mut GmzInput) -> c_int {
    let Some(handle) = input.as_mut() else {
        return -1;
    };
    c_int::from(handle.input.poll())
}

/// Copy the latest joystick snapshot into `out`. Returns 0 on success.
#[no_mangle]
pub unsafe extern "C" fn gmz_input_joy(input: *mut GmzInput, out: *mut GmzJoystick) -> c_int {
    let (Some(handle), Some(out)) = (input.as_ref(), out.as_mut()) else {
        return -1;
    };
    let joy = handle.input.joystick();
    *out = GmzJoystick {
        frame: joy.frame,
        order: joy.order,
        joy1: joy.joy1,
        joy2: joy.joy2,
        axes: joy.axes,
    };
    0
}

/// Copy the latest PS/2 snapshot into `out`. Returns 0 on success.
#[no_mangle]
pub unsafe extern "C" fn gmz_input_ps2(input: *mut GmzInput, out: *mut GmzPs2) -> c_int {
    let (Some(handle), Some(out)) = (input.as_ref(), out.as_mut()) else {
        return -1;
    };
    let ps2 = handle.input.ps2();
    *out = GmzPs2 {
        frame: ps2.frame,
        order: ps2.order,
        keys: ps2.keys,
        mouse_buttons: ps2.mouse_buttons,
        mouse_x: ps2.mouse_x,
        mouse_y: ps2.mouse_y,
        mouse_z: ps2.mouse_z,
    };
    0
}

// ── Tests ────────────────────────────────────────────────────────
