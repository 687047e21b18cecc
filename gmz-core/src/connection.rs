//! Output connection: the host → FPGA command/video/audio endpoint.
//!
//! One non-blocking IPv4 UDP socket per connection. Frames are emitted as
//! a header datagram followed by payload fragments no larger than
//! `mtu − 28`, so nothing is ever IP-fragmented on the LAN. ACKs are
//! drained opportunistically; the last one wins.
//!
//! [`wait_sync`](OutputConnection::wait_sync) is the one blocking call.
//! It solves both ends of the protocol's silence problem: at bootstrap
//! the FPGA says nothing until polled, and during a VRAM stall the host
//! must not submit frames, so only explicit status requests keep ACKs
//! flowing until the FPGA recovers.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info};

use crate::config::{ConnectConfig, SEND_BUF_BYTES, UDP_IP_HEADROOM};
use crate::delta::DeltaEncoder;
use crate::error::GmzError;
use crate::health::HealthWindow;
use crate::lz4;
use crate::modeline::{FrameTiming, Modeline};
use crate::pacer::PacerState;
use crate::protocol::{self, BlitHeader, FpgaStatus};

/// Largest PCM payload the 16-bit audio header can describe.
pub const MAX_AUDIO_BYTES: usize = u16::MAX as usize;

// ── Compressor ───────────────────────────────────────────────────

/// The frame pipeline variant selected at open.
enum Compressor {
    /// Raw passthrough: the blit payload is the caller's bytes.
    None,
    /// LZ4 block compression of every frame.
    Lz4,
    /// Per-field delta encoding over LZ4.
    Delta(DeltaEncoder),
}

// ── OutputConnection ─────────────────────────────────────────────

/// A connection to the FPGA's command/video/audio endpoint.
///
/// Owns its socket, the latest-ACK snapshot, the health window, the
/// pacer state, and (when compression is enabled) every buffer the
/// frame pipeline touches. All of it is acquired at [`open`](Self::open)
/// and released together when the connection is dropped.
pub struct OutputConnection {
    socket: UdpSocket,
    remote: SocketAddr,
    config: ConnectConfig,
    mtu_eff: usize,
    compressor: Compressor,
    /// LZ4 output buffer, sized to `compress_bound(max_frame_size)`.
    lz4_buf: Vec<u8>,
    pub(crate) status: FpgaStatus,
    pub(crate) health: HealthWindow,
    pub(crate) timing: Option<FrameTiming>,
    pub(crate) pacer: PacerState,
    frames_sent: u64,
    bytes_sent: u64,
    closed: bool,
}

impl OutputConnection {
    /// Open a connection per `config`: resolve the IPv4 literal, create
    /// the socket, size its send buffer to 2 MiB, and switch it to
    /// non-blocking mode. No packet is sent yet — call
    /// [`send_init`](Self::send_init) next.
    pub fn open(config: ConnectConfig) -> Result<Self, GmzError> {
        if config.mtu <= UDP_IP_HEADROOM {
            return Err(GmzError::InvalidMtu(config.mtu));
        }
        let ip: Ipv4Addr = config
            .host
            .parse()
            .map_err(|_| GmzError::ResolveFailed(config.host.clone()))?;
        let remote = SocketAddr::V4(SocketAddrV4::new(ip, config.port));

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(GmzError::SocketCreateFailed)?;
        socket
            .set_send_buffer_size(SEND_BUF_BYTES)
            .map_err(|source| GmzError::SetSendBufFailed {
                requested: SEND_BUF_BYTES,
                source,
            })?;
        socket
            .set_nonblocking(true)
            .map_err(GmzError::SocketCreateFailed)?;
        socket
            .connect(&remote.into())
            .map_err(GmzError::SocketCreateFailed)?;
        let socket: UdpSocket = socket.into();

        let compressor = if config.lz4_mode.is_delta() {
            Compressor::Delta(DeltaEncoder::new(
                config.max_frame_size,
                config.keyframe_interval,
            ))
        } else if config.lz4_mode.is_enabled() {
            Compressor::Lz4
        } else {
            Compressor::None
        };
        let lz4_buf = if config.lz4_mode.is_enabled() {
            vec![0u8; lz4::compress_bound(config.max_frame_size)]
        } else {
            Vec::new()
        };

        info!(remote = %remote, mtu_eff = config.mtu_eff(), lz4 = ?config.lz4_mode, "connection open");

        Ok(Self {
            socket,
            remote,
            mtu_eff: config.mtu_eff(),
            config,
            compressor,
            lz4_buf,
            status: FpgaStatus::default(),
            health: HealthWindow::new(),
            timing: None,
            pacer: PacerState::new(),
            frames_sent: 0,
            bytes_sent: 0,
            closed: false,
        })
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Emit the `init` packet advertising the configured modes. The
    /// on-wire LZ4 byte carries only the off/on bit.
    pub fn send_init(&mut self) -> Result<(), GmzError> {
        let pkt = protocol::init(
            self.config.lz4_mode,
            self.config.sound_rate,
            self.config.sound_channels,
            self.config.rgb_mode,
        );
        let sent = send_datagram(&self.socket, &pkt)?;
        self.bytes_sent += sent as u64;
        Ok(())
    }

    /// Emit `switch_res` and refresh the pacer's timing from the new
    /// modeline. Delta references are dropped: the first frame of each
    /// field after a mode switch is always a keyframe.
    pub fn switch_res(&mut self, modeline: &Modeline) -> Result<(), GmzError> {
        modeline.validate()?;
        let pkt = protocol::switch_res(modeline);
        let sent = send_datagram(&self.socket, &pkt)?;
        self.bytes_sent += sent as u64;
        self.timing = Some(FrameTiming::from_modeline(modeline));
        if let Compressor::Delta(enc) = &mut self.compressor {
            enc.reset();
        }
        debug!(?modeline, "switch_res");
        Ok(())
    }

    /// Submit one frame: run the configured pipeline, pick the blit
    /// header variant, then emit the header and the payload fragments
    /// in order. A zero-length frame is valid and produces a header
    /// datagram alone.
    pub fn send_frame(
        &mut self,
        data: &[u8],
        frame: u32,
        field: u8,
        vsync_line: u16,
    ) -> Result<(), GmzError> {
        let header = BlitHeader {
            frame,
            field,
            vsync_line,
        };

        let sent = match &mut self.compressor {
            Compressor::None => {
                let hdr = header.encode_raw();
                send_datagram(&self.socket, &hdr)?
                    + send_chunks(&self.socket, data, self.mtu_eff)?
            }
            Compressor::Lz4 => {
                let n = lz4::compress(data, &mut self.lz4_buf)
                    .ok_or(GmzError::CompressFailed { size: data.len() })?;
                let hdr = header.encode_lz4(n as u32);
                send_datagram(&self.socket, &hdr)?
                    + send_chunks(&self.socket, &self.lz4_buf[..n], self.mtu_eff)?
            }
            Compressor::Delta(enc) => {
                let (n, is_delta) = enc
                    .encode(data, field, &mut self.lz4_buf)
                    .ok_or(GmzError::CompressFailed { size: data.len() })?;
                let hdr_sent = if is_delta {
                    send_datagram(&self.socket, &header.encode_lz4_delta(n as u32))?
                } else {
                    send_datagram(&self.socket, &header.encode_lz4(n as u32))?
                };
                hdr_sent + send_chunks(&self.socket, &self.lz4_buf[..n], self.mtu_eff)?
            }
        };

        self.frames_sent += 1;
        self.bytes_sent += sent as u64;
        Ok(())
    }

    /// Submit raw PCM: a 3-byte audio header followed by MTU-bounded
    /// fragments. Empty input is silently dropped; anything beyond the
    /// header's 16-bit length field is rejected whole.
    pub fn send_audio(&mut self, pcm: &[u8]) -> Result<(), GmzError> {
        if pcm.len() > MAX_AUDIO_BYTES {
            return Err(GmzError::AudioTooLarge {
                size: pcm.len(),
                max: MAX_AUDIO_BYTES,
            });
        }
        if pcm.is_empty() {
            return Ok(());
        }
        let hdr = protocol::audio_header(pcm.len() as u16);
        let sent =
            send_datagram(&self.socket, &hdr)? + send_chunks(&self.socket, pcm, self.mtu_eff)?;
        self.bytes_sent += sent as u64;
        Ok(())
    }

    // ── Receive side ─────────────────────────────────────────────

    /// Drain pending ACKs without blocking. Every well-formed datagram
    /// overwrites the status snapshot; the latest wins. Returns the
    /// number of ACKs parsed.
    pub fn poll(&mut self) -> usize {
        let mut buf = [0u8; 64];
        let mut parsed = 0;
        loop {
            match self.socket.recv(&mut buf) {
                Ok(n) => {
                    if let Some(status) = FpgaStatus::parse(&buf[..n]) {
                        self.status = status;
                        parsed += 1;
                    }
                }
                // WouldBlock ends the drain; any other receive error is
                // absorbed the same way and the last status stands.
                Err(_) => break,
            }
        }
        parsed
    }

    /// Request an ACK and wait up to `timeout_ms` for the first datagram,
    /// then drain whatever else arrived. Returns `true` iff at least one
    /// datagram came in.
    pub fn wait_sync(&mut self, timeout_ms: u32) -> bool {
        // Fire-and-forget: a lost request is recovered by the next call.
        let _ = self.socket.send(&protocol::get_status());

        let timeout = Duration::from_millis(u64::from(timeout_ms.max(1)));
        if self.socket.set_nonblocking(false).is_err()
            || self.socket.set_read_timeout(Some(timeout)).is_err()
        {
            let _ = self.socket.set_nonblocking(true);
            return false;
        }

        let mut buf = [0u8; 64];
        let got = match self.socket.recv(&mut buf) {
            Ok(n) => {
                if let Some(status) = FpgaStatus::parse(&buf[..n]) {
                    self.status = status;
                }
                true
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                false
            }
            Err(_) => false,
        };
        let _ = self.socket.set_nonblocking(true);

        if got {
            self.poll();
        }
        got
    }

    /// Measure the round trip to the FPGA: emit `get_status` and time
    /// the first datagram back. Returns the RTT in milliseconds, or
    /// `None` on timeout. The result is the natural `ping_ns` input for
    /// vsync-line budgeting.
    pub fn ping_ms(&mut self, timeout_ms: u32) -> Option<f64> {
        let start = Instant::now();
        if self.wait_sync(timeout_ms) {
            Some(start.elapsed().as_secs_f64() * 1e3)
        } else {
            None
        }
    }

    /// Ask the firmware for its version blob; fire-and-forget like the
    /// other single-byte commands.
    pub fn request_version(&mut self) -> Result<(), GmzError> {
        let sent = send_datagram(&self.socket, &protocol::get_version())?;
        self.bytes_sent += sent as u64;
        Ok(())
    }

    /// Best-effort `close` packet. Idempotent; also runs on drop.
    pub fn close(&mut self) {
        if !self.closed {
            let _ = self.socket.send(&protocol::close());
            self.closed = true;
            debug!(remote = %self.remote, "connection closed");
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    /// Snapshot of the last ACK.
    pub fn status(&self) -> FpgaStatus {
        self.status
    }

    /// The rolling health window.
    pub fn health(&self) -> &HealthWindow {
        &self.health
    }

    /// Timing derived from the active modeline, if one was set.
    pub fn timing(&self) -> Option<FrameTiming> {
        self.timing
    }

    /// Record an externally measured sync wait together with the current
    /// VRAM state (one sample per submitted frame).
    pub fn record_sync_wait(&mut self, sync_wait_ms: f64) {
        self.health.record(sync_wait_ms, self.status.vram_ready);
    }

    /// Record a VRAM-ready observation for this tick.
    pub fn record_ready(&mut self) {
        self.health.record_ready(self.status.vram_ready);
    }

    /// Effective per-fragment payload limit (`mtu − 28`).
    pub fn mtu_eff(&self) -> usize {
        self.mtu_eff
    }

    /// Local address the OS bound this connection's socket to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Frames submitted since open.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Total bytes handed to the socket since open.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}

impl Drop for OutputConnection {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Send helpers ─────────────────────────────────────────────────

fn send_datagram(socket: &UdpSocket, buf: &[u8]) -> Result<usize, GmzError> {
    socket.send(buf).map_err(GmzError::SendFailed)
}

/// Emit `payload` as `⌈len / mtu_eff⌉` datagrams, in order, the last one
/// possibly short. An empty payload emits nothing.
fn send_chunks(socket: &UdpSocket, payload: &[u8], mtu_eff: usize) -> Result<usize, GmzError> {
    let mut sent = 0;
    for chunk in payload.chunks(mtu_eff) {
        sent += send_datagram(socket, chunk)?;
    }
    Ok(sent)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Lz4Mode;

    fn silent_peer_config() -> (UdpSocket, ConnectConfig) {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = peer.local_addr().unwrap().port();
        let cfg = ConnectConfig {
            port,
            ..ConnectConfig::new("127.0.0.1")
        };
        (peer, cfg)
    }

    #[test]
    fn open_rejects_non_ipv4_hosts() {
        let cfg = ConnectConfig::new("mister.local");
        assert!(matches!(
            OutputConnection::open(cfg),
            Err(GmzError::ResolveFailed(_))
        ));
    }

    #[test]
    fn open_rejects_degenerate_mtu() {
        let cfg = ConnectConfig {
            mtu: 28,
            ..ConnectConfig::new("127.0.0.1")
        };
        assert!(matches!(
            OutputConnection::open(cfg),
            Err(GmzError::InvalidMtu(28))
        ));
    }

    #[test]
    fn audio_oversize_is_rejected_and_empty_is_dropped() {
        let (peer, cfg) = silent_peer_config();
        let mut conn = OutputConnection::open(cfg).unwrap();

        let too_big = vec![0u8; MAX_AUDIO_BYTES + 1];
        assert!(matches!(
            conn.send_audio(&too_big),
            Err(GmzError::AudioTooLarge { .. })
        ));

        conn.send_audio(&[]).unwrap();
        // Nothing must have hit the wire for the empty submit.
        peer.set_nonblocking(true).unwrap();
        let mut buf = [0u8; 16];
        assert!(peer.recv(&mut buf).is_err());
    }

    #[test]
    fn wait_sync_times_out_against_a_silent_peer() {
        let (_peer, cfg) = silent_peer_config();
        let mut conn = OutputConnection::open(cfg).unwrap();
        assert!(!conn.wait_sync(20));
        assert_eq!(conn.status(), FpgaStatus::default());
    }

    #[test]
    fn poll_on_idle_socket_keeps_status() {
        let (_peer, cfg) = silent_peer_config();
        let mut conn = OutputConnection::open(cfg).unwrap();
        assert_eq!(conn.poll(), 0);
        assert_eq!(conn.status(), FpgaStatus::default());
    }

    #[test]
    fn compress_failure_surfaces_for_oversized_frames() {
        let (_peer, cfg) = silent_peer_config();
        let cfg = ConnectConfig {
            lz4_mode: Lz4Mode::Lz4,
            max_frame_size: 64, // output buffer sized for 64-byte frames
            ..cfg
        };
        let mut conn = OutputConnection::open(cfg).unwrap();
        let incompressible: Vec<u8> =
            (0..4096u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
        assert!(matches!(
            conn.send_frame(&incompressible, 1, 0, 100),
            Err(GmzError::CompressFailed { .. })
        ));
    }
}
