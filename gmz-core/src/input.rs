//! Input connection: joystick and PS/2 state streamed back by the FPGA.
//!
//! The FPGA pushes input datagrams to whichever address last said hello
//! on port 32101, so binding sends a single `0x00` byte to register the
//! client. Packets are dispatched purely by length (see
//! [`crate::protocol`]) and deduplicated by `(frame, order)` — UDP can
//! reorder, and only the newest sample of each kind matters.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, trace};

use crate::config::INPUT_PORT;
use crate::error::GmzError;
use crate::protocol::{
    JoystickState, Ps2State, JOY_ANALOG_SIZE, JOY_DIGITAL_SIZE, PS2_FULL_SIZE, PS2_KEYBOARD_SIZE,
};

/// Accept a packet only if it is strictly newer than the last one kept.
fn supersedes(frame: u32, order: u8, last: Option<(u32, u8)>) -> bool {
    match last {
        None => true,
        Some((f, o)) => frame > f || (frame == f && order > o),
    }
}

// ── InputConnection ──────────────────────────────────────────────

/// A connection to the FPGA's input endpoint.
///
/// Owns its socket and the latest accepted snapshots; independent of the
/// output connection in every way.
pub struct InputConnection {
    socket: UdpSocket,
    joy: JoystickState,
    joy_seen: Option<(u32, u8)>,
    ps2: Ps2State,
    ps2_seen: Option<(u32, u8)>,
}

impl InputConnection {
    /// Connect to `host` on the default input port and send the hello
    /// byte so the FPGA starts streaming.
    pub fn bind(host: &str) -> Result<Self, GmzError> {
        Self::bind_to(host, INPUT_PORT)
    }

    /// Connect to an explicit `host:port` input endpoint.
    pub fn bind_to(host: &str, port: u16) -> Result<Self, GmzError> {
        let ip: Ipv4Addr = host
            .parse()
            .map_err(|_| GmzError::ResolveFailed(host.to_string()))?;
        let remote = SocketAddr::V4(SocketAddrV4::new(ip, port));

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(GmzError::SocketCreateFailed)?;
        socket
            .set_nonblocking(true)
            .map_err(GmzError::SocketCreateFailed)?;
        socket
            .connect(&remote.into())
            .map_err(GmzError::SocketCreateFailed)?;
        let socket: UdpSocket = socket.into();

        // Hello: one zero byte teaches the FPGA our return address.
        socket.send(&[0x00]).map_err(GmzError::SendFailed)?;
        debug!(remote = %remote, "input channel registered");

        Ok(Self {
            socket,
            joy: JoystickState::default(),
            joy_seen: None,
            ps2: Ps2State::default(),
            ps2_seen: None,
        })
    }

    /// Drain pending input datagrams. Returns `true` iff at least one
    /// packet was parsed *and* accepted by deduplication.
    pub fn poll(&mut self) -> bool {
        let mut buf = [0u8; 64];
        let mut accepted = false;
        loop {
            let n = match self.socket.recv(&mut buf) {
                Ok(n) => n,
                Err(_) => break,
            };
            match n {
                JOY_DIGITAL_SIZE | JOY_ANALOG_SIZE => {
                    if let Some(joy) = JoystickState::parse(&buf[..n]) {
                        if supersedes(joy.frame, joy.order, self.joy_seen) {
                            self.joy_seen = Some((joy.frame, joy.order));
                            self.joy = joy;
                            accepted = true;
                        }
                    }
                }
                PS2_KEYBOARD_SIZE | PS2_FULL_SIZE => {
                    if let Some(ps2) = Ps2State::parse(&buf[..n]) {
                        if supersedes(ps2.frame, ps2.order, self.ps2_seen) {
                            self.ps2_seen = Some((ps2.frame, ps2.order));
                            self.ps2 = ps2;
                            accepted = true;
                        }
                    }
                }
                other => trace!(len = other, "discarding unknown input datagram"),
            }
        }
        accepted
    }

    /// Latest accepted joystick snapshot.
    pub fn joystick(&self) -> &JoystickState {
        &self.joy
    }

    /// Latest accepted PS/2 snapshot.
    pub fn ps2(&self) -> &Ps2State {
        &self.ps2
    }

    /// Local address the OS bound this socket to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

// ── Tests ────────────────────────────────────────────────────────
