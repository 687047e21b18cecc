//! CRT modelines and the timing values derived from them.
//!
//! A [`Modeline`] is created once per mode switch and is immutable while
//! active. [`FrameTiming`] is the integer-nanosecond digest the pacer and
//! sync math operate on; it carries `v_total` and the interlace flag so
//! downstream scanline arithmetic needs no second lookup.

use crate::error::GmzError;

// ── Modeline ─────────────────────────────────────────────────────

/// A full set of CRT timing parameters defining one display mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Modeline {
    /// Pixel clock in MHz.
    pub pixel_clock: f64,
    /// Horizontal active pixels.
    pub h_active: u16,
    /// Horizontal sync start.
    pub h_begin: u16,
    /// Horizontal sync end.
    pub h_end: u16,
    /// Horizontal total pixels per line.
    pub h_total: u16,
    /// Vertical active lines.
    pub v_active: u16,
    /// Vertical sync start.
    pub v_begin: u16,
    /// Vertical sync end.
    pub v_end: u16,
    /// Vertical total lines per frame.
    pub v_total: u16,
    /// Interlaced (two fields per frame) vs progressive.
    pub interlaced: bool,
}

impl Modeline {
    /// Check the ordering invariants:
    /// `active ≤ begin < end ≤ total` on both axes, `pixel_clock > 0`.
    pub fn validate(&self) -> Result<(), GmzError> {
        if !(self.pixel_clock > 0.0) {
            return Err(GmzError::InvalidModeline("pixel_clock must be positive"));
        }
        if !(self.h_active <= self.h_begin && self.h_begin < self.h_end && self.h_end <= self.h_total)
        {
            return Err(GmzError::InvalidModeline("horizontal ordering violated"));
        }
        if !(self.v_active <= self.v_begin && self.v_begin < self.v_end && self.v_end <= self.v_total)
        {
            return Err(GmzError::InvalidModeline("vertical ordering violated"));
        }
        Ok(())
    }
}

// ── FrameTiming ──────────────────────────────────────────────────

/// Integer timing digest of a [`Modeline`].
///
/// For interlaced modes `frame_time_ns` is the **field** period — the
/// cadence at which the host must deliver half-frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    /// Duration of one scanline in nanoseconds.
    pub line_time_ns: u64,
    /// Duration of one frame (or field, when interlaced) in nanoseconds.
    pub frame_time_ns: u64,
    /// Total scanlines per frame.
    pub v_total: u16,
    /// Carried from the modeline for field-parity math.
    pub interlaced: bool,
}

impl FrameTiming {
    /// Derive the timing digest from a modeline.
    ///
    /// `line_time_ns = round(h_total · 1000 / pixel_clock)`,
    /// `frame_time_ns = (v_total · line_time_ns) >> interlace`.
    pub fn from_modeline(m: &Modeline) -> Self {
        let line_time_ns = (f64::from(m.h_total) * 1000.0 / m.pixel_clock).round() as u64;
        let frame_time_ns = (u64::from(m.v_total) * line_time_ns) >> u32::from(m.interlaced);
        Self {
            line_time_ns,
            frame_time_ns,
            v_total: m.v_total,
            interlaced: m.interlaced,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn modeline_320x240() -> Modeline {
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

    #[test]
    fn timing_320x240_at_60() {
        let t = FrameTiming::from_modeline(&modeline_320x240());
        assert_eq!(t.line_time_ns, 63_582);
        assert_eq!(t.frame_time_ns, 16_658_484);
        assert_eq!(t.v_total, 262);
        assert!(!t.interlaced);
    }

    #[test]
    fn interlace_halves_the_period() {
        let mut m = modeline_320x240();
        let progressive = FrameTiming::from_modeline(&m);
        m.interlaced = true;
        let interlaced = FrameTiming::from_modeline(&m);
        assert_eq!(interlaced.frame_time_ns, progressive.frame_time_ns / 2);
    }

    #[test]
    fn validate_accepts_consistent_modeline() {
        assert!(modeline_320x240().validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_ordering() {
        let mut m = modeline_320x240();
        m.h_begin = 400;
        m.h_end = 380; // begin >= end
        assert!(matches!(
            m.validate(),
            Err(GmzError::InvalidModeline(_))
        ));
    }

    #[test]
    fn validate_rejects_zero_clock() {
        let mut m = modeline_320x240();
        m.pixel_clock = 0.0;
        assert!(m.validate().is_err());
    }
}
