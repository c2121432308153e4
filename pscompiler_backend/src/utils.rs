// Small helpers shared by the compiler stages: time-grid conversion, channel-name parsing and
// stage timing.
use std::time::Instant;

use regex::Regex;

use crate::error::*;

/// Largest usable grid position: positions must convert to `f64` seconds and back exactly, and
/// sums of two positions must not overflow.
pub fn max_pos() -> usize {
    usize::try_from(1u64 << f64::MANTISSA_DIGITS).map_or(usize::MAX / 2, |max| max)
}

/// Rounds a time in seconds onto the integer position grid defined by `time_base`.
///
/// Negative, non-finite and out-of-grid times are rejected with a timeline error naming `output`.
pub fn time_to_pos(t: f64, time_base: f64, output: &str) -> Result<usize> {
    let reject = |reason: String| CompileError::Timeline {
        output: output.to_string(),
        time: t,
        reason,
    };
    if !t.is_finite() || t < 0. {
        return Err(reject("instruction time must be finite and non-negative".to_string()));
    }
    let pos = (t * time_base).round();
    if pos > max_pos() as f64 {
        return Err(reject(format!(
            "time exceeds the last representable position {} [s] of the time grid",
            pos_to_time(max_pos(), time_base)
        )));
    }
    Ok(pos as usize)
}

/// Converts a grid position (or a position difference) back to seconds.
pub fn pos_to_time(pos: usize, time_base: f64) -> f64 {
    pos as f64 / time_base
}

/// Converts a sample rate into a whole number of grid positions per sample.
///
/// Fails if the resulting period is not an integer number of positions or is zero, since the
/// ramp could then not be sampled on the grid without accumulating rounding drift.
pub fn rate_to_period_pos(samp_rate: f64, time_base: f64, output: &str, t: f64) -> Result<usize> {
    let bad_rate = |reason: String| CompileError::Timeline {
        output: output.to_string(),
        time: t,
        reason,
    };
    if !samp_rate.is_finite() || samp_rate <= 0. {
        return Err(bad_rate(format!("ramp sample rate must be positive, got {samp_rate}")));
    }
    let period = time_base / samp_rate;
    let rounded = period.round();
    if rounded > max_pos() as f64 {
        return Err(bad_rate(format!("ramp sample rate {samp_rate} [Hz] is below the time resolution")));
    }
    if rounded < 1. || (period - rounded).abs() > 1e-6 * rounded.max(1.) {
        return Err(bad_rate(format!(
            "ramp sample rate {samp_rate} [Hz] does not correspond to an integer number of \
            {time_base} [1/s] time positions"
        )));
    }
    Ok(rounded as usize)
}

// Assumes that input string is of form port[number]/line[number] (e.g. port0/line32)
// Returns the port and line numbers.
pub fn extract_port_line_numbers(chan: &str) -> Result<(usize, usize)> {
    let re = Regex::new(r"^port(\d+)/line(\d+)$").map_err(|e| CompileError::Config(e.to_string()))?;
    let bad_name = || CompileError::InvalidChannelName {
        device: String::new(),
        name: chan.to_string(),
        expected: "port(number)/line(number)".to_string(),
    };
    let caps = re.captures(chan).ok_or_else(bad_name)?;
    let port = caps[1].parse::<usize>().map_err(|_| bad_name())?;
    let line = caps[2].parse::<usize>().map_err(|_| bad_name())?;
    Ok((port, line))
}

// Utility class for time-tracking of compilation stages
pub struct TickTimer {
    last: Instant,
}

impl TickTimer {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Returns the milliseconds elapsed since the previous tick (or construction).
    pub fn tick(&mut self) -> f64 {
        let now = Instant::now();
        let diff = now.duration_since(self.last).as_secs_f64() * 1e3;
        self.last = now;
        diff
    }

    pub fn tick_log(&mut self, msg: &str) -> f64 {
        let diff = self.tick();
        tracing::debug!("{}: {:.3} ms", msg, diff);
        diff
    }
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use crate::utils::*;

    #[test]
    fn port_line_parsing() {
        assert_eq!(extract_port_line_numbers("port0/line32").unwrap(), (0, 32));
        assert_eq!(extract_port_line_numbers("port12/line3").unwrap(), (12, 3));
        assert!(extract_port_line_numbers("ao0").is_err());
    }

    #[test]
    fn rate_to_period() {
        assert_eq!(rate_to_period_pos(1e6, 1e9, "x", 0.).unwrap(), 1000);
        assert_eq!(rate_to_period_pos(3e3, 1e9, "x", 0.).is_err(), true);
        assert!(rate_to_period_pos(0., 1e9, "x", 0.).is_err());
        // Faster than the grid itself
        assert!(rate_to_period_pos(1e10, 1e9, "x", 0.).is_err());
    }

    #[test]
    fn negative_time_rejected() {
        assert!(time_to_pos(-1e-3, 1e9, "dev/ao0").is_err());
        assert_eq!(time_to_pos(1e-3, 1e9, "dev/ao0").unwrap(), 1_000_000);
    }

    #[test]
    fn time_beyond_grid_rejected() {
        // 2^53 ns is about 104 days
        assert_eq!(time_to_pos(9e6, 1e9, "dev/ao0").unwrap(), 9_000_000_000_000_000);
        assert!(matches!(
            time_to_pos(1e7, 1e9, "dev/ao0"),
            Err(CompileError::Timeline { .. })
        ));
        assert!(time_to_pos(2e10, 1e9, "dev/ao0").is_err());
        assert!(rate_to_period_pos(1e-300, 1e9, "x", 0.).is_err());
    }
}
