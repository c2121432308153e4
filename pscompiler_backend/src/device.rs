//! Implements structs and methods for devices: the [`Pseudoclock`] generating the master tick
//! signal, and intermediate [`Device`]s whose channels are clocked by it. See [`BaseDevice`] for
//! the channel-management behavior shared by intermediate devices.
//!
//! ## Clock lines
//! The pseudoclock drives two clock lines. The fast line ticks on every tick of the compiled
//! clock program; the slow line only ticks on dual-rate ticks. Every intermediate device is
//! attached to exactly one of them ([`ClockLine`]), and all of its channels sample on that line.
//! Only fast-line devices may ramp.
//!
//! ## Channel naming
//! Channels are named the way the device firmware addresses them:
//! - [`DeviceKind::AO`]: `ao(number)`
//! - [`DeviceKind::DO`]: `port(number)/line(number)`
//! - [`DeviceKind::DDS`]: `dds(number)/freq`, `dds(number)/amp`, `dds(number)/phase` and an optional
//!   digital `dds(number)/gate`. Each composite output is three independent analog sub-channels.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;

use crate::channel::*;
use crate::error::*;
use crate::utils::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DeviceKind {
    AO,
    DO,
    DDS,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ClockLine {
    Fast,
    Slow,
}

pub trait BaseDevice {
    // Immutable accessors (getters)
    fn channels(&self) -> &IndexMap<String, Channel>;
    fn name(&self) -> &str;
    fn kind(&self) -> DeviceKind;
    fn clock_line(&self) -> ClockLine;
    fn time_base(&self) -> f64;

    // Mutable accessors
    fn channels_(&mut self) -> &mut IndexMap<String, Channel>;

    /// Shortcut to borrow channel instance by name
    fn chan(&self, name: &str) -> Result<&Channel> {
        self.channels()
            .get(name)
            .ok_or_else(|| self.unknown_channel(name))
    }
    /// Shortcut to mutably borrow channel instance by name
    fn chan_(&mut self, name: &str) -> Result<&mut Channel> {
        let err = self.unknown_channel(name);
        self.channels_().get_mut(name).ok_or(err)
    }

    fn unknown_channel(&self, name: &str) -> CompileError {
        CompileError::UnknownChannel {
            device: self.name().to_string(),
            channel: name.to_string(),
            registered: self.channels().keys().cloned().collect(),
        }
    }

    /// Adds a new channel to the device.
    ///
    /// The provided `name` is validated against the device kind's naming convention (see module
    /// docs). The channel kind is derived from the name: DDS `gate` sub-channels and all DO
    /// channels are digital, everything else is analog.
    ///
    /// # Arguments
    /// - `name`: Name of the channel, which must adhere to the naming conventions.
    /// - `default_value`: signal value before the channel's first instruction.
    fn add_channel(&mut self, name: &str, default_value: f64) -> Result<()> {
        // Check the name format
        let (name_match_string, name_format_description) = match self.kind() {
            DeviceKind::AO => (r"^ao\d+$", "ao(number)"),
            DeviceKind::DO => (r"^port\d+/line\d+$", "port(number)/line(number)"),
            DeviceKind::DDS => (
                r"^dds\d+/(freq|amp|phase|gate)$",
                "dds(number)/(freq|amp|phase|gate)",
            ),
        };
        let re = Regex::new(name_match_string).map_err(|e| CompileError::Config(e.to_string()))?;
        if !re.is_match(name) {
            return Err(CompileError::InvalidChannelName {
                device: self.name().to_string(),
                name: name.to_string(),
                expected: name_format_description.to_string(),
            });
        }
        if self.channels().contains_key(name) {
            return Err(CompileError::NamespaceCollision {
                name: format!("{}/{}", self.name(), name),
            });
        }
        let kind = match self.kind() {
            DeviceKind::DO => ChanKind::Digital,
            DeviceKind::DDS if name.ends_with("/gate") => ChanKind::Digital,
            _ => ChanKind::Analog,
        };
        let new_channel = Channel::new(self.name(), name, kind, default_value, self.time_base())?;
        self.channels_().insert(name.to_string(), new_channel);
        Ok(())
    }

    /// A device is marked edited if any of its channels are edited.
    fn is_edited(&self) -> bool {
        self.channels().values().any(|chan| chan.is_edited())
    }

    fn clear_edit_cache(&mut self) {
        for chan in self.channels_().values_mut() {
            chan.clear_edit_cache()
        }
    }

    fn last_instr_end_pos(&self) -> usize {
        self.channels()
            .values()
            .map(|chan| chan.last_instr_end_pos())
            .fold(0, usize::max)
    }

    fn last_instr_end_time(&self) -> f64 {
        pos_to_time(self.last_instr_end_pos(), self.time_base())
    }
}

/// An intermediate device: a card whose outputs are clocked by one line of the pseudoclock.
pub struct Device {
    channels: IndexMap<String, Channel>,

    name: String,
    kind: DeviceKind,
    clock_line: ClockLine,
    time_base: f64,
}

impl Device {
    pub fn new(name: &str, kind: DeviceKind, clock_line: ClockLine, time_base: f64) -> Self {
        Self {
            channels: IndexMap::new(),
            name: name.to_string(),
            kind,
            clock_line,
            time_base,
        }
    }
}

impl BaseDevice for Device {
    fn channels(&self) -> &IndexMap<String, Channel> {
        &self.channels
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn clock_line(&self) -> ClockLine {
        self.clock_line
    }

    fn time_base(&self) -> f64 {
        self.time_base
    }

    fn channels_(&mut self) -> &mut IndexMap<String, Channel> {
        &mut self.channels
    }
}

/// A wait on the pseudoclock timeline: ticking halts at `time` until an external trigger arrives.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Wait {
    pub label: String,
    pub time: f64,
    /// Maximum time [s] the hardware should wait for the trigger before resuming on its own.
    pub timeout: Option<f64>,
}

/// The clock-generating device all intermediate devices synchronize to.
pub struct Pseudoclock {
    name: String,
    min_period: f64,
    min_period_pos: usize,
    time_base: f64,
    waits: BTreeMap<usize, Wait>,
}

impl Pseudoclock {
    /// `min_period` is the shortest tick the clock hardware can produce; it is used as the extra
    /// closing tick when compiling without an explicit stop time.
    pub fn new(name: &str, min_period: f64, time_base: f64) -> Result<Self> {
        let min_period_pos = match time_to_pos(min_period, time_base, name) {
            Ok(pos) if pos >= 1 => pos,
            _ => {
                return Err(CompileError::DeviceLimit {
                    device: name.to_string(),
                    reason: format!(
                        "minimum period {min_period} [s] must be at least one time position (1/{time_base} [s])"
                    ),
                })
            }
        };
        Ok(Self {
            name: name.to_string(),
            min_period,
            min_period_pos,
            time_base,
            waits: BTreeMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min_period(&self) -> f64 {
        self.min_period
    }

    pub fn min_period_pos(&self) -> usize {
        self.min_period_pos
    }

    /// Waits keyed by their grid position.
    pub fn waits(&self) -> &BTreeMap<usize, Wait> {
        &self.waits
    }

    /// Schedules a wait. Waits at `t = 0`, at negative times, or coinciding with another wait are
    /// rejected.
    pub fn add_wait(&mut self, label: &str, t: f64, timeout: Option<f64>) -> Result<()> {
        let pos = time_to_pos(t, self.time_base, &self.name)?;
        let reject = |reason: String| CompileError::Timeline {
            output: format!("{} wait '{}'", self.name, label),
            time: t,
            reason,
        };
        if pos == 0 {
            return Err(reject("a wait cannot be scheduled at the start of the experiment".to_string()));
        }
        if let Some(timeout) = timeout {
            if !timeout.is_finite() || timeout <= 0. {
                return Err(reject(format!("wait timeout must be positive, got {timeout}")));
            }
        }
        if let Some(other) = self.waits.get(&pos) {
            return Err(reject(format!("coincides with wait '{}'", other.label)));
        }
        self.waits.insert(
            pos,
            Wait {
                label: label.to_string(),
                time: t,
                timeout,
            },
        );
        Ok(())
    }

    pub fn clear_waits(&mut self) {
        self.waits.clear();
    }
}
