//! The experiment module provides the highest level of abstraction: a compilation context owning
//! the pseudoclock, every intermediate device registered to it, and the compile configuration.
//!
//! ## Overview
//!
//! The behavior of the [`Experiment`] struct is defined by the [`BaseExperiment`] trait through
//! default implementations, so that custom experiment types only need to provide field accessors.
//!
//! - **Experiment**: the structure users interact with. It registers devices and redirects
//!   instructions to their channels.
//! - **Device**: a card clocked by one line of the pseudoclock, see [`Device`].
//! - **Channel**: one physical output holding an instruction timeline, see [`Channel`].
//!
//! Compilation is a pure pass over the recorded timelines: [`BaseExperiment::compile`] borrows them
//! and returns an owned [`CompiledOutputs`] holding the clock program and the per-tick sample
//! arrays of every output. Recording may continue afterwards and the experiment can be compiled
//! again.
//!
//! ```
//! use pscompiler_backend::*;
//!
//! let mut exp = Experiment::new("pb0", 1e-7).unwrap();
//! exp.add_ao_device("ao_card", ClockLine::Fast).unwrap();
//! exp.add_ao_channel("ao_card", 0, 0.).unwrap();
//! exp.constant("ao_card", "ao0", 0., 0.5).unwrap();
//! exp.wait("trigger", 1e-3, None).unwrap();
//! exp.linramp("ao_card", "ao0", 1e-3, 1e-3, 0., 1., 1e6).unwrap();
//! exp.constant("ao_card", "ao0", 2e-3, 0.).unwrap();
//!
//! let compiled = exp.compile(Some(3e-3)).unwrap();
//! assert_eq!(compiled.program.num_waits(), 1);
//! assert_eq!(compiled.device("ao_card").unwrap().samples("ao0").unwrap().len(), 1002);
//! ```

use indexmap::IndexMap;
use ndarray::Array1;
use serde::Serialize;

use crate::channel::*;
use crate::clock::*;
use crate::config::*;
use crate::device::*;
use crate::error::*;
use crate::expand::*;
use crate::instruction::*;
use crate::utils::*;

/// Samples of every channel of one device, one entry per tick observed on its clock line.
#[derive(Clone, Debug, Serialize)]
pub struct CompiledDevice {
    pub name: String,
    pub kind: DeviceKind,
    pub clock_line: ClockLine,
    pub samples: IndexMap<String, Array1<f64>>,
}

impl CompiledDevice {
    pub fn samples(&self, chan_name: &str) -> Result<&Array1<f64>> {
        self.samples
            .get(chan_name)
            .ok_or_else(|| CompileError::UnknownChannel {
                device: self.name.clone(),
                channel: chan_name.to_string(),
                registered: self.samples.keys().cloned().collect(),
            })
    }

    /// Number of ticks the device observes.
    pub fn num_ticks(&self) -> usize {
        self.samples.values().next().map_or(0, |samples| samples.len())
    }
}

/// Result of a successful compilation. Immutable input of every device encoder.
#[derive(Clone, Debug, Serialize)]
pub struct CompiledOutputs {
    pub clock_name: String,
    pub clock_min_period: f64,
    pub program: ClockProgram,
    pub devices: IndexMap<String, CompiledDevice>,
}

impl CompiledOutputs {
    pub fn device(&self, name: &str) -> Result<&CompiledDevice> {
        self.devices.get(name).ok_or_else(|| CompileError::UnknownDevice {
            name: name.to_string(),
            registered: self.devices.keys().cloned().collect(),
        })
    }

    pub fn stop_time(&self) -> f64 {
        self.program.stop_time()
    }
}

/// This trait defines the behavior of the [`Experiment`] struct through default trait implementations.
///
/// Trait methods are classified into the following categories:
/// 1. Experiment-targeted methods:
///     - [`add_ao_device`], [`add_do_device`], [`add_dds_device`], [`wait`]
///     - [`compile`], [`last_instr_end_time`], [`is_edited`], [`clear_edit_cache`], [`add_reset_instr`]
/// 2. Device-targeted methods:
///     - [`add_ao_channel`], [`add_do_channel`], [`add_dds_channel`]
/// 3. Channel-targeted methods:
///     - [`constant`], [`go_high`], [`go_low`], [`high`], [`low`]
///     - [`linramp`], [`expramp`], [`sine`], [`dds_set`]
/// 4. Internal helper methods:
///     - [`typed_device_op`], [`typed_channel_op`]
///
/// [`add_ao_device`]: BaseExperiment::add_ao_device
/// [`add_do_device`]: BaseExperiment::add_do_device
/// [`add_dds_device`]: BaseExperiment::add_dds_device
/// [`wait`]: BaseExperiment::wait
/// [`compile`]: BaseExperiment::compile
/// [`last_instr_end_time`]: BaseExperiment::last_instr_end_time
/// [`is_edited`]: BaseExperiment::is_edited
/// [`clear_edit_cache`]: BaseExperiment::clear_edit_cache
/// [`add_reset_instr`]: BaseExperiment::add_reset_instr
/// [`add_ao_channel`]: BaseExperiment::add_ao_channel
/// [`add_do_channel`]: BaseExperiment::add_do_channel
/// [`add_dds_channel`]: BaseExperiment::add_dds_channel
/// [`constant`]: BaseExperiment::constant
/// [`go_high`]: BaseExperiment::go_high
/// [`go_low`]: BaseExperiment::go_low
/// [`high`]: BaseExperiment::high
/// [`low`]: BaseExperiment::low
/// [`linramp`]: BaseExperiment::linramp
/// [`expramp`]: BaseExperiment::expramp
/// [`sine`]: BaseExperiment::sine
/// [`dds_set`]: BaseExperiment::dds_set
/// [`typed_device_op`]: BaseExperiment::typed_device_op
/// [`typed_channel_op`]: BaseExperiment::typed_channel_op
pub trait BaseExperiment {
    // FIELD methods
    fn clock(&self) -> &Pseudoclock;
    fn clock_(&mut self) -> &mut Pseudoclock;
    fn devices(&self) -> &IndexMap<String, Device>;
    fn devices_(&mut self) -> &mut IndexMap<String, Device>;
    fn config(&self) -> &CompileConfig;

    fn unknown_device(&self, name: &str) -> CompileError {
        CompileError::UnknownDevice {
            name: name.to_string(),
            registered: self.devices().keys().cloned().collect(),
        }
    }

    /// Shortcut to borrow device instance by name
    fn dev(&self, name: &str) -> Result<&Device> {
        self.devices()
            .get(name)
            .ok_or_else(|| self.unknown_device(name))
    }
    /// Shortcut to mutably borrow device instance by name
    fn dev_(&mut self, name: &str) -> Result<&mut Device> {
        let err = self.unknown_device(name);
        self.devices_().get_mut(name).ok_or(err)
    }

    fn chan(&self, dev_name: &str, chan_name: &str) -> Result<&Channel> {
        self.dev(dev_name)?.chan(chan_name)
    }

    /// Registers a device, rejecting names already taken by another device or the pseudoclock.
    fn add_device_base(&mut self, dev: Device) -> Result<()> {
        let name = dev.name();
        if self.devices().contains_key(name) || self.clock().name() == name {
            return Err(CompileError::NamespaceCollision {
                name: name.to_string(),
            });
        }
        tracing::debug!(device = name, kind = ?dev.kind(), line = ?dev.clock_line(), "registered device");
        self.devices_().insert(name.to_string(), dev);
        Ok(())
    }

    /// Registers an analog output card clocked by `clock_line`.
    ///
    /// # Example
    /// ```
    /// # use pscompiler_backend::*;
    /// let mut exp = Experiment::new("pb0", 1e-7).unwrap();
    /// exp.add_ao_device("board1", ClockLine::Fast).unwrap();
    /// // Device names must be unique, even across device kinds
    /// assert!(matches!(
    ///     exp.add_do_device("board1", ClockLine::Slow),
    ///     Err(CompileError::NamespaceCollision { .. })
    /// ));
    /// ```
    fn add_ao_device(&mut self, name: &str, clock_line: ClockLine) -> Result<()> {
        let time_base = self.config().time_base;
        self.add_device_base(Device::new(name, DeviceKind::AO, clock_line, time_base))
    }

    fn add_do_device(&mut self, name: &str, clock_line: ClockLine) -> Result<()> {
        let time_base = self.config().time_base;
        self.add_device_base(Device::new(name, DeviceKind::DO, clock_line, time_base))
    }

    fn add_dds_device(&mut self, name: &str, clock_line: ClockLine) -> Result<()> {
        let time_base = self.config().time_base;
        self.add_device_base(Device::new(name, DeviceKind::DDS, clock_line, time_base))
    }

    /// Executes `f` on the device `name` after checking that it is of kind `kind`.
    fn typed_device_op<F, R>(&mut self, name: &str, kind: DeviceKind, f: F) -> Result<R>
    where
        F: FnOnce(&mut Device) -> Result<R>,
    {
        let dev = self.dev_(name)?;
        if dev.kind() != kind {
            return Err(CompileError::WrongKind {
                name: name.to_string(),
                expected: format!("a device of kind {:?}", kind),
            });
        }
        f(dev)
    }

    /// Executes `f` on channel `chan_name` of device `dev_name` after checking its value domain.
    fn typed_channel_op<F, R>(&mut self, dev_name: &str, chan_name: &str, kind: ChanKind, f: F) -> Result<R>
    where
        F: FnOnce(&mut Channel) -> Result<R>,
    {
        let chan = self.dev_(dev_name)?.chan_(chan_name)?;
        check_chan_kind(chan, kind)?;
        f(chan)
    }

    /// Borrows channel `chan_name` of device `dev_name` after checking its value domain.
    fn typed_chan(&self, dev_name: &str, chan_name: &str, kind: ChanKind) -> Result<&Channel> {
        let chan = self.chan(dev_name, chan_name)?;
        check_chan_kind(chan, kind)?;
        Ok(chan)
    }

    /// Adds channel `ao(channel_id)` to an AO device.
    fn add_ao_channel(&mut self, name: &str, channel_id: usize, default_value: f64) -> Result<()> {
        self.typed_device_op(name, DeviceKind::AO, |dev| {
            dev.add_channel(&format!("ao{}", channel_id), default_value)
        })
    }

    /// Adds channel `port(port_id)/line(line_id)` to a DO device.
    ///
    /// # Example
    /// ```
    /// # use pscompiler_backend::*;
    /// let mut exp = Experiment::new("pb0", 1e-7).unwrap();
    /// exp.add_do_device("do_card", ClockLine::Slow).unwrap();
    /// exp.add_do_channel("do_card", 0, 7, 0.).unwrap();
    /// assert!(exp.chan("do_card", "port0/line7").is_ok());
    /// // A digital default must be 0 or 1
    /// assert!(exp.add_do_channel("do_card", 0, 6, 0.5).is_err());
    /// ```
    fn add_do_channel(&mut self, name: &str, port_id: usize, line_id: usize, default_value: f64) -> Result<()> {
        self.typed_device_op(name, DeviceKind::DO, |dev| {
            dev.add_channel(&format!("port{}/line{}", port_id, line_id), default_value)
        })
    }

    /// Adds the composite output `dds(dds_id)`: analog `freq`, `amp` and `phase` sub-channels
    /// defaulting to zero, and a digital `gate` sub-channel (default low) if `with_gate`.
    fn add_dds_channel(&mut self, name: &str, dds_id: usize, with_gate: bool) -> Result<()> {
        self.typed_device_op(name, DeviceKind::DDS, |dev| {
            for sub in ["freq", "amp", "phase"] {
                dev.add_channel(&format!("dds{}/{}", dds_id, sub), 0.)?;
            }
            if with_gate {
                dev.add_channel(&format!("dds{}/gate", dds_id), 0.)?;
            }
            Ok(())
        })
    }

    /// Schedules a wait on the pseudoclock: ticking halts at `t` until an external trigger arrives.
    fn wait(&mut self, label: &str, t: f64, timeout: Option<f64>) -> Result<()> {
        self.clock_().add_wait(label, t, timeout)
    }

    /// Sets an analog channel to `value` at time `t`, held until the next instruction.
    fn constant(&mut self, dev_name: &str, chan_name: &str, t: f64, value: f64) -> Result<()> {
        self.typed_channel_op(dev_name, chan_name, ChanKind::Analog, |chan| {
            chan.constant(value, t)
        })
    }

    /// Sets a digital channel high at `t`, until the next instruction.
    fn go_high(&mut self, dev_name: &str, chan_name: &str, t: f64) -> Result<()> {
        self.typed_channel_op(dev_name, chan_name, ChanKind::Digital, |chan| {
            chan.constant(1., t)
        })
    }

    /// Sets a digital channel low at `t`, until the next instruction.
    fn go_low(&mut self, dev_name: &str, chan_name: &str, t: f64) -> Result<()> {
        self.typed_channel_op(dev_name, chan_name, ChanKind::Digital, |chan| {
            chan.constant(0., t)
        })
    }

    /// High pulse on a digital channel: high at `t`, low again at `t + duration`.
    ///
    /// # Example
    /// ```
    /// # use pscompiler_backend::*;
    /// let mut exp = Experiment::new("pb0", 1e-7).unwrap();
    /// exp.add_do_device("do_card", ClockLine::Slow).unwrap();
    /// exp.add_do_channel("do_card", 0, 0, 0.).unwrap();
    /// exp.high("do_card", "port0/line0", 1e-3, 2e-3).unwrap();
    /// assert_eq!(exp.last_instr_end_time(), 3e-3);
    /// ```
    fn high(&mut self, dev_name: &str, chan_name: &str, t: f64, duration: f64) -> Result<()> {
        self.go_high(dev_name, chan_name, t)?;
        self.go_low(dev_name, chan_name, t + duration)
    }

    /// Low pulse on a digital channel: low at `t`, high again at `t + duration`.
    fn low(&mut self, dev_name: &str, chan_name: &str, t: f64, duration: f64) -> Result<()> {
        self.go_low(dev_name, chan_name, t)?;
        self.go_high(dev_name, chan_name, t + duration)
    }

    /// Ramps an analog channel linearly from `start_val` to `end_val` over `[t, t + duration)`,
    /// sampled at `samp_rate` [Hz]. The channel holds `end_val` after the ramp.
    #[allow(clippy::too_many_arguments)]
    fn linramp(
        &mut self,
        dev_name: &str,
        chan_name: &str,
        t: f64,
        duration: f64,
        start_val: f64,
        end_val: f64,
        samp_rate: f64,
    ) -> Result<()> {
        self.typed_channel_op(dev_name, chan_name, ChanKind::Analog, |chan| {
            let instr = Instruction::new_linramp(start_val, end_val);
            chan.add_instr(instr, t, Some((duration, samp_rate)))
        })
    }

    /// Exponential ramp, see [`Instruction::new_expramp`].
    #[allow(clippy::too_many_arguments)]
    fn expramp(
        &mut self,
        dev_name: &str,
        chan_name: &str,
        t: f64,
        duration: f64,
        start_val: f64,
        end_val: f64,
        offset: Option<f64>,
        samp_rate: f64,
    ) -> Result<()> {
        self.typed_channel_op(dev_name, chan_name, ChanKind::Analog, |chan| {
            let instr = Instruction::new_expramp(start_val, end_val, offset);
            chan.add_instr(instr, t, Some((duration, samp_rate)))
        })
    }

    /// Sine waveform over `[t, t + duration)`, see [`Instruction::new_sine`].
    ///
    /// # Example
    /// ```
    /// # use pscompiler_backend::*;
    /// let mut exp = Experiment::new("pb0", 1e-7).unwrap();
    /// exp.add_ao_device("ao_card", ClockLine::Fast).unwrap();
    /// exp.add_ao_channel("ao_card", 0, 0.).unwrap();
    /// // t=0, duration=1ms, 100 kSa/s, freq=10kHz, amplitude=10, phase=0(default), dc_offset=0(default)
    /// exp.sine("ao_card", "ao0", 0., 1e-3, 1e5, 1e4, Some(10.), None, None).unwrap();
    /// ```
    #[allow(clippy::too_many_arguments)]
    fn sine(
        &mut self,
        dev_name: &str,
        chan_name: &str,
        t: f64,
        duration: f64,
        samp_rate: f64,
        freq: f64,
        amplitude: Option<f64>,
        phase: Option<f64>,
        dc_offset: Option<f64>,
    ) -> Result<()> {
        self.typed_channel_op(dev_name, chan_name, ChanKind::Analog, |chan| {
            let instr = Instruction::new_sine(freq, amplitude, phase, dc_offset);
            chan.add_instr(instr, t, Some((duration, samp_rate)))
        })
    }

    /// Sets frequency [Hz], amplitude and phase [rad] of composite output `dds(dds_id)` at `t`.
    ///
    /// Either all three sub-channels change or, on error, none does.
    fn dds_set(&mut self, dev_name: &str, dds_id: usize, t: f64, freq: f64, amp: f64, phase: f64) -> Result<()> {
        let subs = [("freq", freq), ("amp", amp), ("phase", phase)];
        for (sub, value) in subs {
            self.typed_chan(dev_name, &format!("dds{}/{}", dds_id, sub), ChanKind::Analog)?
                .place_instr(Instruction::new_const(value), t, None)?;
        }
        for (sub, value) in subs {
            self.constant(dev_name, &format!("dds{}/{}", dds_id, sub), t, value)?;
        }
        Ok(())
    }

    /// Last grid position occupied by any instruction or wait.
    fn last_instr_end_pos(&self) -> usize {
        let last_wait = self.clock().waits().keys().next_back().copied().unwrap_or(0);
        self.devices()
            .values()
            .map(|dev| dev.last_instr_end_pos())
            .fold(last_wait, usize::max)
    }

    fn last_instr_end_time(&self) -> f64 {
        pos_to_time(self.last_instr_end_pos(), self.config().time_base)
    }

    fn is_edited(&self) -> bool {
        self.devices().values().any(|dev| dev.is_edited()) || !self.clock().waits().is_empty()
    }

    /// Drops every recorded instruction and wait. Registered devices and channels are kept.
    fn clear_edit_cache(&mut self) {
        self.clock_().clear_waits();
        self.devices_()
            .values_mut()
            .for_each(|dev| dev.clear_edit_cache());
    }

    /// Returns every channel to its default value at `reset_time`.
    ///
    /// Without an explicit time, the reset happens one minimum clock period after the last
    /// instruction end. If any channel rejects the reset, no channel is changed.
    fn add_reset_instr(&mut self, reset_time: Option<f64>) -> Result<()> {
        let time_base = self.config().time_base;
        let reset_time = match reset_time {
            Some(t) => t,
            None => pos_to_time(
                self.last_instr_end_pos() + self.clock().min_period_pos(),
                time_base,
            ),
        };
        let books = self
            .devices()
            .values()
            .flat_map(|dev| dev.channels().values())
            .map(|chan| chan.place_instr(Instruction::new_const(chan.default_value()), reset_time, None))
            .collect::<Result<Vec<_>>>()?;

        let mut books = books.into_iter();
        for chan in self
            .devices_()
            .values_mut()
            .flat_map(|dev| dev.channels_().values_mut())
        {
            if let Some(book) = books.next() {
                chan.instr_list_().insert(book);
            }
        }
        Ok(())
    }

    /// Compiles all recorded timelines into the clock program and per-device sample arrays.
    ///
    /// With `stop_time = None` the experiment stops one minimum clock period after the last
    /// instruction end, so that the last instruction is followed by a closing tick. An explicit
    /// `stop_time` must not precede the last instruction end.
    fn compile(&self, stop_time: Option<f64>) -> Result<CompiledOutputs> {
        let mut timer = TickTimer::new();
        let cfg = self.config();
        let clock = self.clock();
        let last_end = self.last_instr_end_pos();
        let stop_pos = match stop_time {
            Some(t) => {
                let pos = time_to_pos(t, cfg.time_base, clock.name())?;
                if pos < last_end {
                    return Err(CompileError::Timeline {
                        output: clock.name().to_string(),
                        time: t,
                        reason: format!(
                            "stop time precedes the last instruction end time {} [s]. \
                            If you intended to stop right after the last instruction, use stop_time=None",
                            pos_to_time(last_end, cfg.time_base)
                        ),
                    });
                }
                pos
            }
            None => last_end + clock.min_period_pos(),
        };

        let outputs: Vec<OutputTimeline> = self
            .devices()
            .values()
            .flat_map(|dev| {
                dev.channels()
                    .values()
                    .map(move |chan| OutputTimeline::new(chan, dev.clock_line()))
            })
            .collect();
        let program = compile_clock(clock, &outputs, stop_pos, cfg)?;
        timer.tick_log("clock compilation");

        let mut devices = IndexMap::new();
        for dev in self.devices().values() {
            let mut samples = IndexMap::new();
            for (chan_name, chan) in dev.channels() {
                let view = OutputTimeline::new(chan, dev.clock_line());
                samples.insert(chan_name.clone(), expand_output(&program, &view)?);
            }
            devices.insert(
                dev.name().to_string(),
                CompiledDevice {
                    name: dev.name().to_string(),
                    kind: dev.kind(),
                    clock_line: dev.clock_line(),
                    samples,
                },
            );
        }
        timer.tick_log("output expansion");

        tracing::info!(
            clock = clock.name(),
            stop_time = program.stop_time(),
            devices = devices.len(),
            outputs = outputs.len(),
            fast_ticks = program.tick_count(ClockLine::Fast),
            slow_ticks = program.tick_count(ClockLine::Slow),
            "compiled experiment"
        );
        Ok(CompiledOutputs {
            clock_name: clock.name().to_string(),
            clock_min_period: clock.min_period(),
            program,
            devices,
        })
    }
}

fn check_chan_kind(chan: &Channel, kind: ChanKind) -> Result<()> {
    if chan.kind() != kind {
        return Err(CompileError::WrongKind {
            name: chan.output_name(),
            expected: format!("a channel of kind {:?}", kind),
        });
    }
    Ok(())
}

/// Default compilation context: one pseudoclock and the devices it clocks.
pub struct Experiment {
    clock: Pseudoclock,
    devices: IndexMap<String, Device>,
    config: CompileConfig,
}

impl Experiment {
    /// Creates an empty experiment with the default [`CompileConfig`].
    ///
    /// `clock_name` names the pseudoclock and `min_period` [s] is the shortest tick it can produce.
    pub fn new(clock_name: &str, min_period: f64) -> Result<Self> {
        Self::with_config(clock_name, min_period, CompileConfig::default())
    }

    pub fn with_config(clock_name: &str, min_period: f64, config: CompileConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            clock: Pseudoclock::new(clock_name, min_period, config.time_base)?,
            devices: IndexMap::new(),
            config,
        })
    }
}

impl BaseExperiment for Experiment {
    fn clock(&self) -> &Pseudoclock {
        &self.clock
    }
    fn clock_(&mut self) -> &mut Pseudoclock {
        &mut self.clock
    }
    fn devices(&self) -> &IndexMap<String, Device> {
        &self.devices
    }
    fn devices_(&mut self) -> &mut IndexMap<String, Device> {
        &mut self.devices
    }
    fn config(&self) -> &CompileConfig {
        &self.config
    }
}
