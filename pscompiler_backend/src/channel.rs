//! Per-output instruction timelines.
//!
//! A [`Channel`] is one physical output of an intermediate device. It owns the ordered set of
//! [`InstrBook`]s recorded for it and enforces the single-channel timeline invariants as
//! instructions are added:
//! - instruction times are non-negative and strictly increasing;
//! - a ramp's domain `[start, end)` contains no other instruction time;
//! - digital channels only accept discrete values `0` and `1`.
//!
//! Cross-channel consistency (ramp sampling agreement, waits, experiment duration) is checked by
//! the clock compiler, see [`crate::clock`].

use std::collections::BTreeSet;

use crate::error::*;
use crate::instruction::*;
use crate::utils::*;

/// Value domain of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum ChanKind {
    Analog,
    Digital,
}

pub trait BaseChannel {
    // Field methods
    fn name(&self) -> &str;
    fn device_name(&self) -> &str;
    fn kind(&self) -> ChanKind;
    fn default_value(&self) -> f64;
    fn time_base(&self) -> f64;
    fn instr_list(&self) -> &BTreeSet<InstrBook>;
    // Mutable field references
    fn instr_list_(&mut self) -> &mut BTreeSet<InstrBook>;

    /// Fully qualified output name `device/channel`, used in all error messages.
    fn output_name(&self) -> String {
        format!("{}/{}", self.device_name(), self.name())
    }

    fn is_edited(&self) -> bool {
        !self.instr_list().is_empty()
    }

    fn clear_edit_cache(&mut self) {
        self.instr_list_().clear();
    }

    /// Last grid position occupied by any instruction: the last start, or the last ramp end.
    fn last_instr_end_pos(&self) -> usize {
        self.instr_list()
            .iter()
            .map(|book| book.end_pos())
            .max()
            .unwrap_or(0)
    }

    fn last_instr_end_time(&self) -> f64 {
        pos_to_time(self.last_instr_end_pos(), self.time_base())
    }

    /// Checks a discrete value against the channel's value domain.
    fn check_value(&self, value: f64, t: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(CompileError::Timeline {
                output: self.output_name(),
                time: t,
                reason: format!("value {value} is not finite"),
            });
        }
        if self.kind() == ChanKind::Digital && value != 0. && value != 1. {
            return Err(CompileError::DigitalValue {
                output: self.output_name(),
                time: t,
                value,
            });
        }
        Ok(())
    }

    /// Base method through which to add instructions.
    ///
    /// `ramp` is `None` for a discrete change at `t`, or `Some((duration, samp_rate))` for a ramp
    /// occupying `[t, t + duration)` sampled at `samp_rate` [Hz].
    fn add_instr(&mut self, instr: Instruction, t: f64, ramp: Option<(f64, f64)>) -> Result<()> {
        let book = self.place_instr(instr, t, ramp)?;
        self.instr_list_().insert(book);
        Ok(())
    }

    /// Validates an instruction against the channel's timeline without recording it. Returns the
    /// book [`BaseChannel::add_instr`] would insert.
    fn place_instr(&self, instr: Instruction, t: f64, ramp: Option<(f64, f64)>) -> Result<InstrBook> {
        let output = self.output_name();
        let time_base = self.time_base();
        let start_pos = time_to_pos(t, time_base, &output)?;

        let spec = match ramp {
            None => {
                if instr.is_ramp() {
                    return Err(CompileError::Timeline {
                        output,
                        time: t,
                        reason: format!("ramp instruction {instr} requires a duration"),
                    });
                }
                self.check_value(instr.const_value(), t)?;
                None
            }
            Some((duration, samp_rate)) => {
                if self.kind() == ChanKind::Digital {
                    return Err(CompileError::Timeline {
                        output,
                        time: t,
                        reason: "digital channels cannot ramp".to_string(),
                    });
                }
                if !duration.is_finite() || duration <= 0. {
                    return Err(CompileError::Timeline {
                        output,
                        time: t,
                        reason: format!("ramp duration must be positive, got {duration}"),
                    });
                }
                let duration_pos = time_to_pos(duration, time_base, &output)?;
                if duration_pos == 0 {
                    return Err(CompileError::Timeline {
                        output,
                        time: t,
                        reason: format!("ramp duration {duration} [s] is below the time resolution"),
                    });
                }
                let end_pos = start_pos
                    .checked_add(duration_pos)
                    .filter(|end| *end <= max_pos())
                    .ok_or_else(|| CompileError::Timeline {
                        output: output.clone(),
                        time: t,
                        reason: format!("ramp of {duration} [s] ends beyond the time grid"),
                    })?;
                Some(RampSpec {
                    end_pos,
                    samp_period: rate_to_period_pos(samp_rate, time_base, &output, t)?,
                })
            }
        };
        let new_instrbook = InstrBook::new(start_pos, spec, instr)?;

        // Check for overlaps
        let overlap = |other: &InstrBook| CompileError::Timeline {
            output: output.clone(),
            time: t,
            reason: format!("instruction {} overlaps with instruction {}", new_instrbook, other),
        };
        if let Some(same) = self.instr_list().get(&new_instrbook) {
            return Err(overlap(same));
        }
        if let Some(next) = self.instr_list().range(&new_instrbook..).next() {
            if next.start_pos < new_instrbook.end_pos() {
                return Err(overlap(next));
            }
        }
        if let Some(prev) = self.instr_list().range(..&new_instrbook).next_back() {
            if prev.ramp.is_some() && prev.end_pos() > new_instrbook.start_pos {
                return Err(overlap(prev));
            }
        }
        Ok(new_instrbook)
    }

    fn constant(&mut self, value: f64, t: f64) -> Result<()> {
        self.add_instr(Instruction::new_const(value), t, None)
    }
}

pub struct Channel {
    name: String,
    device_name: String,
    kind: ChanKind,
    default_value: f64,
    time_base: f64,
    instr_list: BTreeSet<InstrBook>,
}

impl BaseChannel for Channel {
    fn name(&self) -> &str {
        &self.name
    }
    fn device_name(&self) -> &str {
        &self.device_name
    }
    fn kind(&self) -> ChanKind {
        self.kind
    }
    fn default_value(&self) -> f64 {
        self.default_value
    }
    fn time_base(&self) -> f64 {
        self.time_base
    }
    fn instr_list(&self) -> &BTreeSet<InstrBook> {
        &self.instr_list
    }
    fn instr_list_(&mut self) -> &mut BTreeSet<InstrBook> {
        &mut self.instr_list
    }
}

impl Channel {
    /// Creates an empty channel. The default value is what the output produces before its first
    /// instruction; it is validated against the channel kind.
    pub fn new(
        device_name: &str,
        name: &str,
        kind: ChanKind,
        default_value: f64,
        time_base: f64,
    ) -> Result<Self> {
        let chan = Self {
            name: name.to_string(),
            device_name: device_name.to_string(),
            kind,
            default_value,
            time_base,
            instr_list: BTreeSet::new(),
        };
        chan.check_value(default_value, 0.)?;
        Ok(chan)
    }
}

#[cfg(test)]
mod test {
    use crate::channel::*;

    fn analog() -> Channel {
        Channel::new("Dev1", "ao0", ChanKind::Analog, 0., 1e9).unwrap()
    }

    #[test]
    fn last_instr_end_pos() {
        let mut chan = analog();
        assert_eq!(chan.last_instr_end_pos(), 0);
        chan.constant(1., 1e-3).unwrap();
        assert_eq!(chan.last_instr_end_pos(), 1_000_000);
        chan.add_instr(Instruction::new_linramp(0., 1.), 2e-3, Some((1e-3, 1e6)))
            .unwrap();
        assert_eq!(chan.last_instr_end_pos(), 3_000_000);
        chan.clear_edit_cache();
        assert_eq!(chan.last_instr_end_pos(), 0);
    }

    #[test]
    fn overlapping_instructions() {
        let mut chan = analog();
        chan.add_instr(Instruction::new_linramp(0., 1.), 1e-3, Some((1e-3, 1e6)))
            .unwrap();
        // Same start time
        assert!(chan.constant(2., 1e-3).is_err());
        // Inside the ramp's domain
        assert!(chan.constant(2., 1.5e-3).is_err());
        // Ramp running into an existing instruction
        assert!(chan
            .add_instr(Instruction::new_linramp(0., 1.), 0.5e-3, Some((1e-3, 1e6)))
            .is_err());
        // Exactly at the ramp end is allowed
        chan.constant(2., 2e-3).unwrap();
        assert_eq!(chan.instr_list().len(), 2);
    }

    #[test]
    fn digital_values() {
        let mut chan = Channel::new("Dev1", "port0/line0", ChanKind::Digital, 0., 1e9).unwrap();
        chan.constant(1., 0.).unwrap();
        let err = chan.constant(0.5, 1.).unwrap_err();
        assert!(matches!(err, CompileError::DigitalValue { .. }));
        assert!(chan
            .add_instr(Instruction::new_linramp(0., 1.), 2., Some((1., 10.)))
            .is_err());
        assert!(Channel::new("Dev1", "port0/line1", ChanKind::Digital, 2., 1e9).is_err());
    }

    #[test]
    fn negative_time() {
        let mut chan = analog();
        let err = chan.constant(1., -1.).unwrap_err();
        assert!(matches!(err, CompileError::Timeline { .. }));
    }

    #[test]
    fn times_beyond_grid() {
        let mut chan = analog();
        assert!(matches!(
            chan.add_instr(Instruction::new_linramp(0., 1.), 2e10, Some((1., 1e3))),
            Err(CompileError::Timeline { .. })
        ));
        // Start on the grid, end past it
        assert!(matches!(
            chan.add_instr(Instruction::new_linramp(0., 1.), 9e6, Some((1e6, 1e3))),
            Err(CompileError::Timeline { .. })
        ));
        assert!(chan.instr_list().is_empty());
    }
}
