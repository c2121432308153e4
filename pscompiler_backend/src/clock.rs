//! Clock compilation: merges every output timeline into one run-length-encoded tick program for
//! the pseudoclock.
//!
//! ## Tick generation
//! All instruction start times (ramps contribute their start only), the experiment start and every
//! wait time form the set of *boundaries*. Each boundary produces one dual-rate tick, ticking both
//! the fast and the slow clock line. When a ramp is active from a boundary, fast-only ticks follow
//! at the ramp's sample period until the ramp ends or the next boundary arrives, whichever is
//! sooner. A ramp ending before the next boundary gets one more fast-only tick at its end time, so
//! that its final value is output. A tick's period is the distance to the next tick; the tick preceding a wait ends at the
//! wait, the wait marker follows, and the next epoch starts with a tick at the wait time.
//!
//! Consecutive ticks with equal `(period, dual_rate)` are merged into one [`TickRecord`] as they are
//! produced, so long constant-rate stretches never exist as individual ticks in memory.
//!
//! ## Time grid
//! Tick arithmetic happens on the integer position grid of
//! [`CompileConfig::time_base`](crate::config::CompileConfig::time_base). Periods are converted
//! to seconds only when a record is emitted, so equal grid periods always produce bitwise equal
//! `f64` periods and compress together.
//!
//! ## Example
//! ```
//! use pscompiler_backend::*;
//!
//! let mut exp = Experiment::new("pb0", 1e-7).unwrap();
//! exp.add_ao_device("ao_card", ClockLine::Fast).unwrap();
//! exp.add_ao_channel("ao_card", 0, 0.).unwrap();
//! exp.constant("ao_card", "ao0", 0., 1.).unwrap();
//! exp.linramp("ao_card", "ao0", 1e-3, 1e-3, 0., 1., 1e6).unwrap();
//! exp.constant("ao_card", "ao0", 2e-3, 0.).unwrap();
//! let compiled = exp.compile(Some(3e-3)).unwrap();
//!
//! assert_eq!(
//!     compiled.program.records().cloned().collect::<Vec<_>>(),
//!     vec![
//!         TickRecord::new(1e-3, 1, true),
//!         TickRecord::new(1e-6, 1, true),
//!         TickRecord::new(1e-6, 999, false),
//!         TickRecord::new(1e-3, 1, true),
//!     ]
//! );
//! ```

use std::collections::BTreeSet;

use serde::Serialize;

use crate::channel::*;
use crate::config::*;
use crate::device::*;
use crate::error::*;
use crate::instruction::*;
use crate::utils::*;

/// A run of `repetitions` identical ticks of length `period` [s].
///
/// `origin_time` is the time of the first tick of the run (absolute or epoch-relative, see
/// [`WaitTiming`]). It is informational only and does not take part in comparisons.
#[derive(Clone, Debug, Serialize)]
pub struct TickRecord {
    pub period: f64,
    pub repetitions: usize,
    pub dual_rate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_time: Option<f64>,
}

impl TickRecord {
    pub fn new(period: f64, repetitions: usize, dual_rate: bool) -> Self {
        Self {
            period,
            repetitions,
            dual_rate,
            origin_time: None,
        }
    }

    /// Period expressed in grid positions.
    pub fn period_pos(&self, time_base: f64) -> usize {
        (self.period * time_base).round() as usize
    }
}

impl PartialEq for TickRecord {
    fn eq(&self, other: &Self) -> bool {
        self.period == other.period
            && self.repetitions == other.repetitions
            && self.dual_rate == other.dual_rate
    }
}

/// Halt ticking until an external trigger arrives.
#[derive(Clone, Debug, Serialize)]
pub struct WaitMarker {
    pub label: String,
    pub timeout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_time: Option<f64>,
}

impl WaitMarker {
    pub fn new(label: &str, timeout: Option<f64>) -> Self {
        Self {
            label: label.to_string(),
            timeout,
            origin_time: None,
        }
    }
}

impl PartialEq for WaitMarker {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label && self.timeout == other.timeout
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ClockEntry {
    Tick(TickRecord),
    Wait(WaitMarker),
}

/// A single, un-compressed clock event, as produced by [`ClockProgram::events`].
#[derive(Clone, Debug, PartialEq)]
pub enum ClockEvent<'a> {
    Tick { period: f64, dual_rate: bool },
    Wait(&'a WaitMarker),
}

/// One expanded tick: its nominal grid position and whether the slow line ticks too.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tick {
    pub pos: usize,
    pub dual_rate: bool,
}

/// The compiled pseudoclock signal.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClockProgram {
    time_base: f64,
    stop_time: f64,
    entries: Vec<ClockEntry>,
}

impl ClockProgram {
    pub fn time_base(&self) -> f64 {
        self.time_base
    }

    pub fn stop_time(&self) -> f64 {
        self.stop_time
    }

    pub fn entries(&self) -> &[ClockEntry] {
        &self.entries
    }

    pub fn records(&self) -> impl Iterator<Item = &TickRecord> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            ClockEntry::Tick(record) => Some(record),
            ClockEntry::Wait(_) => None,
        })
    }

    pub fn num_waits(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry, ClockEntry::Wait(_)))
            .count()
    }

    /// Number of ticks seen by a device on `line`: every tick on the fast line, dual-rate ticks
    /// only on the slow line.
    pub fn tick_count(&self, line: ClockLine) -> usize {
        self.records()
            .filter(|record| line == ClockLine::Fast || record.dual_rate)
            .map(|record| record.repetitions)
            .sum()
    }

    /// Lazily expands the program into individual ticks on the nominal timeline.
    ///
    /// Waits take no nominal time: the tick preceding a wait ends exactly at the wait's scheduled
    /// time, which is where the next epoch starts.
    pub fn ticks(&self) -> impl Iterator<Item = Tick> + '_ {
        let time_base = self.time_base;
        self.records()
            .scan(0usize, move |pos, record| {
                let period = record.period_pos(time_base);
                let start = *pos;
                *pos += period * record.repetitions;
                Some((start, period, record.repetitions, record.dual_rate))
            })
            .flat_map(|(start, period, repetitions, dual_rate)| {
                (0..repetitions).map(move |k| Tick {
                    pos: start + k * period,
                    dual_rate,
                })
            })
    }

    /// Ticks relevant to a device on `line`, see [`ClockProgram::tick_count`].
    pub fn line_ticks(&self, line: ClockLine) -> impl Iterator<Item = Tick> + '_ {
        self.ticks()
            .filter(move |tick| line == ClockLine::Fast || tick.dual_rate)
    }

    /// Lazily expands the program into one event per tick or wait.
    pub fn events(&self) -> impl Iterator<Item = ClockEvent<'_>> + '_ {
        self.entries.iter().flat_map(|entry| {
            let (event, count) = match entry {
                ClockEntry::Tick(record) => (
                    ClockEvent::Tick {
                        period: record.period,
                        dual_rate: record.dual_rate,
                    },
                    record.repetitions,
                ),
                ClockEntry::Wait(marker) => (ClockEvent::Wait(marker), 1),
            };
            std::iter::repeat(event).take(count)
        })
    }

    /// Run-length encodes a stream of individual clock events.
    pub fn compress<'a>(
        time_base: f64,
        stop_time: f64,
        events: impl IntoIterator<Item = ClockEvent<'a>>,
    ) -> ClockProgram {
        let mut entries: Vec<ClockEntry> = Vec::new();
        for event in events {
            match event {
                ClockEvent::Tick { period, dual_rate } => {
                    push_record(&mut entries, TickRecord::new(period, 1, dual_rate))
                }
                ClockEvent::Wait(marker) => entries.push(ClockEntry::Wait(marker.clone())),
            }
        }
        ClockProgram {
            time_base,
            stop_time,
            entries,
        }
    }
}

// Appends a record, merging it into the previous one when `(period, dual_rate)` match
fn push_record(entries: &mut Vec<ClockEntry>, record: TickRecord) {
    if let Some(ClockEntry::Tick(last)) = entries.last_mut() {
        if last.period == record.period && last.dual_rate == record.dual_rate {
            last.repetitions += record.repetitions;
            return;
        }
    }
    entries.push(ClockEntry::Tick(record));
}

/// Accumulates grid-position ticks into a compressed [`ClockProgram`].
struct ProgramBuilder {
    time_base: f64,
    wait_timing: WaitTiming,
    epoch_start: usize,
    entries: Vec<ClockEntry>,
}

impl ProgramBuilder {
    fn new(cfg: &CompileConfig) -> Self {
        Self {
            time_base: cfg.time_base,
            wait_timing: cfg.wait_timing,
            epoch_start: 0,
            entries: Vec::new(),
        }
    }

    fn origin(&self, pos: usize) -> f64 {
        match self.wait_timing {
            WaitTiming::Ideal => pos_to_time(pos, self.time_base),
            WaitTiming::Triggered => pos_to_time(pos - self.epoch_start, self.time_base),
        }
    }

    fn push_ticks(&mut self, period: usize, repetitions: usize, dual_rate: bool, origin: usize) {
        let record = TickRecord {
            period: pos_to_time(period, self.time_base),
            repetitions,
            dual_rate,
            origin_time: Some(self.origin(origin)),
        };
        push_record(&mut self.entries, record);
    }

    fn push_wait(&mut self, wait: &Wait, pos: usize) {
        let origin_time = Some(self.origin(pos));
        self.entries.push(ClockEntry::Wait(WaitMarker {
            label: wait.label.clone(),
            timeout: wait.timeout,
            origin_time,
        }));
        self.epoch_start = pos;
    }

    fn finish(self, stop_pos: usize) -> ClockProgram {
        ClockProgram {
            time_base: self.time_base,
            stop_time: pos_to_time(stop_pos, self.time_base),
            entries: self.entries,
        }
    }
}

/// Read-only view of one output's timeline, as consumed by the clock compiler and the expander.
pub struct OutputTimeline<'a> {
    pub name: String,
    pub kind: ChanKind,
    pub default_value: f64,
    pub clock_line: ClockLine,
    pub instrs: &'a BTreeSet<InstrBook>,
}

impl<'a> OutputTimeline<'a> {
    pub fn new(chan: &'a Channel, clock_line: ClockLine) -> Self {
        Self {
            name: chan.output_name(),
            kind: chan.kind(),
            default_value: chan.default_value(),
            clock_line,
            instrs: chan.instr_list(),
        }
    }
}

struct RampWindow<'a> {
    output: &'a str,
    start: usize,
    end: usize,
    period: usize,
}

/// Compiles all output timelines clocked by `clock` into a [`ClockProgram`] ending at `stop_pos`.
///
/// # Errors
/// - [`CompileError::Timeline`]: an instruction or wait at or after the stop time, a ramp ending after
///   the stop time, a ramp on a slow-line output, or a ramp whose duration is not a whole number of
///   sample periods.
/// - [`CompileError::TimelineConflict`]: two outputs ramping simultaneously at different sample
///   rates, or a ramp spanning a wait.
/// - [`CompileError::DeviceLimit`]: the program would exceed `cfg.max_ticks` ticks. This is checked
///   while the program is built, before any tick is expanded.
pub fn compile_clock(
    clock: &Pseudoclock,
    outputs: &[OutputTimeline<'_>],
    stop_pos: usize,
    cfg: &CompileConfig,
) -> Result<ClockProgram> {
    let time_base = cfg.time_base;
    let secs = |pos: usize| pos_to_time(pos, time_base);
    if stop_pos == 0 {
        return Err(CompileError::Timeline {
            output: clock.name().to_string(),
            time: 0.,
            reason: "experiment stop time must be positive".to_string(),
        });
    }

    // Collect boundaries and ramp windows, validating each timeline against the stop time
    let mut boundaries: BTreeSet<usize> = BTreeSet::new();
    boundaries.insert(0);
    let mut ramps: Vec<RampWindow> = Vec::new();
    for out in outputs {
        for book in out.instrs.iter() {
            let timeline_err = |reason: String| CompileError::Timeline {
                output: out.name.clone(),
                time: secs(book.start_pos),
                reason,
            };
            if book.start_pos >= stop_pos {
                return Err(timeline_err(format!(
                    "instruction {} is scheduled at or past the experiment stop time {} [s]",
                    book.instr,
                    secs(stop_pos)
                )));
            }
            if let Some(spec) = book.ramp {
                if out.clock_line == ClockLine::Slow {
                    return Err(timeline_err(
                        "ramps require the fast clock line but the output is on the slow line".to_string(),
                    ));
                }
                if spec.end_pos > stop_pos {
                    return Err(timeline_err(format!(
                        "ramp ends at {} [s], past the experiment stop time {} [s]",
                        secs(spec.end_pos),
                        secs(stop_pos)
                    )));
                }
                let duration = spec.end_pos - book.start_pos;
                if duration % spec.samp_period != 0 {
                    return Err(timeline_err(format!(
                        "ramp duration {} [s] is not an integer number of sample periods {} [s] ({} ticks)",
                        secs(duration),
                        secs(spec.samp_period),
                        duration as f64 / spec.samp_period as f64
                    )));
                }
                ramps.push(RampWindow {
                    output: &out.name,
                    start: book.start_pos,
                    end: spec.end_pos,
                    period: spec.samp_period,
                });
            }
            boundaries.insert(book.start_pos);
        }
    }
    for (&pos, wait) in clock.waits().iter() {
        let wait_name = format!("{} wait '{}'", clock.name(), wait.label);
        if pos >= stop_pos {
            return Err(CompileError::Timeline {
                output: wait_name,
                time: secs(pos),
                reason: format!("wait is scheduled at or past the experiment stop time {} [s]", secs(stop_pos)),
            });
        }
        if let Some(ramp) = ramps.iter().find(|r| r.start < pos && pos < r.end) {
            return Err(CompileError::TimelineConflict {
                first: ramp.output.to_string(),
                second: wait_name,
                time: secs(pos),
                reason: "a ramp cannot span a wait".to_string(),
            });
        }
        boundaries.insert(pos);
    }
    ramps.sort_by_key(|r| r.start);

    // Walk the segments between consecutive boundaries
    let boundaries: Vec<usize> = boundaries.into_iter().collect();
    let mut builder = ProgramBuilder::new(cfg);
    let mut active: Vec<&RampWindow> = Vec::new();
    let mut next_ramp = 0;
    let mut total_ticks: usize = 0;
    for (i, &b) in boundaries.iter().enumerate() {
        let b_next = boundaries.get(i + 1).copied().unwrap_or(stop_pos);
        if let Some(wait) = clock.waits().get(&b) {
            builder.push_wait(wait, b);
        }

        active.retain(|r| r.end > b);
        while next_ramp < ramps.len() && ramps[next_ramp].start <= b {
            active.push(&ramps[next_ramp]);
            next_ramp += 1;
        }
        let period = match active.split_first() {
            None => None,
            Some((first, rest)) => {
                if let Some(other) = rest.iter().find(|r| r.period != first.period) {
                    return Err(CompileError::TimelineConflict {
                        first: first.output.to_string(),
                        second: other.output.to_string(),
                        time: secs(b),
                        reason: format!(
                            "simultaneous ramps request different sample periods {} [s] and {} [s]",
                            secs(first.period),
                            secs(other.period)
                        ),
                    });
                }
                Some(first.period)
            }
        };
        // Fast-only ticks stop at the last active ramp end or the next boundary. A ramp ending
        // before the next boundary gets a closing tick at its end, carrying its final value.
        let limit = active
            .iter()
            .map(|r| r.end)
            .max()
            .map_or(b_next, |end| end.min(b_next));
        let n_interior = period.map_or(0, |p| (limit - b - 1) / p);
        let closing = limit < b_next;

        total_ticks += n_interior + 1 + usize::from(closing);
        if total_ticks > cfg.max_ticks {
            return Err(CompileError::DeviceLimit {
                device: clock.name().to_string(),
                reason: format!(
                    "clock program exceeds the maximum of {} ticks at t = {} [s]",
                    cfg.max_ticks,
                    secs(b)
                ),
            });
        }

        match period {
            Some(p) if n_interior > 0 => {
                builder.push_ticks(p, 1, true, b);
                if n_interior > 1 {
                    builder.push_ticks(p, n_interior - 1, false, b + p);
                }
                let last = b + n_interior * p;
                builder.push_ticks(limit - last, 1, false, last);
            }
            _ => builder.push_ticks(limit - b, 1, true, b),
        }
        if closing {
            builder.push_ticks(b_next - limit, 1, false, limit);
        }
    }

    let program = builder.finish(stop_pos);
    tracing::debug!(
        clock = clock.name(),
        boundaries = boundaries.len(),
        records = program.entries().len(),
        ticks = total_ticks,
        "compiled clock program"
    );
    Ok(program)
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use crate::channel::*;
    use crate::clock::*;

    const TB: f64 = 1e9;

    fn chan(name: &str) -> Channel {
        Channel::new("dev", name, ChanKind::Analog, 0., TB).unwrap()
    }

    fn view(chan: &Channel, line: ClockLine) -> OutputTimeline<'_> {
        OutputTimeline::new(chan, line)
    }

    fn clock() -> Pseudoclock {
        Pseudoclock::new("pb0", 1e-7, TB).unwrap()
    }

    #[test]
    fn reference_signal() {
        let mut clock = clock();
        clock.add_wait("trigger", 1e-3, None).unwrap();
        let mut ao0 = chan("ao0");
        ao0.constant(0.5, 0.).unwrap();
        ao0.add_instr(Instruction::new_linramp(0., 1.), 1e-3, Some((1e-3, 1e6)))
            .unwrap();
        ao0.constant(0., 2e-3).unwrap();

        let program = compile_clock(
            &clock,
            &[view(&ao0, ClockLine::Fast)],
            3_000_000,
            &CompileConfig::default(),
        )
        .unwrap();
        assert_eq!(
            program.entries(),
            &[
                ClockEntry::Tick(TickRecord::new(1e-3, 1, true)),
                ClockEntry::Wait(WaitMarker::new("trigger", None)),
                ClockEntry::Tick(TickRecord::new(1e-6, 1, true)),
                ClockEntry::Tick(TickRecord::new(1e-6, 999, false)),
                ClockEntry::Tick(TickRecord::new(1e-3, 1, true)),
            ]
        );
        assert_eq!(program.tick_count(ClockLine::Fast), 1002);
        assert_eq!(program.tick_count(ClockLine::Slow), 3);
    }

    #[test]
    fn run_length_round_trip() {
        let mut clock = clock();
        clock.add_wait("w", 5e-3, Some(1.)).unwrap();
        let mut ao0 = chan("ao0");
        let mut ao1 = chan("ao1");
        ao0.add_instr(Instruction::new_linramp(0., 1.), 1e-3, Some((2e-3, 1e5)))
            .unwrap();
        ao1.constant(1., 1.5e-3).unwrap();
        ao1.constant(2., 6e-3).unwrap();
        let program = compile_clock(
            &clock,
            &[view(&ao0, ClockLine::Fast), view(&ao1, ClockLine::Fast)],
            7_000_000,
            &CompileConfig::default(),
        )
        .unwrap();
        let recompressed = ClockProgram::compress(TB, program.stop_time(), program.events());
        assert_eq!(recompressed, program);
    }

    #[test]
    fn boundary_coverage() {
        let mut a = chan("a");
        let mut b = chan("b");
        a.constant(1., 0.1e-3).unwrap();
        a.add_instr(Instruction::new_sine(1e3, None, None, None), 0.3e-3, Some((0.4e-3, 1e5)))
            .unwrap();
        b.constant(1., 0.45e-3).unwrap();
        b.constant(2., 0.77e-3).unwrap();
        let program = compile_clock(
            &clock(),
            &[view(&a, ClockLine::Fast), view(&b, ClockLine::Fast)],
            1_000_000,
            &CompileConfig::default(),
        )
        .unwrap();

        let tick_pos: BTreeSet<usize> = program.ticks().map(|t| t.pos).collect();
        let dual_pos: BTreeSet<usize> = program
            .ticks()
            .filter(|t| t.dual_rate)
            .map(|t| t.pos)
            .collect();
        for chan in [&a, &b] {
            for book in chan.instr_list() {
                assert!(dual_pos.contains(&book.start_pos), "{} missing", book);
            }
        }
        // Ramp interior samples continue after b's change at 0.45 ms on a fresh 10 us grid, up to
        // the closing tick at the ramp end
        assert!(tick_pos.contains(&460_000));
        assert!(tick_pos.contains(&700_000));
        assert!(!dual_pos.contains(&700_000));
        assert!(!tick_pos.contains(&710_000));
        // Periods sum to the stop time
        let total: usize = program
            .records()
            .map(|r| r.period_pos(TB) * r.repetitions)
            .sum();
        assert_eq!(total, 1_000_000);
    }

    #[test]
    fn discrete_and_ramp_start_share_tick() {
        let mut a = chan("a");
        let mut b = chan("b");
        a.add_instr(Instruction::new_linramp(0., 1.), 1e-3, Some((1e-3, 1e6)))
            .unwrap();
        b.constant(3., 1e-3).unwrap();
        let program = compile_clock(
            &clock(),
            &[view(&a, ClockLine::Fast), view(&b, ClockLine::Fast)],
            2_000_000,
            &CompileConfig::default(),
        )
        .unwrap();
        let dual_at_1ms = program
            .ticks()
            .filter(|t| t.pos == 1_000_000)
            .collect::<Vec<_>>();
        assert_eq!(dual_at_1ms, vec![Tick { pos: 1_000_000, dual_rate: true }]);
    }

    #[test]
    fn closing_tick_at_ramp_end() {
        let mut a = chan("a");
        a.add_instr(Instruction::new_linramp(0., 1.), 0., Some((1e-3, 1e4)))
            .unwrap();
        let program = compile_clock(&clock(), &[view(&a, ClockLine::Fast)], 5_000_000, &CompileConfig::default())
            .unwrap();
        assert_eq!(
            program.records().cloned().collect::<Vec<_>>(),
            vec![
                TickRecord::new(1e-4, 1, true),
                TickRecord::new(1e-4, 9, false),
                TickRecord::new(4e-3, 1, false),
            ]
        );
        assert_eq!(program.ticks().last(), Some(Tick { pos: 1_000_000, dual_rate: false }));
    }

    #[test]
    fn conflicting_ramp_rates() {
        let mut a = chan("a");
        let mut b = chan("b");
        a.add_instr(Instruction::new_linramp(0., 1.), 0., Some((1e-3, 1e6)))
            .unwrap();
        b.add_instr(Instruction::new_linramp(0., 1.), 0.5e-3, Some((1e-3, 2e6)))
            .unwrap();
        let err = compile_clock(
            &clock(),
            &[view(&a, ClockLine::Fast), view(&b, ClockLine::Fast)],
            2_000_000,
            &CompileConfig::default(),
        )
        .unwrap_err();
        match err {
            CompileError::TimelineConflict { first, second, time, .. } => {
                assert_eq!(first, "dev/a");
                assert_eq!(second, "dev/b");
                assert_eq!(time, 0.5e-3);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn non_integer_ramp_ticks() {
        let mut a = chan("a");
        // 1.5 us duration at 1 MHz
        a.add_instr(Instruction::new_linramp(0., 1.), 0., Some((1.5e-6, 1e6)))
            .unwrap();
        let err = compile_clock(&clock(), &[view(&a, ClockLine::Fast)], 10_000, &CompileConfig::default())
            .unwrap_err();
        assert!(matches!(err, CompileError::Timeline { .. }));
    }

    #[test]
    fn ramp_spanning_wait() {
        let mut clock = clock();
        clock.add_wait("w", 0.5e-3, None).unwrap();
        let mut a = chan("a");
        a.add_instr(Instruction::new_linramp(0., 1.), 0., Some((1e-3, 1e6)))
            .unwrap();
        let err = compile_clock(&clock, &[view(&a, ClockLine::Fast)], 2_000_000, &CompileConfig::default())
            .unwrap_err();
        assert!(matches!(err, CompileError::TimelineConflict { .. }));
    }

    #[test]
    fn slow_line_cannot_ramp() {
        let mut a = chan("a");
        a.add_instr(Instruction::new_linramp(0., 1.), 0., Some((1e-3, 1e6)))
            .unwrap();
        let err = compile_clock(&clock(), &[view(&a, ClockLine::Slow)], 2_000_000, &CompileConfig::default())
            .unwrap_err();
        assert!(matches!(err, CompileError::Timeline { .. }));
    }

    #[test]
    fn instruction_past_stop_time() {
        let mut a = chan("a");
        a.constant(1., 2e-3).unwrap();
        let err = compile_clock(&clock(), &[view(&a, ClockLine::Fast)], 2_000_000, &CompileConfig::default())
            .unwrap_err();
        assert!(matches!(err, CompileError::Timeline { .. }));
    }

    #[test]
    fn tick_limit_enforced_before_expansion() {
        let mut a = chan("a");
        // 1e9 ticks requested; must fail without materializing anything
        a.add_instr(Instruction::new_linramp(0., 1.), 0., Some((1.0, 1e9)))
            .unwrap();
        let cfg = CompileConfig {
            max_ticks: 1_000_000,
            ..CompileConfig::default()
        };
        let err = compile_clock(&clock(), &[view(&a, ClockLine::Fast)], 1_000_000_000, &cfg).unwrap_err();
        assert!(matches!(err, CompileError::DeviceLimit { .. }));
    }

    #[test]
    fn triggered_origin_times_are_epoch_relative() {
        let mut clock = clock();
        clock.add_wait("w", 1e-3, None).unwrap();
        let mut a = chan("a");
        a.constant(1., 1.5e-3).unwrap();
        let cfg = CompileConfig {
            wait_timing: WaitTiming::Triggered,
            ..CompileConfig::default()
        };
        let program = compile_clock(&clock, &[view(&a, ClockLine::Fast)], 2_000_000, &cfg).unwrap();
        let origins: Vec<f64> = program.records().filter_map(|r| r.origin_time).collect();
        // The resume tick at 1 ms and the change at 1.5 ms share one record
        assert_eq!(origins, vec![0., 0.]);

        let ideal = compile_clock(&clock, &[view(&a, ClockLine::Fast)], 2_000_000, &CompileConfig::default())
            .unwrap();
        let origins: Vec<f64> = ideal.records().filter_map(|r| r.origin_time).collect();
        assert_eq!(origins, vec![0., 1e-3]);
        // Tick periods do not depend on the wait timing
        assert_eq!(ideal, program);
    }
}
