//! Output expansion: samples one output's instruction timeline on every tick it observes.
//!
//! A fast-line output observes every tick of the [`ClockProgram`], a slow-line output only the
//! dual-rate ticks. At each observed tick the latest instruction starting at or before the tick
//! determines the value:
//! - before the first instruction the channel's default value is produced;
//! - a constant holds its value until the next instruction;
//! - a ramp is evaluated at `x = (t - start) / duration`, clamped to `x <= 1`. The clock program
//!   always carries a tick at or after a ramp's end, so `f(1)` is output and held until the next
//!   instruction.
//!
//! Ticks are generated lazily from the run-length-encoded program; only the output array itself
//! is allocated.

use ndarray::Array1;

use crate::channel::*;
use crate::clock::*;
use crate::error::*;
use crate::instruction::*;
use crate::utils::*;

/// Expands `output` against `program` into one sample per observed tick.
///
/// # Errors
/// - [`CompileError::RampEvaluation`] if a ramp produces a non-finite value.
/// - [`CompileError::DigitalValue`] if a digital output produces anything other than `0` or `1`.
pub fn expand_output(program: &ClockProgram, output: &OutputTimeline<'_>) -> Result<Array1<f64>> {
    let time_base = program.time_base();
    let instrs: Vec<&InstrBook> = output.instrs.iter().collect();
    let mut samples = Array1::<f64>::zeros(program.tick_count(output.clock_line));

    // Index of the first instruction starting after the current tick
    let mut next = 0;
    for (slot, tick) in samples
        .iter_mut()
        .zip(program.line_ticks(output.clock_line))
    {
        while next < instrs.len() && instrs[next].start_pos <= tick.pos {
            next += 1;
        }
        let value = match next.checked_sub(1).map(|i| instrs[i]) {
            None => output.default_value,
            Some(book) => match book.ramp {
                None => book.instr.const_value(),
                Some(spec) => {
                    let duration = spec.end_pos - book.start_pos;
                    let x = (tick.pos - book.start_pos) as f64 / duration as f64;
                    book.instr.eval_point(x, pos_to_time(duration, time_base))
                }
            },
        };

        if !value.is_finite() {
            return Err(CompileError::RampEvaluation {
                output: output.name.clone(),
                time: pos_to_time(tick.pos, time_base),
                value,
            });
        }
        if output.kind == ChanKind::Digital && value != 0. && value != 1. {
            return Err(CompileError::DigitalValue {
                output: output.name.clone(),
                time: pos_to_time(tick.pos, time_base),
                value,
            });
        }
        *slot = value;
    }
    Ok(samples)
}

#[cfg(test)]
mod test {
    use ndarray::array;

    use crate::config::*;
    use crate::device::*;
    use crate::expand::*;

    const TB: f64 = 1e9;

    fn chan(name: &str, default_value: f64) -> Channel {
        Channel::new("dev", name, ChanKind::Analog, default_value, TB).unwrap()
    }

    fn compile(clock: &Pseudoclock, outputs: &[OutputTimeline<'_>], stop_pos: usize) -> ClockProgram {
        compile_clock(clock, outputs, stop_pos, &CompileConfig::default()).unwrap()
    }

    fn clock() -> Pseudoclock {
        Pseudoclock::new("pb0", 1e-7, TB).unwrap()
    }

    #[test]
    fn hold_and_default() {
        let mut a = chan("a", -1.);
        let mut b = chan("b", 0.);
        a.constant(2., 1e-3).unwrap();
        b.constant(5., 0.).unwrap();
        b.constant(6., 2e-3).unwrap();
        b.constant(7., 3e-3).unwrap();
        let outputs = [
            OutputTimeline::new(&a, ClockLine::Fast),
            OutputTimeline::new(&b, ClockLine::Fast),
        ];
        let program = compile(&clock(), &outputs, 4_000_000);

        // Ticks at 0, 1, 2, 3 ms
        assert_eq!(expand_output(&program, &outputs[0]).unwrap(), array![-1., 2., 2., 2.]);
        assert_eq!(expand_output(&program, &outputs[1]).unwrap(), array![5., 5., 6., 7.]);
    }

    #[test]
    fn ramp_samples_and_final_hold() {
        let mut a = chan("a", 0.);
        let mut b = chan("b", 0.);
        // 10 samples over 1 ms, then held at 1.0
        a.add_instr(Instruction::new_linramp(0., 1.), 0., Some((1e-3, 1e4)))
            .unwrap();
        b.constant(1., 1.5e-3).unwrap();
        let outputs = [
            OutputTimeline::new(&a, ClockLine::Fast),
            OutputTimeline::new(&b, ClockLine::Fast),
        ];
        let program = compile(&clock(), &outputs, 2_000_000);

        // Closing tick at 1 ms, then b's change at 1.5 ms
        let samples = expand_output(&program, &outputs[0]).unwrap();
        assert_eq!(samples.len(), 12);
        for (i, value) in samples.iter().take(10).enumerate() {
            assert!((value - i as f64 / 10.).abs() < 1e-12);
        }
        assert_eq!(samples[10], 1.);
        assert_eq!(samples[11], 1.);
        assert!(samples
            .as_slice()
            .unwrap()
            .windows(2)
            .all(|w| w[0] <= w[1]));
    }

    #[test]
    fn lone_ramp_reaches_end_value() {
        let mut a = chan("a", 0.);
        a.add_instr(Instruction::new_linramp(0., 1.), 0., Some((1e-3, 1e4)))
            .unwrap();
        let outputs = [OutputTimeline::new(&a, ClockLine::Fast)];
        let program = compile(&clock(), &outputs, 5_000_000);
        let samples = expand_output(&program, &outputs[0]).unwrap();
        assert_eq!(samples.len(), 11);
        assert_eq!(samples[10], 1.);
    }

    #[test]
    fn slow_line_sees_dual_ticks_only() {
        let mut fast = chan("fast", 0.);
        let mut slow = chan("slow", 3.);
        fast.add_instr(Instruction::new_linramp(0., 1.), 0., Some((1e-3, 1e6)))
            .unwrap();
        slow.constant(4., 1e-3).unwrap();
        let outputs = [
            OutputTimeline::new(&fast, ClockLine::Fast),
            OutputTimeline::new(&slow, ClockLine::Slow),
        ];
        let program = compile(&clock(), &outputs, 2_000_000);

        assert_eq!(expand_output(&program, &outputs[0]).unwrap().len(), 1001);
        assert_eq!(expand_output(&program, &outputs[1]).unwrap(), array![3., 4.]);
    }

    #[test]
    fn non_finite_ramp() {
        let mut a = chan("a", 0.);
        a.add_instr(Instruction::new_expramp(-1., 1., None), 0., Some((1e-3, 1e4)))
            .unwrap();
        let outputs = [OutputTimeline::new(&a, ClockLine::Fast)];
        let program = compile(&clock(), &outputs, 1_000_000);
        match expand_output(&program, &outputs[0]).unwrap_err() {
            CompileError::RampEvaluation { output, time, .. } => {
                assert_eq!(output, "dev/a");
                assert_eq!(time, 1e-4);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn digital_output() {
        let mut line = Channel::new("dev", "port0/line0", ChanKind::Digital, 0., TB).unwrap();
        line.constant(1., 1e-3).unwrap();
        line.constant(0., 2e-3).unwrap();
        let outputs = [OutputTimeline::new(&line, ClockLine::Slow)];
        let program = compile(&clock(), &outputs, 3_000_000);
        assert_eq!(expand_output(&program, &outputs[0]).unwrap(), array![0., 1., 0.]);
    }

    #[test]
    fn waits_take_no_nominal_time() {
        let mut clock = clock();
        clock.add_wait("w", 1e-3, None).unwrap();
        let mut a = chan("a", 0.);
        a.constant(1., 0.).unwrap();
        a.constant(2., 1e-3).unwrap();
        let outputs = [OutputTimeline::new(&a, ClockLine::Fast)];
        let program = compile(&clock, &outputs, 2_000_000);
        assert_eq!(expand_output(&program, &outputs[0]).unwrap(), array![1., 2.]);
    }
}
