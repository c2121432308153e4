//! Encoder for the pseudoclock itself: a programmable pulse generator that emits the clock
//! program as a list of instructions.
//!
//! Each instruction is `(opcode, repetitions, high cycles, low cycles)`, written as one 26-digit
//! hex word `OORRRRRRRRHHHHHHHHLLLLLLLL`:
//! - [`Opcode::Continue`]: output `repetitions` pulses of `high + low` reference clock cycles;
//! - [`Opcode::Wait`]: halt until the trigger arrives, `high` holds the timeout in ms (0 = none);
//! - [`Opcode::Stop`]: end of program.

use ndarray::Array1;

use pscompiler_backend::*;

use crate::encoder::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Stop = 0x00,
    Continue = 0x01,
    Wait = 0x02,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PulseInstr {
    pub opcode: Opcode,
    pub repetitions: u32,
    pub high: u32,
    pub low: u32,
}

impl PulseInstr {
    pub fn word(&self) -> String {
        format!(
            "{:02X}{:08X}{:08X}{:08X}",
            self.opcode as u8, self.repetitions, self.high, self.low
        )
    }
}

pub struct PulseGenerator {
    name: String,
    clock_freq: f64,
    min_half_period: u64,
    max_instructions: usize,
}

impl PulseGenerator {
    /// Pulse generator `name` driven by a reference clock of `clock_freq` [Hz], with default
    /// limits of 5 cycles per half period and 4096 instructions.
    pub fn new(name: &str, clock_freq: f64) -> Result<Self> {
        if !(clock_freq.is_finite() && clock_freq > 0.) {
            return Err(CompileError::Config(format!(
                "Pulse generator {name}: reference clock must be positive, got {clock_freq}"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            clock_freq,
            min_half_period: 5,
            max_instructions: 4096,
        })
    }

    pub fn with_limits(mut self, min_half_period: u64, max_instructions: usize) -> Self {
        self.min_half_period = min_half_period;
        self.max_instructions = max_instructions;
        self
    }

    fn tick_instr(&self, record: &TickRecord, repetitions: u32) -> Result<PulseInstr> {
        let exact = record.period * self.clock_freq;
        let cycles = exact.round();
        if (exact - cycles).abs() > 1e-6 * cycles.max(1.) {
            return Err(self.limit(format!(
                "tick period {} [s] is not a whole number of {} [Hz] reference clock cycles",
                record.period, self.clock_freq
            )));
        }
        let cycles = cycles as u64;
        let high = cycles / 2;
        let low = cycles - high;
        if high < self.min_half_period {
            return Err(self.limit(format!(
                "tick period {} [s] is shorter than the minimum of {} cycles per half period",
                record.period, self.min_half_period
            )));
        }
        let field = |half: u64| {
            u32::try_from(half).map_err(|_| {
                self.limit(format!(
                    "tick period {} [s] overflows the 32-bit half period field",
                    record.period
                ))
            })
        };
        Ok(PulseInstr {
            opcode: Opcode::Continue,
            repetitions,
            high: field(high)?,
            low: field(low)?,
        })
    }

    fn wait_instr(&self, marker: &WaitMarker) -> Result<PulseInstr> {
        let timeout_ms = match marker.timeout {
            None => 0,
            Some(timeout) => {
                let ms = (timeout * 1e3).round();
                if ms < 1. || ms > u32::MAX as f64 {
                    return Err(self.limit(format!(
                        "timeout {} [s] of wait '{}' is outside the 1 ms to {} ms range",
                        timeout,
                        marker.label,
                        u32::MAX
                    )));
                }
                ms as u32
            }
        };
        Ok(PulseInstr {
            opcode: Opcode::Wait,
            repetitions: 1,
            high: timeout_ms,
            low: 0,
        })
    }

    /// Translates the clock program into pulse instructions, enforcing every device limit.
    pub fn instructions(&self, program: &ClockProgram) -> Result<Vec<PulseInstr>> {
        let mut instrs = Vec::new();
        for entry in program.entries() {
            match entry {
                ClockEntry::Tick(record) => {
                    // Repetition counts beyond the 32-bit field are split over several instructions
                    let mut remaining = record.repetitions;
                    while remaining > 0 {
                        let reps = remaining.min(u32::MAX as usize);
                        instrs.push(self.tick_instr(record, reps as u32)?);
                        remaining -= reps;
                    }
                }
                ClockEntry::Wait(marker) => instrs.push(self.wait_instr(marker)?),
            }
            if instrs.len() >= self.max_instructions {
                break;
            }
        }
        instrs.push(PulseInstr {
            opcode: Opcode::Stop,
            repetitions: 0,
            high: 0,
            low: 0,
        });
        if instrs.len() > self.max_instructions {
            return Err(self.limit(format!(
                "program needs more than the maximum of {} instructions",
                self.max_instructions
            )));
        }
        Ok(instrs)
    }
}

impl DeviceEncoder for PulseGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, compiled: &CompiledOutputs) -> Result<()> {
        if compiled.clock_name != self.name {
            return Err(CompileError::UnknownDevice {
                name: self.name.clone(),
                registered: vec![compiled.clock_name.clone()],
            });
        }
        self.instructions(&compiled.program).map(|_| ())
    }

    fn encode(&self, compiled: &CompiledOutputs) -> Result<DeviceArtifact> {
        let instrs = self.instructions(&compiled.program)?;
        let column = |f: fn(&PulseInstr) -> i64| Dataset::Int(instrs.iter().map(f).collect::<Array1<i64>>());

        let mut artifact = DeviceArtifact::new(&self.name);
        artifact.insert("opcode", column(|instr| instr.opcode as i64));
        artifact.insert("repetitions", column(|instr| instr.repetitions as i64));
        artifact.insert("high_cycles", column(|instr| instr.high as i64));
        artifact.insert("low_cycles", column(|instr| instr.low as i64));
        artifact.insert(
            "instructions",
            Dataset::Hex(instrs.iter().map(|instr| instr.word()).collect()),
        );
        tracing::debug!(device = %self.name, instructions = instrs.len(), "encoded pulse program");
        Ok(artifact)
    }
}
