//! Provides definitions and implementations for instruction-related functionalities.
//!
//! ## Main Structures and Enumerations:
//!
//! - `InstrType`: An enumeration of supported instruction shapes: `CONST` for discrete value changes,
//!   and the ramp shapes `LINRAMP`, `EXPRAMP` and `SINE`.
//!
//! - `Instruction`: A general instruction composed of a type (`InstrType`) and a set of arguments (`InstrArgs`).
//!   It offers constructors for each shape and evaluates ramps at a normalized position within their domain.
//!
//! - `InstrBook`: An instruction placed on a channel's timeline: its quantized start position and, for ramps,
//!   its end position and sampling period.
//!
//! ## Ramp evaluation
//!
//! Ramps are evaluated independently at every tick from the fraction `x = (t - start) / duration`, so
//! floating-point error never accumulates across ticks. Past the end of its domain a ramp holds
//! its final value `f(1)`; the clock program ticks at every ramp end, so that value is output.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;

use maplit::hashmap;

use crate::error::*;

/// Type alias for instruction arguments: a dictionary with key-value pairs of
/// string (argument name) and float (value)
pub type InstrArgs = HashMap<String, f64>;

/// Enum type for different instructions. Supported instructions: `CONST`, `LINRAMP`, `EXPRAMP`, `SINE`
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InstrType {
    CONST,
    LINRAMP,
    EXPRAMP,
    SINE,
}
impl InstrType {
    /// Keys an argument dictionary must contain for this instruction type.
    fn required_keys(&self) -> &'static [&'static str] {
        match self {
            InstrType::CONST => &["value"],
            InstrType::LINRAMP => &["start", "end"],
            InstrType::EXPRAMP => &["start", "end"],
            InstrType::SINE => &["freq"],
        }
    }
}
impl fmt::Display for InstrType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                InstrType::CONST => "CONST",
                InstrType::LINRAMP => "LINRAMP",
                InstrType::EXPRAMP => "EXPRAMP",
                InstrType::SINE => "SINE",
            }
        )
    }
}

/// Struct for a general instruction, consisting of type and arguments.
///
/// ## Implemented instruction types and their expected fields:
/// 1. `InstrType::CONST`:
///    - `value`
/// 2. `InstrType::LINRAMP`: `start + (end - start) * x`
///    - `start`, `end`
/// 3. `InstrType::EXPRAMP`: `offset + (start - offset) * ((end - offset) / (start - offset))^x`
///    - `start`, `end`
///    - `offset`: Default is `0.0`
/// 4. `InstrType::SINE`: `amplitude * sin(2π * freq * x * duration + phase) + offset`
///    - `freq`
///    - `amplitude`: Default is `1.0`
///    - `offset`: Default is `0.0`
///    - `phase`: Default is `0.0`
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    instr_type: InstrType,
    args: InstrArgs,
}
impl Instruction {
    /// Constructs an `Instruction` object, checking that `args` contains every key required by
    /// `instr_type`.
    ///
    /// ```
    /// use pscompiler_backend::instruction::*;
    ///
    /// let mut args = InstrArgs::new();
    /// args.insert("start".to_string(), 0.0);
    /// assert!(Instruction::new(InstrType::LINRAMP, args.clone()).is_err());
    /// args.insert("end".to_string(), 1.0);
    /// assert!(Instruction::new(InstrType::LINRAMP, args).is_ok());
    /// ```
    pub fn new(instr_type: InstrType, args: InstrArgs) -> Result<Self> {
        if let Some(key) = instr_type
            .required_keys()
            .iter()
            .find(|key| !args.contains_key(**key))
        {
            return Err(CompileError::Config(format!(
                "Expected instr type {} to contain key {}",
                instr_type, key
            )));
        }
        if let Some((key, value)) = args.iter().find(|(_, v)| !v.is_finite()) {
            return Err(CompileError::Config(format!(
                "Instr type {} received non-finite argument {} = {}",
                instr_type, key, value
            )));
        }
        Ok(Instruction { instr_type, args })
    }

    pub fn instr_type(&self) -> InstrType {
        self.instr_type
    }

    pub fn args(&self) -> &InstrArgs {
        &self.args
    }

    pub fn is_ramp(&self) -> bool {
        self.instr_type != InstrType::CONST
    }

    // Required keys are guaranteed by `new`; optional keys fall back to their default
    fn arg(&self, key: &str, default: f64) -> f64 {
        self.args.get(key).copied().unwrap_or(default)
    }

    /// Value of a `CONST` instruction (for ramps, the value at the start of the domain).
    pub fn const_value(&self) -> f64 {
        match self.instr_type {
            InstrType::CONST => self.arg("value", 0.),
            _ => self.eval_point(0., 0.),
        }
    }

    /// Evaluates the instruction at the normalized domain position `x`.
    ///
    /// `x` is clamped to `[0, 1]`, so evaluation past the ramp's end holds its final value.
    /// `duration` (seconds) is only consulted by shapes defined in absolute time (`SINE`).
    ///
    /// ```
    /// # use pscompiler_backend::instruction::*;
    /// let ramp = Instruction::new_linramp(0.0, 10.0);
    /// assert_eq!(ramp.eval_point(0.5, 1e-3), 5.0);
    /// assert_eq!(ramp.eval_point(2.0, 1e-3), 10.0);
    /// ```
    pub fn eval_point(&self, x: f64, duration: f64) -> f64 {
        let x = x.clamp(0., 1.);
        match self.instr_type {
            InstrType::CONST => self.arg("value", 0.),
            InstrType::LINRAMP => {
                let start = self.arg("start", 0.);
                let end = self.arg("end", 0.);
                start + (end - start) * x
            }
            InstrType::EXPRAMP => {
                let start = self.arg("start", 0.);
                let end = self.arg("end", 0.);
                let offset = self.arg("offset", 0.);
                offset + (start - offset) * ((end - offset) / (start - offset)).powf(x)
            }
            InstrType::SINE => {
                let freq = self.arg("freq", 0.);
                // Default values can be set by default with unwrap_or
                let amplitude = self.arg("amplitude", 1.);
                let offset = self.arg("offset", 0.);
                let phase = self.arg("phase", 0.);
                (2.0 * PI * freq * x * duration + phase).sin() * amplitude + offset
            }
        }
    }

    /// Wrapper for conveniently creating new constant instructions.
    /// ```
    /// # use pscompiler_backend::instruction::*;
    /// let const_instr = Instruction::new_const(1.0);
    /// assert_eq!(const_instr.const_value(), 1.0);
    /// ```
    pub fn new_const(value: f64) -> Instruction {
        Instruction {
            instr_type: InstrType::CONST,
            args: hashmap! {String::from("value") => value},
        }
    }

    pub fn new_linramp(start: f64, end: f64) -> Instruction {
        Instruction {
            instr_type: InstrType::LINRAMP,
            args: hashmap! {
                String::from("start") => start,
                String::from("end") => end,
            },
        }
    }

    /// Exponential ramp from `start` to `end` approaching asymptote `offset` (default `0.0`).
    ///
    /// `start` and `end` must lie on the same side of `offset`, otherwise evaluation is non-finite and
    /// compilation will fail with [`CompileError::RampEvaluation`].
    pub fn new_expramp(start: f64, end: f64, offset: Option<f64>) -> Instruction {
        let mut instr_args: InstrArgs = hashmap! {
            String::from("start") => start,
            String::from("end") => end,
        };
        if let Some(offset) = offset {
            instr_args.insert("offset".to_string(), offset);
        }
        Instruction {
            instr_type: InstrType::EXPRAMP,
            args: instr_args,
        }
    }

    /// Constructs a new sine instruction with provided parameters.
    ///
    /// Unspecified optional parameters are left out of the argument dictionary, so their
    /// defaults apply at evaluation.
    pub fn new_sine(
        freq: f64,
        amplitude: Option<f64>,
        phase: Option<f64>,
        dc_offset: Option<f64>,
    ) -> Instruction {
        let mut instr_args: InstrArgs = hashmap! {"freq".to_string() => freq};
        // For each optional argument, if specified, insert into dictionary
        [
            ("amplitude", amplitude),
            ("phase", phase),
            ("offset", dc_offset),
        ]
        .iter()
        .for_each(|(key, opt_value)| {
            if let Some(value) = *opt_value {
                instr_args.insert(key.to_string(), value);
            }
        });
        Instruction {
            instr_type: InstrType::SINE,
            args: instr_args,
        }
    }
}
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut args: Vec<(&String, &f64)> = self.args.iter().collect();
        args.sort_by(|a, b| a.0.cmp(b.0));
        let args_string = args
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<String>>()
            .join(", ");
        write!(f, "[{}, {{{}}}]", self.instr_type, args_string)
    }
}

/// Placement of a ramp on the position grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RampSpec {
    /// Exclusive end of the ramp's domain.
    pub end_pos: usize,
    /// Number of grid positions between consecutive ramp samples.
    pub samp_period: usize,
}

/// Manages an instruction along with its placement on the channel timeline.
///
/// - `start_pos` is the quantized instruction time.
/// - `ramp` is `None` for discrete (constant) instructions, which occupy a single instant, and
///   `Some` for ramps, which occupy `[start_pos, ramp.end_pos)`.
///
/// `InstrBook` implements ordering based on `start_pos` to allow keeping a channel's
/// instructions in a sorted set.
#[derive(Clone, Debug)]
pub struct InstrBook {
    pub start_pos: usize,
    pub ramp: Option<RampSpec>,
    pub instr: Instruction,
}
impl InstrBook {
    /// Constructs a new `InstrBook` object.
    ///
    /// Ramps must have `end_pos` strictly greater than `start_pos`, constants must not carry a
    /// ramp placement and vice versa.
    ///
    /// ```
    /// # use pscompiler_backend::instruction::*;
    /// let book = InstrBook::new(0, None, Instruction::new_const(1.0));
    /// assert!(book.is_ok());
    ///
    /// let ramp = RampSpec { end_pos: 5, samp_period: 1 };
    /// assert!(InstrBook::new(5, Some(ramp), Instruction::new_linramp(0., 1.)).is_err());
    /// ```
    pub fn new(start_pos: usize, ramp: Option<RampSpec>, instr: Instruction) -> Result<Self> {
        let invalid = |reason: String| {
            CompileError::Config(format!("Instruction {} at position {}: {}", instr, start_pos, reason))
        };
        match (&ramp, instr.is_ramp()) {
            (Some(spec), true) => {
                if spec.end_pos <= start_pos {
                    return Err(invalid(format!(
                        "end_pos {} should be strictly greater than start_pos {}",
                        spec.end_pos, start_pos
                    )));
                }
                if spec.samp_period == 0 {
                    return Err(invalid("sample period must be positive".to_string()));
                }
            }
            (None, false) => {}
            (Some(_), false) => return Err(invalid("constant instructions cannot span a domain".to_string())),
            (None, true) => return Err(invalid("ramps require a domain".to_string())),
        }
        Ok(InstrBook {
            start_pos,
            ramp,
            instr,
        })
    }

    /// Last position occupied by this instruction: the ramp end, or `start_pos` for constants.
    pub fn end_pos(&self) -> usize {
        self.ramp.map_or(self.start_pos, |spec| spec.end_pos)
    }
}
// Support total ordering for InstrBook
impl Ord for InstrBook {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start_pos.cmp(&other.start_pos)
    }
}
impl PartialOrd for InstrBook {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for InstrBook {
    fn eq(&self, other: &Self) -> bool {
        self.start_pos == other.start_pos
    }
}
impl Eq for InstrBook {}
impl fmt::Display for InstrBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ramp {
            Some(spec) => write!(
                f,
                "InstrBook({}, {}-{}, every {})",
                self.instr, self.start_pos, spec.end_pos, spec.samp_period
            ),
            None => write!(f, "InstrBook({}, {})", self.instr, self.start_pos),
        }
    }
}
