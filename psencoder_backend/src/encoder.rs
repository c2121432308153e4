//! The device encoder contract.
//!
//! An encoder turns the compiled, device-independent sample arrays of one device into that
//! device's native representation. Every encoder goes through the same three steps:
//! 1. [`DeviceEncoder::expand`]: borrow its samples from the shared [`CompiledOutputs`];
//! 2. [`DeviceEncoder::validate`]: check them against the device's limits. Violations are
//!    [`CompileError::DeviceLimit`] errors naming the device, values are never clamped;
//! 3. [`DeviceEncoder::encode`]: deterministically transform them into a [`DeviceArtifact`].
//!
//! Encoders only ever read the compiled outputs, so any number of them can run concurrently, see
//! [`crate::experiment::encode_all`].

use indexmap::IndexMap;
use ndarray::Array1;
use serde::Serialize;

use pscompiler_backend::*;

/// One named array of a device artifact.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Dataset {
    Float(Array1<f64>),
    Int(Array1<i64>),
    Words(Array1<u64>),
    Hex(Vec<String>),
}

impl Dataset {
    pub fn len(&self) -> usize {
        match self {
            Dataset::Float(arr) => arr.len(),
            Dataset::Int(arr) => arr.len(),
            Dataset::Words(arr) => arr.len(),
            Dataset::Hex(words) => words.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything an encoder produced for one device, keyed by dataset name.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeviceArtifact {
    pub device: String,
    pub datasets: IndexMap<String, Dataset>,
}

impl DeviceArtifact {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            datasets: IndexMap::new(),
        }
    }

    pub fn insert(&mut self, name: &str, dataset: Dataset) {
        self.datasets.insert(name.to_string(), dataset);
    }

    pub fn get(&self, name: &str) -> Option<&Dataset> {
        self.datasets.get(name)
    }
}

pub trait DeviceEncoder: Send + Sync {
    /// Name of the encoded device. Doubles as the artifact namespace.
    fn name(&self) -> &str;

    /// Borrows the device's samples from the compiled outputs.
    fn expand<'a>(&self, compiled: &'a CompiledOutputs) -> Result<&'a CompiledDevice> {
        compiled.device(self.name())
    }

    fn validate(&self, compiled: &CompiledOutputs) -> Result<()>;

    fn encode(&self, compiled: &CompiledOutputs) -> Result<DeviceArtifact>;

    fn limit(&self, reason: String) -> CompileError {
        CompileError::DeviceLimit {
            device: self.name().to_string(),
            reason,
        }
    }

    /// Expands the device and checks that it is of the kind the encoder handles.
    fn expand_kind<'a>(&self, compiled: &'a CompiledOutputs, kind: DeviceKind) -> Result<&'a CompiledDevice> {
        let dev = self.expand(compiled)?;
        if dev.kind != kind {
            return Err(CompileError::WrongKind {
                name: self.name().to_string(),
                expected: format!("a device of kind {:?}", kind),
            });
        }
        Ok(dev)
    }

    /// Rejects devices observing more ticks than the hardware buffer holds.
    fn check_sample_count(&self, dev: &CompiledDevice, max_samples: usize) -> Result<()> {
        if dev.num_ticks() > max_samples {
            return Err(self.limit(format!(
                "{} samples exceed the device buffer of {} samples",
                dev.num_ticks(),
                max_samples
            )));
        }
        Ok(())
    }
}

/// Time [s] of the `index`-th tick observed on `line`. Only used to annotate errors.
pub fn tick_time(compiled: &CompiledOutputs, line: ClockLine, index: usize) -> f64 {
    compiled
        .program
        .line_ticks(line)
        .nth(index)
        .map_or(f64::NAN, |tick| pos_to_time(tick.pos, compiled.program.time_base()))
}

/// Formats words as zero-padded upper-case hex strings of `digits` characters.
pub fn to_hex_words(words: &Array1<u64>, digits: usize) -> Vec<String> {
    words
        .iter()
        .map(|word| format!("{:0width$X}", word, width = digits))
        .collect()
}

/// Maps `value` in `[lo, hi]` onto the integer range `[0, 2^bits - 1]`.
pub fn quantize(value: f64, lo: f64, hi: f64, bits: u32) -> i64 {
    let full_scale = ((1u64 << bits) - 1) as f64;
    ((value - lo) / (hi - lo) * full_scale).round() as i64
}
