//! Encoder for analog output cards: each channel's voltages are range-checked and quantized to
//! DAC codes of the card's resolution.

use pscompiler_backend::*;

use crate::encoder::*;

pub struct AnalogCard {
    name: String,
    v_min: f64,
    v_max: f64,
    bits: u32,
    max_samples: usize,
}

impl AnalogCard {
    /// A card with output range `[v_min, v_max]` [V], `bits` DAC resolution and a buffer of
    /// `max_samples` samples per channel.
    pub fn new(name: &str, v_min: f64, v_max: f64, bits: u32, max_samples: usize) -> Result<Self> {
        if !(v_min.is_finite() && v_max.is_finite() && v_min < v_max) {
            return Err(CompileError::Config(format!(
                "Analog card {name}: invalid output range [{v_min}, {v_max}]"
            )));
        }
        if bits == 0 || bits > 32 {
            return Err(CompileError::Config(format!(
                "Analog card {name}: resolution must be between 1 and 32 bits, got {bits}"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            v_min,
            v_max,
            bits,
            max_samples,
        })
    }
}

impl DeviceEncoder for AnalogCard {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, compiled: &CompiledOutputs) -> Result<()> {
        let dev = self.expand_kind(compiled, DeviceKind::AO)?;
        self.check_sample_count(dev, self.max_samples)?;
        for (chan_name, samples) in &dev.samples {
            if let Some(idx) = samples
                .iter()
                .position(|v| *v < self.v_min || *v > self.v_max)
            {
                return Err(self.limit(format!(
                    "{} outputs {} [V] at t = {} [s], outside the range [{}, {}] [V]",
                    chan_name,
                    samples[idx],
                    tick_time(compiled, dev.clock_line, idx),
                    self.v_min,
                    self.v_max
                )));
            }
        }
        Ok(())
    }

    fn encode(&self, compiled: &CompiledOutputs) -> Result<DeviceArtifact> {
        let dev = self.expand_kind(compiled, DeviceKind::AO)?;
        let mut artifact = DeviceArtifact::new(&self.name);
        for (chan_name, samples) in &dev.samples {
            let codes = samples.mapv(|v| quantize(v, self.v_min, self.v_max, self.bits));
            artifact.insert(chan_name, Dataset::Int(codes));
        }
        Ok(artifact)
    }
}
