//! Encoder for direct digital synthesis cards.
//!
//! Every composite output `dds{n}` is encoded into
//! - `dds{n}/ftw`: frequency tuning words, `round(freq / ref_clock * 2^ftw_bits)`;
//! - `dds{n}/asf`: amplitude scale factors, `amp` in `[0, 1]` mapped onto `amp_bits`;
//! - `dds{n}/pow`: phase offset words, phase [rad] wrapped into one turn and mapped onto
//!   `phase_bits`;
//! - `dds{n}/gate`: gate states (0/1), if the output has a gate.

use std::collections::BTreeMap;
use std::f64::consts::TAU;

use ndarray::Array1;
use regex::Regex;

use pscompiler_backend::*;

use crate::encoder::*;

#[derive(Default)]
struct DdsOutput<'a> {
    freq: Option<&'a Array1<f64>>,
    amp: Option<&'a Array1<f64>>,
    phase: Option<&'a Array1<f64>>,
    gate: Option<&'a Array1<f64>>,
}

pub struct DdsCard {
    name: String,
    ref_clock: f64,
    ftw_bits: u32,
    amp_bits: u32,
    phase_bits: u32,
    max_samples: usize,
}

impl DdsCard {
    /// A card clocked at `ref_clock` [Hz] with 32-bit frequency, 14-bit amplitude and 16-bit
    /// phase resolution.
    pub fn new(name: &str, ref_clock: f64, max_samples: usize) -> Result<Self> {
        if !(ref_clock.is_finite() && ref_clock > 0.) {
            return Err(CompileError::Config(format!(
                "DDS card {name}: reference clock must be positive, got {ref_clock}"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            ref_clock,
            ftw_bits: 32,
            amp_bits: 14,
            phase_bits: 16,
            max_samples,
        })
    }

    fn outputs<'a>(&self, dev: &'a CompiledDevice) -> Result<BTreeMap<usize, DdsOutput<'a>>> {
        let re = Regex::new(r"^dds(\d+)/(freq|amp|phase|gate)$").map_err(|e| CompileError::Config(e.to_string()))?;
        let mut outputs: BTreeMap<usize, DdsOutput> = BTreeMap::new();
        for (chan_name, samples) in &dev.samples {
            let bad_name = || CompileError::InvalidChannelName {
                device: self.name.clone(),
                name: chan_name.clone(),
                expected: "dds(number)/(freq|amp|phase|gate)".to_string(),
            };
            let caps = re.captures(chan_name).ok_or_else(bad_name)?;
            let id = caps[1].parse::<usize>().map_err(|_| bad_name())?;
            let output = outputs.entry(id).or_default();
            match &caps[2] {
                "freq" => output.freq = Some(samples),
                "amp" => output.amp = Some(samples),
                "phase" => output.phase = Some(samples),
                _ => output.gate = Some(samples),
            }
        }
        Ok(outputs)
    }

    fn check_range(
        &self,
        compiled: &CompiledOutputs,
        dev: &CompiledDevice,
        label: String,
        samples: Option<&Array1<f64>>,
        lo: f64,
        hi: f64,
    ) -> Result<()> {
        let Some(samples) = samples else {
            return Err(self.limit(format!("composite output is missing its {label} sub-channel")));
        };
        if let Some(idx) = samples.iter().position(|v| *v < lo || *v > hi) {
            return Err(self.limit(format!(
                "{} = {} at t = {} [s] is outside the range [{}, {}]",
                label,
                samples[idx],
                tick_time(compiled, dev.clock_line, idx),
                lo,
                hi
            )));
        }
        Ok(())
    }
}

impl DeviceEncoder for DdsCard {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, compiled: &CompiledOutputs) -> Result<()> {
        let dev = self.expand_kind(compiled, DeviceKind::DDS)?;
        self.check_sample_count(dev, self.max_samples)?;
        for (id, output) in self.outputs(dev)? {
            let nyquist = self.ref_clock / 2.;
            self.check_range(compiled, dev, format!("dds{id}/freq"), output.freq, 0., nyquist)?;
            self.check_range(compiled, dev, format!("dds{id}/amp"), output.amp, 0., 1.)?;
            // Any finite phase wraps into one turn
            self.check_range(compiled, dev, format!("dds{id}/phase"), output.phase, f64::MIN, f64::MAX)?;
        }
        Ok(())
    }

    fn encode(&self, compiled: &CompiledOutputs) -> Result<DeviceArtifact> {
        let dev = self.expand_kind(compiled, DeviceKind::DDS)?;
        let mut artifact = DeviceArtifact::new(&self.name);
        let ftw_scale = (1u64 << self.ftw_bits) as f64 / self.ref_clock;
        let pow_turn = 1u64 << self.phase_bits;
        for (id, output) in self.outputs(dev)? {
            let (Some(freq), Some(amp), Some(phase)) = (output.freq, output.amp, output.phase) else {
                return Err(self.limit(format!("composite output dds{id} is incomplete")));
            };
            artifact.insert(
                &format!("dds{id}/ftw"),
                Dataset::Int(freq.mapv(|f| (f * ftw_scale).round() as i64)),
            );
            artifact.insert(
                &format!("dds{id}/asf"),
                Dataset::Int(amp.mapv(|a| quantize(a, 0., 1., self.amp_bits))),
            );
            artifact.insert(
                &format!("dds{id}/pow"),
                Dataset::Int(phase.mapv(|p| {
                    ((p.rem_euclid(TAU) / TAU * pow_turn as f64).round() as u64 % pow_turn) as i64
                })),
            );
            if let Some(gate) = output.gate {
                artifact.insert(&format!("dds{id}/gate"), Dataset::Int(gate.mapv(|g| g as i64)));
            }
        }
        Ok(artifact)
    }
}

#[cfg(test)]
mod test {
    use std::f64::consts::PI;

    use ndarray::array;

    use crate::dds_card::*;

    fn compiled(freq: f64) -> CompiledOutputs {
        let mut exp = Experiment::new("pb0", 1e-7).unwrap();
        exp.add_dds_device("dds_card", ClockLine::Fast).unwrap();
        exp.add_dds_channel("dds_card", 0, true).unwrap();
        exp.dds_set("dds_card", 0, 0., 250e6, 1., PI).unwrap();
        exp.go_high("dds_card", "dds0/gate", 0.).unwrap();
        exp.dds_set("dds_card", 0, 1e-3, freq, 0.5, -PI / 2.).unwrap();
        exp.compile(None).unwrap()
    }

    #[test]
    fn tuning_words() {
        let card = DdsCard::new("dds_card", 1e9, 1000).unwrap();
        let compiled = compiled(125e6);
        card.validate(&compiled).unwrap();
        let artifact = card.encode(&compiled).unwrap();
        assert_eq!(
            artifact.get("dds0/ftw"),
            Some(&Dataset::Int(array![1 << 30, 1 << 29]))
        );
        assert_eq!(artifact.get("dds0/asf"), Some(&Dataset::Int(array![16383, 8192])));
        assert_eq!(artifact.get("dds0/pow"), Some(&Dataset::Int(array![32768, 49152])));
        assert_eq!(artifact.get("dds0/gate"), Some(&Dataset::Int(array![1, 1])));
    }

    #[test]
    fn frequency_above_nyquist() {
        let card = DdsCard::new("dds_card", 1e9, 1000).unwrap();
        assert!(matches!(
            card.validate(&compiled(600e6)),
            Err(CompileError::DeviceLimit { .. })
        ));
    }
}
