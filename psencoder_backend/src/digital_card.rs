//! Encoder for digital output cards. Lines `port{p}/line{l}` are packed into one word per port
//! and sample, bit `l` holding line `l`.

use std::collections::BTreeMap;

use ndarray::{Array1, ArrayView1};

use pscompiler_backend::*;

use crate::encoder::*;

pub struct DigitalCard {
    name: String,
    port_width: usize,
    max_samples: usize,
}

impl DigitalCard {
    pub fn new(name: &str, port_width: usize, max_samples: usize) -> Result<Self> {
        if port_width == 0 || port_width > MAX_WIDTH {
            return Err(CompileError::Config(format!(
                "Digital card {name}: port width must be between 1 and {MAX_WIDTH} lines, got {port_width}"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            port_width,
            max_samples,
        })
    }

    // Lines grouped by port number, each as (line number, samples)
    fn ports(&self, dev: &CompiledDevice) -> Result<BTreeMap<usize, Vec<(usize, Array1<bool>)>>> {
        let mut ports: BTreeMap<usize, Vec<(usize, Array1<bool>)>> = BTreeMap::new();
        for (chan_name, samples) in &dev.samples {
            let (port, line) = extract_port_line_numbers(chan_name)?;
            if line >= self.port_width {
                return Err(self.limit(format!(
                    "line {} of {} does not exist on {}-line ports",
                    line, chan_name, self.port_width
                )));
            }
            ports.entry(port).or_default().push((line, to_bool(samples)));
        }
        Ok(ports)
    }
}

impl DeviceEncoder for DigitalCard {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, compiled: &CompiledOutputs) -> Result<()> {
        let dev = self.expand_kind(compiled, DeviceKind::DO)?;
        self.check_sample_count(dev, self.max_samples)?;
        self.ports(dev).map(|_| ())
    }

    fn encode(&self, compiled: &CompiledOutputs) -> Result<DeviceArtifact> {
        let dev = self.expand_kind(compiled, DeviceKind::DO)?;
        let digits = self.port_width.div_ceil(4);
        let mut artifact = DeviceArtifact::new(&self.name);
        for (port, lines) in self.ports(dev)? {
            let views: Vec<(usize, ArrayView1<bool>)> =
                lines.iter().map(|(line, samples)| (*line, samples.view())).collect();
            let words = pack_bits(&views, self.port_width)?;
            artifact.insert(&format!("port{}/hex", port), Dataset::Hex(to_hex_words(&words, digits)));
            artifact.insert(&format!("port{}", port), Dataset::Words(words));
        }
        Ok(artifact)
    }
}

#[cfg(test)]
mod test {
    use ndarray::array;

    use crate::digital_card::*;

    fn compiled() -> CompiledOutputs {
        let mut exp = Experiment::new("pb0", 1e-7).unwrap();
        exp.add_do_device("do_card", ClockLine::Slow).unwrap();
        exp.add_do_channel("do_card", 0, 0, 0.).unwrap();
        exp.add_do_channel("do_card", 0, 5, 1.).unwrap();
        exp.add_do_channel("do_card", 2, 1, 0.).unwrap();
        exp.high("do_card", "port0/line0", 1e-3, 1e-3).unwrap();
        exp.go_high("do_card", "port2/line1", 2e-3).unwrap();
        exp.compile(None).unwrap()
    }

    #[test]
    fn packs_ports() {
        let card = DigitalCard::new("do_card", 8, 1000).unwrap();
        let compiled = compiled();
        card.validate(&compiled).unwrap();
        let artifact = card.encode(&compiled).unwrap();
        // Ticks at 0, 1 and 2 ms
        assert_eq!(
            artifact.get("port0"),
            Some(&Dataset::Words(array![0b10_0000, 0b10_0001, 0b10_0000]))
        );
        assert_eq!(
            artifact.get("port0/hex"),
            Some(&Dataset::Hex(vec!["20".to_string(), "21".to_string(), "20".to_string()]))
        );
        assert_eq!(artifact.get("port2"), Some(&Dataset::Words(array![0, 0, 2])));
    }

    #[test]
    fn line_beyond_port_width() {
        let card = DigitalCard::new("do_card", 4, 1000).unwrap();
        assert!(matches!(
            card.validate(&compiled()),
            Err(CompileError::DeviceLimit { .. })
        ));
        assert!(DigitalCard::new("do_card", 65, 1000).is_err());
    }
}
