use std::f64::consts::PI;

use pscompiler_backend::*;
use psencoder_backend::*;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let mut exp = Experiment::new("pb0", 1e-7)?;
    exp.add_ao_device("ao_card", ClockLine::Fast)?;
    exp.add_ao_channel("ao_card", 0, 0.)?;
    exp.add_do_device("do_card", ClockLine::Slow)?;
    exp.add_do_channel("do_card", 0, 0, 0.)?;
    exp.add_dds_device("dds_card", ClockLine::Slow)?;
    exp.add_dds_channel("dds_card", 0, true)?;

    exp.constant("ao_card", "ao0", 0., 0.)?;
    exp.wait("trigger", 1e-3, Some(10.))?;
    exp.sine("ao_card", "ao0", 1e-3, 1e-3, 1e6, 2e3, Some(5.), None, None)?;
    exp.high("do_card", "port0/line0", 1e-3, 1e-3)?;
    exp.dds_set("dds_card", 0, 0., 80e6, 0.8, 0.)?;
    exp.go_high("dds_card", "dds0/gate", 1e-3)?;
    exp.dds_set("dds_card", 0, 2e-3, 81e6, 0.4, PI / 2.)?;
    exp.add_reset_instr(None)?;

    let encoders: Vec<Box<dyn DeviceEncoder>> = vec![
        Box::new(PulseGenerator::new("pb0", 100e6)?),
        Box::new(AnalogCard::new("ao_card", -10., 10., 16, 1 << 20)?),
        Box::new(DigitalCard::new("do_card", 32, 1 << 20)?),
        Box::new(DdsCard::new("dds_card", 1e9, 1 << 10)?),
    ];
    let mut store = MemoryStore::new();
    let compiled = compile_and_encode(&exp, None, &encoders, &mut store)?;

    tracing::info!(stop_time = compiled.stop_time(), "compiled experiment");
    for name in store.names() {
        if let Some(artifact) = store.get(name) {
            for (dataset, data) in &artifact.datasets {
                tracing::info!(device = name, dataset = %dataset, len = data.len(), "artifact");
            }
        }
    }
    Ok(())
}
