use pscompiler_backend::*;
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
    exp.add_do_channel("do_card", 0, 4, 0.)?;

    exp.constant("ao_card", "ao0", 0., 0.)?;
    exp.wait("trigger", 1e-3, Some(10.))?;
    exp.linramp("ao_card", "ao0", 1e-3, 1e-3, 0., 1., 1e6)?;
    exp.constant("ao_card", "ao0", 2e-3, 0.)?;
    exp.high("do_card", "port0/line0", 0.5e-3, 1e-3)?;
    exp.go_high("do_card", "port0/line4", 2e-3)?;

    let compiled = exp.compile(Some(3e-3))?;
    for entry in compiled.program.entries() {
        tracing::info!("{:?}", entry);
    }
    for (name, dev) in &compiled.devices {
        tracing::info!(device = %name, ticks = dev.num_ticks(), "expanded");
    }
    Ok(())
}
