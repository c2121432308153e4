//! # Parallel artifact generation
//!
//! Builds on [`pscompiler_backend::BaseExperiment::compile`]: once an experiment is compiled, the
//! resulting [`CompiledOutputs`] is shared read-only between every registered [`DeviceEncoder`]
//! and the encoders run concurrently on the [`rayon`] thread pool.
//!
//! ## Commit semantics
//!
//! Artifact generation is all-or-nothing:
//! - encoder names are checked for duplicates, and against the names already in the store, before
//!   any encoder runs;
//! - every encoder validates and encodes its device; the first error aborts the batch;
//! - only when all encoders succeeded are the artifacts written to the [`ArtifactStore`], in
//!   encoder order.
//!
//! Each artifact of a clocked device also carries the device's raw per-tick samples as
//! `raw/{channel}` datasets.
//!
//! ```
//! use pscompiler_backend::*;
//! use psencoder_backend::*;
//!
//! let mut exp = Experiment::new("pb0", 1e-7).unwrap();
//! exp.add_ao_device("ao_card", ClockLine::Fast).unwrap();
//! exp.add_ao_channel("ao_card", 0, 0.).unwrap();
//! exp.linramp("ao_card", "ao0", 0., 1e-3, 0., 1., 1e6).unwrap();
//!
//! let encoders: Vec<Box<dyn DeviceEncoder>> = vec![
//!     Box::new(PulseGenerator::new("pb0", 100e6).unwrap()),
//!     Box::new(AnalogCard::new("ao_card", -10., 10., 16, 10_000).unwrap()),
//! ];
//! let mut store = MemoryStore::new();
//! compile_and_encode(&exp, None, &encoders, &mut store).unwrap();
//! assert_eq!(store.names(), vec!["pb0", "ao_card"]);
//! ```

use std::collections::HashSet;

use rayon::prelude::*;

use pscompiler_backend::*;

use crate::encoder::*;
use crate::store::*;

fn encode_device(encoder: &dyn DeviceEncoder, compiled: &CompiledOutputs) -> Result<DeviceArtifact> {
    encoder.validate(compiled)?;
    let mut artifact = encoder.encode(compiled)?;
    if let Some(dev) = compiled.devices.get(encoder.name()) {
        for (chan_name, samples) in &dev.samples {
            artifact.insert(&format!("raw/{}", chan_name), Dataset::Float(samples.clone()));
        }
    }
    tracing::debug!(
        device = encoder.name(),
        datasets = artifact.datasets.len(),
        "encoded device"
    );
    Ok(artifact)
}

/// Runs every encoder over `compiled` in parallel and commits the artifacts to `store`.
///
/// Returns the names of the committed artifacts. On error, `store` is left untouched.
pub fn encode_all<S: ArtifactStore + ?Sized>(
    compiled: &CompiledOutputs,
    encoders: &[Box<dyn DeviceEncoder>],
    store: &mut S,
) -> Result<Vec<String>> {
    let mut timer = TickTimer::new();
    let mut seen = HashSet::new();
    for encoder in encoders {
        let name = encoder.name();
        if !seen.insert(name) || store.contains(name) {
            return Err(CompileError::NamespaceCollision {
                name: name.to_string(),
            });
        }
    }

    let artifacts = encoders
        .par_iter()
        .map(|encoder| encode_device(encoder.as_ref(), compiled))
        .collect::<Result<Vec<_>>>()?;
    timer.tick_log("device encoding");

    let names: Vec<String> = artifacts.iter().map(|artifact| artifact.device.clone()).collect();
    for artifact in artifacts {
        store.put(artifact)?;
    }
    tracing::info!(artifacts = names.len(), "committed device artifacts");
    Ok(names)
}

/// Compiles `exp` and encodes the result, see [`encode_all`]. Returns the compiled outputs so
/// that callers can inspect the clock program.
pub fn compile_and_encode<E: BaseExperiment + ?Sized, S: ArtifactStore + ?Sized>(
    exp: &E,
    stop_time: Option<f64>,
    encoders: &[Box<dyn DeviceEncoder>],
    store: &mut S,
) -> Result<CompiledOutputs> {
    let compiled = exp.compile(stop_time)?;
    encode_all(&compiled, encoders, store)?;
    Ok(compiled)
}
