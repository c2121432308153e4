//! Compiles hardware-independent output timelines into a shared pseudoclock program and per-tick
//! sample arrays for every intermediate device.
//!
//! Pipeline: instruction timelines ([`channel`]) → [`clock::compile_clock`] → [`ClockProgram`] →
//! [`expand::expand_output`] per output → optional [`bitfield::pack_bits`] → device encoders
//! (in the `psencoder_backend` crate). [`experiment::Experiment`] drives all stages.

pub mod bitfield;
pub mod channel;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod expand;
pub mod experiment;
pub mod instruction;
pub mod utils;

pub use bitfield::*;
pub use channel::*;
pub use clock::*;
pub use config::*;
pub use device::*;
pub use error::*;
pub use expand::*;
pub use experiment::*;
pub use instruction::*;
pub use utils::*;
