//! Device encoders for compiled pseudoclock experiments.
//!
//! Every encoder implements [`DeviceEncoder`] and turns the per-tick sample arrays of one device
//! (or the clock program itself, for [`PulseGenerator`]) into the device's native representation.
//! [`encode_all`] runs a set of encoders in parallel and commits their artifacts to an
//! [`ArtifactStore`] only if all of them succeeded.

pub mod analog_card;
pub mod dds_card;
pub mod digital_card;
pub mod encoder;
pub mod experiment;
pub mod pulse_generator;
pub mod store;

pub use analog_card::*;
pub use dds_card::*;
pub use digital_card::*;
pub use encoder::*;
pub use experiment::*;
pub use pulse_generator::*;
pub use store::*;
