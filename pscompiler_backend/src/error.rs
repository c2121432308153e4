//! Error type shared by every compilation stage.
//!
//! All errors are fatal to the compilation they occur in. Variants carry the device / output
//! name and the offending time (in seconds) wherever one applies so that a failed compile can be
//! acted upon without re-running it.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    /// Two sibling outputs (or an output and a wait) request contradictory ticking at the same time.
    #[error("Timeline conflict at t = {time} [s] between {first} and {second}: {reason}")]
    TimelineConflict {
        first: String,
        second: String,
        time: f64,
        reason: String,
    },

    /// A single output's timeline is malformed (overlap, out of range, bad ramp sampling, ...).
    #[error("Timeline error on {output} at t = {time} [s]: {reason}")]
    Timeline {
        output: String,
        time: f64,
        reason: String,
    },

    #[error("Ramp on {output} evaluated to non-finite value {value} at t = {time} [s]")]
    RampEvaluation { output: String, time: f64, value: f64 },

    #[error("Digital output {output} requires values 0 or 1 but received {value} at t = {time} [s]")]
    DigitalValue { output: String, time: f64, value: f64 },

    /// Device-specific capacity or value-range violation.
    #[error("Device {device} limit violated: {reason}")]
    DeviceLimit { device: String, reason: String },

    #[error("Name {name} is already registered")]
    NamespaceCollision { name: String },

    #[error("Bitfield packing failed: {0}")]
    BitfieldWidth(String),

    #[error("There is no device {name} registered. Registered devices are {registered:?}")]
    UnknownDevice {
        name: String,
        registered: Vec<String>,
    },

    #[error("Device {device} does not have channel {channel}. Registered channels are {registered:?}")]
    UnknownChannel {
        device: String,
        channel: String,
        registered: Vec<String>,
    },

    #[error("{name} is incompatible with this instruction, expected {expected}")]
    WrongKind { name: String, expected: String },

    #[error("Expecting channels of device {device} to be of format '{expected}' yet received channel name {name}")]
    InvalidChannelName {
        device: String,
        name: String,
        expected: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<toml::de::Error> for CompileError {
    fn from(err: toml::de::Error) -> Self {
        CompileError::Config(err.to_string())
    }
}
