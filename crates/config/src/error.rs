// SPDX-License-Identifier: Apache-2.0

//! Errors for the config crate.

/// Errors that can occur while validating a subscription configuration.
///
/// All variants are construction-time errors: a subscription engine refuses to
/// start from an invalid configuration (fail fast), it never limps along with
/// one.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The stream name is empty or blank.
    #[error("Invalid stream name: must be non-empty")]
    InvalidStreamName,

    /// The group name is empty or blank.
    #[error("Invalid group name: must be non-empty")]
    InvalidGroupName,

    /// A numeric or duration option has a value the engine cannot operate
    /// with (e.g. a zero buffer size or a zero ack timeout).
    #[error("Invalid value for option `{option}`: {details}")]
    InvalidOption {
        /// The name of the offending option.
        option: &'static str,
        /// A description of why the value was rejected.
        details: String,
    },
}
