//! Error taxonomy for the PPP core, mirroring `drivers::net::types::NetError`.

use core::fmt;

/// Errors surfaced by the PPP core to its callers (the network stack, the
/// control surface, or the line driver).
///
/// Errors internal to the deferred pipeline (decompression faults, VJ resets)
/// are never represented here — they are handled by setting flags and
/// counters per the propagation policy, not by returning `Err`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PppError {
    /// Unit has no attached device, is not running, or a protocol mode is ERROR.
    NetworkDown,
    /// Destination address family is neither IP nor the raw family.
    FamilyNotSupported,
    /// A target queue was full, or a non-blocking allocation failed.
    OutOfBuffers,
    /// A control argument failed validation (bad length, unknown compressor id).
    Invalid,
    /// A privileged control operation was requested without privilege.
    NotPermitted,
    /// The control surface does not recognize the requested operation.
    UnknownControl,
}

impl fmt::Display for PppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkDown => write!(f, "ppp: network is down"),
            Self::FamilyNotSupported => write!(f, "ppp: address family not supported"),
            Self::OutOfBuffers => write!(f, "ppp: out of buffers"),
            Self::Invalid => write!(f, "ppp: invalid argument"),
            Self::NotPermitted => write!(f, "ppp: operation not permitted"),
            Self::UnknownControl => write!(f, "ppp: unknown control operation"),
        }
    }
}
