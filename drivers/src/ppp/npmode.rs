//! Per-network-protocol mode gating.

/// Network-layer protocols individually gated by [`NpMode`].
///
/// Only IP is recognized today; the table exists so a second entry (e.g. a
/// future IPv6) is a pure addition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NpProtocol {
    Ip,
}

impl NpProtocol {
    pub const COUNT: usize = 1;

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            NpProtocol::Ip => 0,
        }
    }

    /// Map a wire protocol field to the gated network-layer protocol it
    /// belongs to, if any. Non-network-layer protocols (LCP, CCP, VJ forms,
    /// …) are not gated by this table — they always PASS.
    #[inline]
    pub const fn from_wire(protocol: u16) -> Option<Self> {
        match protocol {
            super::IP => Some(NpProtocol::Ip),
            _ => None,
        }
    }
}

/// Per-protocol transmit/receive gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NpMode {
    /// Traffic flows normally.
    Pass,
    /// Traffic is silently discarded.
    Drop,
    /// Traffic is rejected with a network-down error.
    Error,
    /// Traffic is held on the output queue until the mode changes.
    Queue,
}

impl Default for NpMode {
    fn default() -> Self {
        NpMode::Error
    }
}

/// Per-unit table of [`NpMode`] indexed by [`NpProtocol`].
#[derive(Clone, Copy, Debug)]
pub struct NpModeTable {
    modes: [NpMode; NpProtocol::COUNT],
}

impl NpModeTable {
    /// All entries start at ERROR, per the allocation invariant in §3 — a
    /// freshly allocated unit passes no traffic until the daemon configures it.
    pub const fn new() -> Self {
        Self {
            modes: [NpMode::Error; NpProtocol::COUNT],
        }
    }

    #[inline]
    pub fn get(&self, proto: NpProtocol) -> NpMode {
        self.modes[proto.index()]
    }

    #[inline]
    pub fn set(&mut self, proto: NpProtocol, mode: NpMode) {
        self.modes[proto.index()] = mode;
    }
}

impl Default for NpModeTable {
    fn default() -> Self {
        Self::new()
    }
}
