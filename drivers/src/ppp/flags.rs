//! Per-unit runtime flags.

use bitflags::bitflags;

bitflags! {
    /// Per-unit PPP flags.
    ///
    /// `SC_MASK` is the subset a control call may write via SET-FLAGS; the
    /// remainder reflect internal state and are read-only from the control
    /// surface (see §6 of the design — a SETFLAGS write outside `SC_MASK`
    /// is simply ignored, not rejected).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct UnitFlags: u32 {
        /// Per-packet trace logging is enabled.
        const DEBUG          = 1 << 0;
        /// Elide the address/control bytes when possible (COMP_AC).
        const COMP_AC        = 1 << 1;
        /// Elide the protocol high byte when possible (COMP_PROT).
        const COMP_PROT      = 1 << 2;
        /// Van Jacobson TCP/IP header compression is enabled on transmit.
        const COMP_TCP       = 1 << 3;
        /// Do not use the connection-id byte in VJ-compressed frames.
        const NO_TCP_CCID    = 1 << 4;
        /// Reject incoming VJ-compressed frames outright.
        const REJ_COMP_TCP   = 1 << 5;
        /// CCP negotiation is open (daemon has configured compression).
        const CCP_OPEN       = 1 << 6;
        /// CCP has completed negotiation and compression may run.
        const CCP_UP         = 1 << 7;
        /// The transmit compressor is actively compressing frames.
        const COMP_RUN       = 1 << 8;
        /// The receive decompressor is actively decompressing frames.
        const DECOMP_RUN     = 1 << 9;
        /// The receive decompressor hit a recoverable error; disabled until reset.
        const DC_ERROR       = 1 << 10;
        /// The receive decompressor hit a fatal error; disabled until reconfigured.
        const DC_FERROR      = 1 << 11;
        /// Next VJ-compressed frame must be discarded (dictionary desynced).
        const VJ_RESET       = 1 << 12;
        /// Log each inbound packet at `klog_debug!`.
        const LOG_INPKT      = 1 << 13;
        /// Log each outbound packet at `klog_debug!`.
        const LOG_OUTPKT     = 1 << 14;
        /// The staged-output slot is occupied; the line driver is busy.
        const TBUSY          = 1 << 15;
    }
}

impl UnitFlags {
    /// Bits a control call may write through SET-FLAGS.
    pub const SC_MASK: Self = Self::from_bits_truncate(
        Self::DEBUG.bits()
            | Self::COMP_AC.bits()
            | Self::NO_TCP_CCID.bits()
            | Self::REJ_COMP_TCP.bits()
            | Self::COMP_TCP.bits()
            | Self::COMP_PROT.bits()
            | Self::CCP_OPEN.bits()
            | Self::LOG_INPKT.bits()
            | Self::LOG_OUTPKT.bits(),
    );

    /// Replace the SC_MASK-writable bits of `self` with the writable bits of
    /// `requested`, leaving every control-only bit untouched.
    #[inline]
    pub fn apply_writable(self, requested: UnitFlags) -> UnitFlags {
        (self & !Self::SC_MASK) | (requested & Self::SC_MASK)
    }
}

impl Default for UnitFlags {
    fn default() -> Self {
        Self::empty()
    }
}
