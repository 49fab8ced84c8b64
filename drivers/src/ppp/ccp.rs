//! Generic compressor registry and the CCP (Compression Control Protocol)
//! observer.
//!
//! The transmit and receive sides of generic compression (as opposed to the
//! VJ TCP/IP header compression in [`super::vj`], which always runs) are
//! pluggable: a unit names a one-byte compressor protocol id via
//! SET-COMPRESSOR, and this module looks it up in a static capability table,
//! grounded on the same "static table, stable handle" shape as
//! `NetDeviceRegistry`. Only a "null" passthrough compressor ships here —
//! real byte-level algorithms (e.g. BSD-Compress) are external, exactly as
//! scoped out in the design's out-of-scope list.

extern crate alloc;

use alloc::boxed::Box;

use super::chain::Chain;
use super::flags::UnitFlags;

/// Outcome of a decompression attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecompressOutcome {
    /// Produced a replacement chain.
    Ok,
    /// Nothing to deliver (e.g. a pure control message was consumed).
    NoOutput,
    /// Recoverable error — caller sets DC_ERROR and passes the compressed
    /// frame up to the daemon.
    Error,
    /// Unrecoverable error — caller sets DC_FERROR and passes the
    /// compressed frame up to the daemon.
    FatalError,
}

/// Per-compressor statistics reported by GET-COMP-STATS.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompStats {
    pub unc_bytes: u64,
    pub comp_bytes: u64,
    pub unc_packets: u64,
    pub comp_packets: u64,
    pub errors: u64,
}

/// Transmit-side capability set for a pluggable compressor.
pub trait TxCompressor: Send {
    fn init(&mut self, options: &[u8]) -> Result<(), ()>;
    /// Compress `chain`, returning a replacement chain, or `None` to pass
    /// the original through unchanged.
    fn compress(&mut self, chain: &Chain) -> Option<Chain>;
    fn reset(&mut self);
    fn stat(&self) -> CompStats;
}

/// Receive-side capability set for a pluggable compressor.
pub trait RxCompressor: Send {
    fn init(&mut self, options: &[u8]) -> Result<(), ()>;
    /// Decompress a frame whose protocol was the generic `COMP` protocol id.
    fn decompress(&mut self, body: &[u8]) -> (DecompressOutcome, Option<Chain>);
    /// Feed an *uncompressed* frame to the decompressor so its dictionary
    /// stays in sync with the peer's compressor even though this particular
    /// frame needed no decompression.
    fn incomp(&mut self, body: &[u8]);
    fn reset(&mut self);
    fn stat(&self) -> CompStats;
}

/// The always-available identity compressor: `compress`/`decompress` are
/// no-ops. Used when a unit has CCP_OPEN but no algorithm has been
/// negotiated, and as the fallback for an unrecognized compressor id during
/// testing.
#[derive(Default)]
pub struct NullCompressor {
    stats: CompStats,
}

impl TxCompressor for NullCompressor {
    fn init(&mut self, _options: &[u8]) -> Result<(), ()> {
        Ok(())
    }

    fn compress(&mut self, _chain: &Chain) -> Option<Chain> {
        None
    }

    fn reset(&mut self) {
        self.stats = CompStats::default();
    }

    fn stat(&self) -> CompStats {
        self.stats
    }
}

#[derive(Default)]
pub struct NullDecompressor {
    stats: CompStats,
}

impl RxCompressor for NullDecompressor {
    fn init(&mut self, _options: &[u8]) -> Result<(), ()> {
        Ok(())
    }

    fn decompress(&mut self, _body: &[u8]) -> (DecompressOutcome, Option<Chain>) {
        (DecompressOutcome::NoOutput, None)
    }

    fn incomp(&mut self, _body: &[u8]) {}

    fn reset(&mut self) {
        self.stats = CompStats::default();
    }

    fn stat(&self) -> CompStats {
        self.stats
    }
}

/// One entry in the static compressor capability table, keyed by the
/// one-byte CCP compressor protocol id carried in SET-COMPRESSOR's first
/// option byte.
pub struct CompressorEntry {
    pub id: u8,
    pub name: &'static str,
    pub make_tx: fn() -> Box<dyn TxCompressor>,
    pub make_rx: fn() -> Box<dyn RxCompressor>,
}

/// Protocol id of the null passthrough compressor.
pub const COMPRESSOR_ID_NULL: u8 = 0x00;

const REGISTRY: &[CompressorEntry] = &[CompressorEntry {
    id: COMPRESSOR_ID_NULL,
    name: "null",
    make_tx: || Box::new(NullCompressor::default()),
    make_rx: || Box::new(NullDecompressor::default()),
}];

pub fn lookup(id: u8) -> Option<&'static CompressorEntry> {
    REGISTRY.iter().find(|e| e.id == id)
}

/// Per-unit generic compression state: the installed tx/rx implementations
/// plus CCP's own negotiation bookkeeping.
pub struct CcpState {
    tx: Option<Box<dyn TxCompressor>>,
    rx: Option<Box<dyn RxCompressor>>,
}

impl CcpState {
    pub const fn new() -> Self {
        Self { tx: None, rx: None }
    }

    pub fn tx_installed(&self) -> bool {
        self.tx.is_some()
    }

    pub fn rx_installed(&self) -> bool {
        self.rx.is_some()
    }

    /// Re-initialize the installed transmit compressor with the
    /// wire-negotiated option bytes from a Configure-Ack. Fails (and never
    /// brings the side up) if nothing is installed or `init` rejects the
    /// options.
    pub fn init_tx(&mut self, options: &[u8]) -> Result<(), ()> {
        match self.tx.as_mut() {
            Some(c) => c.init(options),
            None => Err(()),
        }
    }

    /// Symmetric on the receive side.
    pub fn init_rx(&mut self, options: &[u8]) -> Result<(), ()> {
        match self.rx.as_mut() {
            Some(c) => c.init(options),
            None => Err(()),
        }
    }

    /// SET-COMPRESSOR(transmit, options): install a new transmit compressor
    /// by protocol id, replacing any existing one.
    pub fn set_tx(&mut self, id: u8, options: &[u8]) -> Result<(), SetCompressorError> {
        let entry = lookup(id).ok_or(SetCompressorError::UnknownId)?;
        let mut c = (entry.make_tx)();
        c.init(options).map_err(|_| SetCompressorError::InitFailed)?;
        self.tx = Some(c);
        Ok(())
    }

    pub fn set_rx(&mut self, id: u8, options: &[u8]) -> Result<(), SetCompressorError> {
        let entry = lookup(id).ok_or(SetCompressorError::UnknownId)?;
        let mut c = (entry.make_rx)();
        c.init(options).map_err(|_| SetCompressorError::InitFailed)?;
        self.rx = Some(c);
        Ok(())
    }

    pub fn compress(&mut self, chain: &Chain) -> Option<Chain> {
        self.tx.as_mut().and_then(|c| c.compress(chain))
    }

    pub fn decompress(&mut self, body: &[u8]) -> (DecompressOutcome, Option<Chain>) {
        match self.rx.as_mut() {
            Some(c) => c.decompress(body),
            None => (DecompressOutcome::NoOutput, None),
        }
    }

    pub fn incomp(&mut self, body: &[u8]) {
        if let Some(c) = self.rx.as_mut() {
            c.incomp(body);
        }
    }

    pub fn reset_tx(&mut self) {
        if let Some(c) = self.tx.as_mut() {
            c.reset();
        }
    }

    pub fn reset_rx(&mut self) {
        if let Some(c) = self.rx.as_mut() {
            c.reset();
        }
    }

    pub fn tx_stats(&self) -> CompStats {
        self.tx.as_ref().map(|c| c.stat()).unwrap_or_default()
    }

    pub fn rx_stats(&self) -> CompStats {
        self.rx.as_ref().map(|c| c.stat()).unwrap_or_default()
    }

    /// Free both compressor instances. Called by `ccp_closed`.
    pub fn clear(&mut self) {
        self.tx = None;
        self.rx = None;
    }
}

impl Default for CcpState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetCompressorError {
    UnknownId,
    InitFailed,
}

/// CCP packet codes this observer recognizes. The observer only needs
/// enough of CCP's LCP-shared framing to drive the compression state
/// machine — it is not a full CCP negotiation implementation, which lives
/// in user space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CcpCode {
    ConfigureReq,
    ConfigureAck,
    TerminateReq,
    TerminateAck,
    ResetReq,
    ResetAck,
    Other,
}

impl CcpCode {
    fn from_byte(b: u8) -> Self {
        match b {
            1 => CcpCode::ConfigureReq,
            2 => CcpCode::ConfigureAck,
            5 => CcpCode::TerminateReq,
            6 => CcpCode::TerminateAck,
            14 => CcpCode::ResetReq,
            15 => CcpCode::ResetAck,
            _ => CcpCode::Other,
        }
    }
}

/// Direction a CCP message is travelling, as observed by the transmit or
/// receive pipeline respectively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CcpDirection {
    Sending,
    Received,
}

/// Parse a CCP message body (the bytes immediately following the 2-byte PPP
/// protocol field) far enough to drive the state machine: one-byte code,
/// one-byte identifier, two-byte length. Returns `None` if the declared
/// length disagrees with the bytes actually present.
pub fn parse_ccp(body: &[u8]) -> Option<(CcpCode, usize)> {
    if body.len() < 4 {
        return None;
    }
    let code = CcpCode::from_byte(body[0]);
    let declared_len = u16::from_be_bytes([body[2], body[3]]) as usize;
    if declared_len < 4 || declared_len > body.len() {
        return None;
    }
    Some((code, declared_len))
}

/// Drive the CCP state machine for one observed message, per the
/// transition table: Configure-Req / Terminate-Req / Terminate-Ack in
/// either direction tear compression down; a valid Configure-Ack brings the
/// corresponding side up; Reset-Ack resets the corresponding side. Returns
/// nothing — the state mutation on `flags` and `ccp` is the entire effect.
pub fn ccp_observe(flags: &mut UnitFlags, ccp: &mut CcpState, body: &[u8], direction: CcpDirection) {
    let Some((code, declared_len)) = parse_ccp(body) else {
        return;
    };

    match code {
        CcpCode::ConfigureReq | CcpCode::TerminateReq | CcpCode::TerminateAck => {
            if flags.contains(UnitFlags::CCP_UP) {
                flags.remove(UnitFlags::CCP_UP | UnitFlags::COMP_RUN | UnitFlags::DECOMP_RUN);
            }
        }
        CcpCode::ConfigureAck => {
            if !flags.contains(UnitFlags::CCP_OPEN) || flags.contains(UnitFlags::CCP_UP) {
                return;
            }
            let options = &body[4..declared_len];
            match direction {
                CcpDirection::Sending => {
                    if ccp.init_tx(options).is_ok() {
                        flags.insert(UnitFlags::COMP_RUN);
                    }
                }
                CcpDirection::Received => {
                    flags.remove(UnitFlags::DC_ERROR | UnitFlags::DC_FERROR);
                    if ccp.init_rx(options).is_ok() {
                        flags.insert(UnitFlags::DECOMP_RUN);
                    }
                }
            }
        }
        CcpCode::ResetAck => match direction {
            CcpDirection::Sending => {
                if flags.contains(UnitFlags::COMP_RUN) {
                    ccp.reset_tx();
                }
            }
            CcpDirection::Received => {
                if flags.contains(UnitFlags::DECOMP_RUN) {
                    ccp.reset_rx();
                    flags.remove(UnitFlags::DC_ERROR);
                }
            }
        },
        CcpCode::ResetReq | CcpCode::Other => {}
    }
}

/// Tear down generic compression entirely: frees both compressor
/// instances and clears every CCP-related flag. Invoked when a unit is
/// released, or when SETFLAGS clears CCP_OPEN while it was set.
pub fn ccp_closed(flags: &mut UnitFlags, ccp: &mut CcpState) {
    ccp.clear();
    flags.remove(
        UnitFlags::CCP_OPEN
            | UnitFlags::CCP_UP
            | UnitFlags::COMP_RUN
            | UnitFlags::DECOMP_RUN
            | UnitFlags::DC_ERROR
            | UnitFlags::DC_FERROR,
    );
}
