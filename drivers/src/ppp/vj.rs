//! Van Jacobson TCP/IP header compression.
//!
//! No reference implementation of this subsystem ships anywhere in this
//! tree, so the slot table and delta encoding below are a fresh
//! implementation of the standard technique described in the design notes:
//! a small per-connection dictionary of the last full IP/TCP header seen,
//! with subsequent headers for the same connection reduced to a one-byte
//! connection id plus the handful of fields that actually change
//! (sequence number, ack number, window, urgent pointer, IP identification)
//! encoded as small deltas. The TCP checksum is never delta-coded — like
//! the classic technique, it changes on almost every segment, so it is
//! carried unencoded.
//!
//! Segments carrying SYN, FIN, or RST are never compressed (a new or
//! closing connection has no stable dictionary entry to diff against).

extern crate alloc;

use alloc::vec::Vec;

use crate::net::ipv4_header_checksum;

/// Maximum number of connection slots the compressor/decompressor support.
/// One byte identifies a slot, so this can never exceed 256.
pub const MAX_SLOTS_CAP: usize = 256;

/// Default number of active slots before `set_max_slot` is called.
pub const DEFAULT_MAX_SLOTS: usize = 16;

const TH_FIN: u8 = 0x01;
const TH_SYN: u8 = 0x02;
const TH_RST: u8 = 0x04;
const TH_PSH: u8 = 0x08;

const CH_URG: u8 = 0x01;
const CH_WINDOW: u8 = 0x02;
const CH_ACK: u8 = 0x04;
const CH_SEQ: u8 = 0x08;
const CH_IPID: u8 = 0x10;
const CH_PUSH: u8 = 0x20;

/// Shape of the result produced by [`VjCompressor::compress`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VjPacketType {
    /// Not a TCP/IP header this compressor touches; pass through unchanged.
    Ip,
    /// A full header was sent, prefixed with an explicit connection id.
    UncompressedTcp,
    /// A compressed delta-coded header was sent.
    CompressedTcp,
}

/// Errors the decompressor can report. All are handled by the caller per
/// the DECOMP_ERROR / DECOMP_FATALERROR policy in the design notes — never
/// by panicking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VjError {
    /// Referenced connection id has no dictionary entry.
    UnknownConnection,
    /// The compressed body was truncated or internally inconsistent.
    BadLength,
    /// An implicit (no explicit cid) packet arrived with no prior
    /// connection established, or after a flush.
    NotSynced,
}

#[derive(Clone, Copy)]
struct Slot {
    in_use: bool,
    header: [u8; MAX_HEADER_LEN],
    header_len: usize,
    ip_len: usize,
    tcp_len: usize,
}

/// Generous upper bound on a combined IP+TCP header (IP with options + TCP
/// with options), matching the slack already reserved by `PacketBuf::HEADROOM`.
const MAX_HEADER_LEN: usize = 120;

impl Slot {
    const fn empty() -> Self {
        Self {
            in_use: false,
            header: [0u8; MAX_HEADER_LEN],
            header_len: 0,
            ip_len: 0,
            tcp_len: 0,
        }
    }

    fn matches_connection(&self, ip: &[u8], tcp: &[u8]) -> bool {
        if !self.in_use || self.ip_len != ip.len() || self.tcp_len != tcp.len() {
            return false;
        }
        let prev_ip = &self.header[..self.ip_len];
        let prev_tcp = &self.header[self.ip_len..self.ip_len + self.tcp_len];
        prev_ip[9] == ip[9]
            && prev_ip[12..20] == ip[12..20]
            && prev_tcp[0..4] == tcp[0..4]
            && (prev_tcp[12] >> 4) == (tcp[12] >> 4)
    }

    fn store(&mut self, ip: &[u8], tcp: &[u8]) {
        let total = ip.len() + tcp.len();
        self.header[..ip.len()].copy_from_slice(ip);
        self.header[ip.len()..total].copy_from_slice(tcp);
        self.header_len = total;
        self.ip_len = ip.len();
        self.tcp_len = tcp.len();
        self.in_use = true;
    }

    fn ip(&self) -> &[u8] {
        &self.header[..self.ip_len]
    }

    fn tcp(&self) -> &[u8] {
        &self.header[self.ip_len..self.ip_len + self.tcp_len]
    }
}

/// One delta field as it appears on the wire: omitted, one byte, or a
/// 0x00-marker followed by a big-endian 16-bit value.
enum Delta {
    Zero,
    Byte(u8),
    Word(u16),
}

impl Delta {
    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Delta::Zero => {}
            Delta::Byte(b) => out.push(*b),
            Delta::Word(w) => {
                out.push(0);
                out.extend_from_slice(&w.to_be_bytes());
            }
        }
    }

    /// Number of trailing bytes this delta would consume on decode, not
    /// counting a leading zero-marker byte (the caller peeks that first).
    fn decode(bytes: &[u8]) -> Result<(u16, usize), VjError> {
        match bytes.first() {
            None => Err(VjError::BadLength),
            Some(0) => {
                if bytes.len() < 3 {
                    return Err(VjError::BadLength);
                }
                Ok((u16::from_be_bytes([bytes[1], bytes[2]]), 3))
            }
            Some(b) => Ok((*b as u16, 1)),
        }
    }
}

fn encode_delta32(old: u32, new: u32) -> Option<Delta> {
    let d = new.wrapping_sub(old);
    match d {
        0 => Some(Delta::Zero),
        1..=0xFF => Some(Delta::Byte(d as u8)),
        0x100..=0xFFFF => Some(Delta::Word(d as u16)),
        _ => None,
    }
}

fn encode_delta16(old: u16, new: u16) -> Delta {
    let d = new.wrapping_sub(old);
    match d {
        0 => Delta::Zero,
        1..=0xFF => Delta::Byte(d as u8),
        _ => Delta::Word(d),
    }
}

/// Result of a successful [`VjCompressor::compress`] call.
pub struct VjCompressResult {
    pub kind: VjPacketType,
    /// Replacement bytes for the original IP+TCP header. For `Ip` this is
    /// empty and the caller leaves the original header untouched.
    pub header: Vec<u8>,
    /// Number of bytes of the *original* header these replacement bytes
    /// stand in for (the caller removes this many bytes and substitutes
    /// `header` in their place).
    pub consumed: usize,
}

/// Transmit-side VJ compressor: one dictionary slot per active connection.
pub struct VjCompressor {
    slots: [Slot; MAX_SLOTS_CAP],
    max_slot: usize,
    next_victim: usize,
    last_cid: Option<u8>,
    pub compressed: u64,
    pub uncompressed: u64,
    pub searches: u64,
    pub misses: u64,
}

impl VjCompressor {
    pub const fn new() -> Self {
        Self {
            slots: [Slot::empty(); MAX_SLOTS_CAP],
            max_slot: DEFAULT_MAX_SLOTS,
            next_victim: 0,
            last_cid: None,
            compressed: 0,
            uncompressed: 0,
            searches: 0,
            misses: 0,
        }
    }

    /// Reset all dictionary state and set the number of active slots.
    pub fn init(&mut self, max_slots: usize) {
        self.slots = [Slot::empty(); MAX_SLOTS_CAP];
        self.set_max_slot(max_slots);
        self.next_victim = 0;
        self.last_cid = None;
        self.compressed = 0;
        self.uncompressed = 0;
        self.searches = 0;
        self.misses = 0;
    }

    pub fn set_max_slot(&mut self, max_slots: usize) {
        self.max_slot = max_slots.clamp(1, MAX_SLOTS_CAP);
    }

    fn find_slot(&mut self, ip: &[u8], tcp: &[u8]) -> Option<u8> {
        self.searches += 1;
        for i in 0..self.max_slot {
            if self.slots[i].matches_connection(ip, tcp) {
                return Some(i as u8);
            }
        }
        self.misses += 1;
        None
    }

    fn alloc_slot(&mut self) -> u8 {
        let victim = self.next_victim % self.max_slot;
        self.next_victim = (self.next_victim + 1) % self.max_slot;
        victim as u8
    }

    /// Parse an IP+TCP header pair and either compress it against an
    /// existing dictionary entry or register a new one.
    ///
    /// `no_ccid`, when true, omits the connection-id byte for a compressed
    /// header that reuses the same connection as the previous transmitted
    /// packet (mirrors `UnitFlags::NO_TCP_CCID`).
    pub fn compress(&mut self, header: &[u8], no_ccid: bool) -> Option<VjCompressResult> {
        let ip_len = ((*header.first()? & 0x0F) as usize) * 4;
        if ip_len < 20 || header.len() < ip_len + 20 {
            return None;
        }
        let tcp_len = ((header[ip_len + 12] >> 4) as usize) * 4;
        if tcp_len < 20 || header.len() < ip_len + tcp_len {
            return None;
        }
        let total = ip_len + tcp_len;
        let (ip, tcp) = (&header[..ip_len], &header[ip_len..total]);
        let flags = tcp[13];

        let existing = self.find_slot(ip, tcp);

        if flags & (TH_SYN | TH_FIN | TH_RST) != 0 || existing.is_none() {
            let cid = existing.unwrap_or_else(|| self.alloc_slot());
            self.slots[cid as usize].store(ip, tcp);
            self.last_cid = Some(cid);
            self.uncompressed += 1;
            let mut out = Vec::with_capacity(1 + total);
            out.push(cid);
            out.extend_from_slice(header.get(..total)?);
            return Some(VjCompressResult {
                kind: VjPacketType::UncompressedTcp,
                header: out,
                consumed: total,
            });
        }

        let cid = existing.unwrap();
        let prev = self.slots[cid as usize];
        let prev_ip = prev.ip();
        let prev_tcp = prev.tcp();

        let seq_old = u32::from_be_bytes(prev_tcp[4..8].try_into().unwrap());
        let seq_new = u32::from_be_bytes(tcp[4..8].try_into().unwrap());
        let ack_old = u32::from_be_bytes(prev_tcp[8..12].try_into().unwrap());
        let ack_new = u32::from_be_bytes(tcp[8..12].try_into().unwrap());
        let win_old = u16::from_be_bytes(prev_tcp[14..16].try_into().unwrap());
        let win_new = u16::from_be_bytes(tcp[14..16].try_into().unwrap());
        let urg_old = u16::from_be_bytes(prev_tcp[18..20].try_into().unwrap());
        let urg_new = u16::from_be_bytes(tcp[18..20].try_into().unwrap());
        let id_old = u16::from_be_bytes(prev_ip[4..6].try_into().unwrap());
        let id_new = u16::from_be_bytes(ip[4..6].try_into().unwrap());

        let seq_delta = match encode_delta32(seq_old, seq_new) {
            Some(d) => d,
            None => {
                self.slots[cid as usize].store(ip, tcp);
                self.last_cid = Some(cid);
                self.uncompressed += 1;
                let mut out = Vec::with_capacity(1 + total);
                out.push(cid);
                out.extend_from_slice(&header[..total]);
                return Some(VjCompressResult {
                    kind: VjPacketType::UncompressedTcp,
                    header: out,
                    consumed: total,
                });
            }
        };
        let ack_delta = match encode_delta32(ack_old, ack_new) {
            Some(d) => d,
            None => {
                self.slots[cid as usize].store(ip, tcp);
                self.last_cid = Some(cid);
                self.uncompressed += 1;
                let mut out = Vec::with_capacity(1 + total);
                out.push(cid);
                out.extend_from_slice(&header[..total]);
                return Some(VjCompressResult {
                    kind: VjPacketType::UncompressedTcp,
                    header: out,
                    consumed: total,
                });
            }
        };
        let win_delta = encode_delta16(win_old, win_new);
        let urg_delta = encode_delta16(urg_old, urg_new);
        let implied_id = id_old.wrapping_add(1);

        let mut changes = 0u8;
        if !matches!(urg_delta, Delta::Zero) {
            changes |= CH_URG;
        }
        if !matches!(win_delta, Delta::Zero) {
            changes |= CH_WINDOW;
        }
        if !matches!(ack_delta, Delta::Zero) {
            changes |= CH_ACK;
        }
        if !matches!(seq_delta, Delta::Zero) {
            changes |= CH_SEQ;
        }
        if id_new != implied_id {
            changes |= CH_IPID;
        }
        if flags & TH_PSH != 0 {
            changes |= CH_PUSH;
        }

        let explicit_cid = !no_ccid || self.last_cid != Some(cid);

        let mut out = Vec::with_capacity(16);
        if explicit_cid {
            out.push(cid);
        }
        out.push(changes);
        urg_delta.encode_into(&mut out);
        win_delta.encode_into(&mut out);
        ack_delta.encode_into(&mut out);
        seq_delta.encode_into(&mut out);
        if changes & CH_IPID != 0 {
            encode_delta16(id_old, id_new).encode_into(&mut out);
        }
        out.extend_from_slice(&tcp[16..18]); // checksum, always carried raw

        self.slots[cid as usize].store(ip, tcp);
        self.last_cid = Some(cid);
        self.compressed += 1;

        Some(VjCompressResult {
            kind: VjPacketType::CompressedTcp,
            header: out,
            consumed: total,
        })
    }
}

impl Default for VjCompressor {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a successful decompress call.
pub struct VjDecompressResult {
    pub header: Vec<u8>,
    pub ip_len: usize,
    pub tcp_len: usize,
    /// Number of leading bytes of the input `body` this reconstruction
    /// consumed — the trailing payload begins at `body[consumed..]`.
    pub consumed: usize,
}

/// Receive-side VJ decompressor: mirrors [`VjCompressor`]'s dictionary.
pub struct VjDecompressor {
    slots: [Slot; MAX_SLOTS_CAP],
    max_slot: usize,
    last_cid: Option<u8>,
    pub compressed: u64,
    pub uncompressed: u64,
    pub errors: u64,
}

impl VjDecompressor {
    pub const fn new() -> Self {
        Self {
            slots: [Slot::empty(); MAX_SLOTS_CAP],
            max_slot: DEFAULT_MAX_SLOTS,
            last_cid: None,
            compressed: 0,
            uncompressed: 0,
            errors: 0,
        }
    }

    pub fn init(&mut self, max_slots: usize) {
        self.slots = [Slot::empty(); MAX_SLOTS_CAP];
        self.set_max_slot(max_slots);
        self.last_cid = None;
        self.compressed = 0;
        self.uncompressed = 0;
        self.errors = 0;
    }

    pub fn set_max_slot(&mut self, max_slots: usize) {
        self.max_slot = max_slots.clamp(1, MAX_SLOTS_CAP);
    }

    /// Invalidate the "last used connection" tracking used for implicit
    /// (no explicit cid) compressed packets. Called with `type=ERROR` per
    /// §4.4 step 4 when a frame was marked lost upstream.
    pub fn flush(&mut self) {
        self.last_cid = None;
    }

    /// Reconstruct a full header from an uncompressed-form body: one
    /// explicit connection-id byte followed by the raw IP+TCP header.
    pub fn uncompress_uncompressed(&mut self, body: &[u8]) -> Result<VjDecompressResult, VjError> {
        let cid = *body.first().ok_or(VjError::BadLength)?;
        if cid as usize >= self.max_slot {
            return Err(VjError::UnknownConnection);
        }
        let header = &body[1..];
        let ip_len = ((*header.first().ok_or(VjError::BadLength)? & 0x0F) as usize) * 4;
        if ip_len < 20 || header.len() < ip_len + 20 {
            return Err(VjError::BadLength);
        }
        let tcp_len = ((header[ip_len + 12] >> 4) as usize) * 4;
        if tcp_len < 20 || header.len() < ip_len + tcp_len {
            return Err(VjError::BadLength);
        }
        let total = ip_len + tcp_len;
        let (ip, tcp) = (&header[..ip_len], &header[ip_len..total]);
        self.slots[cid as usize].store(ip, tcp);
        self.last_cid = Some(cid);
        self.uncompressed += 1;
        Ok(VjDecompressResult {
            header: header[..total].to_vec(),
            ip_len,
            tcp_len,
            consumed: 1 + total,
        })
    }

    /// Reconstruct a full header from a compressed-form body, applying
    /// deltas against the dictionary entry named (explicitly or
    /// implicitly) by `body`. The trailing payload length a compressed
    /// header's IP total-length field needs is never itself delta-coded —
    /// it is simply whatever bytes of `body` remain after the last decoded
    /// field, which this function computes itself rather than taking as an
    /// input the caller would have no way to supply.
    pub fn uncompress_compressed(&mut self, body: &[u8], explicit_cid: bool) -> Result<VjDecompressResult, VjError> {
        let mut pos = 0usize;
        let cid = if explicit_cid {
            let c = *body.first().ok_or(VjError::BadLength)?;
            pos += 1;
            c
        } else {
            self.last_cid.ok_or(VjError::NotSynced)?
        };
        if cid as usize >= self.max_slot || !self.slots[cid as usize].in_use {
            return Err(VjError::UnknownConnection);
        }

        let changes = *body.get(pos).ok_or(VjError::BadLength)?;
        pos += 1;

        let mut read_field = |present: bool| -> Result<u16, VjError> {
            if !present {
                return Ok(0);
            }
            let (val, used) = Delta::decode(&body[pos..])?;
            pos += used;
            Ok(val)
        };

        let urg_delta = read_field(changes & CH_URG != 0)?;
        let win_delta = read_field(changes & CH_WINDOW != 0)?;
        let ack_delta = read_field(changes & CH_ACK != 0)?;
        let seq_delta = read_field(changes & CH_SEQ != 0)?;
        let ipid_delta = read_field(changes & CH_IPID != 0)?;

        if body.len() < pos + 2 {
            return Err(VjError::BadLength);
        }
        let checksum = [body[pos], body[pos + 1]];
        pos += 2;
        let payload_len = body.len() - pos;

        let slot = &self.slots[cid as usize];
        let ip_len = slot.ip_len;
        let tcp_len = slot.tcp_len;
        let mut header = Vec::with_capacity(ip_len + tcp_len);
        header.extend_from_slice(slot.ip());
        header.extend_from_slice(slot.tcp());

        let seq_old = u32::from_be_bytes(header[ip_len + 4..ip_len + 8].try_into().unwrap());
        let ack_old = u32::from_be_bytes(header[ip_len + 8..ip_len + 12].try_into().unwrap());
        let win_old = u16::from_be_bytes(header[ip_len + 14..ip_len + 16].try_into().unwrap());
        let urg_old = u16::from_be_bytes(header[ip_len + 18..ip_len + 20].try_into().unwrap());
        let id_old = u16::from_be_bytes(header[4..6].try_into().unwrap());

        let seq_new = seq_old.wrapping_add(seq_delta as u32);
        let ack_new = ack_old.wrapping_add(ack_delta as u32);
        let win_new = win_old.wrapping_add(win_delta);
        let urg_new = urg_old.wrapping_add(urg_delta);
        let id_new = if changes & CH_IPID != 0 {
            id_old.wrapping_add(ipid_delta)
        } else {
            id_old.wrapping_add(1)
        };

        header[ip_len + 4..ip_len + 8].copy_from_slice(&seq_new.to_be_bytes());
        header[ip_len + 8..ip_len + 12].copy_from_slice(&ack_new.to_be_bytes());
        header[ip_len + 14..ip_len + 16].copy_from_slice(&win_new.to_be_bytes());
        header[ip_len + 18..ip_len + 20].copy_from_slice(&urg_new.to_be_bytes());
        header[ip_len + 16..ip_len + 18].copy_from_slice(&checksum);
        if changes & CH_PUSH != 0 {
            header[ip_len + 13] |= TH_PSH;
        } else {
            header[ip_len + 13] &= !TH_PSH;
        }
        header[4..6].copy_from_slice(&id_new.to_be_bytes());

        let total_len = (ip_len + tcp_len + payload_len) as u16;
        header[2..4].copy_from_slice(&total_len.to_be_bytes());
        header[10] = 0;
        header[11] = 0;
        let csum = ipv4_header_checksum(&header[..ip_len]);
        header[10..12].copy_from_slice(&csum.to_be_bytes());

        self.slots[cid as usize].store(&header[..ip_len], &header[ip_len..ip_len + tcp_len]);
        self.last_cid = Some(cid);
        self.compressed += 1;

        Ok(VjDecompressResult {
            header,
            ip_len,
            tcp_len,
            consumed: pos,
        })
    }
}

impl Default for VjDecompressor {
    fn default() -> Self {
        Self::new()
    }
}

/// Combined per-unit VJ dictionary: one compressor, one decompressor.
pub struct VjState {
    pub tx: VjCompressor,
    pub rx: VjDecompressor,
}

impl VjState {
    pub const fn new() -> Self {
        Self {
            tx: VjCompressor::new(),
            rx: VjDecompressor::new(),
        }
    }

    pub fn init(&mut self, max_slots: usize) {
        self.tx.init(max_slots);
        self.rx.init(max_slots);
    }
}

impl Default for VjState {
    fn default() -> Self {
        Self::new()
    }
}
