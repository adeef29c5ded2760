//! Wire encoding for the signature share messages.
//!
//! # Primitives
//!
//! ```text
//! CompactSize  1 byte (< 0xfd) | 0xfd u16 | 0xfe u32 | 0xff u64, little-endian,
//!              shortest form required
//! VARINT       base-128, MSB-first, continuation bit 0x80, each continuation
//!              byte biased by one (Bitcoin "VarInt")
//! member       u16 little-endian
//! hash         32 raw bytes
//! llmq type    1 byte
//! signature    96 raw bytes
//! bitset       CompactSize bit count, then ceil(n/8) bytes, LSB-first
//! ```

use crate::domain::{
    BatchedSigShares, LazySignature, SessionAnnounce, SharesInventory, SigShare, SignId,
    SIGNATURE_SIZE,
};
use shared_types::{Hash, LlmqType};
use thiserror::Error;

/// Largest CompactSize accepted for any length prefix.
pub const MAX_COMPACT_SIZE: u64 = 0x0200_0000;

/// Upper bound on speculative vector preallocation while decoding.
const MAX_PREALLOC: usize = 1_024;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unexpected end of payload: need {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("Non-canonical CompactSize encoding")]
    NonCanonicalCompactSize,

    #[error("CompactSize {0} exceeds maximum")]
    OversizedLength(u64),

    #[error("VARINT does not fit in 32 bits")]
    VarIntOverflow,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// Append-only encoder.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16_le(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_hash(&mut self, hash: &Hash) {
        self.buf.extend_from_slice(hash);
    }

    pub fn write_compact_size(&mut self, value: u64) {
        match value {
            0..=0xfc => self.buf.push(value as u8),
            0xfd..=0xffff => {
                self.buf.push(0xfd);
                self.buf.extend_from_slice(&(value as u16).to_le_bytes());
            }
            0x1_0000..=0xffff_ffff => {
                self.buf.push(0xfe);
                self.buf.extend_from_slice(&(value as u32).to_le_bytes());
            }
            _ => {
                self.buf.push(0xff);
                self.buf.extend_from_slice(&value.to_le_bytes());
            }
        }
    }

    pub fn write_varint(&mut self, value: u32) {
        let mut n = u64::from(value);
        let mut tmp = [0u8; 10];
        let mut len = 0;
        loop {
            tmp[len] = (n & 0x7f) as u8 | if len > 0 { 0x80 } else { 0x00 };
            if n <= 0x7f {
                break;
            }
            n = (n >> 7) - 1;
            len += 1;
        }
        for byte in tmp[..=len].iter().rev() {
            self.buf.push(*byte);
        }
    }

    pub fn write_bitset(&mut self, inv: &SharesInventory) {
        self.write_compact_size(inv.len() as u64);
        self.write_bytes(&inv.to_packed());
    }

    pub fn write_signature(&mut self, sig: &LazySignature) {
        // Fixed-width field; pad or cut anything that is not 96 bytes.
        let bytes = sig.as_bytes();
        let mut fixed = [0u8; SIGNATURE_SIZE];
        let n = bytes.len().min(SIGNATURE_SIZE);
        fixed[..n].copy_from_slice(&bytes[..n]);
        self.write_bytes(&fixed);
    }
}

/// Cursor over an untrusted payload.
#[derive(Debug)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Fails if any bytes are left unread.
    pub fn finish(&self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16, CodecError> {
        let mut bytes = [0u8; 2];
        bytes.copy_from_slice(self.read_bytes(2)?);
        Ok(u16::from_le_bytes(bytes))
    }

    pub fn read_hash(&mut self) -> Result<Hash, CodecError> {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(self.read_bytes(32)?);
        Ok(hash)
    }

    pub fn read_compact_size(&mut self) -> Result<u64, CodecError> {
        let value = match self.read_u8()? {
            tag @ 0..=0xfc => u64::from(tag),
            0xfd => {
                let mut bytes = [0u8; 2];
                bytes.copy_from_slice(self.read_bytes(2)?);
                let v = u64::from(u16::from_le_bytes(bytes));
                if v < 0xfd {
                    return Err(CodecError::NonCanonicalCompactSize);
                }
                v
            }
            0xfe => {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(self.read_bytes(4)?);
                let v = u64::from(u32::from_le_bytes(bytes));
                if v < 0x1_0000 {
                    return Err(CodecError::NonCanonicalCompactSize);
                }
                v
            }
            0xff => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(self.read_bytes(8)?);
                let v = u64::from_le_bytes(bytes);
                if v < 0x1_0000_0000 {
                    return Err(CodecError::NonCanonicalCompactSize);
                }
                v
            }
        };
        if value > MAX_COMPACT_SIZE {
            return Err(CodecError::OversizedLength(value));
        }
        Ok(value)
    }

    /// Length prefix for a vector, as a `usize`.
    pub fn read_len(&mut self) -> Result<usize, CodecError> {
        let value = self.read_compact_size()?;
        usize::try_from(value).map_err(|_| CodecError::OversizedLength(value))
    }

    pub fn read_varint(&mut self) -> Result<u32, CodecError> {
        let mut n: u64 = 0;
        loop {
            let byte = self.read_u8()?;
            if n > (u64::from(u32::MAX) >> 7) {
                return Err(CodecError::VarIntOverflow);
            }
            n = (n << 7) | u64::from(byte & 0x7f);
            if byte & 0x80 == 0 {
                return u32::try_from(n).map_err(|_| CodecError::VarIntOverflow);
            }
            if n == u64::from(u32::MAX) {
                return Err(CodecError::VarIntOverflow);
            }
            n += 1;
        }
    }

    pub fn read_bitset(&mut self, session_id: u32) -> Result<SharesInventory, CodecError> {
        let size = self.read_len()?;
        let packed = self.read_bytes(size.div_ceil(8))?;
        Ok(SharesInventory::from_packed(session_id, size, packed))
    }

    pub fn read_signature(&mut self) -> Result<LazySignature, CodecError> {
        Ok(LazySignature::from_bytes(self.read_bytes(SIGNATURE_SIZE)?.to_vec()))
    }

    pub fn read_llmq_type(&mut self) -> Result<LlmqType, CodecError> {
        Ok(LlmqType(self.read_u8()?))
    }

    /// Reads a CompactSize-prefixed vector.
    pub fn read_vec<T, F>(&mut self, mut read_item: F) -> Result<Vec<T>, CodecError>
    where
        F: FnMut(&mut Self) -> Result<T, CodecError>,
    {
        let count = self.read_len()?;
        let mut items = Vec::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            items.push(read_item(self)?);
        }
        Ok(items)
    }
}

// ===== MESSAGE BODIES =====

/// `[session_id: VARINT][llmq_type: 1][quorum_hash: 32][id: 32][msg_hash: 32]`
pub fn write_session_announce(w: &mut Writer, ann: &SessionAnnounce) {
    w.write_varint(ann.session_id);
    w.write_u8(ann.sign_id.llmq_type.0);
    w.write_hash(&ann.sign_id.quorum_hash);
    w.write_hash(&ann.sign_id.id);
    w.write_hash(&ann.sign_id.msg_hash);
}

pub fn read_session_announce(r: &mut Reader<'_>) -> Result<SessionAnnounce, CodecError> {
    let session_id = r.read_varint()?;
    let llmq_type = r.read_llmq_type()?;
    let quorum_hash = r.read_hash()?;
    let id = r.read_hash()?;
    let msg_hash = r.read_hash()?;
    Ok(SessionAnnounce {
        session_id,
        sign_id: SignId::new(llmq_type, quorum_hash, id, msg_hash),
    })
}

/// `[session_id: VARINT][bitset]`
pub fn write_inventory(w: &mut Writer, inv: &SharesInventory) {
    w.write_varint(inv.session_id);
    w.write_bitset(inv);
}

pub fn read_inventory(r: &mut Reader<'_>) -> Result<SharesInventory, CodecError> {
    let session_id = r.read_varint()?;
    r.read_bitset(session_id)
}

/// `[session_id: VARINT][count: CompactSize][(member: u16, sig: 96) * count]`
pub fn write_batched(w: &mut Writer, batch: &BatchedSigShares) {
    w.write_varint(batch.session_id);
    w.write_compact_size(batch.sig_shares.len() as u64);
    for (member, sig) in &batch.sig_shares {
        w.write_u16_le(*member);
        w.write_signature(sig);
    }
}

pub fn read_batched(r: &mut Reader<'_>) -> Result<BatchedSigShares, CodecError> {
    let session_id = r.read_varint()?;
    let sig_shares = r.read_vec(|r| {
        let member = r.read_u16_le()?;
        let sig = r.read_signature()?;
        Ok((member, sig))
    })?;
    Ok(BatchedSigShares {
        session_id,
        sig_shares,
    })
}

/// `[llmq_type: 1][quorum_hash: 32][member: u16][id: 32][msg_hash: 32][sig: 96]`
pub fn write_sig_share(w: &mut Writer, share: &SigShare) {
    w.write_u8(share.llmq_type.0);
    w.write_hash(&share.quorum_hash);
    w.write_u16_le(share.quorum_member);
    w.write_hash(&share.id);
    w.write_hash(&share.msg_hash);
    w.write_signature(&share.sig_share);
}

pub fn read_sig_share(r: &mut Reader<'_>) -> Result<SigShare, CodecError> {
    let llmq_type = r.read_llmq_type()?;
    let quorum_hash = r.read_hash()?;
    let member = r.read_u16_le()?;
    let id = r.read_hash()?;
    let msg_hash = r.read_hash()?;
    let sig = r.read_signature()?;
    Ok(SigShare::new(
        &SignId::new(llmq_type, quorum_hash, id, msg_hash),
        member,
        sig,
    ))
}
