//! The order-preserving composite key codec.
//!
//! Encodes a [`Key`] (a sequence of [`KeyPart`]s) into a byte string whose
//! lexicographic order matches the total order over typed parts described in
//! the encoding table below, and decodes it back.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use bytes::{BufMut, BytesMut};

use crate::error::{CResult, Error};

pub const TAG_BYTES: u8 = 0x01;
pub const TAG_TEXT: u8 = 0x02;
pub const TAG_INT: u8 = 0x03;
pub const TAG_DOUBLE: u8 = 0x04;
pub const TAG_BOOL: u8 = 0x05;
const TERMINATOR: u8 = 0x00;

/// Reserved text part: legal only inside a [`crate::schema::SchemaPattern`].
pub const WILDCARD: &str = "*";

/// Maximum encoded length of a key accepted for a write (`set`, `delete`,
/// atomic mutations, checks).
pub const MAX_KEY_SIZE_WRITE: usize = 2048;
/// Maximum encoded length of a key accepted when read back (`get`, `list`).
pub const MAX_KEY_SIZE_READ: usize = 2049;

/// A single tagged value inside a [`Key`].
#[derive(Debug, Clone, PartialEq)]
pub enum KeyPart {
    Bytes(Vec<u8>),
    Text(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

impl KeyPart {
    fn tag(&self) -> u8 {
        match self {
            KeyPart::Bytes(_) => TAG_BYTES,
            KeyPart::Text(_) => TAG_TEXT,
            KeyPart::Int(_) => TAG_INT,
            KeyPart::Double(_) => TAG_DOUBLE,
            KeyPart::Bool(_) => TAG_BOOL,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, KeyPart::Text(s) if s == WILDCARD)
    }
}

/// An ordered sequence of [`KeyPart`]s. The empty sequence is legal only as
/// a `list` prefix; callers reject it for `get`/`set`/`delete`.
pub type Key = Vec<KeyPart>;

/// Encode a full key. Pure byte-layout transform; size/wildcard validation
/// happens at the call site ([`crate::db`], [`crate::atomic`]) since the
/// legal constraints differ between a user key and a schema pattern.
pub fn encode(key: &[KeyPart]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(key.len() * 9);
    for part in key {
        encode_part_into(part, &mut buf);
    }
    buf.to_vec()
}

fn encode_part_into(part: &KeyPart, buf: &mut BytesMut) {
    buf.put_u8(part.tag());
    match part {
        KeyPart::Bytes(b) => buf.put_slice(b),
        KeyPart::Text(s) => buf.put_slice(s.as_bytes()),
        KeyPart::Int(i) => buf.put_u64(*i as u64),
        KeyPart::Double(d) => buf.put_u64(d.to_bits()),
        KeyPart::Bool(b) => buf.put_u8(if *b { 0x01 } else { 0x00 }),
    }
    buf.put_u8(TERMINATOR);
}

/// Encode just one part, used by the cursor form (§4.1) and budget checks.
pub fn encode_part(part: &KeyPart) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(9);
    encode_part_into(part, &mut buf);
    buf.to_vec()
}

/// Decode a full key from its encoded byte form.
pub fn decode(bytes: &[u8]) -> CResult<Key> {
    let mut parts = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let (part, next) = decode_part_at(bytes, pos)?;
        parts.push(part);
        pos = next;
    }
    Ok(parts)
}

fn decode_part_at(bytes: &[u8], pos: usize) -> CResult<(KeyPart, usize)> {
    let tag = bytes[pos];
    let body_start = pos + 1;
    match tag {
        TAG_BYTES | TAG_TEXT => {
            let (body, next) = read_variable_body(bytes, body_start)?;
            let part = if tag == TAG_BYTES {
                KeyPart::Bytes(body)
            } else {
                KeyPart::Text(String::from_utf8(body).map_err(|e| {
                    Error::DecodeError(format!("invalid utf-8 text part: {}", e))
                })?)
            };
            Ok((part, next))
        }
        TAG_INT => {
            let (raw, next) = read_fixed_body(bytes, body_start, 8)?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(raw);
            let v = u64::from_be_bytes(arr) as i64;
            Ok((KeyPart::Int(v), next))
        }
        TAG_DOUBLE => {
            let (raw, next) = read_fixed_body(bytes, body_start, 8)?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(raw);
            Ok((KeyPart::Double(f64::from_bits(u64::from_be_bytes(arr))), next))
        }
        TAG_BOOL => {
            let (raw, next) = read_fixed_body(bytes, body_start, 1)?;
            Ok((KeyPart::Bool(raw[0] != 0x00), next))
        }
        other => Err(Error::DecodeError(format!("unknown key part tag 0x{:02x}", other))),
    }
}

/// Reads a fixed-width body of `width` bytes starting at `pos`, then
/// requires a single `0x00` terminator immediately after it.
fn read_fixed_body(bytes: &[u8], pos: usize, width: usize) -> CResult<(&[u8], usize)> {
    if pos + width > bytes.len() {
        return Err(Error::DecodeError("truncated fixed-width key part".into()));
    }
    let body = &bytes[pos..pos + width];
    let term_pos = pos + width;
    if term_pos >= bytes.len() || bytes[term_pos] != TERMINATOR {
        return Err(Error::DecodeError("fixed-width key part missing terminator".into()));
    }
    Ok((body, term_pos + 1))
}

/// Reads a variable-length body starting at `pos`, tolerating embedded
/// `0x00` bytes: the terminator is the first `0x00` followed by EOF or by a
/// valid tag byte.
fn read_variable_body(bytes: &[u8], pos: usize) -> CResult<(Vec<u8>, usize)> {
    let mut scan = pos;
    loop {
        match bytes[scan..].iter().position(|&b| b == TERMINATOR) {
            None => return Err(Error::DecodeError("unterminated key part".into())),
            Some(rel) => {
                let zero_pos = scan + rel;
                let after = zero_pos + 1;
                let terminates = after == bytes.len() || is_valid_tag(bytes[after]);
                if terminates {
                    return Ok((bytes[pos..zero_pos].to_vec(), after));
                }
                scan = after;
            }
        }
    }
}

fn is_valid_tag(b: u8) -> bool {
    (TAG_BYTES..=TAG_BOOL).contains(&b)
}

/// The list cursor form: the encoded bytes of a single part, base64-encoded
/// with padding stripped (§4.1, §4.9).
pub fn encode_cursor(part: &KeyPart) -> String {
    STANDARD_NO_PAD.encode(encode_part(part))
}

pub fn decode_cursor(cursor: &str) -> CResult<KeyPart> {
    let bytes = STANDARD_NO_PAD
        .decode(cursor)
        .map_err(|e| Error::DecodeError(format!("invalid cursor: {}", e)))?;
    let (part, next) = decode_part_at(&bytes, 0)?;
    if next != bytes.len() {
        return Err(Error::DecodeError("trailing bytes after cursor part".into()));
    }
    Ok(part)
}

/// Rejects keys that are empty (when `allow_empty` is false), exceed the
/// size cap for their direction, or carry the reserved wildcard text where
/// it is not permitted (controlled by the caller: schema patterns permit
/// it, user keys never do).
pub fn validate_key(
    key: &[KeyPart],
    allow_empty: bool,
    allow_wildcard: bool,
    max_size: usize,
) -> CResult<()> {
    if key.is_empty() && !allow_empty {
        return Err(Error::InvalidKey("key must not be empty".into()));
    }
    if !allow_wildcard {
        for part in key {
            if part.is_wildcard() {
                return Err(Error::InvalidKey(
                    "the reserved wildcard text \"*\" may not appear in a user-writable key".into(),
                ));
            }
        }
    }
    let encoded_len = key.iter().map(|p| encode_part(p).len()).sum::<usize>();
    if encoded_len > max_size {
        return Err(Error::InvalidKey(format!(
            "encoded key length {} exceeds the limit of {} bytes",
            encoded_len, max_size
        )));
    }
    Ok(())
}
