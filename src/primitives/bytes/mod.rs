#![forbid(unsafe_code)]
//! Order-preserving encoders for row keys, column keys and sort-key values.

use crate::error::{GraphError, Result};

fn truncated(what: &'static str) -> GraphError {
    GraphError::Corruption(format!("{what} truncated"))
}

pub mod ord {
    //! Fixed-width big-endian encoders whose byte order matches numeric order.

    use super::truncated;
    use crate::error::{GraphError, Result};

    const SIGN_BIT: u64 = 1 << 63;

    /// Appends `v` in big-endian order.
    pub fn put_u64_be(dst: &mut Vec<u8>, v: u64) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Reads a big-endian u64 at `off`, advancing it.
    pub fn get_u64_be(src: &[u8], off: &mut usize) -> Result<u64> {
        let end = *off + 8;
        let head = src.get(*off..end).ok_or_else(|| truncated("u64"))?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(head);
        *off = end;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Appends `v` in big-endian order.
    pub fn put_u32_be(dst: &mut Vec<u8>, v: u32) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Reads a big-endian u32 at `off`, advancing it.
    pub fn get_u32_be(src: &[u8], off: &mut usize) -> Result<u32> {
        let end = *off + 4;
        let head = src.get(*off..end).ok_or_else(|| truncated("u32"))?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(head);
        *off = end;
        Ok(u32::from_be_bytes(bytes))
    }

    /// Encodes a signed i64 with the sign bit flipped so negatives sort first.
    pub fn put_i64_be(dst: &mut Vec<u8>, v: i64) {
        put_u64_be(dst, (v as u64) ^ SIGN_BIT);
    }

    /// Decodes a sign-flipped i64.
    pub fn get_i64_be(src: &[u8], off: &mut usize) -> Result<i64> {
        Ok((get_u64_be(src, off)? ^ SIGN_BIT) as i64)
    }

    /// Encodes an f64 so that byte order matches `total_cmp` order.
    pub fn put_f64_be(dst: &mut Vec<u8>, v: f64) {
        let bits = v.to_bits();
        let encoded = if bits & SIGN_BIT != 0 {
            !bits
        } else {
            bits ^ SIGN_BIT
        };
        put_u64_be(dst, encoded);
    }

    /// Decodes an order-preserving f64.
    pub fn get_f64_be(src: &[u8], off: &mut usize) -> Result<f64> {
        let encoded = get_u64_be(src, off)?;
        let bits = if encoded & SIGN_BIT != 0 {
            encoded ^ SIGN_BIT
        } else {
            !encoded
        };
        Ok(f64::from_bits(bits))
    }

    /// Appends a string with `0x00` escaped as `0x00 0xFF` and a `0x00 0x00` terminator.
    ///
    /// The encoding is prefix-free and shorter strings sort before their extensions.
    pub fn put_str_escaped(dst: &mut Vec<u8>, s: &str) {
        for &b in s.as_bytes() {
            dst.push(b);
            if b == 0x00 {
                dst.push(0xFF);
            }
        }
        dst.extend_from_slice(&[0x00, 0x00]);
    }

    /// Reads a string written by [`put_str_escaped`].
    pub fn get_str_escaped(src: &[u8], off: &mut usize) -> Result<String> {
        let mut out = Vec::new();
        loop {
            let b = *src.get(*off).ok_or_else(|| truncated("string key"))?;
            *off += 1;
            if b != 0x00 {
                out.push(b);
                continue;
            }
            let next = *src.get(*off).ok_or_else(|| truncated("string key"))?;
            *off += 1;
            match next {
                0x00 => break,
                0xFF => out.push(0x00),
                other => {
                    return Err(GraphError::Corruption(format!(
                        "invalid string escape byte {other:#04x}"
                    )))
                }
            }
        }
        String::from_utf8(out).map_err(|_| GraphError::Corruption("string key not UTF-8".into()))
    }
}

pub mod value {
    //! Tagged, order-preserving encoding of optional [`Value`]s.
    //!
    //! A missing value encodes as the single byte [`NULL_MARKER`], which sorts after every
    //! tagged value. Descending components are the bitwise complement of the ascending bytes.

    use super::{ord, truncated};
    use crate::error::{GraphError, Result};
    use crate::types::{Order, Value, VertexId};

    /// Encoding of an absent value; the largest possible leading byte.
    pub const NULL_MARKER: u8 = 0xFF;

    const TAG_BOOL: u8 = 0x10;
    const TAG_INT: u8 = 0x20;
    const TAG_FLOAT: u8 = 0x30;
    const TAG_STRING: u8 = 0x40;
    const TAG_VERTEX: u8 = 0x50;

    /// Appends the encoding of `value` in the given sort order.
    pub fn encode(dst: &mut Vec<u8>, value: Option<&Value>, order: Order) {
        let start = dst.len();
        match value {
            None => dst.push(NULL_MARKER),
            Some(Value::Bool(v)) => {
                dst.push(TAG_BOOL);
                dst.push(u8::from(*v));
            }
            Some(Value::Int(v)) => {
                dst.push(TAG_INT);
                ord::put_i64_be(dst, *v);
            }
            Some(Value::Float(v)) => {
                dst.push(TAG_FLOAT);
                ord::put_f64_be(dst, *v);
            }
            Some(Value::String(v)) => {
                dst.push(TAG_STRING);
                ord::put_str_escaped(dst, v);
            }
            Some(Value::Vertex(v)) => {
                dst.push(TAG_VERTEX);
                ord::put_u64_be(dst, v.0);
            }
        }
        if order == Order::Desc {
            for b in &mut dst[start..] {
                *b = !*b;
            }
        }
    }

    /// Decodes one value written by [`encode`] at `off`, advancing it.
    pub fn decode(src: &[u8], off: &mut usize, order: Order) -> Result<Option<Value>> {
        if order == Order::Desc {
            let flipped: Vec<u8> = src[(*off).min(src.len())..].iter().map(|b| !b).collect();
            let mut local = 0;
            let value = decode(&flipped, &mut local, Order::Asc)?;
            *off += local;
            return Ok(value);
        }
        let tag = *src.get(*off).ok_or_else(|| truncated("value tag"))?;
        *off += 1;
        let value = match tag {
            NULL_MARKER => return Ok(None),
            TAG_BOOL => {
                let b = *src.get(*off).ok_or_else(|| truncated("bool value"))?;
                *off += 1;
                Value::Bool(b != 0)
            }
            TAG_INT => Value::Int(ord::get_i64_be(src, off)?),
            TAG_FLOAT => Value::Float(ord::get_f64_be(src, off)?),
            TAG_STRING => Value::String(ord::get_str_escaped(src, off)?),
            TAG_VERTEX => Value::Vertex(VertexId(ord::get_u64_be(src, off)?)),
            other => {
                return Err(GraphError::Corruption(format!(
                    "unknown value tag {other:#04x}"
                )))
            }
        };
        Ok(Some(value))
    }
}

/// Returns the smallest byte string greater than every string starting with `prefix`.
///
/// `None` when `prefix` is empty or consists only of `0xFF` bytes.
pub fn next_prefix(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.pop() {
        if last != 0xFF {
            out.push(last + 1);
            return Some(out);
        }
    }
    None
}

/// Like [`next_prefix`] but reports a missing successor as corruption.
pub fn successor(prefix: &[u8]) -> Result<Vec<u8>> {
    next_prefix(prefix).ok_or_else(|| GraphError::Corruption("key prefix has no successor".into()))
}
