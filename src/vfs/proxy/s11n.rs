//! Arg/result codec for the Async-Proxy transport (spec.md §4.4.2).
//!
//! A compact positional encoder, deliberately not general-purpose: it only
//! needs to carry the handful of signatures the VFS op table uses. An
//! invocation encodes as `N t1 t2 … tN  d1 d2 … dN`, where `N` is the
//! argument count (1 byte), each `ti` is a 1-byte type tag, and each `di` is
//! that type's fixed payload (strings are length-prefixed, 4 bytes little
//! endian). Writing zero arguments clears the block.
//!
//! Pure data transformation over a plain byte buffer -- no JS environment
//! needed, so this module's tests are plain `#[test]`s.

const TAG_NUMBER: u8 = 0;
const TAG_BIGINT: u8 = 1;
const TAG_BOOL: u8 = 2;
const TAG_STRING: u8 = 3;

/// One positional argument or result value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    BigInt(i64),
    Bool(bool),
    Str(String),
}

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("s11n block too small for {0} more byte(s)")]
    Truncated(usize),
    #[error("unrecognized type tag {0}")]
    BadTag(u8),
    #[error("string payload is not valid utf-8")]
    BadUtf8,
    #[error("more than 255 values do not fit in a single s11n block")]
    TooManyValues,
}

/// Encodes `values` into `block`, overwriting its contents. Writing an empty
/// slice clears the block down to a single `0` count byte.
pub fn encode(values: &[Value], block: &mut Vec<u8>) -> Result<(), CodecError> {
    block.clear();
    if values.len() > u8::MAX as usize {
        return Err(CodecError::TooManyValues);
    }
    block.push(values.len() as u8);
    for v in values {
        block.push(tag_of(v));
    }
    for v in values {
        write_payload(v, block);
    }
    Ok(())
}

fn tag_of(v: &Value) -> u8 {
    match v {
        Value::Number(_) => TAG_NUMBER,
        Value::BigInt(_) => TAG_BIGINT,
        Value::Bool(_) => TAG_BOOL,
        Value::Str(_) => TAG_STRING,
    }
}

fn write_payload(v: &Value, out: &mut Vec<u8>) {
    match v {
        Value::Number(n) => out.extend_from_slice(&n.to_le_bytes()),
        Value::BigInt(n) => out.extend_from_slice(&n.to_le_bytes()),
        Value::Bool(b) => out.extend_from_slice(&(*b as i32).to_le_bytes()),
        Value::Str(s) => {
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
    }
}

/// Decodes a block previously written by [`encode`]. Reading consumes the
/// block; when `truncate` is set, the leading count byte is zeroed
/// afterwards so a second read of the same buffer sees it as empty, per
/// spec.md §4.4.2.
pub fn decode(block: &mut [u8], truncate: bool) -> Result<Vec<Value>, CodecError> {
    let values = {
        let mut cursor = Cursor::new(block);
        let n = cursor.read_u8()? as usize;
        let tags: Vec<u8> = (0..n).map(|_| cursor.read_u8()).collect::<Result<_, _>>()?;

        let mut values = Vec::with_capacity(n);
        for tag in tags {
            let value = match tag {
                TAG_NUMBER => Value::Number(f64::from_le_bytes(cursor.read_array()?)),
                TAG_BIGINT => Value::BigInt(i64::from_le_bytes(cursor.read_array()?)),
                TAG_BOOL => Value::Bool(i32::from_le_bytes(cursor.read_array()?) != 0),
                TAG_STRING => {
                    let len = u32::from_le_bytes(cursor.read_array()?) as usize;
                    let bytes = cursor.read_slice(len)?;
                    Value::Str(
                        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::BadUtf8)?,
                    )
                }
                other => return Err(CodecError::BadTag(other)),
            };
            values.push(value);
        }
        values
    };
    if truncate {
        block[0] = 0;
    }
    Ok(values)
}

struct Cursor<'a> {
    block: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(block: &'a [u8]) -> Self {
        Self { block, pos: 0 }
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(CodecError::Truncated(len))?;
        if end > self.block.len() {
            return Err(CodecError::Truncated(end - self.block.len()));
        }
        let out = &self.block[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_slice(1)?[0])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        self.read_slice(N).map(|s| s.try_into().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_value_kind() {
        let values = vec![
            Value::Number(3.5),
            Value::BigInt(-42),
            Value::Bool(true),
            Value::Str("opfs-vfs".into()),
        ];
        let mut block = Vec::new();
        encode(&values, &mut block).unwrap();
        assert_eq!(decode(&mut block, false).unwrap(), values);
    }

    #[test]
    fn empty_values_clears_block() {
        let mut block = vec![0xFF; 16];
        encode(&[], &mut block).unwrap();
        assert_eq!(block, vec![0u8]);
        assert!(decode(&mut block, false).unwrap().is_empty());
    }

    #[test]
    fn truncated_block_is_an_error() {
        let mut block = Vec::new();
        encode(&[Value::Str("abc".into())], &mut block).unwrap();
        block.truncate(block.len() - 1);
        assert!(matches!(decode(&mut block, false), Err(CodecError::Truncated(_))));
    }

    #[test]
    fn decode_can_truncate_the_block_afterward() {
        let values = vec![Value::Number(1.0), Value::Str("x".into())];
        let mut block = Vec::new();
        encode(&values, &mut block).unwrap();

        let decoded = decode(&mut block, true).unwrap();
        assert_eq!(decoded, values);
        assert_eq!(block[0], 0, "count byte should be zeroed after a truncating read");
        assert!(decode(&mut block, false).unwrap().is_empty());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut block = vec![1u8, 0xEE, 0, 0, 0, 0];
        assert!(matches!(decode(&mut block, false), Err(CodecError::BadTag(0xEE))));
    }
}
