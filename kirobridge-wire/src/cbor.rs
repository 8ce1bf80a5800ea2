//! Minimal binary envelope codec for the web portal RPC protocol.
//!
//! The portal speaks Smithy RPC-v2 with CBOR-encoded (RFC 8949) bodies.
//! This is deliberately not a general-purpose CBOR implementation: it
//! covers exactly the shapes the envelope uses (maps with text keys,
//! arrays, text, integers, booleans, floats, null) over a small [`Value`]
//! sum type.
//!
//! Encoding always emits definite lengths. Decoding is lenient: the
//! backend is undocumented, so indefinite-length strings/containers, tags
//! (discarded), and half/single-precision floats are accepted too.

use thiserror::Error;

// ============================================================================
// Value
// ============================================================================

/// A decoded envelope value.
///
/// Maps preserve insertion order; the portal treats them as JSON-like
/// objects keyed by text.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null (or undefined, folded into null on decode).
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer. The envelope never uses values outside `i64`.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Raw byte string.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Ordered key/value pairs.
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Builds a map from string-keyed entries, preserving order.
    pub fn object<I, K>(entries: I) -> Value
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (Value::Text(k.into()), v))
                .collect(),
        )
    }

    /// Looks up a text key in a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find_map(|(k, v)| match k {
                Value::Text(t) if t == key => Some(v),
                _ => None,
            }),
            _ => None,
        }
    }

    /// Text content, if this is a text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, widening floats with integral values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            #[allow(clippy::cast_possible_truncation)]
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Non-negative integer content.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|n| u64::try_from(n).ok())
    }

    /// Float content, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            #[allow(clippy::cast_precision_loss)]
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Boolean content.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Array content.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns true for null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

// ============================================================================
// Codec Error
// ============================================================================

/// Error type for envelope encode/decode.
#[derive(Debug, Error)]
pub enum CborError {
    /// Input ended inside a value.
    #[error("Unexpected end of input at byte {0}")]
    UnexpectedEof(usize),

    /// Bytes left over after the top-level value.
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    /// Header byte we do not support.
    #[error("Unsupported header byte 0x{0:02x} at byte {1}")]
    Unsupported(u8, usize),

    /// Integer outside the `i64` range the envelope uses.
    #[error("Integer out of range at byte {0}")]
    IntegerOverflow(usize),

    /// Text string that is not valid UTF-8.
    #[error("Invalid UTF-8 in text string at byte {0}")]
    InvalidUtf8(usize),

    /// `break` stop code outside an indefinite-length container.
    #[error("Unexpected break code at byte {0}")]
    UnexpectedBreak(usize),
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a value into envelope bytes.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(0xf6),
        Value::Bool(false) => out.push(0xf4),
        Value::Bool(true) => out.push(0xf5),
        Value::Int(n) => {
            if *n >= 0 {
                #[allow(clippy::cast_sign_loss)]
                write_header(0, *n as u64, out);
            } else {
                // Major type 1 encodes -1 - n
                #[allow(clippy::cast_sign_loss)]
                write_header(1, !(*n) as u64, out);
            }
        }
        Value::Float(f) => {
            out.push(0xfb);
            out.extend_from_slice(&f.to_be_bytes());
        }
        Value::Bytes(bytes) => {
            write_header(2, bytes.len() as u64, out);
            out.extend_from_slice(bytes);
        }
        Value::Text(text) => {
            write_header(3, text.len() as u64, out);
            out.extend_from_slice(text.as_bytes());
        }
        Value::Array(items) => {
            write_header(4, items.len() as u64, out);
            for item in items {
                encode_into(item, out);
            }
        }
        Value::Map(entries) => {
            write_header(5, entries.len() as u64, out);
            for (key, val) in entries {
                encode_into(key, out);
                encode_into(val, out);
            }
        }
    }
}

fn write_header(major: u8, arg: u64, out: &mut Vec<u8>) {
    let major = major << 5;
    if arg < 24 {
        #[allow(clippy::cast_possible_truncation)]
        out.push(major | arg as u8);
    } else if arg <= u64::from(u8::MAX) {
        out.push(major | 24);
        #[allow(clippy::cast_possible_truncation)]
        out.push(arg as u8);
    } else if arg <= u64::from(u16::MAX) {
        out.push(major | 25);
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(arg as u16).to_be_bytes());
    } else if arg <= u64::from(u32::MAX) {
        out.push(major | 26);
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(arg as u32).to_be_bytes());
    } else {
        out.push(major | 27);
        out.extend_from_slice(&arg.to_be_bytes());
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes one value from envelope bytes.
///
/// # Errors
///
/// Returns an error on truncated input, unsupported header bytes, invalid
/// UTF-8 text, or trailing bytes after the top-level value.
pub fn decode(data: &[u8]) -> Result<Value, CborError> {
    let mut decoder = Decoder { data, pos: 0 };
    let value = decoder.decode_value()?;
    if decoder.pos != data.len() {
        return Err(CborError::TrailingBytes(data.len() - decoder.pos));
    }
    Ok(value)
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

const BREAK: u8 = 0xff;

impl Decoder<'_> {
    fn decode_value(&mut self) -> Result<Value, CborError> {
        let start = self.pos;
        let byte = self.read_byte()?;
        let major = byte >> 5;
        let info = byte & 0x1f;

        match major {
            0 => {
                let n = self.read_arg(info, start)?;
                i64::try_from(n)
                    .map(Value::Int)
                    .map_err(|_| CborError::IntegerOverflow(start))
            }
            1 => {
                let n = self.read_arg(info, start)?;
                i64::try_from(n)
                    .map(|n| Value::Int(-1 - n))
                    .map_err(|_| CborError::IntegerOverflow(start))
            }
            2 => self.decode_bytes(info, start).map(Value::Bytes),
            3 => {
                let bytes = self.decode_bytes(info, start)?;
                String::from_utf8(bytes)
                    .map(Value::Text)
                    .map_err(|_| CborError::InvalidUtf8(start))
            }
            4 => self.decode_array(info, start),
            5 => self.decode_map(info, start),
            6 => {
                // Tag: the envelope carries none we care about, decode the
                // tagged value and discard the tag number.
                let _tag = self.read_arg(info, start)?;
                self.decode_value()
            }
            7 => self.decode_simple(info, byte, start),
            _ => unreachable!("major type is 3 bits"),
        }
    }

    fn decode_simple(&mut self, info: u8, byte: u8, start: usize) -> Result<Value, CborError> {
        match info {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            22 | 23 => Ok(Value::Null),
            25 => {
                let raw = u16::from_be_bytes(self.read_exact::<2>()?);
                Ok(Value::Float(half_to_f64(raw)))
            }
            26 => {
                let raw = u32::from_be_bytes(self.read_exact::<4>()?);
                Ok(Value::Float(f64::from(f32::from_bits(raw))))
            }
            27 => {
                let raw = u64::from_be_bytes(self.read_exact::<8>()?);
                Ok(Value::Float(f64::from_bits(raw)))
            }
            31 => Err(CborError::UnexpectedBreak(start)),
            _ => Err(CborError::Unsupported(byte, start)),
        }
    }

    fn decode_bytes(&mut self, info: u8, start: usize) -> Result<Vec<u8>, CborError> {
        if info == 31 {
            // Indefinite: concatenation of definite chunks until break.
            let mut out = Vec::new();
            loop {
                if self.peek()? == BREAK {
                    self.pos += 1;
                    return Ok(out);
                }
                let chunk_start = self.pos;
                let byte = self.read_byte()?;
                let chunk_info = byte & 0x1f;
                let len = self.read_arg(chunk_info, chunk_start)?;
                out.extend_from_slice(self.read_slice(len, chunk_start)?);
            }
        }
        let len = self.read_arg(info, start)?;
        Ok(self.read_slice(len, start)?.to_vec())
    }

    fn decode_array(&mut self, info: u8, start: usize) -> Result<Value, CborError> {
        let mut items = Vec::new();
        if info == 31 {
            loop {
                if self.peek()? == BREAK {
                    self.pos += 1;
                    break;
                }
                items.push(self.decode_value()?);
            }
        } else {
            let len = self.read_arg(info, start)?;
            for _ in 0..len {
                items.push(self.decode_value()?);
            }
        }
        Ok(Value::Array(items))
    }

    fn decode_map(&mut self, info: u8, start: usize) -> Result<Value, CborError> {
        let mut entries = Vec::new();
        if info == 31 {
            loop {
                if self.peek()? == BREAK {
                    self.pos += 1;
                    break;
                }
                let key = self.decode_value()?;
                let val = self.decode_value()?;
                entries.push((key, val));
            }
        } else {
            let len = self.read_arg(info, start)?;
            for _ in 0..len {
                let key = self.decode_value()?;
                let val = self.decode_value()?;
                entries.push((key, val));
            }
        }
        Ok(Value::Map(entries))
    }

    fn read_arg(&mut self, info: u8, start: usize) -> Result<u64, CborError> {
        match info {
            0..=23 => Ok(u64::from(info)),
            24 => Ok(u64::from(self.read_byte()?)),
            25 => Ok(u64::from(u16::from_be_bytes(self.read_exact::<2>()?))),
            26 => Ok(u64::from(u32::from_be_bytes(self.read_exact::<4>()?))),
            27 => Ok(u64::from_be_bytes(self.read_exact::<8>()?)),
            _ => Err(CborError::Unsupported(info, start)),
        }
    }

    fn peek(&self) -> Result<u8, CborError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(CborError::UnexpectedEof(self.pos))
    }

    fn read_byte(&mut self) -> Result<u8, CborError> {
        let byte = self.peek()?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_exact<const N: usize>(&mut self) -> Result<[u8; N], CborError> {
        let slice = self.read_slice(N as u64, self.pos)?;
        let mut buf = [0u8; N];
        buf.copy_from_slice(slice);
        Ok(buf)
    }

    fn read_slice(&mut self, len: u64, start: usize) -> Result<&[u8], CborError> {
        let len = usize::try_from(len).map_err(|_| CborError::IntegerOverflow(start))?;
        let end = self
            .pos
            .checked_add(len)
            .ok_or(CborError::IntegerOverflow(start))?;
        if end > self.data.len() {
            return Err(CborError::UnexpectedEof(self.pos));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}

/// IEEE 754 half-precision to f64.
fn half_to_f64(raw: u16) -> f64 {
    let sign = f64::from(i32::from(raw >> 15) * -2 + 1);
    let exponent = u32::from((raw >> 10) & 0x1f);
    let mantissa = f64::from(raw & 0x3ff);
    let magnitude = match exponent {
        0 => mantissa * 2f64.powi(-24),
        31 => {
            if mantissa == 0.0 {
                f64::INFINITY
            } else {
                f64::NAN
            }
        }
        _ => (mantissa / 1024.0 + 1.0) * 2f64.powi(i32::try_from(exponent).unwrap_or(0) - 15),
    };
    sign * magnitude
}

// ============================================================================
// Tests
// ============================================================================
