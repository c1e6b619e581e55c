//! Binary layouts and text encodings for primitive objects.
//!
//! A [`NativeFormat`] is a single-value struct layout string such as `<I`
//! (little-endian unsigned 32-bit) or `>h` (big-endian signed 16-bit).

use crate::error::{CoreError, CoreResult};
use half::f16;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    Little,
    Big,
}

/// The value code of a layout string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatCode {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F16,
    F32,
    F64,
    Bool,
    Char,
}

impl FormatCode {
    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'b' => FormatCode::I8,
            'B' => FormatCode::U8,
            'h' => FormatCode::I16,
            'H' => FormatCode::U16,
            'i' | 'l' => FormatCode::I32,
            'I' | 'L' => FormatCode::U32,
            'q' => FormatCode::I64,
            'Q' => FormatCode::U64,
            'e' => FormatCode::F16,
            'f' => FormatCode::F32,
            'd' => FormatCode::F64,
            '?' => FormatCode::Bool,
            'c' => FormatCode::Char,
            _ => return None,
        })
    }

    fn as_char(self) -> char {
        match self {
            FormatCode::I8 => 'b',
            FormatCode::U8 => 'B',
            FormatCode::I16 => 'h',
            FormatCode::U16 => 'H',
            FormatCode::I32 => 'i',
            FormatCode::U32 => 'I',
            FormatCode::I64 => 'q',
            FormatCode::U64 => 'Q',
            FormatCode::F16 => 'e',
            FormatCode::F32 => 'f',
            FormatCode::F64 => 'd',
            FormatCode::Bool => '?',
            FormatCode::Char => 'c',
        }
    }
}

/// A single-value binary layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeFormat {
    pub endian: Endian,
    pub code: FormatCode,
}

impl NativeFormat {
    pub const fn new(endian: Endian, code: FormatCode) -> Self {
        NativeFormat { endian, code }
    }

    pub const fn little(code: FormatCode) -> Self {
        Self::new(Endian::Little, code)
    }

    /// Width in bytes.
    pub fn size(&self) -> usize {
        match self.code {
            FormatCode::I8 | FormatCode::U8 | FormatCode::Bool | FormatCode::Char => 1,
            FormatCode::I16 | FormatCode::U16 | FormatCode::F16 => 2,
            FormatCode::I32 | FormatCode::U32 | FormatCode::F32 => 4,
            FormatCode::I64 | FormatCode::U64 | FormatCode::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self.code, FormatCode::F16 | FormatCode::F32 | FormatCode::F64)
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self.code,
            FormatCode::I8 | FormatCode::I16 | FormatCode::I32 | FormatCode::I64
        )
    }

    /// Integer range `(min, max)` representable by this layout.
    fn int_range(&self) -> (i128, i128) {
        match self.code {
            FormatCode::Bool => (0, 1),
            FormatCode::Char => (0, u8::MAX as i128),
            _ if self.is_signed() => {
                let bits = self.size() as u32 * 8;
                (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
            }
            _ => (0, (1i128 << (self.size() as u32 * 8)) - 1),
        }
    }

    /// Unsigned value of `data` in this layout's byte order.
    fn raw(&self, data: &[u8]) -> CoreResult<u64> {
        let size = self.size();
        if data.len() < size {
            return Err(CoreError::InvalidData(format!(
                "Format {} needs {} bytes, got {}",
                self,
                size,
                data.len()
            )));
        }
        let mut buf = [0u8; 8];
        match self.endian {
            Endian::Little => buf[..size].copy_from_slice(&data[..size]),
            Endian::Big => {
                for (i, b) in data[..size].iter().rev().enumerate() {
                    buf[i] = *b;
                }
            }
        }
        Ok(u64::from_le_bytes(buf))
    }

    fn from_raw(&self, raw: u64) -> Vec<u8> {
        let bytes = raw.to_le_bytes();
        let mut out = bytes[..self.size()].to_vec();
        if self.endian == Endian::Big {
            out.reverse();
        }
        out
    }

    /// Decode an integer value (also used for bool and char layouts).
    pub fn decode_int(&self, data: &[u8]) -> CoreResult<i128> {
        if self.is_float() {
            return Err(CoreError::type_error(format!("Format {} is not an integer layout", self)));
        }
        let raw = self.raw(data)?;
        Ok(match self.code {
            FormatCode::I8 => raw as u8 as i8 as i128,
            FormatCode::I16 => raw as u16 as i16 as i128,
            FormatCode::I32 => raw as u32 as i32 as i128,
            FormatCode::I64 => raw as i64 as i128,
            FormatCode::Bool => (raw != 0) as i128,
            _ => raw as i128,
        })
    }

    pub fn decode_float(&self, data: &[u8]) -> CoreResult<f64> {
        let raw = self.raw(data)?;
        match self.code {
            FormatCode::F16 => Ok(f16::from_bits(raw as u16).to_f64()),
            FormatCode::F32 => Ok(f32::from_bits(raw as u32) as f64),
            FormatCode::F64 => Ok(f64::from_bits(raw)),
            _ => Err(CoreError::type_error(format!("Format {} is not a float layout", self))),
        }
    }

    /// Encode an integer, rejecting values outside the layout's range.
    pub fn encode_int(&self, value: i128) -> CoreResult<Vec<u8>> {
        if self.is_float() {
            return Err(CoreError::type_error(format!("Format {} is not an integer layout", self)));
        }
        let (min, max) = self.int_range();
        if value < min || value > max {
            return Err(CoreError::InvalidParameter(format!(
                "Value {} out of range for format {}",
                value, self
            )));
        }
        Ok(self.from_raw(value as u64))
    }

    pub fn encode_float(&self, value: f64) -> CoreResult<Vec<u8>> {
        let raw = match self.code {
            FormatCode::F16 => f16::from_f64(value).to_bits() as u64,
            FormatCode::F32 => (value as f32).to_bits() as u64,
            FormatCode::F64 => value.to_bits(),
            _ => return Err(CoreError::type_error(format!("Format {} is not a float layout", self))),
        };
        Ok(self.from_raw(raw))
    }
}

impl FromStr for NativeFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let mut chars = s.chars();
        let (endian, code) = match (chars.next(), chars.next(), chars.next()) {
            (Some(prefix @ ('<' | '>' | '=' | '!' | '@')), Some(code), None) => {
                let endian = if matches!(prefix, '>' | '!') {
                    Endian::Big
                } else {
                    Endian::Little
                };
                (endian, code)
            }
            (Some(code), None, None) => (Endian::Little, code),
            _ => return Err(CoreError::InvalidParameter(format!("Unsupported struct format: {}", s))),
        };
        let code = FormatCode::from_char(code)
            .ok_or_else(|| CoreError::InvalidParameter(format!("Unsupported struct format: {}", s)))?;
        Ok(NativeFormat { endian, code })
    }
}

impl fmt::Display for NativeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.endian {
            Endian::Little => '<',
            Endian::Big => '>',
        };
        write!(f, "{}{}", prefix, self.code.as_char())
    }
}

/// Text encodings understood by string objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Utf8,
    Latin1,
    Utf16Le,
    Ascii,
}

impl FromStr for Encoding {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(Encoding::Latin1),
            "utf-16-le" | "utf-16le" | "utf16le" => Ok(Encoding::Utf16Le),
            "ascii" | "us-ascii" => Ok(Encoding::Ascii),
            _ => Err(CoreError::InvalidParameter(format!("Unknown encoding: {}", s))),
        }
    }
}

/// How undecodable input is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EncodingErrors {
    #[default]
    Strict,
    Replace,
    Ignore,
}

impl FromStr for EncodingErrors {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "strict" => Ok(EncodingErrors::Strict),
            "replace" => Ok(EncodingErrors::Replace),
            "ignore" => Ok(EncodingErrors::Ignore),
            _ => Err(CoreError::InvalidParameter(format!("Unknown error handler: {}", s))),
        }
    }
}

impl Encoding {
    /// Decode `data`, handling invalid input per `errors`.
    pub fn decode(&self, data: &[u8], errors: EncodingErrors) -> CoreResult<String> {
        let invalid = |what: &str| -> CoreResult<Option<char>> {
            match errors {
                EncodingErrors::Strict => Err(CoreError::InvalidData(format!("Cannot decode {} as {:?}", what, self))),
                EncodingErrors::Replace => Ok(Some(char::REPLACEMENT_CHARACTER)),
                EncodingErrors::Ignore => Ok(None),
            }
        };

        let mut out = String::with_capacity(data.len());
        match self {
            Encoding::Utf8 => {
                for chunk in data.utf8_chunks() {
                    out.push_str(chunk.valid());
                    if !chunk.invalid().is_empty() {
                        out.extend(invalid("invalid utf-8 sequence")?);
                    }
                }
            }
            Encoding::Latin1 => out.extend(data.iter().map(|b| *b as char)),
            Encoding::Ascii => {
                for b in data {
                    if b.is_ascii() {
                        out.push(*b as char);
                    } else {
                        out.extend(invalid("non-ascii byte")?);
                    }
                }
            }
            Encoding::Utf16Le => {
                let units = data.chunks_exact(2).map(|p| u16::from_le_bytes([p[0], p[1]]));
                for decoded in char::decode_utf16(units) {
                    match decoded {
                        Ok(c) => out.push(c),
                        Err(_) => out.extend(invalid("unpaired surrogate")?),
                    }
                }
                if data.len() % 2 != 0 {
                    out.extend(invalid("truncated utf-16 data")?);
                }
            }
        }
        Ok(out)
    }

    pub fn encode(&self, text: &str, errors: EncodingErrors) -> CoreResult<Vec<u8>> {
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Utf16Le => Ok(text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()),
            Encoding::Latin1 | Encoding::Ascii => {
                let limit = if *self == Encoding::Ascii { 0x7f } else { 0xff };
                let mut out = Vec::with_capacity(text.len());
                for c in text.chars() {
                    if (c as u32) <= limit {
                        out.push(c as u8);
                    } else {
                        match errors {
                            EncodingErrors::Strict => {
                                return Err(CoreError::InvalidData(format!("Cannot encode {:?} as {:?}", c, self)))
                            }
                            EncodingErrors::Replace => out.push(b'?'),
                            EncodingErrors::Ignore => {}
                        }
                    }
                }
                Ok(out)
            }
        }
    }
}
