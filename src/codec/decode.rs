//! CBOR decoder.

use super::{CodecError, Value};

/// Maximum nesting of arrays, maps and tags accepted by the decoder.
pub const MAX_NESTING_DEPTH: usize = 64;

const BREAK: u8 = 0xFF;
const INDEFINITE: u8 = 31;

/// Decodes exactly one value from `bytes`, rejecting trailing data.
pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    let mut decoder = Decoder::new(bytes);
    let value = decoder.decode_value()?;
    if decoder.remaining() > 0 {
        return Err(CodecError::TrailingBytes {
            count: decoder.remaining(),
        });
    }
    Ok(value)
}

/// Streaming decoder over a byte slice.
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Decodes the next value.
    pub fn decode_value(&mut self) -> Result<Value, CodecError> {
        self.value(0)
    }

    fn value(&mut self, depth: usize) -> Result<Value, CodecError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(CodecError::DepthExceeded {
                max: MAX_NESTING_DEPTH,
            });
        }
        let offset = self.pos;
        let initial = self.byte()?;
        if initial == BREAK {
            return Err(CodecError::UnexpectedBreak { offset });
        }
        let major = initial >> 5;
        let info = initial & 0x1F;

        match major {
            0 => Ok(Value::Unsigned(self.argument(info, offset)?)),
            1 => Ok(Value::Negative(self.argument(info, offset)?)),
            2 => Ok(Value::Bytes(self.string(major, info, offset)?)),
            3 => {
                let bytes = self.string(major, info, offset)?;
                String::from_utf8(bytes)
                    .map(Value::Text)
                    .map_err(|_| CodecError::InvalidUtf8 { offset })
            }
            4 => {
                let mut items = Vec::new();
                if info == INDEFINITE {
                    while !self.take_break()? {
                        items.push(self.value(depth + 1)?);
                    }
                } else {
                    let len = self.length(info, offset)?;
                    for _ in 0..len {
                        items.push(self.value(depth + 1)?);
                    }
                }
                Ok(Value::Array(items))
            }
            5 => {
                let mut entries = Vec::new();
                if info == INDEFINITE {
                    while !self.take_break()? {
                        let key = self.value(depth + 1)?;
                        let value = self.value(depth + 1)?;
                        entries.push((key, value));
                    }
                } else {
                    let len = self.length(info, offset)?;
                    for _ in 0..len {
                        let key = self.value(depth + 1)?;
                        let value = self.value(depth + 1)?;
                        entries.push((key, value));
                    }
                }
                Ok(Value::Map(entries))
            }
            6 => {
                let tag = self.argument(info, offset)?;
                let inner = self.value(depth + 1)?;
                Ok(Value::Tag(tag, Box::new(inner)))
            }
            _ => self.simple(info, offset),
        }
    }

    fn simple(&mut self, info: u8, offset: usize) -> Result<Value, CodecError> {
        match info {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            22 => Ok(Value::Null),
            23 => Ok(Value::Undefined),
            0..=19 => Ok(Value::Simple(info)),
            24 => Ok(Value::Simple(self.byte()?)),
            25 => {
                let bits = u16::from_be_bytes(self.array::<2>()?);
                Ok(Value::Float(half_to_f64(bits)))
            }
            26 => {
                let bits = u32::from_be_bytes(self.array::<4>()?);
                Ok(Value::Float(f64::from(f32::from_bits(bits))))
            }
            27 => {
                let bits = u64::from_be_bytes(self.array::<8>()?);
                Ok(Value::Float(f64::from_bits(bits)))
            }
            _ => Err(CodecError::ReservedInfo { info, offset }),
        }
    }

    /// Reads a byte or text string, joining indefinite-length chunks.
    fn string(&mut self, major: u8, info: u8, offset: usize) -> Result<Vec<u8>, CodecError> {
        if info != INDEFINITE {
            let len = self.length(info, offset)?;
            return Ok(self.take(len)?.to_vec());
        }
        let mut out = Vec::new();
        while !self.take_break()? {
            let chunk_offset = self.pos;
            let head = self.byte()?;
            let chunk_info = head & 0x1F;
            if head >> 5 != major || chunk_info == INDEFINITE {
                return Err(CodecError::InvalidIndefinite {
                    offset: chunk_offset,
                });
            }
            let len = self.length(chunk_info, chunk_offset)?;
            out.extend_from_slice(self.take(len)?);
        }
        Ok(out)
    }

    fn argument(&mut self, info: u8, offset: usize) -> Result<u64, CodecError> {
        match info {
            0..=23 => Ok(u64::from(info)),
            24 => Ok(u64::from(self.byte()?)),
            25 => Ok(u64::from(u16::from_be_bytes(self.array::<2>()?))),
            26 => Ok(u64::from(u32::from_be_bytes(self.array::<4>()?))),
            27 => Ok(u64::from_be_bytes(self.array::<8>()?)),
            INDEFINITE => Err(CodecError::InvalidIndefinite { offset }),
            _ => Err(CodecError::ReservedInfo { info, offset }),
        }
    }

    /// Reads a length, refusing lengths that cannot fit in the input.
    fn length(&mut self, info: u8, offset: usize) -> Result<usize, CodecError> {
        let len = self.argument(info, offset)?;
        if len > self.remaining() as u64 {
            return Err(CodecError::UnexpectedEnd {
                offset: self.data.len(),
            });
        }
        Ok(len as usize)
    }

    fn take_break(&mut self) -> Result<bool, CodecError> {
        match self.data.get(self.pos) {
            Some(&BREAK) => {
                self.pos += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(CodecError::UnexpectedEnd { offset: self.pos }),
        }
    }

    fn byte(&mut self) -> Result<u8, CodecError> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(CodecError::UnexpectedEnd { offset: self.pos })?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(CodecError::UnexpectedEnd {
                offset: self.data.len(),
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

/// Converts an IEEE 754 half-precision value.
fn half_to_f64(bits: u16) -> f64 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = i32::from((bits >> 10) & 0x1F);
    let mantissa = f64::from(bits & 0x03FF);
    let magnitude = match exponent {
        0 => mantissa * 2f64.powi(-24),
        31 if mantissa == 0.0 => f64::INFINITY,
        31 => f64::NAN,
        _ => (1.0 + mantissa / 1024.0) * 2f64.powi(exponent - 15),
    };
    sign * magnitude
}
