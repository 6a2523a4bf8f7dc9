//! Field-level decoder over an in-memory log image

use std::collections::BTreeMap;

use super::errors::{CodecError, CodecResult};
use super::legacy;
use super::writer::{VALUE_BOOLEAN, VALUE_INTEGER, VALUE_NULL, VALUE_REAL, VALUE_TEXT};
use super::LogFormat;
use crate::physical::{DataType, Fields, Source, Value};
use crate::position::Position;

/// Cursor over log bytes. Offsets are absolute log positions.
pub struct PhysicalReader<'a> {
    bytes: &'a [u8],
    offset: usize,
    format: LogFormat,
}

impl<'a> PhysicalReader<'a> {
    pub fn new(bytes: &'a [u8], offset: usize, format: LogFormat) -> Self {
        Self {
            bytes,
            offset,
            format,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| CodecError::truncated(self.offset as u64, n))?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn get_u8(&mut self) -> CodecResult<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn get_u32(&mut self) -> CodecResult<u32> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn get_long(&mut self) -> CodecResult<i64> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    pub fn get_bool(&mut self) -> CodecResult<bool> {
        let at = self.offset as u64;
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::malformed(at, format!("invalid boolean byte {}", other))),
        }
    }

    pub fn get_position(&mut self) -> CodecResult<Position> {
        Ok(Position::new(u64::from_be_bytes(self.take_array()?)))
    }

    pub fn get_opt_position(&mut self) -> CodecResult<Option<Position>> {
        let pos = self.get_position()?;
        Ok(if pos.is_none() { None } else { Some(pos) })
    }

    /// Reads a list count and rejects counts that cannot fit in the remaining bytes.
    fn get_count(&mut self, min_item: usize) -> CodecResult<usize> {
        let at = self.offset as u64;
        let n = self.get_long()?;
        let remaining = self.bytes.len() - self.offset;
        if n < 0 || (n as u128) * (min_item as u128) > remaining as u128 {
            return Err(CodecError::malformed(at, format!("invalid list length {}", n)));
        }
        Ok(n as usize)
    }

    pub fn get_positions(&mut self) -> CodecResult<Vec<Position>> {
        let n = self.get_count(8)?;
        (0..n).map(|_| self.get_position()).collect()
    }

    pub fn get_string(&mut self) -> CodecResult<String> {
        let at = self.offset as u64;
        let len = self.get_u32()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| CodecError::malformed(at, format!("invalid UTF-8 string: {}", e)))
    }

    pub fn get_data_type(&mut self) -> CodecResult<DataType> {
        let at = self.offset as u64;
        let raw = self.get_u8()?;
        DataType::from_u8(raw)
            .ok_or_else(|| CodecError::malformed(at, format!("unknown data type {}", raw)))
    }

    pub fn get_value(&mut self) -> CodecResult<Value> {
        let at = self.offset as u64;
        match self.get_u8()? {
            VALUE_NULL => Ok(Value::Null),
            VALUE_INTEGER => Ok(Value::Integer(self.get_long()?)),
            VALUE_REAL => Ok(Value::Real(f64::from_bits(u64::from_be_bytes(
                self.take_array()?,
            )))),
            VALUE_TEXT => Ok(Value::Text(self.get_string()?)),
            VALUE_BOOLEAN => Ok(Value::Boolean(self.get_bool()?)),
            other => Err(CodecError::malformed(at, format!("unknown value tag {}", other))),
        }
    }

    pub fn get_fields(&mut self) -> CodecResult<Fields> {
        let n = self.get_count(9)?;
        let mut fields = BTreeMap::new();
        for _ in 0..n {
            let column = self.get_position()?;
            let value = self.get_value()?;
            fields.insert(column, value);
        }
        Ok(fields)
    }

    /// Reads definition text in the layout of the log's format.
    pub fn get_source(&mut self) -> CodecResult<Source> {
        match self.format {
            LogFormat::Current => {
                let text = self.get_string()?;
                let refs = self.get_positions()?;
                Ok(Source { text, refs })
            }
            LogFormat::Legacy => {
                let at = self.offset as u64;
                let digest = self.get_string()?;
                legacy::decode_digest(at, digest)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PhysicalWriter;
    use crate::codec::CodecErrorCode;

    #[test]
    fn test_truncated_long_reports_offset() {
        let bytes = [0u8; 4];
        let mut r = PhysicalReader::new(&bytes, 0, LogFormat::Current);
        let err = r.get_long().unwrap_err();
        assert_eq!(err.code(), CodecErrorCode::Truncated);
        assert_eq!(err.offset(), 0);
    }

    #[test]
    fn test_values_decode_in_order() {
        let mut w = PhysicalWriter::new();
        w.put_value(&Value::Integer(-3));
        w.put_value(&Value::Text("x".into()));
        w.put_value(&Value::Null);
        let bytes = w.into_bytes();

        let mut r = PhysicalReader::new(&bytes, 0, LogFormat::Current);
        assert_eq!(r.get_value().unwrap(), Value::Integer(-3));
        assert_eq!(r.get_value().unwrap(), Value::Text("x".into()));
        assert_eq!(r.get_value().unwrap(), Value::Null);
        assert_eq!(r.offset(), bytes.len());
    }

    #[test]
    fn test_absurd_list_length_is_malformed() {
        let mut w = PhysicalWriter::new();
        w.put_long(1 << 40);
        let bytes = w.into_bytes();
        let mut r = PhysicalReader::new(&bytes, 0, LogFormat::Current);
        assert_eq!(r.get_positions().unwrap_err().code(), CodecErrorCode::Malformed);
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let bytes = [0, 0, 0, 2, 0xff, 0xfe];
        let mut r = PhysicalReader::new(&bytes, 0, LogFormat::Current);
        assert_eq!(r.get_string().unwrap_err().code(), CodecErrorCode::Malformed);
    }
}
