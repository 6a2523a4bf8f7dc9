//! Field-level encoder
//!
//! Integers and positions are fixed-width big-endian, so the encoded length of
//! a physical never depends on the position values inside it. The dependency
//! resolver relies on this to assign final positions before relocating.

use crate::physical::{Fields, Source, Value};
use crate::position::Position;

pub(crate) const VALUE_NULL: u8 = 0;
pub(crate) const VALUE_INTEGER: u8 = 1;
pub(crate) const VALUE_REAL: u8 = 2;
pub(crate) const VALUE_TEXT: u8 = 3;
pub(crate) const VALUE_BOOLEAN: u8 = 4;

/// Append-only byte buffer with typed put operations.
#[derive(Debug, Default)]
pub struct PhysicalWriter {
    buf: Vec<u8>,
}

impl PhysicalWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_long(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn put_position(&mut self, pos: Position) {
        self.buf.extend_from_slice(&pos.value().to_be_bytes());
    }

    /// Absent references are written as position zero.
    pub fn put_opt_position(&mut self, pos: Option<Position>) {
        self.put_position(pos.unwrap_or(Position::NONE));
    }

    pub fn put_positions(&mut self, list: &[Position]) {
        self.put_long(list.len() as i64);
        for p in list {
            self.put_position(*p);
        }
    }

    pub fn put_string(&mut self, s: &str) {
        self.put_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn put_value(&mut self, value: &Value) {
        match value {
            Value::Null => self.put_u8(VALUE_NULL),
            Value::Integer(v) => {
                self.put_u8(VALUE_INTEGER);
                self.put_long(*v);
            }
            Value::Real(v) => {
                self.put_u8(VALUE_REAL);
                self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
            }
            Value::Text(v) => {
                self.put_u8(VALUE_TEXT);
                self.put_string(v);
            }
            Value::Boolean(v) => {
                self.put_u8(VALUE_BOOLEAN);
                self.put_bool(*v);
            }
        }
    }

    pub fn put_fields(&mut self, fields: &Fields) {
        self.put_long(fields.len() as i64);
        for (column, value) in fields {
            self.put_position(*column);
            self.put_value(value);
        }
    }

    pub fn put_source(&mut self, source: &Source) {
        self.put_string(&source.text);
        self.put_positions(&source.refs);
    }
}
