//! Binary codec for physicals
//!
//! Record layout: `[tag:1][kind-specific fields][segment:8]`.
//!
//! The record's position is not stored in it: a physical's position is the
//! log offset of its tag byte, supplied by the caller on decode.

mod errors;
mod legacy;
mod reader;
mod writer;

pub use errors::{CodecError, CodecErrorCode, CodecResult};
pub use reader::PhysicalReader;
pub use writer::PhysicalWriter;

use crate::physical::{
    Alter, Body, Change, CheckDef, ColumnDef, Control, DataChange, Definition, Delete, DomainDef,
    DropAction, DropObject, Edit, EndOfFile, Grant, IndexDef, IndexFlags, Insert, Modification, Modify,
    Physical, PhysicalType, Privilege, ProcedureDef, RoleDef, TableDef, TransactionMarker,
    TriggerDef, TriggerEvents, TriggeredAction, Update, UserDef, ViewDef,
};
use crate::position::Position;

/// On-disk layout version recorded in the log header.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Source text stored as a digest with quoted positions
    Legacy = 1,
    /// Source text followed by an explicit reference list
    Current = 2,
}

impl LogFormat {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(LogFormat::Legacy),
            2 => Some(LogFormat::Current),
            _ => None,
        }
    }

    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }
}

/// Encodes a physical in the current format.
pub fn encode(ph: &Physical) -> Vec<u8> {
    let mut w = PhysicalWriter::new();
    w.put_u8(ph.kind().as_u8());
    match &ph.body {
        Body::Definition(d) => encode_definition(&mut w, d),
        Body::Modification(m) => encode_modification(&mut w, m),
        Body::Data(d) => encode_data(&mut w, d),
        Body::Control(c) => encode_control(&mut w, c),
    }
    w.put_position(ph.segment);
    w.into_bytes()
}

/// Encoded size of a physical. Independent of the position values it holds.
pub fn encoded_len(ph: &Physical) -> u64 {
    encode(ph).len() as u64
}

fn encode_column(w: &mut PhysicalWriter, c: &ColumnDef) {
    w.put_position(c.table);
    w.put_string(&c.name);
    w.put_long(c.seq);
    w.put_u8(c.data_type.as_u8());
    w.put_opt_position(c.domain);
    w.put_value(&c.default);
    w.put_bool(c.not_null);
}

fn encode_domain(w: &mut PhysicalWriter, d: &DomainDef) {
    w.put_string(&d.name);
    w.put_u8(d.data_type.as_u8());
    w.put_value(&d.default);
}

fn encode_definition(w: &mut PhysicalWriter, d: &Definition) {
    match d {
        Definition::Table(t) => w.put_string(&t.name),
        Definition::Column(c) => encode_column(w, c),
        Definition::Domain(t) => encode_domain(w, t),
        Definition::Index(x) => {
            w.put_string(&x.name);
            w.put_position(x.table);
            w.put_positions(&x.columns);
            w.put_u32(x.flags.bits());
            w.put_opt_position(x.references);
        }
        Definition::Procedure(p) => {
            w.put_string(&p.name);
            w.put_long(p.arity);
            w.put_opt_position(p.owner_type);
            w.put_source(&p.body);
        }
        Definition::Trigger(t) => {
            w.put_string(&t.name);
            w.put_position(t.table);
            w.put_u8(t.events.bits());
            w.put_source(&t.body);
        }
        Definition::Role(r) => {
            w.put_string(&r.name);
            w.put_string(&r.details);
        }
        Definition::User(u) => w.put_string(&u.name),
        Definition::Check(c) => {
            w.put_string(&c.name);
            w.put_position(c.target);
            w.put_source(&c.body);
        }
        Definition::View(v) => {
            w.put_string(&v.name);
            w.put_source(&v.body);
        }
    }
}

fn encode_modification(w: &mut PhysicalWriter, m: &Modification) {
    match m {
        Modification::Alter(a) => {
            w.put_position(a.target);
            encode_column(w, &a.column);
        }
        Modification::Change(c) => {
            w.put_position(c.target);
            w.put_string(&c.name);
        }
        Modification::Drop(d) => {
            w.put_position(d.target);
            w.put_u8(d.action.as_u8());
        }
        Modification::Grant(g) | Modification::Revoke(g) => {
            w.put_u32(g.privilege.bits());
            w.put_position(g.object);
            w.put_position(g.grantee);
        }
        Modification::Modify(m) => {
            w.put_position(m.target);
            w.put_string(&m.name);
            w.put_source(&m.body);
        }
        Modification::Edit(e) => {
            w.put_position(e.target);
            encode_domain(w, &e.domain);
        }
    }
}

fn encode_data(w: &mut PhysicalWriter, d: &DataChange) {
    match d {
        DataChange::Insert(i) => {
            w.put_position(i.table);
            w.put_positions(&i.extra_tables);
            w.put_fields(&i.fields);
        }
        DataChange::Update(u) => {
            w.put_position(u.row);
            w.put_position(u.prev);
            w.put_position(u.table);
            w.put_fields(&u.fields);
        }
        DataChange::Delete(d) => {
            w.put_position(d.row);
            w.put_position(d.table);
        }
    }
}

fn encode_control(w: &mut PhysicalWriter, c: &Control) {
    match c {
        Control::Transaction(m) => {
            w.put_long(m.nrecs);
            w.put_position(m.role);
            w.put_position(m.user);
            w.put_long(m.timestamp);
        }
        Control::TriggeredAction(t) => w.put_position(t.trigger),
        Control::EndOfFile(e) => w.put_u32(e.checksum),
    }
}

/// Decodes the physical whose tag byte is at `offset` in `bytes`.
///
/// Returns the physical and its encoded length.
pub fn decode(bytes: &[u8], offset: usize, format: LogFormat) -> CodecResult<(Physical, usize)> {
    let mut r = PhysicalReader::new(bytes, offset, format);
    let tag = r.get_u8()?;
    let kind = PhysicalType::from_u8(tag).ok_or(CodecError::unknown_tag(offset as u64, tag))?;

    let body: Body = match kind {
        PhysicalType::Table => TableDef {
            name: r.get_string()?,
        }
        .into(),
        PhysicalType::Column => decode_column(&mut r)?.into(),
        PhysicalType::Domain => decode_domain(&mut r)?.into(),
        PhysicalType::Index => IndexDef {
            name: r.get_string()?,
            table: r.get_position()?,
            columns: r.get_positions()?,
            flags: IndexFlags::from_bits(r.get_u32()?),
            references: r.get_opt_position()?,
        }
        .into(),
        PhysicalType::Procedure => ProcedureDef {
            name: r.get_string()?,
            arity: r.get_long()?,
            owner_type: r.get_opt_position()?,
            body: r.get_source()?,
        }
        .into(),
        PhysicalType::Trigger => TriggerDef {
            name: r.get_string()?,
            table: r.get_position()?,
            events: TriggerEvents::from_bits(r.get_u8()?),
            body: r.get_source()?,
        }
        .into(),
        PhysicalType::Role => RoleDef {
            name: r.get_string()?,
            details: r.get_string()?,
        }
        .into(),
        PhysicalType::User => UserDef {
            name: r.get_string()?,
        }
        .into(),
        PhysicalType::Check => CheckDef {
            name: r.get_string()?,
            target: r.get_position()?,
            body: r.get_source()?,
        }
        .into(),
        PhysicalType::View => ViewDef {
            name: r.get_string()?,
            body: r.get_source()?,
        }
        .into(),
        PhysicalType::Alter => Alter {
            target: r.get_position()?,
            column: decode_column(&mut r)?,
        }
        .into(),
        PhysicalType::Change => Change {
            target: r.get_position()?,
            name: r.get_string()?,
        }
        .into(),
        PhysicalType::Drop => {
            let target = r.get_position()?;
            let at = r.offset() as u64;
            let raw = r.get_u8()?;
            let action = DropAction::from_u8(raw)
                .ok_or_else(|| CodecError::malformed(at, format!("unknown drop action {}", raw)))?;
            DropObject { target, action }.into()
        }
        PhysicalType::Grant => Body::Modification(Modification::Grant(decode_grant(&mut r)?)),
        PhysicalType::Revoke => Body::Modification(Modification::Revoke(decode_grant(&mut r)?)),
        PhysicalType::Modify => Modify {
            target: r.get_position()?,
            name: r.get_string()?,
            body: r.get_source()?,
        }
        .into(),
        PhysicalType::Edit => Edit {
            target: r.get_position()?,
            domain: decode_domain(&mut r)?,
        }
        .into(),
        PhysicalType::Insert => Insert {
            table: r.get_position()?,
            extra_tables: r.get_positions()?,
            fields: r.get_fields()?,
        }
        .into(),
        PhysicalType::Update => Update {
            row: r.get_position()?,
            prev: r.get_position()?,
            table: r.get_position()?,
            fields: r.get_fields()?,
        }
        .into(),
        PhysicalType::Delete => Delete {
            row: r.get_position()?,
            table: r.get_position()?,
        }
        .into(),
        PhysicalType::Transaction => TransactionMarker {
            nrecs: r.get_long()?,
            role: r.get_position()?,
            user: r.get_position()?,
            timestamp: r.get_long()?,
        }
        .into(),
        PhysicalType::TriggeredAction => TriggeredAction {
            trigger: r.get_position()?,
        }
        .into(),
        PhysicalType::EndOfFile => EndOfFile {
            checksum: r.get_u32()?,
        }
        .into(),
    };

    let segment = r.get_position()?;
    let physical = Physical {
        pos: Position::new(offset as u64),
        segment,
        body,
    };
    Ok((physical, r.offset() - offset))
}

fn decode_column(r: &mut PhysicalReader<'_>) -> CodecResult<ColumnDef> {
    Ok(ColumnDef {
        table: r.get_position()?,
        name: r.get_string()?,
        seq: r.get_long()?,
        data_type: r.get_data_type()?,
        domain: r.get_opt_position()?,
        default: r.get_value()?,
        not_null: r.get_bool()?,
    })
}

fn decode_domain(r: &mut PhysicalReader<'_>) -> CodecResult<DomainDef> {
    Ok(DomainDef {
        name: r.get_string()?,
        data_type: r.get_data_type()?,
        default: r.get_value()?,
    })
}

fn decode_grant(r: &mut PhysicalReader<'_>) -> CodecResult<Grant> {
    Ok(Grant {
        privilege: Privilege::from_bits(r.get_u32()?),
        object: r.get_position()?,
        grantee: r.get_position()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical::{DataType, Source, Value};
    use std::collections::BTreeMap;

    fn decode_at(ph: &Physical, offset: usize) -> Physical {
        let mut bytes = vec![0u8; offset];
        bytes.extend(encode(ph));
        let (decoded, len) = decode(&bytes, offset, LogFormat::Current).unwrap();
        assert_eq!(len, bytes.len() - offset);
        decoded
    }

    #[test]
    fn test_position_comes_from_offset() {
        let mut ph = Physical::new(Position::new(7), TableDef { name: "T".into() });
        ph.segment = Position::new(3);
        let decoded = decode_at(&ph, 40);
        assert_eq!(decoded.pos, Position::new(40));
        assert_eq!(decoded.segment, Position::new(3));
        assert_eq!(decoded.body, ph.body);
    }

    #[test]
    fn test_update_with_partial_fields() {
        let mut fields = BTreeMap::new();
        fields.insert(Position::new(60), Value::Integer(5));
        let ph = Physical::new(
            Position::new(200),
            Update {
                row: Position::new(120),
                prev: Position::new(120),
                table: Position::new(40),
                fields,
            },
        );
        assert_eq!(decode_at(&ph, 200).body, ph.body);
    }

    #[test]
    fn test_domain_edit_carries_new_definition() {
        let ph = Physical::new(
            Position::new(500),
            Edit {
                target: Position::new(70),
                domain: DomainDef {
                    name: "money".into(),
                    data_type: DataType::Real,
                    default: Value::Real(0.0),
                },
            },
        );
        let bytes = encode(&ph);
        assert_eq!(bytes[0], PhysicalType::Edit.as_u8());
        let decoded = decode_at(&ph, 500);
        assert_eq!(decoded.body, ph.body);
        assert_eq!(decoded.references(), vec![Position::new(70)]);
    }

    #[test]
    fn test_view_source_keeps_references() {
        let ph = Physical::new(
            Position::new(300),
            ViewDef {
                name: "V".into(),
                body: Source::new("select a from T", vec![Position::new(40), Position::new(60)]),
            },
        );
        assert_eq!(decode_at(&ph, 300).references(), ph.references());
    }

    #[test]
    fn test_length_ignores_position_values() {
        let column = |table| ColumnDef {
            table,
            name: "b".into(),
            seq: 1,
            data_type: DataType::Integer,
            domain: None,
            default: Value::Null,
            not_null: true,
        };
        let local = Physical::new(Position::local(1), column(Position::local(0)));
        let durable = Physical::new(Position::new(90), column(Position::new(40)));
        assert_eq!(encoded_len(&local), encoded_len(&durable));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let bytes = [99u8, 0, 0, 0, 0, 0, 0, 0, 0];
        let err = decode(&bytes, 0, LogFormat::Current).unwrap_err();
        assert_eq!(err.code(), CodecErrorCode::UnknownTag);
    }

    #[test]
    fn test_bad_drop_action_rejected() {
        let mut w = PhysicalWriter::new();
        w.put_u8(PhysicalType::Drop.as_u8());
        w.put_position(Position::new(40));
        w.put_u8(7);
        w.put_position(Position::NONE);
        let err = decode(&w.into_bytes(), 0, LogFormat::Current).unwrap_err();
        assert_eq!(err.code(), CodecErrorCode::Malformed);
    }

    #[test]
    fn test_truncated_record_rejected() {
        let ph = Physical::new(Position::new(0), TableDef { name: "T".into() });
        let bytes = encode(&ph);
        let err = decode(&bytes[..bytes.len() - 1], 0, LogFormat::Current).unwrap_err();
        assert_eq!(err.code(), CodecErrorCode::Truncated);
    }

    #[test]
    fn test_legacy_view_recovers_references_from_digest() {
        let mut w = PhysicalWriter::new();
        w.put_u8(PhysicalType::View.as_u8());
        w.put_string("V");
        w.put_string(r#"select "60" from "40""#);
        w.put_position(Position::new(32));
        let bytes = w.into_bytes();

        let (ph, _) = decode(&bytes, 0, LogFormat::Legacy).unwrap();
        assert_eq!(ph.references(), vec![Position::new(60), Position::new(40)]);
    }

    #[test]
    fn test_format_versions() {
        assert_eq!(LogFormat::from_u32(1), Some(LogFormat::Legacy));
        assert_eq!(LogFormat::from_u32(2), Some(LogFormat::Current));
        assert_eq!(LogFormat::from_u32(3), None);
    }
}
