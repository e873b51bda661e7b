//! Key layout for the typed graph.
//!
//! Every persisted key starts with a kind prefix byte. Type vertex iids are
//! `[kind:1][id:2]`, thing vertex iids are `[kind:1][type_id:2][seq:8]`,
//! edge records are `[from_iid][infix][..][to_iid]` with a mirrored record
//! under the destination iid whose infix carries the reverse bit. All kind
//! and infix bytes are strictly below `0xFF`, and generated ids never end in
//! `0xFF`, so every encoded prefix is a valid `get_last` upper-bound base.

use crate::error::{Result, TesseraError};

pub const LABEL_INDEX_PREFIX: u8 = 0x01;

pub const TYPE_IID_LEN: usize = 3;
pub const THING_IID_LEN: usize = 11;

const REVERSE_BIT: u8 = 0x80;

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum VertexKind {
    ThingType = 0x20,
    EntityType = 0x21,
    AttributeType = 0x22,
    RelationType = 0x23,
    RoleType = 0x24,
    Entity = 0x40,
    Attribute = 0x41,
    Relation = 0x42,
    Role = 0x43,
}

impl VertexKind {
    pub const fn prefix(self) -> u8 {
        self as u8
    }

    pub fn from_prefix(byte: u8) -> Result<Self> {
        match byte {
            0x20 => Ok(VertexKind::ThingType),
            0x21 => Ok(VertexKind::EntityType),
            0x22 => Ok(VertexKind::AttributeType),
            0x23 => Ok(VertexKind::RelationType),
            0x24 => Ok(VertexKind::RoleType),
            0x40 => Ok(VertexKind::Entity),
            0x41 => Ok(VertexKind::Attribute),
            0x42 => Ok(VertexKind::Relation),
            0x43 => Ok(VertexKind::Role),
            _ => Err(TesseraError::Internal("unknown vertex kind prefix")),
        }
    }

    pub fn is_type(self) -> bool {
        matches!(
            self,
            VertexKind::ThingType
                | VertexKind::EntityType
                | VertexKind::AttributeType
                | VertexKind::RelationType
                | VertexKind::RoleType
        )
    }

    pub fn is_thing(self) -> bool {
        !self.is_type()
    }

    /// Label of the distinguished root vertex of a type kind.
    pub fn root_label(self) -> Option<&'static str> {
        match self {
            VertexKind::ThingType => Some("thing"),
            VertexKind::EntityType => Some("entity"),
            VertexKind::AttributeType => Some("attribute"),
            VertexKind::RelationType => Some("relation"),
            VertexKind::RoleType => Some("role"),
            _ => None,
        }
    }

    /// The kind of instances of a type kind.
    pub fn instance_kind(self) -> Option<VertexKind> {
        match self {
            VertexKind::EntityType => Some(VertexKind::Entity),
            VertexKind::AttributeType => Some(VertexKind::Attribute),
            VertexKind::RelationType => Some(VertexKind::Relation),
            VertexKind::RoleType => Some(VertexKind::Role),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            VertexKind::ThingType => "thing type",
            VertexKind::EntityType => "entity type",
            VertexKind::AttributeType => "attribute type",
            VertexKind::RelationType => "relation type",
            VertexKind::RoleType => "role type",
            VertexKind::Entity => "entity",
            VertexKind::Attribute => "attribute",
            VertexKind::Relation => "relation",
            VertexKind::Role => "role",
        }
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum EdgeKind {
    Sub = 0x60,
    Key = 0x61,
    Has = 0x62,
    Plays = 0x63,
    Relates = 0x64,
    Isa = 0x6F,
    HasInstance = 0x70,
    Playing = 0x71,
    Relating = 0x72,
    RolePlayer = 0x73,
}

impl EdgeKind {
    pub const fn infix(self) -> u8 {
        self as u8
    }

    pub const fn reverse_infix(self) -> u8 {
        self.infix() | REVERSE_BIT
    }

    /// Decodes an infix byte into the edge kind and its direction.
    pub fn from_infix(byte: u8) -> Result<(Self, bool)> {
        let reverse = byte & REVERSE_BIT != 0;
        let kind = match byte & !REVERSE_BIT {
            0x60 => EdgeKind::Sub,
            0x61 => EdgeKind::Key,
            0x62 => EdgeKind::Has,
            0x63 => EdgeKind::Plays,
            0x64 => EdgeKind::Relates,
            0x6F => EdgeKind::Isa,
            0x70 => EdgeKind::HasInstance,
            0x71 => EdgeKind::Playing,
            0x72 => EdgeKind::Relating,
            0x73 => EdgeKind::RolePlayer,
            _ => return Err(TesseraError::Internal("unknown edge infix")),
        };
        Ok((kind, reverse))
    }

    pub fn is_type_edge(self) -> bool {
        matches!(
            self,
            EdgeKind::Sub | EdgeKind::Key | EdgeKind::Has | EdgeKind::Plays | EdgeKind::Relates
        )
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    Boolean = 1,
    Long = 2,
    Double = 3,
    String = 4,
    DateTime = 5,
}

impl ValueType {
    /// Keyable value types admit exact, total ordering and equality.
    pub fn is_keyable(self) -> bool {
        !matches!(self, ValueType::Double)
    }

    pub const fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(ValueType::Boolean),
            2 => Ok(ValueType::Long),
            3 => Ok(ValueType::Double),
            4 => Ok(ValueType::String),
            5 => Ok(ValueType::DateTime),
            _ => Err(TesseraError::Internal("unknown value type tag")),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Boolean => "boolean",
            ValueType::Long => "long",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::DateTime => "datetime",
        }
    }
}

/// An attribute value. Datetimes are milliseconds since the epoch.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(String),
    DateTime(i64),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Boolean(_) => ValueType::Boolean,
            Value::Long(_) => ValueType::Long,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::DateTime(_) => ValueType::DateTime,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.value_type().tag()];
        match self {
            Value::Boolean(b) => out.push(*b as u8),
            Value::Long(v) | Value::DateTime(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::Double(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::String(s) => out.extend_from_slice(s.as_bytes()),
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (tag, payload) = bytes
            .split_first()
            .ok_or(TesseraError::Internal("empty value record"))?;
        let fixed = |len: usize| -> Result<[u8; 8]> {
            payload
                .get(..len)
                .and_then(|slice| slice.try_into().ok())
                .ok_or(TesseraError::Internal("truncated value record"))
        };
        match ValueType::from_tag(*tag)? {
            ValueType::Boolean => Ok(Value::Boolean(
                *payload
                    .first()
                    .ok_or(TesseraError::Internal("truncated value record"))?
                    != 0,
            )),
            ValueType::Long => Ok(Value::Long(i64::from_be_bytes(fixed(8)?))),
            ValueType::Double => Ok(Value::Double(f64::from_be_bytes(fixed(8)?))),
            ValueType::DateTime => Ok(Value::DateTime(i64::from_be_bytes(fixed(8)?))),
            ValueType::String => Ok(Value::String(
                String::from_utf8(payload.to_vec())
                    .map_err(|_| TesseraError::Internal("invalid utf8 in value record"))?,
            )),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TypeVertexId {
    kind: VertexKind,
    id: u16,
}

impl TypeVertexId {
    pub fn new(kind: VertexKind, id: u16) -> Self {
        debug_assert!(kind.is_type());
        debug_assert!(id & 0xFF != 0xFF);
        TypeVertexId { kind, id }
    }

    pub fn kind(&self) -> VertexKind {
        self.kind
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn bytes(&self) -> [u8; TYPE_IID_LEN] {
        let id = self.id.to_be_bytes();
        [self.kind.prefix(), id[0], id[1]]
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < TYPE_IID_LEN {
            return Err(TesseraError::Internal("truncated type iid"));
        }
        let kind = VertexKind::from_prefix(bytes[0])?;
        if !kind.is_type() {
            return Err(TesseraError::Internal("thing kind in type iid"));
        }
        Ok(TypeVertexId {
            kind,
            id: u16::from_be_bytes([bytes[1], bytes[2]]),
        })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ThingVertexId {
    kind: VertexKind,
    type_id: u16,
    seq: u64,
}

impl ThingVertexId {
    pub fn new(kind: VertexKind, type_id: u16, seq: u64) -> Self {
        debug_assert!(kind.is_thing());
        ThingVertexId { kind, type_id, seq }
    }

    pub fn kind(&self) -> VertexKind {
        self.kind
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Iid of the thing's type vertex.
    pub fn type_id(&self) -> Result<TypeVertexId> {
        let type_kind = match self.kind {
            VertexKind::Entity => VertexKind::EntityType,
            VertexKind::Attribute => VertexKind::AttributeType,
            VertexKind::Relation => VertexKind::RelationType,
            VertexKind::Role => VertexKind::RoleType,
            _ => return Err(TesseraError::Internal("type kind in thing iid")),
        };
        Ok(TypeVertexId::new(type_kind, self.type_id))
    }

    pub fn bytes(&self) -> [u8; THING_IID_LEN] {
        let mut out = [0u8; THING_IID_LEN];
        out[0] = self.kind.prefix();
        out[1..3].copy_from_slice(&self.type_id.to_be_bytes());
        out[3..11].copy_from_slice(&self.seq.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < THING_IID_LEN {
            return Err(TesseraError::Internal("truncated thing iid"));
        }
        let kind = VertexKind::from_prefix(bytes[0])?;
        if !kind.is_thing() {
            return Err(TesseraError::Internal("type kind in thing iid"));
        }
        Ok(ThingVertexId {
            kind,
            type_id: u16::from_be_bytes([bytes[1], bytes[2]]),
            seq: u64::from_be_bytes(bytes[3..11].try_into().expect("length checked")),
        })
    }

    /// Prefix under which all instances of a type are stored.
    pub fn instance_prefix(kind: VertexKind, type_id: u16) -> [u8; TYPE_IID_LEN] {
        debug_assert!(kind.is_thing());
        let id = type_id.to_be_bytes();
        [kind.prefix(), id[0], id[1]]
    }
}

pub fn label_index_key(label: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + label.len());
    key.push(LABEL_INDEX_PREFIX);
    key.extend_from_slice(label.as_bytes());
    key
}

pub fn type_edge_key(from: TypeVertexId, kind: EdgeKind, to: TypeVertexId) -> Vec<u8> {
    debug_assert!(kind.is_type_edge());
    let mut key = Vec::with_capacity(2 * TYPE_IID_LEN + 1);
    key.extend_from_slice(&from.bytes());
    key.push(kind.infix());
    key.extend_from_slice(&to.bytes());
    key
}

pub fn type_edge_reverse_key(from: TypeVertexId, kind: EdgeKind, to: TypeVertexId) -> Vec<u8> {
    debug_assert!(kind.is_type_edge());
    let mut key = Vec::with_capacity(2 * TYPE_IID_LEN + 1);
    key.extend_from_slice(&to.bytes());
    key.push(kind.reverse_infix());
    key.extend_from_slice(&from.bytes());
    key
}

pub fn has_edge_key(owner: ThingVertexId, attribute: ThingVertexId) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 * THING_IID_LEN + 1);
    key.extend_from_slice(&owner.bytes());
    key.push(EdgeKind::HasInstance.infix());
    key.extend_from_slice(&attribute.bytes());
    key
}

pub fn has_edge_reverse_key(owner: ThingVertexId, attribute: ThingVertexId) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 * THING_IID_LEN + 1);
    key.extend_from_slice(&attribute.bytes());
    key.push(EdgeKind::HasInstance.reverse_infix());
    key.extend_from_slice(&owner.bytes());
    key
}

/// `[relation][infix][role_type_id][repetition][player]`; the repetition
/// byte distinguishes the same player in the same role of one relation.
pub fn role_player_key(
    relation: ThingVertexId,
    role_type: TypeVertexId,
    repetition: u8,
    player: ThingVertexId,
) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 * THING_IID_LEN + 4);
    key.extend_from_slice(&relation.bytes());
    key.push(EdgeKind::RolePlayer.infix());
    key.extend_from_slice(&role_type.id().to_be_bytes());
    key.push(repetition);
    key.extend_from_slice(&player.bytes());
    key
}

pub fn role_player_reverse_key(
    relation: ThingVertexId,
    role_type: TypeVertexId,
    repetition: u8,
    player: ThingVertexId,
) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 * THING_IID_LEN + 4);
    key.extend_from_slice(&player.bytes());
    key.push(EdgeKind::RolePlayer.reverse_infix());
    key.extend_from_slice(&role_type.id().to_be_bytes());
    key.push(repetition);
    key.extend_from_slice(&relation.bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_iid_roundtrip() {
        let iid = TypeVertexId::new(VertexKind::EntityType, 0x1234);
        let decoded = TypeVertexId::from_bytes(&iid.bytes()).unwrap();
        assert_eq!(decoded, iid);
    }

    #[test]
    fn thing_iid_roundtrip() {
        let iid = ThingVertexId::new(VertexKind::Relation, 7, u64::MAX - 3);
        let decoded = ThingVertexId::from_bytes(&iid.bytes()).unwrap();
        assert_eq!(decoded, iid);
        assert_eq!(
            decoded.type_id().unwrap(),
            TypeVertexId::new(VertexKind::RelationType, 7)
        );
    }

    #[test]
    fn infix_roundtrip_carries_direction() {
        for kind in [
            EdgeKind::Sub,
            EdgeKind::Key,
            EdgeKind::Has,
            EdgeKind::Plays,
            EdgeKind::Relates,
            EdgeKind::HasInstance,
            EdgeKind::RolePlayer,
        ] {
            assert_eq!(EdgeKind::from_infix(kind.infix()).unwrap(), (kind, false));
            assert_eq!(
                EdgeKind::from_infix(kind.reverse_infix()).unwrap(),
                (kind, true)
            );
        }
    }

    #[test]
    fn value_roundtrip() {
        for value in [
            Value::Boolean(true),
            Value::Long(-42),
            Value::Double(2.5),
            Value::String("ada".into()),
            Value::DateTime(1_600_000_000_000),
        ] {
            assert_eq!(Value::decode(&value.encode()).unwrap(), value);
        }
    }

    #[test]
    fn keyable_set_excludes_double() {
        assert!(ValueType::Long.is_keyable());
        assert!(ValueType::String.is_keyable());
        assert!(ValueType::Boolean.is_keyable());
        assert!(ValueType::DateTime.is_keyable());
        assert!(!ValueType::Double.is_keyable());
    }

    #[test]
    fn unknown_prefix_is_rejected() {
        assert!(VertexKind::from_prefix(0x00).is_err());
        assert!(EdgeKind::from_infix(0x00).is_err());
        assert!(ValueType::from_tag(0).is_err());
    }
}
