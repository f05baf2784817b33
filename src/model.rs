use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Type descriptor for values in a property-bag (BIN) file.
///
/// The binary format uses single-byte type identifiers. Primitive types use
/// values 0-18, container types have bit 0x80 set.
///
/// # Examples
///
/// ```
/// use frogtools_core::model::BinType;
///
/// assert!(BinType::U32.is_primitive());
/// assert!(!BinType::List.is_primitive());
/// assert!(BinType::Map.is_container());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinType {
    None = 0,
    Bool = 1,
    I8 = 2,
    U8 = 3,
    I16 = 4,
    U16 = 5,
    I32 = 6,
    U32 = 7,
    I64 = 8,
    U64 = 9,
    F32 = 10,
    Vec2 = 11,
    Vec3 = 12,
    Vec4 = 13,
    Mtx44 = 14,
    Rgba = 15,
    String = 16,
    Hash = 17,
    File = 18,
    List = 0x80,
    List2 = 0x81,
    Pointer = 0x82,
    Embed = 0x83,
    Link = 0x84,
    Option = 0x85,
    Map = 0x86,
    Flag = 0x87,
}

impl TryFrom<u8> for BinType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(BinType::None),
            1 => Ok(BinType::Bool),
            2 => Ok(BinType::I8),
            3 => Ok(BinType::U8),
            4 => Ok(BinType::I16),
            5 => Ok(BinType::U16),
            6 => Ok(BinType::I32),
            7 => Ok(BinType::U32),
            8 => Ok(BinType::I64),
            9 => Ok(BinType::U64),
            10 => Ok(BinType::F32),
            11 => Ok(BinType::Vec2),
            12 => Ok(BinType::Vec3),
            13 => Ok(BinType::Vec4),
            14 => Ok(BinType::Mtx44),
            15 => Ok(BinType::Rgba),
            16 => Ok(BinType::String),
            17 => Ok(BinType::Hash),
            18 => Ok(BinType::File),
            0x80 => Ok(BinType::List),
            0x81 => Ok(BinType::List2),
            0x82 => Ok(BinType::Pointer),
            0x83 => Ok(BinType::Embed),
            0x84 => Ok(BinType::Link),
            0x85 => Ok(BinType::Option),
            0x86 => Ok(BinType::Map),
            0x87 => Ok(BinType::Flag),
            _ => Err(value),
        }
    }
}

impl BinType {
    /// Returns true if this is a primitive (non-container) type.
    pub fn is_primitive(&self) -> bool {
        (*self as u8 & 0x80) == 0
    }

    /// Returns true if this type nests other values behind an inner tag.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            BinType::List | BinType::List2 | BinType::Option | BinType::Map
        )
    }
}

/// A value in a BIN file.
///
/// `Hash`, `File` and `Link` carry the numeric hash plus the resolved string
/// when a hash table knew it. The serializer prefers the string for `File`
/// values, re-deriving the 64-bit hash from it, so path rewrites survive a
/// round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BinValue {
    None,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    /// 4x4 matrix, row-major
    Mtx44([f32; 16]),
    /// [r, g, b, a]
    Rgba([u8; 4]),
    String(String),
    /// FNV-1a 32 name hash
    Hash { value: u32, name: Option<String> },
    /// XXH64 file-path hash
    File { value: u64, name: Option<String> },
    List {
        value_type: BinType,
        items: Vec<BinValue>,
    },
    /// Same wire shape as `List`; kept distinct for byte-exact round trips.
    List2 {
        value_type: BinType,
        items: Vec<BinValue>,
    },
    /// Named sub-structure with a nullable type hash (0 means no body).
    Pointer {
        type_hash: u32,
        type_name: Option<String>,
        fields: Vec<BinField>,
    },
    /// Named sub-structure; the type hash is always non-null.
    Embed {
        type_hash: u32,
        type_name: Option<String>,
        fields: Vec<BinField>,
    },
    /// FNV-1a 32 hash of another entry's name
    Link { value: u32, name: Option<String> },
    Option {
        value_type: BinType,
        item: Option<Box<BinValue>>,
    },
    Map {
        key_type: BinType,
        value_type: BinType,
        items: Vec<(BinValue, BinValue)>,
    },
    Flag(u8),
}

impl BinValue {
    /// The tag this value serializes under.
    pub fn tag(&self) -> BinType {
        match self {
            BinValue::None => BinType::None,
            BinValue::Bool(_) => BinType::Bool,
            BinValue::I8(_) => BinType::I8,
            BinValue::U8(_) => BinType::U8,
            BinValue::I16(_) => BinType::I16,
            BinValue::U16(_) => BinType::U16,
            BinValue::I32(_) => BinType::I32,
            BinValue::U32(_) => BinType::U32,
            BinValue::I64(_) => BinType::I64,
            BinValue::U64(_) => BinType::U64,
            BinValue::F32(_) => BinType::F32,
            BinValue::Vec2(_) => BinType::Vec2,
            BinValue::Vec3(_) => BinType::Vec3,
            BinValue::Vec4(_) => BinType::Vec4,
            BinValue::Mtx44(_) => BinType::Mtx44,
            BinValue::Rgba(_) => BinType::Rgba,
            BinValue::String(_) => BinType::String,
            BinValue::Hash { .. } => BinType::Hash,
            BinValue::File { .. } => BinType::File,
            BinValue::List { .. } => BinType::List,
            BinValue::List2 { .. } => BinType::List2,
            BinValue::Pointer { .. } => BinType::Pointer,
            BinValue::Embed { .. } => BinType::Embed,
            BinValue::Link { .. } => BinType::Link,
            BinValue::Option { .. } => BinType::Option,
            BinValue::Map { .. } => BinType::Map,
            BinValue::Flag(_) => BinType::Flag,
        }
    }
}

/// A named, typed value inside an entry or a Pointer/Embed structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinField {
    /// FNV-1a 32 hash of the field name
    pub hash: u32,
    /// Resolved field name, when a hash table knew it
    pub name: Option<String>,
    pub value: BinValue,
}

impl BinField {
    pub fn new(hash: u32, value: BinValue) -> Self {
        Self {
            hash,
            name: None,
            value,
        }
    }
}

/// A top-level record in a BIN file. The entry's own name hash is the key it
/// is stored under in [`BinFile::entries`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinEntry {
    /// FNV-1a 32 hash of the entry's type name
    pub type_hash: u32,
    pub type_name: Option<String>,
    pub fields: Vec<BinField>,
}

impl BinEntry {
    pub fn new(type_hash: u32) -> Self {
        Self {
            type_hash,
            type_name: None,
            fields: Vec::new(),
        }
    }

    pub fn field(&self, hash: u32) -> Option<&BinField> {
        self.fields.iter().find(|f| f.hash == hash)
    }

    pub fn field_mut(&mut self, hash: u32) -> Option<&mut BinField> {
        self.fields.iter_mut().find(|f| f.hash == hash)
    }
}

/// A sparse override carried by a PTCH file: replaces the value at
/// `(entry_hash, path)` in the base file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinPatch {
    pub entry_hash: u32,
    /// Walk path through nested containers, e.g. `materialOverride[3].material`
    pub path: String,
    pub value: BinValue,
}

/// Extra header carried by PTCH files before the regular PROP body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchHeader {
    pub base_version: u32,
    /// Linked paths of the base file; `[0]` identifies the base itself.
    pub base_linked: Vec<String>,
}

/// A parsed property-bag file.
///
/// Entry order and field order are preserved exactly; the entry table is
/// keyed by entry-name hash, which also enforces uniqueness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinFile {
    pub version: u32,
    /// Present iff the file magic was `PTCH`.
    pub patch_header: Option<PatchHeader>,
    pub linked: Vec<String>,
    pub entries: IndexMap<u32, BinEntry>,
    pub patches: Vec<BinPatch>,
}

impl BinFile {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            patch_header: None,
            linked: Vec::new(),
            entries: IndexMap::new(),
            patches: Vec::new(),
        }
    }

    pub fn is_patch(&self) -> bool {
        self.patch_header.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_byte_round_trip() {
        for raw in 0u8..=255 {
            if let Ok(t) = BinType::try_from(raw) {
                assert_eq!(t as u8, raw);
            }
        }
        assert!(BinType::try_from(19).is_err());
        assert!(BinType::try_from(0x88).is_err());
    }

    #[test]
    fn container_classification() {
        assert!(BinType::List.is_container());
        assert!(BinType::Map.is_container());
        assert!(!BinType::Pointer.is_container());
        assert!(!BinType::Pointer.is_primitive());
        assert!(BinType::Hash.is_primitive());
    }

    #[test]
    fn value_reports_its_tag() {
        assert_eq!(BinValue::F32(1.0).tag(), BinType::F32);
        assert_eq!(
            BinValue::Pointer {
                type_hash: 0,
                type_name: None,
                fields: vec![]
            }
            .tag(),
            BinType::Pointer
        );
        assert_eq!(BinValue::Flag(1).tag(), BinType::Flag);
    }
}
