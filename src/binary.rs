//! Reader and writer for the property-bag (BIN) entity format.
//!
//! The format is little-endian and tag-dispatched: a `PROP` or `PTCH` magic,
//! a version, optional linked-file paths, an entry-type table, then the
//! entries themselves. Containers carry a u32 byte size counting everything
//! after the size field; the writer reserves the u32, emits the payload and
//! patches the size afterwards, and the reader verifies it.

use crate::hash::{fnv1a32, xxh64};
use crate::model::{BinEntry, BinField, BinFile, BinPatch, BinType, BinValue, PatchHeader};
use crate::stream::{ByteReader, ByteWriter, StreamError};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BinError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid magic bytes")]
    BadMagic,
    #[error("unsupported version {0}")]
    UnsupportedVersion(u32),
    #[error("unknown tag 0x{0:02x}")]
    UnknownTag(u8),
    #[error("truncated file at offset {0}")]
    Truncated(u64),
    #[error("container byte size mismatch: declared {declared}, got {actual}")]
    ByteSizeMismatch { declared: u32, actual: u64 },
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("duplicate entry 0x{0:08x}")]
    DuplicateEntry(u32),
    #[error("cannot resolve patch base: {0}")]
    UnresolvedPatchBase(String),
}

impl From<StreamError> for BinError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::EndOfStream(at) => BinError::Truncated(at),
            StreamError::StringTooLong(n) => {
                BinError::InvalidPayload(format!("string of {} bytes exceeds u16 length", n))
            }
            StreamError::Io(err) => BinError::InvalidPayload(err.to_string()),
        }
    }
}

/// Highest version any live file has been observed to carry.
const MAX_VERSION: u32 = 3;

struct BinReader<'a> {
    r: ByteReader<'a>,
    /// Pre-LIST2 files number container tags past 0x80 one lower.
    legacy: bool,
}

impl<'a> BinReader<'a> {
    fn read_tag(&mut self) -> Result<BinType, BinError> {
        let raw = self.r.read_u8()?;
        let raw = if self.legacy && raw >= 0x81 {
            raw.checked_add(1).ok_or(BinError::UnknownTag(raw))?
        } else {
            raw
        };
        BinType::try_from(raw).map_err(BinError::UnknownTag)
    }

    fn read_value(&mut self, tag: BinType) -> Result<BinValue, BinError> {
        match tag {
            BinType::None => Ok(BinValue::None),
            BinType::Bool => Ok(BinValue::Bool(self.r.read_bool()?)),
            BinType::I8 => Ok(BinValue::I8(self.r.read_i8()?)),
            BinType::U8 => Ok(BinValue::U8(self.r.read_u8()?)),
            BinType::I16 => Ok(BinValue::I16(self.r.read_i16()?)),
            BinType::U16 => Ok(BinValue::U16(self.r.read_u16()?)),
            BinType::I32 => Ok(BinValue::I32(self.r.read_i32()?)),
            BinType::U32 => Ok(BinValue::U32(self.r.read_u32()?)),
            BinType::I64 => Ok(BinValue::I64(self.r.read_i64()?)),
            BinType::U64 => Ok(BinValue::U64(self.r.read_u64()?)),
            BinType::F32 => Ok(BinValue::F32(self.r.read_f32()?)),
            BinType::Vec2 => Ok(BinValue::Vec2(self.r.read_vec2()?)),
            BinType::Vec3 => Ok(BinValue::Vec3(self.r.read_vec3()?)),
            BinType::Vec4 => Ok(BinValue::Vec4(self.r.read_vec4()?)),
            BinType::Mtx44 => Ok(BinValue::Mtx44(self.r.read_mtx44()?)),
            BinType::Rgba => Ok(BinValue::Rgba(self.r.read_rgba()?)),
            BinType::String => Ok(BinValue::String(self.r.read_str_u16()?)),
            BinType::Hash => Ok(BinValue::Hash {
                value: self.r.read_u32()?,
                name: None,
            }),
            BinType::File => Ok(BinValue::File {
                value: self.r.read_u64()?,
                name: None,
            }),
            BinType::List | BinType::List2 => self.read_list(tag),
            BinType::Pointer => self.read_struct(BinType::Pointer),
            BinType::Embed => self.read_struct(BinType::Embed),
            BinType::Link => Ok(BinValue::Link {
                value: self.r.read_u32()?,
                name: None,
            }),
            BinType::Option => self.read_option(),
            BinType::Map => self.read_map(),
            BinType::Flag => Ok(BinValue::Flag(self.r.read_u8()?)),
        }
    }

    fn check_size(&self, declared: u32, start: u64) -> Result<(), BinError> {
        let actual = self.r.tell() - start;
        if actual != declared as u64 {
            return Err(BinError::ByteSizeMismatch { declared, actual });
        }
        Ok(())
    }

    fn read_list(&mut self, tag: BinType) -> Result<BinValue, BinError> {
        let value_type = self.read_tag()?;
        let size = self.r.read_u32()?;
        let start = self.r.tell();
        let count = self.r.read_u32()?;
        let mut items = Vec::with_capacity(count.min(0x10000) as usize);
        for _ in 0..count {
            items.push(self.read_value(value_type)?);
        }
        self.check_size(size, start)?;
        Ok(match tag {
            BinType::List => BinValue::List { value_type, items },
            _ => BinValue::List2 { value_type, items },
        })
    }

    fn read_fields(&mut self, count: usize) -> Result<Vec<BinField>, BinError> {
        let mut fields = Vec::with_capacity(count.min(0x10000));
        for _ in 0..count {
            let hash = self.r.read_u32()?;
            let tag = self.read_tag()?;
            let value = self.read_value(tag)?;
            fields.push(BinField::new(hash, value));
        }
        Ok(fields)
    }

    fn read_struct(&mut self, tag: BinType) -> Result<BinValue, BinError> {
        let type_hash = self.r.read_u32()?;
        if type_hash == 0 {
            if tag == BinType::Embed {
                return Err(BinError::InvalidPayload("embed with null type hash".into()));
            }
            return Ok(BinValue::Pointer {
                type_hash: 0,
                type_name: None,
                fields: Vec::new(),
            });
        }
        let size = self.r.read_u32()?;
        let start = self.r.tell();
        let count = self.r.read_u16()?;
        let fields = self.read_fields(count as usize)?;
        self.check_size(size, start)?;
        Ok(match tag {
            BinType::Pointer => BinValue::Pointer {
                type_hash,
                type_name: None,
                fields,
            },
            _ => BinValue::Embed {
                type_hash,
                type_name: None,
                fields,
            },
        })
    }

    fn read_option(&mut self) -> Result<BinValue, BinError> {
        let value_type = self.read_tag()?;
        let has = self.r.read_u8()?;
        let item = if has != 0 {
            Some(Box::new(self.read_value(value_type)?))
        } else {
            None
        };
        Ok(BinValue::Option { value_type, item })
    }

    fn read_map(&mut self) -> Result<BinValue, BinError> {
        let key_type = self.read_tag()?;
        if !key_type.is_primitive() {
            return Err(BinError::InvalidPayload(format!(
                "map key tag {:?} is not primitive",
                key_type
            )));
        }
        let value_type = self.read_tag()?;
        let size = self.r.read_u32()?;
        let start = self.r.tell();
        let count = self.r.read_u32()?;
        let mut items = Vec::with_capacity(count.min(0x10000) as usize);
        for _ in 0..count {
            let key = self.read_value(key_type)?;
            let value = self.read_value(value_type)?;
            items.push((key, value));
        }
        self.check_size(size, start)?;
        Ok(BinValue::Map {
            key_type,
            value_type,
            items,
        })
    }
}

/// Parse a BIN file from raw bytes.
pub fn read_bin(data: &[u8]) -> Result<BinFile, BinError> {
    let mut r = ByteReader::new(data);

    let magic = r.read_array::<4>()?;
    let is_patch = match &magic {
        b"PROP" => false,
        b"PTCH" => true,
        _ => return Err(BinError::BadMagic),
    };

    let version = r.read_u32()?;
    if version == 0 || version > MAX_VERSION {
        return Err(BinError::UnsupportedVersion(version));
    }

    let mut reader = BinReader {
        r,
        legacy: version < 2,
    };
    let mut bin = BinFile::new(version);

    if is_patch {
        let base_version = reader.r.read_u32()?;
        let base_linked_count = reader.r.read_u32()?;
        let mut base_linked = Vec::with_capacity(base_linked_count.min(0x10000) as usize);
        for _ in 0..base_linked_count {
            base_linked.push(reader.r.read_str_u16()?);
        }
        bin.patch_header = Some(PatchHeader {
            base_version,
            base_linked,
        });
    }

    if version >= 2 {
        let linked_count = reader.r.read_u32()?;
        for _ in 0..linked_count {
            bin.linked.push(reader.r.read_str_u16()?);
        }
    }

    let entry_count = reader.r.read_u32()?;
    let mut entry_types = Vec::with_capacity(entry_count.min(0x10000) as usize);
    for _ in 0..entry_count {
        entry_types.push(reader.r.read_u32()?);
    }

    for type_hash in entry_types {
        let size = reader.r.read_u32()?;
        let start = reader.r.tell();
        let entry_hash = reader.r.read_u32()?;
        let field_count = reader.r.read_u16()?;
        let fields = reader.read_fields(field_count as usize)?;
        reader.check_size(size, start)?;

        let mut entry = BinEntry::new(type_hash);
        entry.fields = fields;
        if bin.entries.insert(entry_hash, entry).is_some() {
            return Err(BinError::DuplicateEntry(entry_hash));
        }
    }

    if is_patch {
        let patch_count = reader.r.read_u32()?;
        for _ in 0..patch_count {
            let entry_hash = reader.r.read_u32()?;
            let size = reader.r.read_u32()?;
            let start = reader.r.tell();
            let tag = reader.read_tag()?;
            let path = reader.r.read_str_u16()?;
            let value = reader.read_value(tag)?;
            reader.check_size(size, start)?;
            bin.patches.push(BinPatch {
                entry_hash,
                path,
                value,
            });
        }
    }

    Ok(bin)
}

struct BinWriter {
    w: ByteWriter,
}

impl BinWriter {
    fn write_tag(&mut self, tag: BinType) -> Result<(), BinError> {
        self.w.write_u8(tag as u8)?;
        Ok(())
    }

    fn write_value(&mut self, v: &BinValue) -> Result<(), BinError> {
        match v {
            BinValue::None => {}
            BinValue::Bool(b) => self.w.write_bool(*b)?,
            BinValue::I8(x) => self.w.write_i8(*x)?,
            BinValue::U8(x) => self.w.write_u8(*x)?,
            BinValue::I16(x) => self.w.write_i16(*x)?,
            BinValue::U16(x) => self.w.write_u16(*x)?,
            BinValue::I32(x) => self.w.write_i32(*x)?,
            BinValue::U32(x) => self.w.write_u32(*x)?,
            BinValue::I64(x) => self.w.write_i64(*x)?,
            BinValue::U64(x) => self.w.write_u64(*x)?,
            BinValue::F32(x) => self.w.write_f32(*x)?,
            BinValue::Vec2(x) => self.w.write_vec2(*x)?,
            BinValue::Vec3(x) => self.w.write_vec3(*x)?,
            BinValue::Vec4(x) => self.w.write_vec4(*x)?,
            BinValue::Mtx44(x) => self.w.write_mtx44(*x)?,
            BinValue::Rgba(x) => self.w.write_rgba(*x)?,
            BinValue::String(s) => self.w.write_str_u16(s)?,
            BinValue::Hash { value, .. } => self.w.write_u32(*value)?,
            BinValue::File { value, name } => {
                // A rewritten path takes precedence over the stale hash.
                let h = match name {
                    Some(n) => xxh64(n),
                    None => *value,
                };
                self.w.write_u64(h)?;
            }
            BinValue::List { value_type, items } | BinValue::List2 { value_type, items } => {
                self.write_list(*value_type, items)?;
            }
            BinValue::Pointer {
                type_hash, fields, ..
            } => self.write_struct(BinType::Pointer, *type_hash, fields)?,
            BinValue::Embed {
                type_hash, fields, ..
            } => self.write_struct(BinType::Embed, *type_hash, fields)?,
            BinValue::Link { value, .. } => self.w.write_u32(*value)?,
            BinValue::Option { value_type, item } => {
                self.write_tag(*value_type)?;
                match item {
                    Some(inner) => {
                        self.check_inner(*value_type, inner)?;
                        self.w.write_u8(1)?;
                        self.write_value(inner)?;
                    }
                    None => self.w.write_u8(0)?,
                }
            }
            BinValue::Map {
                key_type,
                value_type,
                items,
            } => self.write_map(*key_type, *value_type, items)?,
            BinValue::Flag(x) => self.w.write_u8(*x)?,
        }
        Ok(())
    }

    fn check_inner(&self, expected: BinType, v: &BinValue) -> Result<(), BinError> {
        if v.tag() != expected {
            return Err(BinError::InvalidPayload(format!(
                "container element tag {:?} does not match inner tag {:?}",
                v.tag(),
                expected
            )));
        }
        Ok(())
    }

    fn write_list(&mut self, value_type: BinType, items: &[BinValue]) -> Result<(), BinError> {
        self.write_tag(value_type)?;
        let size_pos = self.w.tell();
        self.w.write_u32(0)?;
        let start = self.w.tell();
        self.w.write_u32(items.len() as u32)?;
        for item in items {
            self.check_inner(value_type, item)?;
            self.write_value(item)?;
        }
        self.w.patch_u32_at(size_pos, (self.w.tell() - start) as u32)?;
        Ok(())
    }

    fn write_fields(&mut self, fields: &[BinField]) -> Result<(), BinError> {
        for field in fields {
            self.w.write_u32(field.hash)?;
            self.write_tag(field.value.tag())?;
            self.write_value(&field.value)?;
        }
        Ok(())
    }

    fn write_struct(
        &mut self,
        tag: BinType,
        type_hash: u32,
        fields: &[BinField],
    ) -> Result<(), BinError> {
        if type_hash == 0 {
            if tag == BinType::Embed {
                return Err(BinError::InvalidPayload("embed with null type hash".into()));
            }
            if !fields.is_empty() {
                return Err(BinError::InvalidPayload(
                    "null pointer with fields".into(),
                ));
            }
            self.w.write_u32(0)?;
            return Ok(());
        }
        self.w.write_u32(type_hash)?;
        let size_pos = self.w.tell();
        self.w.write_u32(0)?;
        let start = self.w.tell();
        self.w.write_u16(fields.len() as u16)?;
        self.write_fields(fields)?;
        self.w.patch_u32_at(size_pos, (self.w.tell() - start) as u32)?;
        Ok(())
    }

    fn write_map(
        &mut self,
        key_type: BinType,
        value_type: BinType,
        items: &[(BinValue, BinValue)],
    ) -> Result<(), BinError> {
        if !key_type.is_primitive() {
            return Err(BinError::InvalidPayload(format!(
                "map key tag {:?} is not primitive",
                key_type
            )));
        }
        self.write_tag(key_type)?;
        self.write_tag(value_type)?;
        let size_pos = self.w.tell();
        self.w.write_u32(0)?;
        let start = self.w.tell();
        self.w.write_u32(items.len() as u32)?;
        for (key, value) in items {
            self.check_inner(key_type, key)?;
            self.check_inner(value_type, value)?;
            self.write_value(key)?;
            self.write_value(value)?;
        }
        self.w.patch_u32_at(size_pos, (self.w.tell() - start) as u32)?;
        Ok(())
    }
}

/// Serialize a BIN file. Always emits modern tag numbering and version 2 at
/// minimum, so the output never needs the legacy read path.
pub fn write_bin(bin: &BinFile) -> Result<Vec<u8>, BinError> {
    let mut writer = BinWriter { w: ByteWriter::new() };
    let version = bin.version.max(2);

    if let Some(header) = &bin.patch_header {
        writer.w.write_bytes(b"PTCH")?;
        writer.w.write_u32(version)?;
        writer.w.write_u32(header.base_version)?;
        writer.w.write_u32(header.base_linked.len() as u32)?;
        for path in &header.base_linked {
            writer.w.write_str_u16(path)?;
        }
    } else {
        writer.w.write_bytes(b"PROP")?;
        writer.w.write_u32(version)?;
    }

    writer.w.write_u32(bin.linked.len() as u32)?;
    for path in &bin.linked {
        writer.w.write_str_u16(path)?;
    }

    writer.w.write_u32(bin.entries.len() as u32)?;
    for entry in bin.entries.values() {
        writer.w.write_u32(entry.type_hash)?;
    }

    for (&entry_hash, entry) in &bin.entries {
        let size_pos = writer.w.tell();
        writer.w.write_u32(0)?;
        let start = writer.w.tell();
        writer.w.write_u32(entry_hash)?;
        writer.w.write_u16(entry.fields.len() as u16)?;
        writer.write_fields(&entry.fields)?;
        writer
            .w
            .patch_u32_at(size_pos, (writer.w.tell() - start) as u32)?;
    }

    if bin.patch_header.is_some() {
        writer.w.write_u32(bin.patches.len() as u32)?;
        for patch in &bin.patches {
            writer.w.write_u32(patch.entry_hash)?;
            let size_pos = writer.w.tell();
            writer.w.write_u32(0)?;
            let start = writer.w.tell();
            writer.write_tag(patch.value.tag())?;
            writer.w.write_str_u16(&patch.path)?;
            writer.write_value(&patch.value)?;
            writer
                .w
                .patch_u32_at(size_pos, (writer.w.tell() - start) as u32)?;
        }
    }

    Ok(writer.w.into_bytes())
}

/// One `name[i][j]`-shaped step of an override path.
struct PathSegment<'a> {
    name: &'a str,
    indices: Vec<usize>,
}

fn parse_path(path: &str) -> Option<Vec<PathSegment<'_>>> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        let bracket = part.find('[').unwrap_or(part.len());
        let name = &part[..bracket];
        if name.is_empty() {
            return None;
        }
        let mut indices = Vec::new();
        let mut rest = &part[bracket..];
        while let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped.find(']')?;
            indices.push(stripped[..close].parse().ok()?);
            rest = &stripped[close + 1..];
        }
        if !rest.is_empty() {
            return None;
        }
        segments.push(PathSegment { name, indices });
    }
    Some(segments)
}

fn segment_matches(seg: &str, hash: u32, name: Option<&str>) -> bool {
    if let Some(n) = name {
        if n.eq_ignore_ascii_case(seg) {
            return true;
        }
    }
    if seg.len() == 8 {
        if let Ok(h) = u32::from_str_radix(seg, 16) {
            if h == hash {
                return true;
            }
        }
    }
    fnv1a32(seg) == hash
}

fn descend<'v>(value: &'v mut BinValue, index: usize) -> Option<&'v mut BinValue> {
    match value {
        BinValue::List { items, .. } | BinValue::List2 { items, .. } => items.get_mut(index),
        BinValue::Option { item, .. } => {
            if index == 0 {
                item.as_deref_mut()
            } else {
                None
            }
        }
        BinValue::Map { items, .. } => items.get_mut(index).map(|(_, v)| v),
        _ => None,
    }
}

fn resolve_path_mut<'v>(
    fields: &'v mut [BinField],
    segments: &[PathSegment<'_>],
) -> Option<&'v mut BinValue> {
    let (seg, rest) = segments.split_first()?;
    let field = fields
        .iter_mut()
        .find(|f| segment_matches(seg.name, f.hash, f.name.as_deref()))?;
    let mut current = &mut field.value;
    for &i in &seg.indices {
        current = descend(current, i)?;
    }
    if rest.is_empty() {
        return Some(current);
    }
    match current {
        BinValue::Pointer { fields, .. } | BinValue::Embed { fields, .. } => {
            resolve_path_mut(fields, rest)
        }
        _ => None,
    }
}

/// Apply a PTCH file's overrides onto its base, in declaration order.
///
/// Overrides replace the value addressed by `(entry_hash, path)`; creating
/// new fields or deleting existing ones is unsupported, and an override whose
/// target does not resolve is skipped with a warning.
pub fn apply_patch(base: &mut BinFile, patch: &BinFile) {
    for over in &patch.patches {
        let target = base
            .entries
            .get_mut(&over.entry_hash)
            .and_then(|entry| {
                let segments = parse_path(&over.path)?;
                resolve_path_mut(&mut entry.fields, &segments)
            });
        match target {
            Some(slot) => *slot = over.value.clone(),
            None => log::warn!(
                "patch override {}/{} has no target, skipped",
                crate::hash::hex32(over.entry_hash),
                over.path
            ),
        }
    }
}

/// Read a PTCH file and resolve it onto its base BIN.
///
/// The base is identified by the first linked path (the patch header's base
/// list, falling back to the regular linked list) resolved relative to the
/// patch file's directory.
pub fn read_bin_with_base(patch_path: &Path) -> Result<BinFile, BinError> {
    let data = std::fs::read(patch_path).map_err(|source| BinError::Io {
        path: patch_path.to_path_buf(),
        source,
    })?;
    let patch = read_bin(&data)?;
    let Some(header) = &patch.patch_header else {
        return Ok(patch);
    };

    let base_rel = header
        .base_linked
        .first()
        .or_else(|| patch.linked.first())
        .ok_or_else(|| {
            BinError::UnresolvedPatchBase(format!("{} names no base file", patch_path.display()))
        })?;
    let base_path = patch_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(base_rel);
    let base_data = std::fs::read(&base_path)
        .map_err(|_| BinError::UnresolvedPatchBase(base_path.display().to_string()))?;
    let mut base = read_bin(&base_data)?;
    apply_patch(&mut base, &patch);
    Ok(base)
}
