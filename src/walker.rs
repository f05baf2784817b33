//! Reference enumeration over a parsed BIN tree.
//!
//! Walks every field of an entry, collecting FILE references (64-bit path
//! hashes, plus STRING fields whose names are known to carry paths) and LINK
//! references (32-bit entry hashes), with a breadcrumbed field path for each.

use crate::hash::{hex32, hex64};
use crate::hashtable::HashTables;
use crate::model::{BinEntry, BinField, BinValue};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RefKind {
    File,
    Link,
}

/// One reference found in an entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reference {
    pub entry_hash: u32,
    /// Walk path, e.g. `materialOverride[3].material`
    pub field_path: String,
    pub kind: RefKind,
    /// Resolved path or entry name; hex when the hash is unknown
    pub value: String,
    /// Whether the referent is present in the probed source set
    pub exists: bool,
}

/// Answers existence questions for the walked references. The bumpath index
/// implements this; [`NoProbe`] answers no to everything.
pub trait RefProbe {
    fn file_exists(&self, path: &str) -> bool;
    fn link_exists(&self, entry_hash: u32) -> bool;
}

pub struct NoProbe;

impl RefProbe for NoProbe {
    fn file_exists(&self, _path: &str) -> bool {
        false
    }
    fn link_exists(&self, _entry_hash: u32) -> bool {
        false
    }
}

/// Field names whose STRING values name files rather than display text.
pub const DEFAULT_PATH_FIELDS: &[&str] = &[
    "texture",
    "texturePath",
    "simpleSkin",
    "skeleton",
    "animationGraphData",
    "animationName",
    "particlePath",
    "material",
];

#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Hashes of field names whose STRING values are treated as file paths.
    pub path_fields: HashSet<u32>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            path_fields: DEFAULT_PATH_FIELDS
                .iter()
                .map(|s| crate::hash::fnv1a32(s))
                .collect(),
        }
    }
}

/// True for strings that look like relative asset paths, e.g. `a/b.dds`.
pub fn has_file_extension(s: &str) -> bool {
    let tail = s.rsplit(['/', '\\']).next().unwrap_or(s);
    match tail.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.bytes().all(|b| b.is_ascii_alphanumeric())
        }
        None => false,
    }
}

pub struct RefWalker<'a> {
    tables: &'a HashTables,
    options: WalkOptions,
}

impl<'a> RefWalker<'a> {
    pub fn new(tables: &'a HashTables) -> Self {
        Self {
            tables,
            options: WalkOptions::default(),
        }
    }

    pub fn with_options(tables: &'a HashTables, options: WalkOptions) -> Self {
        Self { tables, options }
    }

    /// Collect every reference reachable from `entry`.
    pub fn walk_entry(
        &self,
        entry_hash: u32,
        entry: &BinEntry,
        probe: &dyn RefProbe,
    ) -> Vec<Reference> {
        let mut out = Vec::new();
        self.walk_fields(entry_hash, &entry.fields, "", probe, &mut out);
        out
    }

    fn field_label(&self, field: &BinField) -> String {
        field
            .name
            .clone()
            .or_else(|| self.tables.resolve_u32(field.hash).map(str::to_string))
            .unwrap_or_else(|| hex32(field.hash))
    }

    fn walk_fields(
        &self,
        entry_hash: u32,
        fields: &[BinField],
        prefix: &str,
        probe: &dyn RefProbe,
        out: &mut Vec<Reference>,
    ) {
        for field in fields {
            let label = self.field_label(field);
            let path = if prefix.is_empty() {
                label
            } else {
                format!("{}.{}", prefix, label)
            };

            if let BinValue::String(s) = &field.value {
                if self.options.path_fields.contains(&field.hash) && has_file_extension(s) {
                    out.push(Reference {
                        entry_hash,
                        field_path: path.clone(),
                        kind: RefKind::File,
                        value: s.clone(),
                        exists: probe.file_exists(s),
                    });
                }
            }

            self.walk_value(entry_hash, &field.value, &path, probe, out);
        }
    }

    fn walk_value(
        &self,
        entry_hash: u32,
        value: &BinValue,
        path: &str,
        probe: &dyn RefProbe,
        out: &mut Vec<Reference>,
    ) {
        match value {
            BinValue::File { value, name } => {
                let display = name
                    .clone()
                    .or_else(|| self.tables.resolve_u64(*value).map(str::to_string))
                    .unwrap_or_else(|| hex64(*value));
                let exists = probe.file_exists(&display);
                out.push(Reference {
                    entry_hash,
                    field_path: path.to_string(),
                    kind: RefKind::File,
                    value: display,
                    exists,
                });
            }
            BinValue::Link { value, name } => {
                let display = name
                    .clone()
                    .or_else(|| self.tables.resolve_u32(*value).map(str::to_string))
                    .unwrap_or_else(|| hex32(*value));
                out.push(Reference {
                    entry_hash,
                    field_path: path.to_string(),
                    kind: RefKind::Link,
                    value: display,
                    exists: probe.link_exists(*value),
                });
            }
            BinValue::List { items, .. } | BinValue::List2 { items, .. } => {
                for (i, item) in items.iter().enumerate() {
                    self.walk_value(entry_hash, item, &format!("{}[{}]", path, i), probe, out);
                }
            }
            BinValue::Option { item, .. } => {
                if let Some(inner) = item {
                    self.walk_value(entry_hash, inner, &format!("{}[0]", path), probe, out);
                }
            }
            BinValue::Map { items, .. } => {
                for (i, (key, val)) in items.iter().enumerate() {
                    let slot = format!("{}[{}]", path, i);
                    self.walk_value(entry_hash, key, &slot, probe, out);
                    self.walk_value(entry_hash, val, &slot, probe, out);
                }
            }
            BinValue::Pointer { fields, .. } | BinValue::Embed { fields, .. } => {
                self.walk_fields(entry_hash, fields, path, probe, out);
            }
            _ => {}
        }
    }
}
