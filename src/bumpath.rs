//! The bumpath engine: relocate a set of entity files and everything they
//! reference under a new path prefix.
//!
//! The engine indexes one or more source directories, scans the selected BIN
//! files for references, lets the caller adjust per-entry prefixes, and then
//! materializes a rewritten copy of the whole reachable set. The write phase
//! is computed fully up front as a schedule of disjoint-output tasks and
//! dispatched on a worker pool.

use crate::binary::{read_bin, write_bin, BinError};
use crate::hash::{hex32, xxh64};
use crate::hashtable::HashTables;
use crate::model::{BinFile, BinValue};
use crate::walker::{has_file_extension, RefKind, RefProbe, RefWalker, WalkOptions};
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// Sentinel prefix for entries excluded from rewriting.
pub const UNEDITABLE: &str = "Uneditable";

/// Entry types that are never rewritten.
pub const DEFAULT_UNEDITABLE_TYPES: &[&str] = &["AnimationGraphData", "mapContainer"];

const PROGRESS_EVERY: usize = 25;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to access {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Bin(#[from] BinError),
    #[error("missing referenced file {0}")]
    ResourceMissing(String),
    #[error("output path too long: {0}")]
    PathTooLong(String),
    #[error("merge conflict on entry 0x{0:08x}")]
    MergeConflict(u32),
    #[error("linked files form a cycle through {0}")]
    CycleInLinks(String),
    #[error("scan has not been run")]
    NotScanned,
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileKind {
    Bin,
    Asset,
}

#[derive(Debug, Clone)]
struct IndexedFile {
    abs: PathBuf,
    kind: FileKind,
}

/// Policy switches for [`Bumpath::process`].
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Warn and skip missing referenced files instead of failing.
    pub ignore_missing: bool,
    /// Merge linked animation BINs into their parent instead of emitting
    /// them separately.
    pub combine_linked: bool,
    /// Output paths longer than this trigger the path-length policy.
    pub path_length_cap: u16,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            ignore_missing: false,
            combine_linked: false,
            path_length_cap: 240,
        }
    }
}

/// One reference row of the scan result.
#[derive(Debug, Clone, Serialize)]
pub struct ScannedRef {
    pub field_path: String,
    pub path: String,
    pub exists: bool,
    pub unify_path: String,
    pub kind: RefKind,
}

/// One entry row of the scan result.
#[derive(Debug, Clone, Serialize)]
pub struct ScannedEntry {
    pub hash: u32,
    pub name: String,
    pub type_name: String,
    pub prefix: String,
    pub refs: Vec<ScannedRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScannedBin {
    pub unify_path: String,
    pub entries: Vec<ScannedEntry>,
    #[serde(skip)]
    file: BinFile,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScannedTree {
    pub bins: Vec<ScannedBin>,
}

/// What a process run produced.
#[derive(Debug, Default, Serialize)]
pub struct ProcessReport {
    pub written: Vec<String>,
    pub copied: Vec<String>,
    pub warnings: Vec<String>,
}

/// Canonical index key: lowercased, forward slashes.
pub fn unify(path: &str) -> String {
    path.replace('\\', "/").to_ascii_lowercase()
}

fn is_animation_path(unify_path: &str) -> bool {
    unify_path.split('/').any(|seg| seg == "animations")
}

/// Separator-normalized form used for rewritten values; keeps casing.
fn normalize(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}

pub struct Bumpath {
    sources: Vec<PathBuf>,
    index: IndexMap<String, IndexedFile>,
    selection: HashSet<String>,
    prefix: String,
    uneditable_types: HashSet<u32>,
    walk_options: WalkOptions,
    tables: Option<std::sync::Arc<HashTables>>,
    scanned: Option<ScannedTree>,
}

impl Default for Bumpath {
    fn default() -> Self {
        Self::new()
    }
}

struct IndexProbe<'a> {
    index: &'a IndexMap<String, IndexedFile>,
    entries: &'a HashSet<u32>,
}

impl RefProbe for IndexProbe<'_> {
    fn file_exists(&self, path: &str) -> bool {
        self.index.contains_key(&unify(path))
    }
    fn link_exists(&self, entry_hash: u32) -> bool {
        self.entries.contains(&entry_hash)
    }
}

impl Bumpath {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            index: IndexMap::new(),
            selection: HashSet::new(),
            prefix: "bum".to_string(),
            uneditable_types: DEFAULT_UNEDITABLE_TYPES
                .iter()
                .map(|s| crate::hash::fnv1a32(s))
                .collect(),
            walk_options: WalkOptions::default(),
            tables: None,
            scanned: None,
        }
    }

    /// The prefix newly scanned entries start out with.
    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
    }

    /// Directories indexed so far, in the order they were added.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn set_uneditable_types(&mut self, types: HashSet<u32>) {
        self.uneditable_types = types;
    }

    pub fn set_walk_options(&mut self, options: WalkOptions) {
        self.walk_options = options;
    }

    /// Index the given directories. Keys are unify paths relative to each
    /// source root; a later directory shadows an earlier one on collision.
    pub fn add_source_dirs(&mut self, dirs: &[PathBuf]) -> Result<(), ProcessError> {
        for dir in dirs {
            for item in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
                if !item.file_type().is_file() {
                    continue;
                }
                let rel = item
                    .path()
                    .strip_prefix(dir)
                    .unwrap_or(item.path())
                    .to_string_lossy()
                    .into_owned();
                let key = unify(&rel);
                let kind = if key.ends_with(".bin") {
                    FileKind::Bin
                } else {
                    FileKind::Asset
                };
                let entry = IndexedFile {
                    abs: item.path().to_path_buf(),
                    kind,
                };
                if let Some(shadowed) = self.index.insert(key.clone(), entry) {
                    log::warn!("{} shadows {}", key, shadowed.abs.display());
                }
            }
            self.sources.push(dir.clone());
        }
        Ok(())
    }

    /// Unify paths of everything the caller may select.
    pub fn selectable_bins(&self) -> impl Iterator<Item = &str> + '_ {
        self.index
            .iter()
            .filter(|(key, file)| file.kind == FileKind::Bin && !is_animation_path(key))
            .map(|(key, _)| key.as_str())
    }

    /// Toggle BIN files in or out of the working set. Only indexed `.bin`
    /// files outside `animations/` are selectable; animation BINs arrive as
    /// linked files during processing instead.
    pub fn set_bin_selection(&mut self, selection: &HashMap<String, bool>) {
        for (path, on) in selection {
            let key = unify(path);
            if !*on {
                self.selection.remove(&key);
                continue;
            }
            match self.index.get(&key) {
                Some(file) if file.kind == FileKind::Bin && !is_animation_path(&key) => {
                    self.selection.insert(key);
                }
                Some(_) => log::warn!("{} is not a selectable bin", key),
                None => log::warn!("{} is not indexed", key),
            }
        }
    }

    /// Drop the index, selection and scan state.
    pub fn reset(&mut self) {
        self.sources.clear();
        self.index.clear();
        self.selection.clear();
        self.tables = None;
        self.scanned = None;
    }

    /// Parse every selected BIN, resolve its names and collect references.
    ///
    /// Codec failures abort the scan; per-reference problems (unknown hashes,
    /// missing files) land in the result rows instead.
    pub fn scan(
        &mut self,
        tables: std::sync::Arc<HashTables>,
    ) -> Result<&ScannedTree, ProcessError> {
        let mut parsed: Vec<(String, BinFile)> = Vec::new();
        let mut selection: Vec<&String> = self.selection.iter().collect();
        selection.sort();
        for key in selection {
            let Some(file) = self.index.get(key) else {
                log::warn!("selected {} is no longer indexed", key);
                continue;
            };
            let data = std::fs::read(&file.abs).map_err(|source| ProcessError::Io {
                path: file.abs.clone(),
                source,
            })?;
            let mut bin = read_bin(&data)?;
            tables.resolve_bin(&mut bin);
            parsed.push((key.clone(), bin));
        }

        let entry_index: HashSet<u32> = parsed
            .iter()
            .flat_map(|(_, bin)| bin.entries.keys().copied())
            .collect();
        let probe = IndexProbe {
            index: &self.index,
            entries: &entry_index,
        };
        let walker = RefWalker::with_options(&tables, self.walk_options.clone());

        let mut tree = ScannedTree::default();
        for (unify_path, bin) in parsed {
            let mut entries = Vec::with_capacity(bin.entries.len());
            for (&hash, entry) in &bin.entries {
                let refs = walker
                    .walk_entry(hash, entry, &probe)
                    .into_iter()
                    .map(|r| ScannedRef {
                        field_path: r.field_path,
                        unify_path: unify(&r.value),
                        exists: r.exists,
                        path: r.value,
                        kind: r.kind,
                    })
                    .collect();
                let prefix = if self.uneditable_types.contains(&entry.type_hash) {
                    UNEDITABLE.to_string()
                } else {
                    self.prefix.clone()
                };
                entries.push(ScannedEntry {
                    hash,
                    name: tables
                        .resolve_u32(hash)
                        .map(str::to_string)
                        .unwrap_or_else(|| hex32(hash)),
                    type_name: entry
                        .type_name
                        .clone()
                        .unwrap_or_else(|| hex32(entry.type_hash)),
                    prefix,
                    refs,
                });
            }
            tree.bins.push(ScannedBin {
                unify_path,
                entries,
                file: bin,
            });
        }

        self.tables = Some(tables);
        Ok(&*self.scanned.insert(tree))
    }

    pub fn scanned(&self) -> Option<&ScannedTree> {
        self.scanned.as_ref()
    }

    /// Update the prefix of the given entries, everywhere they appear.
    /// The `Uneditable` sentinel is never overwritten. In-memory only.
    pub fn apply_prefix(&mut self, entry_hashes: &[u32], prefix: &str) {
        let Some(tree) = self.scanned.as_mut() else {
            return;
        };
        let wanted: HashSet<u32> = entry_hashes.iter().copied().collect();
        for bin in &mut tree.bins {
            for entry in &mut bin.entries {
                if wanted.contains(&entry.hash) && entry.prefix != UNEDITABLE {
                    entry.prefix = prefix.to_string();
                }
            }
        }
    }

    /// Rewrite and materialize the scanned set into `out_dir`.
    pub fn process<F>(
        &self,
        out_dir: &Path,
        options: &ProcessOptions,
        progress: F,
    ) -> Result<ProcessReport, ProcessError>
    where
        F: Fn(usize, &str) + Sync,
    {
        let never = AtomicBool::new(false);
        self.process_with_cancel(out_dir, options, progress, &never)
    }

    /// [`process`](Self::process) with a cooperative cancellation flag,
    /// checked at task boundaries and between BIN writes. Already written
    /// files are not rolled back on cancel.
    pub fn process_with_cancel<F>(
        &self,
        out_dir: &Path,
        options: &ProcessOptions,
        progress: F,
        cancel: &AtomicBool,
    ) -> Result<ProcessReport, ProcessError>
    where
        F: Fn(usize, &str) + Sync,
    {
        let scanned = self.scanned.as_ref().ok_or(ProcessError::NotScanned)?;
        let tables = self.tables.as_ref().ok_or(ProcessError::NotScanned)?;

        let mut builder = Schedule {
            engine: self,
            tables: tables.as_ref(),
            options,
            out_dir,
            claimed: HashSet::new(),
            copies: Vec::new(),
            writes: Vec::new(),
            warnings: Vec::new(),
            active: Vec::new(),
            done: HashSet::new(),
        };

        for bin in &scanned.bins {
            if cancel.load(Ordering::Relaxed) {
                return Err(ProcessError::Cancelled);
            }
            let prefixes: HashMap<u32, &str> = bin
                .entries
                .iter()
                .map(|e| (e.hash, e.prefix.as_str()))
                .collect();
            let names: HashMap<u32, &str> = bin
                .entries
                .iter()
                .map(|e| (e.hash, e.name.as_str()))
                .collect();
            builder.schedule_bin(
                &bin.unify_path,
                bin.file.clone(),
                &self.prefix,
                &prefixes,
                &names,
            )?;
        }

        builder.dispatch(&progress, cancel)
    }
}

enum Task {
    Copy { src: PathBuf, dst: PathBuf, rel: String },
    Write { dst: PathBuf, rel: String, bytes: Vec<u8> },
}

struct Schedule<'a> {
    engine: &'a Bumpath,
    tables: &'a HashTables,
    options: &'a ProcessOptions,
    out_dir: &'a Path,
    /// Unify paths of every claimed output; enforces disjoint targets.
    claimed: HashSet<String>,
    copies: Vec<(PathBuf, String)>,
    writes: Vec<(String, Vec<u8>)>,
    warnings: Vec<String>,
    /// Bins on the current link-recursion stack, for cycle detection.
    active: Vec<String>,
    done: HashSet<String>,
}

/// A linked BIN discovered while rewriting, handled after the referring
/// bin's own entries.
struct LinkedBin {
    unify_path: String,
    prefix: String,
    merge: bool,
}

impl Schedule<'_> {
    /// Check the cap; returns false when the task should be skipped.
    fn check_path_len(&mut self, rel: &str) -> Result<bool, ProcessError> {
        let full = self.out_dir.join(rel);
        if full.as_os_str().len() <= self.options.path_length_cap as usize {
            return Ok(true);
        }
        let display = full.display().to_string();
        if self.options.ignore_missing {
            self.warnings.push(format!("path too long, skipped: {}", display));
            return Ok(false);
        }
        Err(ProcessError::PathTooLong(display))
    }

    fn schedule_copy(&mut self, src: PathBuf, rel: String) -> Result<(), ProcessError> {
        if !self.claimed.insert(unify(&rel)) {
            return Ok(()); // someone already produces this output
        }
        if self.check_path_len(&rel)? {
            self.copies.push((src, rel));
        }
        Ok(())
    }

    fn schedule_write(&mut self, rel: String, bytes: Vec<u8>) -> Result<(), ProcessError> {
        if !self.claimed.insert(unify(&rel)) {
            return Ok(());
        }
        if self.check_path_len(&rel)? {
            self.writes.push((rel, bytes));
        }
        Ok(())
    }

    fn schedule_bin(
        &mut self,
        unify_path: &str,
        mut bin: BinFile,
        dst_prefix: &str,
        prefixes: &HashMap<u32, &str>,
        names: &HashMap<u32, &str>,
    ) -> Result<(), ProcessError> {
        if self.active.iter().any(|p| p == unify_path) {
            return Err(ProcessError::CycleInLinks(unify_path.to_string()));
        }
        if !self.done.insert(unify_path.to_string()) {
            return Ok(());
        }
        self.active.push(unify_path.to_string());

        let mut linked: Vec<LinkedBin> = Vec::new();
        let entry_hashes: Vec<u32> = bin.entries.keys().copied().collect();
        for hash in entry_hashes {
            let entry = &bin.entries[&hash];
            let uneditable = prefixes.get(&hash).is_some_and(|p| *p == UNEDITABLE)
                || self.engine.uneditable_types.contains(&entry.type_hash);
            if uneditable {
                // Not rewritten, but linked animation data still gets pulled
                // in when the caller wants it folded into this file.
                if self.options.combine_linked {
                    let mut refs = Vec::new();
                    for field in &entry.fields {
                        collect_linked_bins(&field.value, &mut refs);
                    }
                    for path in refs {
                        let key = unify(&path);
                        if self.engine.index.contains_key(&key) && is_animation_path(&key) {
                            linked.push(LinkedBin {
                                unify_path: key,
                                prefix: dst_prefix.to_string(),
                                merge: true,
                            });
                        }
                    }
                }
                continue;
            }
            let prefix = prefixes.get(&hash).copied().unwrap_or(dst_prefix).to_string();
            let entry_name = names.get(&hash).copied().map(str::to_string);
            let mut fields = std::mem::take(&mut bin.entries[&hash].fields);
            self.rewrite_fields(&mut fields, &prefix, entry_name.as_deref(), &mut linked)?;
            bin.entries[&hash].fields = fields;
        }

        // Merged animation bins append their rewritten entries to this file;
        // bins they link themselves are emitted separately afterwards.
        let mut follow_ups: Vec<LinkedBin> = Vec::new();
        for link in &linked {
            if !link.merge {
                continue;
            }
            let mut child = self.load_linked(&link.unify_path)?;
            let child_hashes: Vec<u32> = child.entries.keys().copied().collect();
            for hash in child_hashes {
                let mut fields = std::mem::take(&mut child.entries[&hash].fields);
                self.rewrite_fields(&mut fields, &link.prefix, None, &mut follow_ups)?;
                child.entries[&hash].fields = fields;
            }
            for (hash, entry) in child.entries {
                if bin.entries.insert(hash, entry).is_some() {
                    return Err(ProcessError::MergeConflict(hash));
                }
            }
        }

        for link in linked.iter().chain(&follow_ups).filter(|l| !l.merge) {
            let child = self.load_linked(&link.unify_path)?;
            let child_prefixes: HashMap<u32, &str> = child
                .entries
                .keys()
                .map(|&h| (h, link.prefix.as_str()))
                .collect();
            self.schedule_bin(
                &link.unify_path,
                child,
                &link.prefix,
                &child_prefixes,
                &HashMap::new(),
            )?;
        }

        let dst = format!("{}/{}", dst_prefix, normalize(unify_path));
        let bytes = write_bin(&bin)?;
        self.schedule_write(dst, bytes)?;

        self.active.pop();
        Ok(())
    }

    fn load_linked(&self, unify_path: &str) -> Result<BinFile, ProcessError> {
        let file = self
            .engine
            .index
            .get(unify_path)
            .ok_or_else(|| ProcessError::ResourceMissing(unify_path.to_string()))?;
        let data = std::fs::read(&file.abs).map_err(|source| ProcessError::Io {
            path: file.abs.clone(),
            source,
        })?;
        let mut bin = read_bin(&data)?;
        self.tables.resolve_bin(&mut bin);
        Ok(bin)
    }

    fn rewrite_fields(
        &mut self,
        fields: &mut [crate::model::BinField],
        prefix: &str,
        entry_name: Option<&str>,
        linked: &mut Vec<LinkedBin>,
    ) -> Result<(), ProcessError> {
        for field in fields.iter_mut() {
            let is_path_field = self.engine.walk_options.path_fields.contains(&field.hash);
            self.rewrite_value(&mut field.value, prefix, entry_name, is_path_field, linked)?;
        }
        Ok(())
    }

    fn rewrite_value(
        &mut self,
        value: &mut BinValue,
        prefix: &str,
        entry_name: Option<&str>,
        is_path_field: bool,
        linked: &mut Vec<LinkedBin>,
    ) -> Result<(), ProcessError> {
        match value {
            BinValue::File { value, name } => {
                let Some(current) = name.clone() else {
                    log::warn!("file hash {:016x} has no known path, left untouched", value);
                    return Ok(());
                };
                if let Some(rewritten) = self.rewrite_path(&current, prefix, entry_name, linked)? {
                    *value = xxh64(&rewritten);
                    *name = Some(rewritten);
                }
            }
            BinValue::String(s) => {
                if is_path_field && has_file_extension(s) {
                    if let Some(rewritten) = self.rewrite_path(s, prefix, entry_name, linked)? {
                        *s = rewritten;
                    }
                }
            }
            BinValue::List { items, .. } | BinValue::List2 { items, .. } => {
                for item in items {
                    self.rewrite_value(item, prefix, entry_name, false, linked)?;
                }
            }
            BinValue::Option { item, .. } => {
                if let Some(inner) = item {
                    self.rewrite_value(inner, prefix, entry_name, is_path_field, linked)?;
                }
            }
            BinValue::Map { items, .. } => {
                for (key, val) in items {
                    self.rewrite_value(key, prefix, entry_name, false, linked)?;
                    self.rewrite_value(val, prefix, entry_name, false, linked)?;
                }
            }
            BinValue::Pointer { fields, .. } | BinValue::Embed { fields, .. } => {
                self.rewrite_fields(fields, prefix, entry_name, linked)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Rewrite one referenced path; returns the new value, or None when the
    /// reference must stay as it is.
    fn rewrite_path(
        &mut self,
        current: &str,
        prefix: &str,
        entry_name: Option<&str>,
        linked: &mut Vec<LinkedBin>,
    ) -> Result<Option<String>, ProcessError> {
        let norm = normalize(current);
        // The entry's own name is not a reference.
        if entry_name.is_some_and(|n| n.eq_ignore_ascii_case(&norm)) {
            return Ok(None);
        }
        let key = unify(&norm);
        let rewritten = format!("{}/{}", prefix, norm);

        match self.engine.index.get(&key) {
            Some(file) if file.kind == FileKind::Bin => {
                let merge = self.options.combine_linked && is_animation_path(&key);
                linked.push(LinkedBin {
                    unify_path: key,
                    prefix: prefix.to_string(),
                    merge,
                });
                if merge {
                    // The entries land in the parent; the stale link value
                    // is left alone rather than pointed at a missing file.
                    return Ok(None);
                }
            }
            Some(file) => {
                let src = file.abs.clone();
                self.schedule_copy(src, rewritten.clone())?;
            }
            None => {
                if !self.options.ignore_missing {
                    return Err(ProcessError::ResourceMissing(norm));
                }
                self.warnings.push(format!("missing referenced file: {}", norm));
            }
        }
        Ok(Some(rewritten))
    }

    fn dispatch<F>(
        self,
        progress: &F,
        cancel: &AtomicBool,
    ) -> Result<ProcessReport, ProcessError>
    where
        F: Fn(usize, &str) + Sync,
    {
        let Schedule {
            options,
            out_dir,
            copies,
            writes,
            warnings,
            ..
        } = self;

        std::fs::create_dir_all(out_dir).map_err(|source| ProcessError::Io {
            path: out_dir.to_path_buf(),
            source,
        })?;

        let mut tasks: Vec<Task> = Vec::with_capacity(copies.len() + writes.len());
        for (rel, bytes) in writes {
            tasks.push(Task::Write {
                dst: out_dir.join(&rel),
                rel,
                bytes,
            });
        }
        for (src, rel) in copies {
            tasks.push(Task::Copy {
                src,
                dst: out_dir.join(&rel),
                rel,
            });
        }

        let report = Mutex::new(ProcessReport {
            warnings,
            ..ProcessReport::default()
        });
        let counter = AtomicUsize::new(0);

        tasks.par_iter().try_for_each(|task| {
            if cancel.load(Ordering::Relaxed) {
                return Err(ProcessError::Cancelled);
            }
            let dst = match task {
                Task::Copy { dst, .. } => dst,
                Task::Write { dst, .. } => dst,
            };
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent).map_err(|source| ProcessError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            match task {
                Task::Write { dst, rel, bytes } => {
                    std::fs::write(dst, bytes).map_err(|source| ProcessError::Io {
                        path: dst.clone(),
                        source,
                    })?;
                    let mut guard = report.lock().unwrap_or_else(|e| e.into_inner());
                    guard.written.push(rel.clone());
                    let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
                    progress(n, &format!("wrote {}", rel));
                }
                Task::Copy { src, dst, rel } => {
                    match std::fs::copy(src, dst) {
                        Ok(_) => {
                            let mut guard = report.lock().unwrap_or_else(|e| e.into_inner());
                            guard.copied.push(rel.clone());
                            let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
                            if n % PROGRESS_EVERY == 0 {
                                progress(n, &format!("copied {} files", n));
                            }
                        }
                        Err(source) => {
                            if options.ignore_missing {
                                let mut guard =
                                    report.lock().unwrap_or_else(|e| e.into_inner());
                                guard.warnings.push(format!(
                                    "copy failed for {}: {}",
                                    rel, source
                                ));
                            } else {
                                return Err(ProcessError::Io {
                                    path: src.clone(),
                                    source,
                                });
                            }
                        }
                    }
                }
            }
            Ok(())
        })?;

        let mut report = report.into_inner().unwrap_or_else(|e| e.into_inner());
        let total = report.written.len() + report.copied.len();
        progress(total, "done");
        report.written.sort();
        report.copied.sort();
        Ok(report)
    }
}

/// Collect `.bin`-valued FILE references without mutating anything.
fn collect_linked_bins(value: &BinValue, out: &mut Vec<String>) {
    match value {
        BinValue::File { name: Some(n), .. } => {
            if unify(n).ends_with(".bin") {
                out.push(n.clone());
            }
        }
        BinValue::List { items, .. } | BinValue::List2 { items, .. } => {
            for item in items {
                collect_linked_bins(item, out);
            }
        }
        BinValue::Option { item: Some(inner), .. } => collect_linked_bins(inner, out),
        BinValue::Map { items, .. } => {
            for (k, v) in items {
                collect_linked_bins(k, out);
                collect_linked_bins(v, out);
            }
        }
        BinValue::Pointer { fields, .. } | BinValue::Embed { fields, .. } => {
            for field in fields {
                collect_linked_bins(&field.value, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::fnv1a32;
    use crate::model::{BinEntry, BinField};
    use std::sync::Arc;

    const DDS_PATH: &str = "assets/characters/aatrox/skins/skin0/particles/p.dds";
    const BIN_PATH: &str = "data/characters/aatrox/skins/skin0.bin";
    const ANIM_PATH: &str = "data/characters/aatrox/animations/skin0.bin";
    const ENTRY_NAME: &str = "Characters/Aatrox/Skins/Skin0";

    fn fixture_tables() -> Arc<HashTables> {
        let mut t = HashTables::new();
        t.insert32(ENTRY_NAME);
        t.insert32("Characters/Aatrox/Animations/Skin0");
        t.insert32("SkinCharacterDataProperties");
        t.insert32("AnimationGraphData");
        t.insert32("ClipDataProperties");
        t.insert32("texture");
        t.insert32("animationGraphData");
        t.insert64(DDS_PATH);
        t.insert64(BIN_PATH);
        t.insert64(ANIM_PATH);
        Arc::new(t)
    }

    fn write_fixture(dir: &Path, rel: &str, bytes: &[u8]) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    fn skin_bin(extra: Vec<(u32, BinEntry)>) -> BinFile {
        let mut bin = BinFile::new(3);
        let mut entry = BinEntry::new(fnv1a32("SkinCharacterDataProperties"));
        entry.fields.push(BinField::new(
            fnv1a32("texture"),
            BinValue::File {
                value: xxh64(DDS_PATH),
                name: None,
            },
        ));
        bin.entries.insert(fnv1a32(ENTRY_NAME), entry);
        for (hash, entry) in extra {
            bin.entries.insert(hash, entry);
        }
        bin
    }

    fn engine_for(src: &Path, bins: &[&str]) -> Bumpath {
        let mut engine = Bumpath::new();
        engine.add_source_dirs(&[src.to_path_buf()]).unwrap();
        let selection: HashMap<String, bool> =
            bins.iter().map(|b| (b.to_string(), true)).collect();
        engine.set_bin_selection(&selection);
        engine
    }

    fn no_progress(_: usize, _: &str) {}

    #[test]
    fn rewrite_relocates_bin_and_assets() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_fixture(src.path(), BIN_PATH, &write_bin(&skin_bin(vec![])).unwrap());
        write_fixture(src.path(), DDS_PATH, b"dds-bytes");

        let mut engine = engine_for(src.path(), &[BIN_PATH]);
        engine.scan(fixture_tables()).unwrap();
        engine.apply_prefix(&[fnv1a32(ENTRY_NAME)], "bum");
        let report = engine
            .process(out.path(), &ProcessOptions::default(), no_progress)
            .unwrap();

        assert_eq!(report.written, vec![format!("bum/{}", BIN_PATH)]);
        assert_eq!(report.copied, vec![format!("bum/{}", DDS_PATH)]);
        assert!(report.warnings.is_empty());

        let copied = std::fs::read(out.path().join("bum").join(DDS_PATH)).unwrap();
        assert_eq!(copied, b"dds-bytes");

        let rewritten =
            read_bin(&std::fs::read(out.path().join("bum").join(BIN_PATH)).unwrap()).unwrap();
        let entry = &rewritten.entries[&fnv1a32(ENTRY_NAME)];
        let BinValue::File { value, .. } = entry.fields[0].value else {
            panic!("expected file value");
        };
        assert_eq!(value, xxh64(&format!("bum/{}", DDS_PATH)));
    }

    #[test]
    fn missing_reference_policy() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_fixture(src.path(), BIN_PATH, &write_bin(&skin_bin(vec![])).unwrap());
        // no dds on disk

        let mut engine = engine_for(src.path(), &[BIN_PATH]);
        engine.scan(fixture_tables()).unwrap();
        let scanned = engine.scanned().unwrap();
        assert!(!scanned.bins[0].entries[0].refs[0].exists);

        let strict = engine.process(out.path(), &ProcessOptions::default(), no_progress);
        assert!(matches!(strict, Err(ProcessError::ResourceMissing(p)) if p == DDS_PATH));
        assert!(!out.path().join("bum").exists());

        let lax = engine
            .process(
                out.path(),
                &ProcessOptions {
                    ignore_missing: true,
                    ..ProcessOptions::default()
                },
                no_progress,
            )
            .unwrap();
        assert_eq!(lax.written.len(), 1);
        assert!(lax.copied.is_empty());
        assert_eq!(lax.warnings.len(), 1);
        assert!(out.path().join("bum").join(BIN_PATH).exists());
        assert!(!out.path().join("bum").join(DDS_PATH).exists());
    }

    #[test]
    fn uneditable_entries_keep_their_references() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        let mut graph = BinEntry::new(fnv1a32("AnimationGraphData"));
        graph.fields.push(BinField::new(
            fnv1a32("animationGraphData"),
            BinValue::File {
                value: xxh64(ANIM_PATH),
                name: None,
            },
        ));
        let graph_hash = fnv1a32("Characters/Aatrox/Animations/Skin0");
        let bin = skin_bin(vec![(graph_hash, graph)]);
        write_fixture(src.path(), BIN_PATH, &write_bin(&bin).unwrap());
        write_fixture(src.path(), DDS_PATH, b"dds");

        let mut engine = engine_for(src.path(), &[BIN_PATH]);
        engine.scan(fixture_tables()).unwrap();

        let scanned = engine.scanned().unwrap();
        let graph_row = scanned.bins[0]
            .entries
            .iter()
            .find(|e| e.hash == graph_hash)
            .unwrap();
        assert_eq!(graph_row.prefix, UNEDITABLE);

        // the sentinel survives apply_prefix
        engine.apply_prefix(&[graph_hash], "custom");
        let graph_row = engine
            .scanned()
            .unwrap()
            .bins[0]
            .entries
            .iter()
            .find(|e| e.hash == graph_hash)
            .unwrap();
        assert_eq!(graph_row.prefix, UNEDITABLE);

        let report = engine
            .process(
                out.path(),
                &ProcessOptions {
                    ignore_missing: true,
                    ..ProcessOptions::default()
                },
                no_progress,
            )
            .unwrap();
        assert_eq!(report.written.len(), 1);

        let rewritten =
            read_bin(&std::fs::read(out.path().join("bum").join(BIN_PATH)).unwrap()).unwrap();
        let BinValue::File { value, .. } = rewritten.entries[&graph_hash].fields[0].value else {
            panic!("expected file value");
        };
        assert_eq!(value, xxh64(ANIM_PATH), "uneditable entry was rewritten");
    }

    fn anim_bin(entry_hash: u32) -> BinFile {
        let mut bin = BinFile::new(3);
        let mut entry = BinEntry::new(fnv1a32("ClipDataProperties"));
        entry
            .fields
            .push(BinField::new(fnv1a32("texture"), BinValue::U32(7)));
        bin.entries.insert(entry_hash, entry);
        bin
    }

    #[test]
    fn combine_linked_merges_animation_bins() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        let mut graph = BinEntry::new(fnv1a32("AnimationGraphData"));
        graph.fields.push(BinField::new(
            fnv1a32("animationGraphData"),
            BinValue::File {
                value: xxh64(ANIM_PATH),
                name: None,
            },
        ));
        let graph_hash = fnv1a32("Characters/Aatrox/Animations/Skin0");
        write_fixture(
            src.path(),
            BIN_PATH,
            &write_bin(&skin_bin(vec![(graph_hash, graph)])).unwrap(),
        );
        let anim_entry_hash = 0x0AA0_0001;
        write_fixture(
            src.path(),
            ANIM_PATH,
            &write_bin(&anim_bin(anim_entry_hash)).unwrap(),
        );
        write_fixture(src.path(), DDS_PATH, b"dds");

        let mut engine = engine_for(src.path(), &[BIN_PATH]);
        engine.scan(fixture_tables()).unwrap();
        let report = engine
            .process(
                out.path(),
                &ProcessOptions {
                    combine_linked: true,
                    ..ProcessOptions::default()
                },
                no_progress,
            )
            .unwrap();

        // one combined output, no separate animation file
        assert_eq!(report.written, vec![format!("bum/{}", BIN_PATH)]);
        let merged =
            read_bin(&std::fs::read(out.path().join("bum").join(BIN_PATH)).unwrap()).unwrap();
        assert_eq!(merged.entries.len(), 3);
        assert!(merged.entries.contains_key(&anim_entry_hash));
        assert!(!out.path().join("bum").join(ANIM_PATH).exists());
    }

    #[test]
    fn combine_linked_detects_merge_conflicts() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        let mut graph = BinEntry::new(fnv1a32("AnimationGraphData"));
        graph.fields.push(BinField::new(
            fnv1a32("animationGraphData"),
            BinValue::File {
                value: xxh64(ANIM_PATH),
                name: None,
            },
        ));
        let graph_hash = fnv1a32("Characters/Aatrox/Animations/Skin0");
        write_fixture(
            src.path(),
            BIN_PATH,
            &write_bin(&skin_bin(vec![(graph_hash, graph)])).unwrap(),
        );
        // the animation bin reuses the skin entry's hash
        write_fixture(
            src.path(),
            ANIM_PATH,
            &write_bin(&anim_bin(fnv1a32(ENTRY_NAME))).unwrap(),
        );
        write_fixture(src.path(), DDS_PATH, b"dds");

        let mut engine = engine_for(src.path(), &[BIN_PATH]);
        engine.scan(fixture_tables()).unwrap();
        let result = engine.process(
            out.path(),
            &ProcessOptions {
                combine_linked: true,
                ..ProcessOptions::default()
            },
            no_progress,
        );
        assert!(matches!(result, Err(ProcessError::MergeConflict(h)) if h == fnv1a32(ENTRY_NAME)));
    }

    #[test]
    fn linked_bins_from_editable_entries_are_emitted_separately() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        let extra_rel = "data/characters/aatrox/skins/skin0_extra.bin";
        let mut tables = HashTables::new();
        tables.insert32(ENTRY_NAME);
        tables.insert32("SkinCharacterDataProperties");
        tables.insert32("texture");
        tables.insert64(extra_rel);
        tables.insert64(DDS_PATH);

        let mut parent = BinFile::new(3);
        let mut entry = BinEntry::new(fnv1a32("SkinCharacterDataProperties"));
        entry.fields.push(BinField::new(
            fnv1a32("texture"),
            BinValue::File {
                value: xxh64(extra_rel),
                name: None,
            },
        ));
        parent.entries.insert(fnv1a32(ENTRY_NAME), entry);
        write_fixture(src.path(), BIN_PATH, &write_bin(&parent).unwrap());

        let mut child = BinFile::new(3);
        let mut child_entry = BinEntry::new(fnv1a32("SkinCharacterDataProperties"));
        child_entry.fields.push(BinField::new(
            fnv1a32("texture"),
            BinValue::File {
                value: xxh64(DDS_PATH),
                name: None,
            },
        ));
        child.entries.insert(0x0BB0_0001, child_entry);
        write_fixture(src.path(), extra_rel, &write_bin(&child).unwrap());
        write_fixture(src.path(), DDS_PATH, b"dds");

        let mut engine = engine_for(src.path(), &[BIN_PATH]);
        engine.scan(Arc::new(tables)).unwrap();
        let report = engine
            .process(out.path(), &ProcessOptions::default(), no_progress)
            .unwrap();

        assert_eq!(
            report.written,
            vec![format!("bum/{}", BIN_PATH), format!("bum/{}", extra_rel)]
        );
        // the child's own asset reference was rewritten and copied
        assert_eq!(report.copied, vec![format!("bum/{}", DDS_PATH)]);
        let child_out =
            read_bin(&std::fs::read(out.path().join("bum").join(extra_rel)).unwrap()).unwrap();
        let BinValue::File { value, .. } = child_out.entries[&0x0BB0_0001].fields[0].value else {
            panic!("expected file value");
        };
        assert_eq!(value, xxh64(&format!("bum/{}", DDS_PATH)));
    }

    #[test]
    fn shared_assets_are_copied_once() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        let second_rel = "data/characters/aatrox/skins/skin1.bin";
        let mut tables = HashTables::new();
        tables.insert32(ENTRY_NAME);
        tables.insert32("SkinCharacterDataProperties");
        tables.insert32("texture");
        tables.insert64(DDS_PATH);

        write_fixture(src.path(), BIN_PATH, &write_bin(&skin_bin(vec![])).unwrap());
        let mut second = BinFile::new(3);
        let mut entry = BinEntry::new(fnv1a32("SkinCharacterDataProperties"));
        entry.fields.push(BinField::new(
            fnv1a32("texture"),
            BinValue::File {
                value: xxh64(DDS_PATH),
                name: None,
            },
        ));
        second.entries.insert(0x0CC0_0001, entry);
        write_fixture(src.path(), second_rel, &write_bin(&second).unwrap());
        write_fixture(src.path(), DDS_PATH, b"dds");

        let mut engine = engine_for(src.path(), &[BIN_PATH, second_rel]);
        engine.scan(Arc::new(tables)).unwrap();
        let report = engine
            .process(out.path(), &ProcessOptions::default(), no_progress)
            .unwrap();

        assert_eq!(report.written.len(), 2);
        assert_eq!(report.copied.len(), 1);
    }

    #[test]
    fn own_entry_name_is_not_a_reference() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        let mut tables = HashTables::new();
        tables.insert32(BIN_PATH); // the entry is named after the file
        tables.insert32("SkinCharacterDataProperties");
        tables.insert32("texture");
        tables.insert64(BIN_PATH);

        let mut bin = BinFile::new(3);
        let mut entry = BinEntry::new(fnv1a32("SkinCharacterDataProperties"));
        entry.fields.push(BinField::new(
            fnv1a32("texture"),
            BinValue::File {
                value: xxh64(BIN_PATH),
                name: None,
            },
        ));
        bin.entries.insert(fnv1a32(BIN_PATH), entry);
        write_fixture(src.path(), BIN_PATH, &write_bin(&bin).unwrap());

        let mut engine = engine_for(src.path(), &[BIN_PATH]);
        engine.scan(Arc::new(tables)).unwrap();
        let report = engine
            .process(out.path(), &ProcessOptions::default(), no_progress)
            .unwrap();
        assert_eq!(report.written.len(), 1);

        let out_bin =
            read_bin(&std::fs::read(out.path().join("bum").join(BIN_PATH)).unwrap()).unwrap();
        let BinValue::File { value, .. } = out_bin.entries[&fnv1a32(BIN_PATH)].fields[0].value
        else {
            panic!("expected file value");
        };
        assert_eq!(value, xxh64(BIN_PATH), "self reference must stay untouched");
    }

    #[test]
    fn path_length_cap_policy() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_fixture(src.path(), BIN_PATH, &write_bin(&skin_bin(vec![])).unwrap());
        write_fixture(src.path(), DDS_PATH, b"dds");

        let mut engine = engine_for(src.path(), &[BIN_PATH]);
        engine.scan(fixture_tables()).unwrap();

        let tight = ProcessOptions {
            path_length_cap: 10,
            ..ProcessOptions::default()
        };
        assert!(matches!(
            engine.process(out.path(), &tight, no_progress),
            Err(ProcessError::PathTooLong(_))
        ));

        let lax = ProcessOptions {
            path_length_cap: 10,
            ignore_missing: true,
            ..ProcessOptions::default()
        };
        let report = engine.process(out.path(), &lax, no_progress).unwrap();
        assert!(report.written.is_empty());
        assert!(report.copied.is_empty());
        assert!(report.warnings.iter().all(|w| w.contains("path too long")));
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn selection_rejects_assets_and_animation_bins() {
        let src = tempfile::tempdir().unwrap();
        write_fixture(src.path(), BIN_PATH, &write_bin(&skin_bin(vec![])).unwrap());
        write_fixture(src.path(), ANIM_PATH, &write_bin(&anim_bin(1)).unwrap());
        write_fixture(src.path(), DDS_PATH, b"dds");

        let mut engine = Bumpath::new();
        engine.add_source_dirs(&[src.path().to_path_buf()]).unwrap();

        let selectable: Vec<&str> = engine.selectable_bins().collect();
        assert_eq!(selectable, vec![BIN_PATH]);

        let mut selection = HashMap::new();
        selection.insert(ANIM_PATH.to_string(), true);
        selection.insert(DDS_PATH.to_string(), true);
        engine.set_bin_selection(&selection);
        let tree = engine.scan(fixture_tables()).unwrap();
        assert!(tree.bins.is_empty());
    }

    #[test]
    fn later_source_dirs_shadow_earlier_ones() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        write_fixture(first.path(), DDS_PATH, b"old");
        write_fixture(second.path(), DDS_PATH, b"new");
        write_fixture(first.path(), BIN_PATH, &write_bin(&skin_bin(vec![])).unwrap());

        let mut engine = Bumpath::new();
        engine
            .add_source_dirs(&[first.path().to_path_buf(), second.path().to_path_buf()])
            .unwrap();
        let mut selection = HashMap::new();
        selection.insert(BIN_PATH.to_string(), true);
        engine.set_bin_selection(&selection);
        engine.scan(fixture_tables()).unwrap();

        engine
            .process(out.path(), &ProcessOptions::default(), no_progress)
            .unwrap();
        let copied = std::fs::read(out.path().join("bum").join(DDS_PATH)).unwrap();
        assert_eq!(copied, b"new");
    }

    #[test]
    fn cancellation_stops_the_write_phase() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_fixture(src.path(), BIN_PATH, &write_bin(&skin_bin(vec![])).unwrap());
        write_fixture(src.path(), DDS_PATH, b"dds");

        let mut engine = engine_for(src.path(), &[BIN_PATH]);
        engine.scan(fixture_tables()).unwrap();

        let cancel = AtomicBool::new(true);
        let result = engine.process_with_cancel(
            out.path(),
            &ProcessOptions::default(),
            no_progress,
            &cancel,
        );
        assert!(matches!(result, Err(ProcessError::Cancelled)));
    }

    #[test]
    fn process_requires_a_scan() {
        let engine = Bumpath::new();
        let out = tempfile::tempdir().unwrap();
        assert!(matches!(
            engine.process(out.path(), &ProcessOptions::default(), no_progress),
            Err(ProcessError::NotScanned)
        ));
    }

    #[test]
    fn reset_clears_everything() {
        let src = tempfile::tempdir().unwrap();
        write_fixture(src.path(), BIN_PATH, &write_bin(&skin_bin(vec![])).unwrap());

        let mut engine = engine_for(src.path(), &[BIN_PATH]);
        engine.scan(fixture_tables()).unwrap();
        assert!(engine.scanned().is_some());

        engine.reset();
        assert!(engine.scanned().is_none());
        assert_eq!(engine.selectable_bins().count(), 0);
    }
}
