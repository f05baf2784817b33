//! Hash tables mapping 32-bit name hashes and 64-bit path hashes back to
//! their original strings.
//!
//! Tables load from text files of `<hex> <string>` lines and merge, later
//! files winning on collision. A binary cache speeds up reloading the full
//! set, and a fetcher downloads the community hash lists into a per-user
//! cache directory. Unknown hashes always resolve to their hex form; nothing
//! in this crate fails on an unknown hash.

use crate::hash::{fnv1a32, hex32, hex64, xxh64};
use crate::model::{BinFile, BinValue};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HashTableError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid hash cache: {0}")]
    InvalidCache(String),
    #[error("hash download failed: {0}")]
    Fetch(String),
}

/// Text files carrying 32-bit (field/type/entry name) hashes.
pub const BIN_NAME_FILES: &[&str] = &[
    "entries.txt",
    "binhashes.txt",
    "bintypes.txt",
    "binfields.txt",
];

/// Text files carrying 64-bit (file path) hashes.
pub const PATH_FILES: &[&str] = &["game.txt", "lcu.txt"];

const CACHE_FILE: &str = "hashes.cache";
const CACHE_MAGIC: &[u8; 4] = b"HSHC";
const CACHE_VERSION: u32 = 1;

/// Which hash namespaces a caller wants loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashSelection {
    All,
    BinNames,
    Paths,
}

impl HashSelection {
    fn wants(&self, file: &str) -> bool {
        match self {
            HashSelection::All => true,
            HashSelection::BinNames => BIN_NAME_FILES.contains(&file),
            HashSelection::Paths => PATH_FILES.contains(&file),
        }
    }
}

/// Bidirectional hash index: hash-to-string lookup plus on-demand encoding.
#[derive(Debug, Default, Clone)]
pub struct HashTables {
    fnv32: HashMap<u32, String>,
    xxh64: HashMap<u64, String>,
}

impl HashTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fnv32.len() + self.xxh64.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fnv32.is_empty() && self.xxh64.is_empty()
    }

    /// Register a 32-bit mapping directly; fixture tables in tests use this.
    pub fn insert32(&mut self, s: &str) {
        self.fnv32.insert(fnv1a32(s), s.to_string());
    }

    /// Register a 64-bit path mapping directly.
    pub fn insert64(&mut self, s: &str) {
        self.xxh64.insert(xxh64(s), s.to_string());
    }

    pub fn resolve_u32(&self, h: u32) -> Option<&str> {
        self.fnv32.get(&h).map(String::as_str)
    }

    pub fn resolve_u64(&self, h: u64) -> Option<&str> {
        self.xxh64.get(&h).map(String::as_str)
    }

    /// Resolve an 8-hex-digit hash, returning the input unchanged when the
    /// hash is unknown or malformed.
    pub fn resolve_hex32<'a>(&'a self, hex: &'a str) -> &'a str {
        u32::from_str_radix(hex, 16)
            .ok()
            .and_then(|h| self.resolve_u32(h))
            .unwrap_or(hex)
    }

    /// Resolve a 16-hex-digit path hash, returning the input unchanged when
    /// the hash is unknown or malformed.
    pub fn resolve_hex64<'a>(&'a self, hex: &'a str) -> &'a str {
        u64::from_str_radix(hex, 16)
            .ok()
            .and_then(|h| self.resolve_u64(h))
            .unwrap_or(hex)
    }

    /// Hex form of the 32-bit hash of `s`; never requires `s` to be known.
    pub fn encode32(&self, s: &str) -> String {
        hex32(fnv1a32(s))
    }

    /// Hex form of the 64-bit path hash of `s`.
    pub fn encode64(&self, s: &str) -> String {
        hex64(xxh64(s))
    }

    /// Load one text hash file. The hex width of each line decides which
    /// namespace it lands in.
    pub fn load_file(&mut self, path: &Path) -> Result<usize, HashTableError> {
        let file = std::fs::File::open(path).map_err(|source| HashTableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.load_reader(BufReader::new(file)))
    }

    fn load_reader<R: BufRead>(&mut self, reader: R) -> usize {
        let mut loaded = 0;
        for line in reader.lines() {
            let Ok(line) = line else { break };
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some(split) = line.find(char::is_whitespace) else {
                continue;
            };
            let (hex, rest) = line.split_at(split);
            let value = rest.trim_start();
            if hex.len() <= 8 {
                if let Ok(h) = u32::from_str_radix(hex, 16) {
                    self.fnv32.insert(h, value.to_string());
                    loaded += 1;
                }
            } else if let Ok(h) = u64::from_str_radix(hex, 16) {
                self.xxh64.insert(h, value.to_string());
                loaded += 1;
            }
        }
        loaded
    }

    /// Load the selected hash files from a directory. Missing files are
    /// skipped; when the full set is wanted and a fresh binary cache exists,
    /// the cache is used instead of the text files.
    pub fn load_dir(
        &mut self,
        dir: &Path,
        selection: HashSelection,
    ) -> Result<usize, HashTableError> {
        if selection == HashSelection::All {
            let cache = dir.join(CACHE_FILE);
            if cache_is_fresh(dir, &cache) {
                return self.load_cache(&cache);
            }
        }

        let mut loaded = 0;
        for file in BIN_NAME_FILES.iter().chain(PATH_FILES) {
            if !selection.wants(file) {
                continue;
            }
            let path = dir.join(file);
            if path.exists() {
                loaded += self.load_file(&path)?;
            }
        }
        Ok(loaded)
    }

    /// Write the binary cache; loads back much faster than the text files.
    pub fn save_cache(&self, path: &Path) -> Result<(), HashTableError> {
        let file = std::fs::File::create(path).map_err(|source| HashTableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.write_cache(BufWriter::new(file))
            .map_err(|source| HashTableError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    fn write_cache<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        w.write_all(CACHE_MAGIC)?;
        w.write_u32::<LE>(CACHE_VERSION)?;
        w.write_u32::<LE>(self.fnv32.len() as u32)?;
        w.write_u32::<LE>(self.xxh64.len() as u32)?;
        for (&hash, value) in &self.fnv32 {
            w.write_u32::<LE>(hash)?;
            w.write_u32::<LE>(value.len() as u32)?;
            w.write_all(value.as_bytes())?;
        }
        for (&hash, value) in &self.xxh64 {
            w.write_u64::<LE>(hash)?;
            w.write_u32::<LE>(value.len() as u32)?;
            w.write_all(value.as_bytes())?;
        }
        Ok(())
    }

    pub fn load_cache(&mut self, path: &Path) -> Result<usize, HashTableError> {
        let file = std::fs::File::open(path).map_err(|source| HashTableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.read_cache(BufReader::new(file))
    }

    fn read_cache<R: Read>(&mut self, mut r: R) -> Result<usize, HashTableError> {
        let bad = |msg: &str| HashTableError::InvalidCache(msg.to_string());
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).map_err(|_| bad("short header"))?;
        if &magic != CACHE_MAGIC {
            return Err(bad("wrong magic"));
        }
        let version = r.read_u32::<LE>().map_err(|_| bad("short header"))?;
        if version != CACHE_VERSION {
            return Err(HashTableError::InvalidCache(format!(
                "unsupported cache version {}",
                version
            )));
        }
        let count32 = r.read_u32::<LE>().map_err(|_| bad("short header"))?;
        let count64 = r.read_u32::<LE>().map_err(|_| bad("short header"))?;

        let read_string = |r: &mut R| -> Result<String, HashTableError> {
            let len = r.read_u32::<LE>().map_err(|_| bad("short entry"))? as usize;
            let mut buf = vec![0u8; len];
            r.read_exact(&mut buf).map_err(|_| bad("short entry"))?;
            String::from_utf8(buf).map_err(|_| bad("non-utf8 entry"))
        };

        self.fnv32.reserve(count32 as usize);
        for _ in 0..count32 {
            let hash = r.read_u32::<LE>().map_err(|_| bad("short entry"))?;
            let value = read_string(&mut r)?;
            self.fnv32.insert(hash, value);
        }
        self.xxh64.reserve(count64 as usize);
        for _ in 0..count64 {
            let hash = r.read_u64::<LE>().map_err(|_| bad("short entry"))?;
            let value = read_string(&mut r)?;
            self.xxh64.insert(hash, value);
        }
        Ok((count32 + count64) as usize)
    }

    /// Fill in every resolvable name across a parsed BIN tree.
    pub fn resolve_bin(&self, bin: &mut BinFile) {
        for entry in bin.entries.values_mut() {
            if entry.type_name.is_none() {
                entry.type_name = self.resolve_u32(entry.type_hash).map(str::to_string);
            }
            for field in &mut entry.fields {
                if field.name.is_none() {
                    field.name = self.resolve_u32(field.hash).map(str::to_string);
                }
                self.resolve_value(&mut field.value);
            }
        }
        for patch in &mut bin.patches {
            self.resolve_value(&mut patch.value);
        }
    }

    fn resolve_value(&self, value: &mut BinValue) {
        match value {
            BinValue::Hash { value: h, name } | BinValue::Link { value: h, name } => {
                if name.is_none() {
                    *name = self.resolve_u32(*h).map(str::to_string);
                }
            }
            BinValue::File { value: h, name } => {
                if name.is_none() {
                    *name = self.resolve_u64(*h).map(str::to_string);
                }
            }
            BinValue::List { items, .. } | BinValue::List2 { items, .. } => {
                for item in items {
                    self.resolve_value(item);
                }
            }
            BinValue::Option { item, .. } => {
                if let Some(inner) = item {
                    self.resolve_value(inner);
                }
            }
            BinValue::Map { items, .. } => {
                for (k, v) in items {
                    self.resolve_value(k);
                    self.resolve_value(v);
                }
            }
            BinValue::Pointer {
                type_hash,
                type_name,
                fields,
            }
            | BinValue::Embed {
                type_hash,
                type_name,
                fields,
            } => {
                if type_name.is_none() {
                    *type_name = self.resolve_u32(*type_hash).map(str::to_string);
                }
                for field in fields {
                    if field.name.is_none() {
                        field.name = self.resolve_u32(field.hash).map(str::to_string);
                    }
                    self.resolve_value(&mut field.value);
                }
            }
            _ => {}
        }
    }
}

fn cache_is_fresh(dir: &Path, cache: &Path) -> bool {
    let Ok(cache_meta) = std::fs::metadata(cache) else {
        return false;
    };
    let Ok(cache_time) = cache_meta.modified() else {
        return false;
    };
    for file in BIN_NAME_FILES.iter().chain(PATH_FILES) {
        if let Ok(meta) = std::fs::metadata(dir.join(file)) {
            if let Ok(time) = meta.modified() {
                if time > cache_time {
                    return false;
                }
            }
        }
    }
    true
}

/// Where hash files live for the current user.
pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("FrogTools").join("hashes"))
}

/// Something that can produce the raw bytes of a named hash file. The HTTP
/// mirror is the production implementation; tests supply in-memory stubs.
pub trait HashSource {
    fn fetch(&self, file_name: &str) -> Result<Vec<u8>, HashTableError>;
}

const DEFAULT_MIRROR: &str = "https://raw.communitydragon.org/data/hashes/lol";

/// Downloads hash files from the community mirror.
pub struct HttpHashSource {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpHashSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl Default for HttpHashSource {
    fn default() -> Self {
        Self::new(DEFAULT_MIRROR)
    }
}

impl HashSource for HttpHashSource {
    fn fetch(&self, file_name: &str) -> Result<Vec<u8>, HashTableError> {
        let url = format!("{}/hashes.{}", self.base_url, file_name);
        let response = self
            .client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| HashTableError::Fetch(e.to_string()))?;
        let bytes = response
            .bytes()
            .map_err(|e| HashTableError::Fetch(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Materializes a source's hash files into a cache directory and refreshes
/// the binary cache afterwards.
pub struct HashFetcher<S: HashSource> {
    source: S,
    dir: PathBuf,
}

impl<S: HashSource> HashFetcher<S> {
    pub fn new(source: S, dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            dir: dir.into(),
        }
    }

    /// Download every known hash file, overwriting what is cached.
    pub fn refresh(&self) -> Result<Vec<PathBuf>, HashTableError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| HashTableError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut written = Vec::new();
        for file in BIN_NAME_FILES.iter().chain(PATH_FILES) {
            let bytes = self.source.fetch(file)?;
            let path = self.dir.join(file);
            std::fs::write(&path, bytes).map_err(|source| HashTableError::Io {
                path: path.clone(),
                source,
            })?;
            written.push(path);
        }

        let mut tables = HashTables::new();
        tables.load_dir(&self.dir, HashSelection::All)?;
        tables.save_cache(&self.dir.join(CACHE_FILE))?;
        invalidate_global();
        Ok(written)
    }

    /// Download only the files not already cached.
    pub fn ensure(&self) -> Result<Vec<PathBuf>, HashTableError> {
        let missing: Vec<&str> = BIN_NAME_FILES
            .iter()
            .chain(PATH_FILES)
            .copied()
            .filter(|f| !self.dir.join(f).exists())
            .collect();
        if missing.is_empty() {
            return Ok(Vec::new());
        }
        self.refresh()
    }
}

static GLOBAL: OnceLock<RwLock<Option<Arc<HashTables>>>> = OnceLock::new();

fn global_cell() -> &'static RwLock<Option<Arc<HashTables>>> {
    GLOBAL.get_or_init(|| RwLock::new(None))
}

/// The process-wide table, loaded from the default cache directory on first
/// use. Callers that want a fixture table pass their own [`HashTables`]
/// around instead.
pub fn global() -> Arc<HashTables> {
    {
        let guard = global_cell().read().unwrap_or_else(|e| e.into_inner());
        if let Some(tables) = guard.as_ref() {
            return Arc::clone(tables);
        }
    }
    let mut guard = global_cell().write().unwrap_or_else(|e| e.into_inner());
    if let Some(tables) = guard.as_ref() {
        return Arc::clone(tables);
    }
    let mut tables = HashTables::new();
    if let Some(dir) = default_cache_dir() {
        if let Err(e) = tables.load_dir(&dir, HashSelection::All) {
            log::warn!("failed to load hash tables from {}: {}", dir.display(), e);
        }
    }
    let arc = Arc::new(tables);
    *guard = Some(Arc::clone(&arc));
    arc
}

/// Drop the memoized table so the next [`global`] call reloads from disk.
pub fn invalidate_global() {
    if let Some(lock) = GLOBAL.get() {
        *lock.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn text_lines_parse_with_comments_and_blanks() {
        let text = "\
# a comment
4f5a69e4 MaterialOverride

00000001 One
1122334455667788 assets/some/path.dds
not-a-line
";
        let mut tables = HashTables::new();
        let loaded = tables.load_reader(text.as_bytes());
        assert_eq!(loaded, 3);
        assert_eq!(tables.resolve_u32(0x4f5a69e4), Some("MaterialOverride"));
        assert_eq!(
            tables.resolve_u64(0x1122334455667788),
            Some("assets/some/path.dds")
        );
    }

    #[test]
    fn later_entries_win_on_collision() {
        let mut tables = HashTables::new();
        tables.load_reader("0000000a first".as_bytes());
        tables.load_reader("0000000A second".as_bytes());
        assert_eq!(tables.resolve_u32(0xa), Some("second"));
    }

    #[test]
    fn unknown_hashes_pass_through() {
        let tables = HashTables::new();
        assert_eq!(tables.resolve_hex32("deadbeef"), "deadbeef");
        assert_eq!(tables.resolve_hex64("00000000deadbeef"), "00000000deadbeef");
        assert_eq!(tables.resolve_hex32("junk"), "junk");
    }

    #[test]
    fn encode_matches_resolution() {
        let mut tables = HashTables::new();
        tables.insert32("MaterialOverride");
        let hex = tables.encode32("MaterialOverride");
        assert_eq!(hex, "4f5a69e4");
        assert_eq!(tables.resolve_hex32(&hex), "MaterialOverride");
        // Encoding never requires table membership.
        assert_eq!(tables.encode32("NotInTable"), crate::hash::hex32(fnv1a32("notintable")));
    }

    #[test]
    fn cache_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut tables = HashTables::new();
        tables.insert32("SkinCharacterDataProperties");
        tables.insert64("assets/characters/aatrox/base.dds");

        let cache = dir.path().join("hashes.cache");
        tables.save_cache(&cache).unwrap();

        let mut reloaded = HashTables::new();
        assert_eq!(reloaded.load_cache(&cache).unwrap(), 2);
        assert_eq!(
            reloaded.resolve_u32(fnv1a32("SkinCharacterDataProperties")),
            Some("SkinCharacterDataProperties")
        );
        assert_eq!(
            reloaded.resolve_u64(xxh64("assets/characters/aatrox/base.dds")),
            Some("assets/characters/aatrox/base.dds")
        );

        let mut broken = HashTables::new();
        std::fs::write(&cache, b"XXXX").unwrap();
        assert!(matches!(
            broken.load_cache(&cache),
            Err(HashTableError::InvalidCache(_))
        ));
    }

    #[test]
    fn selective_directory_loading() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("binfields.txt"), "0000000b field\n").unwrap();
        std::fs::write(
            dir.path().join("game.txt"),
            "000000000000000c assets/c.dds\n",
        )
        .unwrap();

        let mut names_only = HashTables::new();
        names_only
            .load_dir(dir.path(), HashSelection::BinNames)
            .unwrap();
        assert_eq!(names_only.resolve_u32(0xb), Some("field"));
        assert_eq!(names_only.resolve_u64(0xc), None);

        let mut paths_only = HashTables::new();
        paths_only
            .load_dir(dir.path(), HashSelection::Paths)
            .unwrap();
        assert_eq!(paths_only.resolve_u32(0xb), None);
        assert_eq!(paths_only.resolve_u64(0xc), Some("assets/c.dds"));
    }

    struct StubSource(HashMap<&'static str, &'static str>);

    impl HashSource for StubSource {
        fn fetch(&self, file_name: &str) -> Result<Vec<u8>, HashTableError> {
            self.0
                .get(file_name)
                .map(|s| s.as_bytes().to_vec())
                .ok_or_else(|| HashTableError::Fetch(format!("no stub for {}", file_name)))
        }
    }

    #[test]
    fn fetcher_writes_files_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut stubs = HashMap::new();
        for file in BIN_NAME_FILES.iter().chain(PATH_FILES) {
            stubs.insert(*file, "0000000f stubbed\n");
        }
        let fetcher = HashFetcher::new(StubSource(stubs), dir.path());

        let written = fetcher.refresh().unwrap();
        assert_eq!(written.len(), BIN_NAME_FILES.len() + PATH_FILES.len());
        assert!(dir.path().join(CACHE_FILE).exists());

        // ensure() is a no-op once everything is present
        assert!(fetcher.ensure().unwrap().is_empty());

        let mut tables = HashTables::new();
        tables.load_dir(dir.path(), HashSelection::All).unwrap();
        assert_eq!(tables.resolve_u32(0xf), Some("stubbed"));
    }

    #[test]
    fn fetch_failure_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = HashFetcher::new(StubSource(HashMap::new()), dir.path());
        assert!(matches!(
            fetcher.refresh(),
            Err(HashTableError::Fetch(_))
        ));
    }

    #[test]
    fn resolve_bin_fills_names() {
        use crate::model::{BinEntry, BinField};

        let mut tables = HashTables::new();
        tables.insert32("SkinCharacterDataProperties");
        tables.insert32("texture");
        tables.insert64("assets/characters/aatrox/base.dds");

        let mut bin = BinFile::new(2);
        let mut entry = BinEntry::new(fnv1a32("SkinCharacterDataProperties"));
        entry.fields.push(BinField::new(
            fnv1a32("texture"),
            BinValue::File {
                value: xxh64("assets/characters/aatrox/base.dds"),
                name: None,
            },
        ));
        bin.entries.insert(0x1, entry);

        tables.resolve_bin(&mut bin);
        let entry = &bin.entries[&0x1];
        assert_eq!(
            entry.type_name.as_deref(),
            Some("SkinCharacterDataProperties")
        );
        assert_eq!(entry.fields[0].name.as_deref(), Some("texture"));
        let BinValue::File { name, .. } = &entry.fields[0].value else {
            panic!("expected file value");
        };
        assert_eq!(name.as_deref(), Some("assets/characters/aatrox/base.dds"));
    }
}
