//! # frogtools_core
//!
//! The engine behind the FrogTools modding toolkit: codecs for the game's
//! binary formats, the hash index that names their contents, and the bumpath
//! engine that relocates whole asset trees under a new path prefix.
//!
//! Supported formats:
//! - **BIN** (`PROP`/`PTCH`): the hash-keyed, tagged property-bag format used
//!   for game entities, including sparse patch overlays
//! - **TEX**: texture container with DXT1/DXT5/BGRA8 decompression to RGBA8
//! - **SKL**: skeleton joints and skinning influences (modern variant)
//! - **SCB**: static-object meshes
//!
//! ## Reading and writing entities
//!
//! ```no_run
//! use frogtools_core::binary::{read_bin, write_bin};
//! use std::fs;
//!
//! let data = fs::read("champion.bin")?;
//! let mut bin = read_bin(&data)?;
//!
//! // Resolve hashes to names (optional)
//! let mut tables = frogtools_core::hashtable::HashTables::new();
//! tables.load_dir("hashes".as_ref(), frogtools_core::hashtable::HashSelection::All)?;
//! tables.resolve_bin(&mut bin);
//!
//! fs::write("champion.out.bin", write_bin(&bin)?)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Relocating a skin with bumpath
//!
//! ```no_run
//! use frogtools_core::bumpath::{Bumpath, ProcessOptions};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! let mut engine = Bumpath::new();
//! engine.add_source_dirs(&["mods/my-skin".into()])?;
//! engine.set_bin_selection(&HashMap::from([(
//!     "data/characters/aatrox/skins/skin0.bin".to_string(),
//!     true,
//! )]));
//!
//! let tables = Arc::new(frogtools_core::hashtable::HashTables::new());
//! engine.set_prefix("bum");
//! engine.scan(tables)?;
//! let report = engine.process(
//!     "out".as_ref(),
//!     &ProcessOptions::default(),
//!     |count, msg| eprintln!("[{}] {}", count, msg),
//! )?;
//! println!("{} files written", report.written.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod binary;
pub mod bumpath;
pub mod hash;
pub mod hashtable;
pub mod model;
pub mod scb;
pub mod skl;
pub mod stream;
pub mod tex;
pub mod walker;

pub use binary::{apply_patch, read_bin, read_bin_with_base, write_bin};
pub use bumpath::{Bumpath, ProcessOptions, ProcessReport};
pub use hashtable::{HashSelection, HashTables};
pub use model::{BinEntry, BinField, BinFile, BinType, BinValue};
pub use scb::{read_scb, write_scb, Scb};
pub use skl::{read_skl, Skeleton};
pub use tex::{decompress_tex, read_tex, Rgba8Image, Tex};
pub use walker::{RefWalker, Reference};
