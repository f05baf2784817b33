//! Reader for the skeleton (SKL) format, modern variant only.
//!
//! The file is an offset table: a fixed 64-byte header pointing at the joint
//! records, the joint-index list and the influence table. Joint names are
//! NUL-terminated strings addressed relative to the record field that names
//! them.

use crate::hash::fnv1a32;
use crate::stream::{ByteReader, StreamError};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SklError {
    #[error("not a supported skeleton variant")]
    UnsupportedFormat,
    #[error("truncated file at offset {0}")]
    Truncated(u64),
    #[error("malformed skeleton: {0}")]
    Malformed(String),
}

impl From<StreamError> for SklError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::EndOfStream(at) => SklError::Truncated(at),
            StreamError::StringTooLong(_) => SklError::Malformed("oversized string".into()),
            StreamError::Io(err) => SklError::Malformed(err.to_string()),
        }
    }
}

const SKL_SIGNATURE: u32 = 0x22FD4FC3;

#[derive(Debug, Clone, Serialize)]
pub struct Joint {
    pub flags: u16,
    pub id: i16,
    /// Index of the parent joint; -1 marks the root.
    pub parent: i16,
    /// FNV-1a 32 of the lowercased joint name.
    pub hash: u32,
    pub radius: f32,
    pub local_translate: [f32; 3],
    pub local_scale: [f32; 3],
    pub local_rotate: [f32; 4],
    pub ibind_translate: [f32; 3],
    pub ibind_scale: [f32; 3],
    pub ibind_rotate: [f32; 4],
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Skeleton {
    pub flags: u16,
    pub joints: Vec<Joint>,
    /// Skinning influence table: joint indices.
    pub influences: Vec<u16>,
}

impl Skeleton {
    pub fn root(&self) -> Option<&Joint> {
        self.joints.iter().find(|j| j.parent == -1)
    }

    /// Check the structural invariants: exactly one root, unique names, and
    /// each joint hash matching its lowercased name.
    pub fn validate(&self) -> Result<(), SklError> {
        let roots = self.joints.iter().filter(|j| j.parent == -1).count();
        if roots != 1 {
            return Err(SklError::Malformed(format!("{} root joints", roots)));
        }
        let mut seen = std::collections::HashSet::new();
        for joint in &self.joints {
            if !seen.insert(joint.name.to_ascii_lowercase()) {
                return Err(SklError::Malformed(format!(
                    "duplicate joint name {:?}",
                    joint.name
                )));
            }
            if joint.hash != fnv1a32(&joint.name) {
                return Err(SklError::Malformed(format!(
                    "joint {:?} hash 0x{:08x} does not match its name",
                    joint.name, joint.hash
                )));
            }
        }
        Ok(())
    }
}

fn checked_offset(v: i32) -> Result<u64, SklError> {
    u64::try_from(v).map_err(|_| SklError::Malformed(format!("negative offset {}", v)))
}

/// Parse a skeleton from raw bytes. Legacy variants (anything without the
/// modern signature at offset 4) are rejected.
pub fn read_skl(data: &[u8]) -> Result<Skeleton, SklError> {
    let mut r = ByteReader::new(data);

    let _file_size = r.read_u32()?;
    if r.read_u32()? != SKL_SIGNATURE {
        return Err(SklError::UnsupportedFormat);
    }
    if r.read_u32()? != 0 {
        return Err(SklError::UnsupportedFormat);
    }

    let flags = r.read_u16()?;
    let joint_count = r.read_u16()?;
    let influence_count = r.read_u32()?;
    let joints_offset = checked_offset(r.read_i32()?)?;
    let _joint_indices_offset = r.read_i32()?;
    let influences_offset = checked_offset(r.read_i32()?)?;
    let _name_offset = r.read_i32()?;
    let _asset_offset = r.read_i32()?;
    let _joint_names_offset = r.read_i32()?;
    r.pad(20)?;

    let mut joints = Vec::with_capacity(joint_count as usize);
    r.seek(joints_offset);
    for _ in 0..joint_count {
        let flags = r.read_u16()?;
        let id = r.read_i16()?;
        let parent = r.read_i16()?;
        r.pad(2)?;
        let hash = r.read_u32()?;
        let radius = r.read_f32()?;
        let local_translate = r.read_vec3()?;
        let local_scale = r.read_vec3()?;
        let local_rotate = r.read_vec4()?;
        let ibind_translate = r.read_vec3()?;
        let ibind_scale = r.read_vec3()?;
        let ibind_rotate = r.read_vec4()?;

        let rel_pos = r.tell();
        let name_rel = r.read_i32()?;
        let record_end = r.tell();
        let name_pos = rel_pos
            .checked_add_signed(name_rel as i64)
            .ok_or_else(|| SklError::Malformed(format!("joint name offset {}", name_rel)))?;
        r.seek(name_pos);
        let name = r.read_str_nul()?;
        r.seek(record_end);

        joints.push(Joint {
            flags,
            id,
            parent,
            hash,
            radius,
            local_translate,
            local_scale,
            local_rotate,
            ibind_translate,
            ibind_scale,
            ibind_rotate,
            name,
        });
    }

    let mut influences = Vec::with_capacity(influence_count.min(0x10000) as usize);
    r.seek(influences_offset);
    for _ in 0..influence_count {
        influences.push(r.read_u16()?);
    }

    Ok(Skeleton {
        flags,
        joints,
        influences,
    })
}
