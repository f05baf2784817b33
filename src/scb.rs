//! Reader and writer for the static-object (SCB) mesh format.
//!
//! Versions 2.1, 3.1 and 3.2 are read; the writer always emits 3.2 with no
//! vertex colors, an empty name and a recomputed bounding box. Faces carry
//! three vertex indices, a 64-byte padded material name and six floats of
//! UVs stored as `u0 u1 u2 v0 v1 v2`.

use crate::stream::{ByteReader, ByteWriter, StreamError};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScbError {
    #[error("invalid magic bytes")]
    BadMagic,
    #[error("unsupported version {0}.{1}")]
    UnsupportedVersion(u16, u16),
    #[error("truncated file at offset {0}")]
    Truncated(u64),
}

impl From<StreamError> for ScbError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::EndOfStream(at) => ScbError::Truncated(at),
            StreamError::StringTooLong(_) | StreamError::Io(_) => ScbError::Truncated(0),
        }
    }
}

const SCB_MAGIC: &[u8; 8] = b"r3d2Mesh";
const NAME_LEN: usize = 128;
const MATERIAL_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScbFace {
    pub indices: [u32; 3],
    pub material: String,
    /// Per-corner texture coordinates
    pub uvs: [[f32; 2]; 3],
}

impl ScbFace {
    pub fn is_degenerate(&self) -> bool {
        let [a, b, c] = self.indices;
        a == b || b == c || a == c
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scb {
    pub name: String,
    pub flags: u32,
    pub positions: Vec<[f32; 3]>,
    /// Per-vertex colors, 3.2 files with `vertex_type >= 1` only.
    pub colors: Option<Vec<[u8; 4]>>,
    pub central: [f32; 3],
    pub faces: Vec<ScbFace>,
}

impl Scb {
    /// The single material used by the mesh (the last face's, by convention).
    pub fn material(&self) -> Option<&str> {
        self.faces.last().map(|f| f.material.as_str())
    }

    fn bounding_box(&self) -> ([f32; 3], [f32; 3]) {
        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for p in &self.positions {
            for i in 0..3 {
                min[i] = min[i].min(p[i]);
                max[i] = max[i].max(p[i]);
            }
        }
        if self.positions.is_empty() {
            return ([0.0; 3], [0.0; 3]);
        }
        (min, max)
    }
}

/// Parse an SCB mesh from raw bytes. Degenerate faces are dropped.
pub fn read_scb(data: &[u8]) -> Result<Scb, ScbError> {
    let mut r = ByteReader::new(data);

    if &r.read_array::<8>()? != SCB_MAGIC {
        return Err(ScbError::BadMagic);
    }
    let major = r.read_u16()?;
    let minor = r.read_u16()?;
    if !matches!((major, minor), (2, 1) | (3, 1) | (3, 2)) {
        return Err(ScbError::UnsupportedVersion(major, minor));
    }

    let name = r.read_str_padded(NAME_LEN)?;
    let vertex_count = r.read_u32()?;
    let face_count = r.read_u32()?;
    let flags = r.read_u32()?;
    let _bbox_min = r.read_vec3()?;
    let _bbox_max = r.read_vec3()?;

    let vertex_type = if (major, minor) == (3, 2) {
        r.read_u32()?
    } else {
        0
    };

    let mut positions = Vec::with_capacity(vertex_count.min(0x10000) as usize);
    for _ in 0..vertex_count {
        positions.push(r.read_vec3()?);
    }

    let colors = if vertex_type >= 1 {
        let mut colors = Vec::with_capacity(vertex_count.min(0x10000) as usize);
        for _ in 0..vertex_count {
            colors.push(r.read_rgba()?);
        }
        Some(colors)
    } else {
        None
    };

    let central = r.read_vec3()?;

    let mut faces = Vec::with_capacity(face_count.min(0x10000) as usize);
    for _ in 0..face_count {
        let indices = [r.read_u32()?, r.read_u32()?, r.read_u32()?];
        let material = r.read_str_padded(MATERIAL_LEN)?;
        let u = [r.read_f32()?, r.read_f32()?, r.read_f32()?];
        let v = [r.read_f32()?, r.read_f32()?, r.read_f32()?];
        let face = ScbFace {
            indices,
            material,
            uvs: [[u[0], v[0]], [u[1], v[1]], [u[2], v[2]]],
        };
        if !face.is_degenerate() {
            faces.push(face);
        }
    }

    Ok(Scb {
        name,
        flags,
        positions,
        colors,
        central,
        faces,
    })
}

/// Serialize a mesh as version 3.2: no vertex colors, empty name, bounding
/// box recomputed from the positions, one material across all faces.
pub fn write_scb(scb: &Scb) -> Result<Vec<u8>, ScbError> {
    let mut w = ByteWriter::new();

    w.write_bytes(SCB_MAGIC)?;
    w.write_u16(3)?;
    w.write_u16(2)?;
    w.write_str_padded("", NAME_LEN)?;

    let faces: Vec<&ScbFace> = scb.faces.iter().filter(|f| !f.is_degenerate()).collect();
    w.write_u32(scb.positions.len() as u32)?;
    w.write_u32(faces.len() as u32)?;
    w.write_u32(scb.flags)?;

    let (bbox_min, bbox_max) = scb.bounding_box();
    w.write_vec3(bbox_min)?;
    w.write_vec3(bbox_max)?;
    w.write_u32(0)?; // vertex type

    for p in &scb.positions {
        w.write_vec3(*p)?;
    }
    w.write_vec3(scb.central)?;

    let material = scb.material().unwrap_or("").to_string();
    for face in faces {
        for i in face.indices {
            w.write_u32(i)?;
        }
        w.write_str_padded(&material, MATERIAL_LEN)?;
        for i in 0..3 {
            w.write_f32(face.uvs[i][0])?;
        }
        for i in 0..3 {
            w.write_f32(face.uvs[i][1])?;
        }
    }

    Ok(w.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn quad() -> Scb {
        let face = |a, b, c| ScbFace {
            indices: [a, b, c],
            material: "lambert1".into(),
            uvs: [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]],
        };
        Scb {
            name: String::new(),
            flags: 0,
            positions: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
            ],
            colors: None,
            central: [0.5, 0.5, 0.0],
            faces: vec![face(0, 1, 2), face(0, 2, 3)],
        }
    }

    #[test]
    fn mesh_round_trips() {
        let scb = quad();
        let data = write_scb(&scb).unwrap();
        let out = read_scb(&data).unwrap();
        assert_eq!(out.positions, scb.positions);
        assert_eq!(out.faces, scb.faces);
        assert_eq!(out.central, scb.central);
        assert_eq!(out.material(), Some("lambert1"));
        assert_eq!(out.name, "");
    }

    #[test]
    fn degenerate_faces_are_skipped() {
        let mut scb = quad();
        scb.faces.push(ScbFace {
            indices: [1, 1, 2],
            material: "lambert1".into(),
            uvs: [[0.0; 2]; 3],
        });
        let data = write_scb(&scb).unwrap();
        assert_eq!(read_scb(&data).unwrap().faces.len(), 2);

        // A degenerate face already in the byte stream is dropped on read.
        let kept = read_scb(&write_scb(&quad()).unwrap()).unwrap();
        assert_eq!(kept.faces.len(), 2);
    }

    #[test]
    fn empty_mesh() {
        let scb = Scb {
            name: String::new(),
            flags: 0,
            positions: vec![],
            colors: None,
            central: [0.0; 3],
            faces: vec![],
        };
        let data = write_scb(&scb).unwrap();
        let out = read_scb(&data).unwrap();
        assert!(out.faces.is_empty());
        assert!(out.positions.is_empty());
    }

    #[test]
    fn writer_recomputes_bounding_box() {
        let data = write_scb(&quad()).unwrap();
        // bbox lives after magic(8) + version(4) + name(128) + counts(12)
        let at = 8 + 4 + NAME_LEN + 12;
        let f = |o: usize| f32::from_le_bytes(data[o..o + 4].try_into().unwrap());
        assert_eq!([f(at), f(at + 4), f(at + 8)], [0.0, 0.0, 0.0]);
        assert_eq!([f(at + 12), f(at + 16), f(at + 20)], [1.0, 1.0, 0.0]);
    }

    #[test]
    fn vertex_colors_are_read_for_vertex_type_one() {
        let mut data = write_scb(&quad()).unwrap();
        // flip vertex_type to 1 and splice in a color per vertex
        let vt_at = 8 + 4 + NAME_LEN + 12 + 24;
        data[vt_at..vt_at + 4].copy_from_slice(&1u32.to_le_bytes());
        let colors_at = vt_at + 4 + 4 * 12;
        let inserted: Vec<u8> = (0..4u8).flat_map(|i| [i, 0, 0, 255]).collect();
        data.splice(colors_at..colors_at, inserted);
        let out = read_scb(&data).unwrap();
        let colors = out.colors.unwrap();
        assert_eq!(colors.len(), 4);
        assert_eq!(colors[3], [3, 0, 0, 255]);
    }

    #[test]
    fn magic_and_version_gates() {
        assert!(matches!(read_scb(b"notamesh"), Err(ScbError::BadMagic)));
        let mut data = write_scb(&quad()).unwrap();
        data[8..12].copy_from_slice(&[4u8, 0, 0, 0]); // version 4.0
        assert!(matches!(
            read_scb(&data),
            Err(ScbError::UnsupportedVersion(4, 0))
        ));
    }
}
