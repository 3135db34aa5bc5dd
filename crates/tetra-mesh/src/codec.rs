//! Compact vertex+face wire format.
//!
//! Layout, all little-endian:
//!
//! ```text
//! u32 vertex_count
//! vertex_count * [f32 x, f32 y, f32 z]
//! remaining / 12 * [i32 a, i32 b, i32 c]
//! ```

use thiserror::Error;

use crate::Mesh;

const HEADER_LEN: usize = 4;
const RECORD_LEN: usize = 12;

/// Wire-format invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedMesh {
    #[error("mesh body is {len} bytes, too short for the 4-byte vertex count")]
    MissingHeader { len: usize },

    #[error("mesh declares {vertex_count} vertices ({expected} bytes) but only {available} bytes follow")]
    TruncatedVertices {
        vertex_count: usize,
        expected: usize,
        available: usize,
    },

    #[error("face block is {len} bytes, not a multiple of 12")]
    MisalignedFaces { len: usize },

    #[error("face {face} references vertex {index} but the mesh has {vertex_count} vertices")]
    IndexOutOfRange {
        face: usize,
        index: i64,
        vertex_count: usize,
    },

    #[error("mesh has {0} vertices, more than 32-bit face indices can address")]
    TooManyVertices(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed mesh: {0}")]
    Malformed(#[from] MalformedMesh),

    #[error("face {face} has {sides} corners; only triangles can be encoded")]
    UnsupportedTopology { face: usize, sides: usize },
}

pub fn decode(bytes: &[u8]) -> Result<Mesh, CodecError> {
    let Some((header, body)) = bytes.split_first_chunk::<HEADER_LEN>() else {
        return Err(MalformedMesh::MissingHeader { len: bytes.len() }.into());
    };
    let vertex_count = u32::from_le_bytes(*header) as usize;

    let vertex_len = vertex_count
        .checked_mul(RECORD_LEN)
        .filter(|&len| len <= body.len())
        .ok_or(MalformedMesh::TruncatedVertices {
            vertex_count,
            expected: vertex_count.saturating_mul(RECORD_LEN),
            available: body.len(),
        })?;
    let (vertex_bytes, face_bytes) = body.split_at(vertex_len);

    if face_bytes.len() % RECORD_LEN != 0 {
        return Err(MalformedMesh::MisalignedFaces {
            len: face_bytes.len(),
        }
        .into());
    }

    let vertices = vertex_bytes
        .chunks_exact(RECORD_LEN)
        .map(|record| {
            [
                read_f32(record, 0),
                read_f32(record, 4),
                read_f32(record, 8),
            ]
        })
        .collect::<Vec<_>>();

    let mut triangles = Vec::with_capacity(face_bytes.len() / RECORD_LEN);
    for (face, record) in face_bytes.chunks_exact(RECORD_LEN).enumerate() {
        let mut tri = [0u32; 3];
        for (corner, slot) in tri.iter_mut().enumerate() {
            let index = read_i32(record, corner * 4);
            if index < 0 || index as usize >= vertex_count {
                return Err(MalformedMesh::IndexOutOfRange {
                    face,
                    index: i64::from(index),
                    vertex_count,
                }
                .into());
            }
            *slot = index as u32;
        }
        triangles.push(tri);
    }

    Ok(Mesh {
        vertices,
        triangles,
    })
}

pub fn encode(mesh: &Mesh) -> Result<Vec<u8>, CodecError> {
    let vertex_count = mesh.vertices.len();
    // Largest index must fit an i32, and the count itself a u32.
    if vertex_count > i32::MAX as usize + 1 {
        return Err(MalformedMesh::TooManyVertices(vertex_count).into());
    }
    if let Some((face, index)) = mesh.first_out_of_range() {
        return Err(MalformedMesh::IndexOutOfRange {
            face,
            index: i64::from(index),
            vertex_count,
        }
        .into());
    }

    let mut bytes = Vec::<u8>::with_capacity(
        HEADER_LEN + (vertex_count + mesh.triangles.len()) * RECORD_LEN,
    );
    bytes.extend_from_slice(&(vertex_count as u32).to_le_bytes());
    for vertex in &mesh.vertices {
        push_f32_triplet(&mut bytes, *vertex);
    }
    for tri in &mesh.triangles {
        for index in tri {
            bytes.extend_from_slice(&(*index as i32).to_le_bytes());
        }
    }

    Ok(bytes)
}

#[inline]
fn push_f32_triplet(bytes: &mut Vec<u8>, value: [f32; 3]) {
    bytes.extend_from_slice(&value[0].to_le_bytes());
    bytes.extend_from_slice(&value[1].to_le_bytes());
    bytes.extend_from_slice(&value[2].to_le_bytes());
}

#[inline]
fn read_f32(record: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        record[offset],
        record[offset + 1],
        record[offset + 2],
        record[offset + 3],
    ])
}

#[inline]
fn read_i32(record: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        record[offset],
        record[offset + 1],
        record[offset + 2],
        record[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use crate::Mesh;
    use crate::demo::unit_cube;

    use super::{CodecError, MalformedMesh, decode, encode};

    fn simple_mesh() -> Mesh {
        Mesh {
            vertices: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            triangles: vec![[0, 1, 2]],
        }
    }

    #[test]
    fn encoded_layout_matches_header_vertices_faces() {
        let bytes = encode(&simple_mesh()).expect("triangle mesh should encode");
        assert_eq!(bytes.len(), 4 + 3 * 12 + 12);
        assert_eq!(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 3);
        assert_eq!(f32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]), 1.0);
        assert_eq!(i32::from_le_bytes([bytes[48], bytes[49], bytes[50], bytes[51]]), 2);
    }

    #[test]
    fn round_trip_is_bit_exact() {
        let mut mesh = unit_cube();
        mesh.vertices[3] = [0.1, -1.0e-38, f32::MAX];
        let decoded = decode(&encode(&mesh).expect("encode")).expect("decode");
        assert_eq!(decoded.triangles, mesh.triangles);
        for (a, b) in decoded.vertices.iter().zip(&mesh.vertices) {
            for axis in 0..3 {
                assert_eq!(a[axis].to_bits(), b[axis].to_bits());
            }
        }
    }

    #[test]
    fn empty_mesh_encodes_to_bare_header() {
        let bytes = encode(&Mesh::empty()).expect("empty mesh should encode");
        assert_eq!(bytes, vec![0, 0, 0, 0]);
        assert_eq!(decode(&bytes).expect("decode"), Mesh::empty());
    }

    #[test]
    fn misaligned_face_block_is_malformed() {
        let mut bytes = encode(&simple_mesh()).expect("encode");
        bytes.extend_from_slice(&[0, 0, 0, 0, 0]);
        assert_eq!(
            decode(&bytes),
            Err(CodecError::Malformed(MalformedMesh::MisalignedFaces { len: 17 }))
        );
    }

    #[test]
    fn short_body_is_rejected() {
        assert!(matches!(
            decode(&[1, 0]),
            Err(CodecError::Malformed(MalformedMesh::MissingHeader { len: 2 }))
        ));

        let mut bytes = 5u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 24]);
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::Malformed(MalformedMesh::TruncatedVertices {
                vertex_count: 5,
                expected: 60,
                available: 24,
            }))
        ));
    }

    #[test]
    fn out_of_range_index_fails_decode() {
        let mut bytes = encode(&simple_mesh()).expect("encode");
        let last = bytes.len() - 4;
        bytes[last..].copy_from_slice(&3i32.to_le_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::Malformed(MalformedMesh::IndexOutOfRange {
                face: 0,
                index: 3,
                vertex_count: 3,
            }))
        ));
    }

    #[test]
    fn negative_index_fails_decode() {
        let mut bytes = encode(&simple_mesh()).expect("encode");
        let first_face = 4 + 3 * 12;
        bytes[first_face..first_face + 4].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::Malformed(MalformedMesh::IndexOutOfRange { index: -1, .. }))
        ));
    }

    #[test]
    fn encode_refuses_dangling_indices() {
        let mut mesh = simple_mesh();
        mesh.triangles.push([0, 1, 7]);
        assert!(matches!(
            encode(&mesh),
            Err(CodecError::Malformed(MalformedMesh::IndexOutOfRange { face: 1, index: 7, .. }))
        ));
    }
}
