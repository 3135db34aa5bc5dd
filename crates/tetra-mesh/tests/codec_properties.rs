//! Property tests for the wire codec over arbitrary bit patterns.

use proptest::prelude::*;
use tetra_mesh::{Mesh, codec};

/// Any f32 bit pattern, NaN payloads and signed zeros included.
fn arb_coordinate() -> impl Strategy<Value = f32> {
    any::<u32>().prop_map(f32::from_bits)
}

/// Meshes whose triangles only name existing vertices.
fn arb_mesh(max_vertices: usize, max_faces: usize) -> impl Strategy<Value = Mesh> {
    prop::collection::vec(prop::array::uniform3(arb_coordinate()), 0..=max_vertices)
        .prop_flat_map(move |vertices| {
            let n = vertices.len() as u32;
            if n == 0 {
                return Just(Mesh {
                    vertices,
                    triangles: Vec::new(),
                })
                .boxed();
            }
            prop::collection::vec(prop::array::uniform3(0..n), 0..=max_faces)
                .prop_map(move |triangles| Mesh {
                    vertices: vertices.clone(),
                    triangles,
                })
                .boxed()
        })
}

/// A small declared vertex count followed by arbitrary bytes, so decoding
/// gets past the header into the vertex and face blocks.
fn arb_framed_bytes() -> impl Strategy<Value = Vec<u8>> {
    (0u32..8, prop::collection::vec(any::<u8>(), 0..256)).prop_map(|(count, tail)| {
        let mut bytes = count.to_le_bytes().to_vec();
        bytes.extend(tail);
        bytes
    })
}

fn bits(mesh: &Mesh) -> Vec<[u32; 3]> {
    mesh.vertices
        .iter()
        .map(|vertex| vertex.map(f32::to_bits))
        .collect()
}

proptest! {
    #[test]
    fn decode_restores_every_bit(mesh in arb_mesh(64, 64)) {
        let bytes = codec::encode(&mesh).expect("in-range mesh encodes");
        prop_assert_eq!(bytes.len(), 4 + 12 * (mesh.vertices.len() + mesh.triangles.len()));

        let decoded = codec::decode(&bytes).expect("encoded mesh decodes");
        prop_assert_eq!(bits(&decoded), bits(&mesh));
        prop_assert_eq!(decoded.triangles, mesh.triangles);
    }

    #[test]
    fn decode_never_panics_on_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode(&bytes);
    }

    #[test]
    fn accepted_bytes_encode_back_unchanged(bytes in arb_framed_bytes()) {
        if let Ok(mesh) = codec::decode(&bytes) {
            prop_assert!(mesh.first_out_of_range().is_none());
            prop_assert_eq!(codec::encode(&mesh).expect("decoded mesh encodes"), bytes);
        }
    }
}
