pub mod codec;
pub mod demo;
pub mod grid;
pub mod postprocess;
pub mod tetrahedralize;

/// Triangle surface mesh as exchanged over the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<[f32; 3]>,
    pub triangles: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn empty() -> Self {
        Self {
            vertices: Vec::new(),
            triangles: Vec::new(),
        }
    }

    /// First triangle corner that does not name an existing vertex, as
    /// `(face, index)`.
    pub fn first_out_of_range(&self) -> Option<(usize, u32)> {
        let vertex_count = self.vertices.len();
        self.triangles.iter().enumerate().find_map(|(face, tri)| {
            tri.iter()
                .copied()
                .find(|&index| index as usize >= vertex_count)
                .map(|index| (face, index))
        })
    }
}

pub use codec::{CodecError, MalformedMesh, decode, encode};
pub use grid::{CellType, GridError, PolyData, TetraGrid, UnstructuredGrid};
pub use postprocess::{PostProcessError, explode, explode_for_display, extract_surface};
pub use tetrahedralize::{MeshingError, StarTetrahedralizer, TetraOptions, Tetrahedralizer};
