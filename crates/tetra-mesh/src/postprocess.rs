//! Turns a tetrahedral grid into an "exploded" surface for display.

use std::collections::HashMap;

use thiserror::Error;

use crate::Mesh;
use crate::codec::CodecError;
use crate::grid::{GridError, Point3, PolyData, TetraGrid, UnstructuredGrid};

/// Outward-facing triangles of a positively oriented tetrahedron.
const TETRA_FACES: [[usize; 3]; 4] = [[0, 2, 1], [0, 1, 3], [1, 2, 3], [0, 3, 2]];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PostProcessError {
    #[error("invalid grid: {0}")]
    Grid(#[from] GridError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Explode, extract, explode by zero, extract, triangulate.
///
/// The second pass does not move anything; it splits coincident face
/// fragments so every exposed face carries its own vertices and shades
/// independently on the client.
pub fn explode_for_display(grid: &TetraGrid, factor: f64) -> Result<Mesh, PostProcessError> {
    if grid.is_empty() {
        return Ok(Mesh::empty());
    }

    let volume = UnstructuredGrid::from_tetra(grid)?;
    let shell = extract_surface(&explode(&volume, factor));
    let fragments = extract_surface(&explode(&shell.to_grid()?, 0.0));
    let mesh = Mesh::try_from(&fragments.triangulate())?;
    Ok(mesh)
}

/// Gives every cell private copies of its points and moves each cell by
/// `(cell_center - grid_center) * factor`, `grid_center` being the center of
/// the bounding box.
pub fn explode(grid: &UnstructuredGrid, factor: f64) -> UnstructuredGrid {
    let Some((min, max)) = grid.bounds() else {
        return UnstructuredGrid::default();
    };
    let center = [
        (min[0] + max[0]) * 0.5,
        (min[1] + max[1]) * 0.5,
        (min[2] + max[2]) * 0.5,
    ];

    let source = grid.points();
    let mut points = Vec::with_capacity(grid.connectivity().len());
    let mut cells = Vec::with_capacity(grid.connectivity().len());
    let mut cell_types = Vec::with_capacity(grid.cell_count());

    for (cell_type, corners) in grid.cells() {
        let cell_center = mean(corners.iter().map(|&i| source[i as usize]));
        let shift = [
            (cell_center[0] - center[0]) * factor,
            (cell_center[1] - center[1]) * factor,
            (cell_center[2] - center[2]) * factor,
        ];

        cells.push(corners.len() as u32);
        for &index in corners {
            let p = source[index as usize];
            cells.push(points.len() as u32);
            points.push([p[0] + shift[0], p[1] + shift[1], p[2] + shift[2]]);
        }
        cell_types.push(cell_type);
    }

    // Every index was freshly allocated above, so the layout is valid.
    UnstructuredGrid::new(points, cells, cell_types).unwrap_or_default()
}

/// Boundary of a cell set: faces of volumetric cells that no other cell
/// shares, plus every 2D cell as is. Unused points are dropped and the rest
/// renumbered in order of first use.
pub fn extract_surface(grid: &UnstructuredGrid) -> PolyData {
    let mut faces: Vec<(Vec<u32>, bool)> = Vec::new();
    let mut shared = HashMap::<Vec<u32>, usize>::new();

    for (cell_type, corners) in grid.cells() {
        if cell_type.is_volumetric() {
            for face in TETRA_FACES {
                let face = face.map(|corner| corners[corner]).to_vec();
                let mut key = face.clone();
                key.sort_unstable();
                *shared.entry(key).or_insert(0) += 1;
                faces.push((face, true));
            }
        } else {
            faces.push((corners.to_vec(), false));
        }
    }

    let source = grid.points();
    let mut remap = vec![u32::MAX; source.len()];
    let mut surface = PolyData::default();
    let mut renumbered = Vec::new();

    for (face, from_volume) in faces {
        if from_volume {
            let mut key = face.clone();
            key.sort_unstable();
            if shared.get(&key).is_some_and(|&uses| uses > 1) {
                continue;
            }
        }

        renumbered.clear();
        for index in face {
            let slot = &mut remap[index as usize];
            if *slot == u32::MAX {
                *slot = surface.points.len() as u32;
                surface.points.push(source[index as usize]);
            }
            renumbered.push(*slot);
        }
        surface.push_face(&renumbered);
    }

    surface
}

impl TryFrom<&PolyData> for Mesh {
    type Error = CodecError;

    fn try_from(surface: &PolyData) -> Result<Self, Self::Error> {
        let mut triangles = Vec::with_capacity(surface.faces.len() / 4);
        for (face, corners) in surface.faces().enumerate() {
            let &[a, b, c] = corners else {
                return Err(CodecError::UnsupportedTopology {
                    face,
                    sides: corners.len(),
                });
            };
            triangles.push([a, b, c]);
        }

        Ok(Mesh {
            vertices: surface
                .points
                .iter()
                .map(|p| [p[0] as f32, p[1] as f32, p[2] as f32])
                .collect(),
            triangles,
        })
    }
}

fn mean(points: impl Iterator<Item = Point3>) -> Point3 {
    let mut sum = [0.0; 3];
    let mut count = 0usize;
    for p in points {
        for axis in 0..3 {
            sum[axis] += p[axis];
        }
        count += 1;
    }
    let n = count.max(1) as f64;
    [sum[0] / n, sum[1] / n, sum[2] / n]
}

#[cfg(test)]
mod tests {
    use crate::codec::CodecError;
    use crate::demo::unit_cube;
    use crate::grid::{CellType, PolyData, TetraGrid, UnstructuredGrid};
    use crate::tetrahedralize::{StarTetrahedralizer, TetraOptions, Tetrahedralizer};
    use crate::{Mesh, codec};

    use super::{explode, explode_for_display, extract_surface};

    fn two_tets() -> TetraGrid {
        TetraGrid {
            points: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
                [0.0, 0.0, -1.0],
            ],
            tetrahedra: vec![[0, 1, 2, 3], [0, 2, 1, 4]],
        }
    }

    #[test]
    fn empty_grid_yields_empty_mesh() {
        let mesh = explode_for_display(&TetraGrid::empty(), 1.0).expect("empty grid is fine");
        assert_eq!(mesh, Mesh::empty());
    }

    #[test]
    fn shared_face_is_interior() {
        let grid = UnstructuredGrid::from_tetra(&two_tets()).expect("valid grid");
        let surface = extract_surface(&grid);
        assert_eq!(surface.face_count(), 6);
        assert_eq!(surface.points.len(), 5);
    }

    #[test]
    fn explode_separates_cells_and_moves_them_outward() {
        let grid = UnstructuredGrid::from_tetra(&two_tets()).expect("valid grid");
        let exploded = explode(&grid, 1.0);
        assert_eq!(exploded.points().len(), 8);
        assert_eq!(exploded.cell_types(), &[CellType::Tetra, CellType::Tetra]);

        // Bounding-box center is (0.5, 0.5, 0); the upper cell center is
        // (0.25, 0.25, 0.25), so it shifts by (-0.25, -0.25, 0.25).
        let apex = exploded.points()[3];
        assert!((apex[0] + 0.25).abs() < 1e-12);
        assert!((apex[1] + 0.25).abs() < 1e-12);
        assert!((apex[2] - 1.25).abs() < 1e-12);

        // Separated cells no longer share a face.
        assert_eq!(extract_surface(&exploded).face_count(), 8);
    }

    #[test]
    fn explode_by_zero_keeps_positions() {
        let grid = UnstructuredGrid::from_tetra(&two_tets()).expect("valid grid");
        let exploded = explode(&grid, 0.0);
        for (cell, (_, corners)) in exploded.cells().enumerate() {
            for (corner, &index) in corners.iter().enumerate() {
                let original = two_tets().tetrahedra[cell][corner];
                assert_eq!(exploded.points()[index as usize], two_tets().points[original as usize]);
            }
        }
    }

    #[test]
    fn display_mesh_has_independent_triangles() {
        let mesh = explode_for_display(&two_tets(), 0.5).expect("post-process");
        assert_eq!(mesh.triangles.len(), 8);
        assert_eq!(mesh.vertices.len(), 24);
        assert!(mesh.first_out_of_range().is_none());
    }

    #[test]
    fn meshed_cube_post_processes_to_valid_indices() {
        let grid = StarTetrahedralizer
            .tetrahedralize(&unit_cube(), &TetraOptions::default())
            .expect("cube should mesh");
        let mesh = explode_for_display(&grid, 1.0).expect("post-process");

        assert_eq!(mesh.triangles.len(), grid.tetrahedra.len() * 4);
        assert!(mesh.first_out_of_range().is_none());
        assert!(mesh.vertices.iter().flatten().all(|c| c.is_finite()));
        let decoded = codec::decode(&codec::encode(&mesh).expect("encode")).expect("decode");
        assert_eq!(decoded.triangles.len(), mesh.triangles.len());
    }

    #[test]
    fn polygons_must_be_triangulated_before_encoding() {
        let mut quad = PolyData {
            points: vec![[0.0; 3], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
            faces: Vec::new(),
        };
        quad.push_face(&[0, 1, 2, 3]);

        assert_eq!(
            Mesh::try_from(&quad),
            Err(CodecError::UnsupportedTopology { face: 0, sides: 4 })
        );
        let mesh = Mesh::try_from(&quad.triangulate()).expect("triangles encode");
        assert_eq!(mesh.triangles, vec![[0, 1, 2], [0, 2, 3]]);
    }
}
