//! Volumetric and polygonal cell containers.
//!
//! Connectivity follows the VTK legacy layout: a flat `u32` array where each
//! cell is a leading corner count followed by that many point indices, with a
//! parallel array of cell-type tags.

use thiserror::Error;

pub type Point3 = [f64; 3];

/// VTK cell-type codes for the kinds this crate produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CellType {
    Triangle = 5,
    Polygon = 7,
    Quad = 9,
    Tetra = 10,
}

impl CellType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_volumetric(self) -> bool {
        matches!(self, Self::Tetra)
    }

    /// Fixed corner count, `None` for arbitrary polygons.
    pub fn corner_count(self) -> Option<usize> {
        match self {
            Self::Triangle => Some(3),
            Self::Quad => Some(4),
            Self::Tetra => Some(4),
            Self::Polygon => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("cell {cell} references point {index} but the grid has {point_count} points")]
    IndexOutOfRange {
        cell: usize,
        index: u32,
        point_count: usize,
    },

    #[error("connectivity array ends inside cell {cell}")]
    TruncatedConnectivity { cell: usize },

    #[error("connectivity describes {described} cells but {tagged} cell types were given")]
    CellCountMismatch { described: usize, tagged: usize },

    #[error("cell {cell} is tagged {cell_type:?} but has {corners} corners")]
    CornerCountMismatch {
        cell: usize,
        cell_type: CellType,
        corners: usize,
    },
}

/// Raw output of a tetrahedralization: points plus linear tetrahedra.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TetraGrid {
    pub points: Vec<Point3>,
    pub tetrahedra: Vec<[u32; 4]>,
}

impl TetraGrid {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tetrahedra.is_empty()
    }

    pub fn validate(&self) -> Result<(), GridError> {
        let point_count = self.points.len();
        for (cell, tet) in self.tetrahedra.iter().enumerate() {
            if let Some(&index) = tet.iter().find(|&&i| i as usize >= point_count) {
                return Err(GridError::IndexOutOfRange {
                    cell,
                    index,
                    point_count,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnstructuredGrid {
    points: Vec<Point3>,
    cells: Vec<u32>,
    cell_types: Vec<CellType>,
}

impl UnstructuredGrid {
    pub fn new(
        points: Vec<Point3>,
        cells: Vec<u32>,
        cell_types: Vec<CellType>,
    ) -> Result<Self, GridError> {
        let mut cursor = 0usize;
        let mut cell = 0usize;
        while cursor < cells.len() {
            let corners = cells[cursor] as usize;
            let end = cursor + 1 + corners;
            if end > cells.len() {
                return Err(GridError::TruncatedConnectivity { cell });
            }
            if let Some(&cell_type) = cell_types.get(cell) {
                let fits = match cell_type.corner_count() {
                    Some(expected) => expected == corners,
                    None => corners >= 3,
                };
                if !fits {
                    return Err(GridError::CornerCountMismatch {
                        cell,
                        cell_type,
                        corners,
                    });
                }
            }
            if let Some(&index) = cells[cursor + 1..end]
                .iter()
                .find(|&&i| i as usize >= points.len())
            {
                return Err(GridError::IndexOutOfRange {
                    cell,
                    index,
                    point_count: points.len(),
                });
            }
            cursor = end;
            cell += 1;
        }

        if cell != cell_types.len() {
            return Err(GridError::CellCountMismatch {
                described: cell,
                tagged: cell_types.len(),
            });
        }

        Ok(Self {
            points,
            cells,
            cell_types,
        })
    }

    /// Builds the count-prefixed connectivity for a tetrahedral grid.
    pub fn from_tetra(grid: &TetraGrid) -> Result<Self, GridError> {
        grid.validate()?;
        let mut cells = Vec::with_capacity(grid.tetrahedra.len() * 5);
        for tet in &grid.tetrahedra {
            cells.push(4);
            cells.extend_from_slice(tet);
        }
        let cell_types = vec![CellType::Tetra; grid.tetrahedra.len()];
        Ok(Self {
            points: grid.points.clone(),
            cells,
            cell_types,
        })
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    pub fn connectivity(&self) -> &[u32] {
        &self.cells
    }

    pub fn cell_types(&self) -> &[CellType] {
        &self.cell_types
    }

    pub fn cell_count(&self) -> usize {
        self.cell_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cell_types.is_empty()
    }

    pub fn cells(&self) -> impl Iterator<Item = (CellType, &[u32])> + '_ {
        CellIter {
            cells: &self.cells,
            cursor: 0,
        }
        .zip(self.cell_types.iter().copied())
        .map(|(corners, cell_type)| (cell_type, corners))
    }

    /// Axis-aligned bounds as `(min, max)`, `None` without points.
    pub fn bounds(&self) -> Option<(Point3, Point3)> {
        bounds(&self.points)
    }
}

/// Polygonal surface, the result of surface extraction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolyData {
    pub points: Vec<Point3>,
    pub faces: Vec<u32>,
}

impl PolyData {
    pub fn faces(&self) -> impl Iterator<Item = &[u32]> + '_ {
        CellIter {
            cells: &self.faces,
            cursor: 0,
        }
    }

    pub fn face_count(&self) -> usize {
        self.faces().count()
    }

    pub fn push_face(&mut self, corners: &[u32]) {
        self.faces.push(corners.len() as u32);
        self.faces.extend_from_slice(corners);
    }

    /// Recasts the surface as 2D cells for grid filters.
    pub fn to_grid(&self) -> Result<UnstructuredGrid, GridError> {
        let cell_types = self
            .faces()
            .map(|corners| match corners.len() {
                3 => CellType::Triangle,
                4 => CellType::Quad,
                _ => CellType::Polygon,
            })
            .collect();
        UnstructuredGrid::new(self.points.clone(), self.faces.clone(), cell_types)
    }

    /// Fans every polygon into triangles; faces with fewer than three
    /// corners are dropped.
    pub fn triangulate(&self) -> PolyData {
        let mut out = PolyData {
            points: self.points.clone(),
            faces: Vec::with_capacity(self.faces.len()),
        };
        for corners in self.faces() {
            if corners.len() < 3 {
                continue;
            }
            for i in 1..corners.len() - 1 {
                out.push_face(&[corners[0], corners[i], corners[i + 1]]);
            }
        }
        out
    }
}

struct CellIter<'a> {
    cells: &'a [u32],
    cursor: usize,
}

impl<'a> Iterator for CellIter<'a> {
    type Item = &'a [u32];

    fn next(&mut self) -> Option<Self::Item> {
        let count = *self.cells.get(self.cursor)? as usize;
        let start = self.cursor + 1;
        let end = (start + count).min(self.cells.len());
        self.cursor = start + count;
        Some(&self.cells[start..end])
    }
}

pub(crate) fn bounds(points: &[Point3]) -> Option<(Point3, Point3)> {
    let first = *points.first()?;
    Some(points.iter().fold((first, first), |(mut min, mut max), p| {
        for axis in 0..3 {
            min[axis] = min[axis].min(p[axis]);
            max[axis] = max[axis].max(p[axis]);
        }
        (min, max)
    }))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridCodecError {
    #[error("grid payload is {len} bytes, too short for the 8-byte header")]
    MissingHeader { len: usize },

    #[error("grid payload should be {expected} bytes for {points} points and {tetrahedra} tetrahedra, got {actual}")]
    LengthMismatch {
        points: usize,
        tetrahedra: usize,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Serializes a grid for the worker pipe:
/// `u32 points, u32 tetrahedra, points * 3 f64, tetrahedra * 4 u32`.
pub fn encode_tetra_grid(grid: &TetraGrid) -> Vec<u8> {
    let mut bytes =
        Vec::with_capacity(8 + grid.points.len() * 24 + grid.tetrahedra.len() * 16);
    bytes.extend_from_slice(&(grid.points.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&(grid.tetrahedra.len() as u32).to_le_bytes());
    for point in &grid.points {
        for value in point {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
    for tet in &grid.tetrahedra {
        for index in tet {
            bytes.extend_from_slice(&index.to_le_bytes());
        }
    }
    bytes
}

pub fn decode_tetra_grid(bytes: &[u8]) -> Result<TetraGrid, GridCodecError> {
    let Some((header, body)) = bytes.split_first_chunk::<8>() else {
        return Err(GridCodecError::MissingHeader { len: bytes.len() });
    };
    let point_count = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let tetra_count = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

    let point_len = point_count * 24;
    let expected = 8 + point_len + tetra_count * 16;
    if bytes.len() != expected {
        return Err(GridCodecError::LengthMismatch {
            points: point_count,
            tetrahedra: tetra_count,
            expected,
            actual: bytes.len(),
        });
    }

    let (point_bytes, tetra_bytes) = body.split_at(point_len);
    let points = point_bytes
        .chunks_exact(24)
        .map(|record| {
            let mut point = [0.0; 3];
            for (axis, chunk) in record.chunks_exact(8).enumerate() {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                point[axis] = f64::from_le_bytes(raw);
            }
            point
        })
        .collect();
    let tetrahedra = tetra_bytes
        .chunks_exact(16)
        .map(|record| {
            let mut tet = [0u32; 4];
            for (corner, chunk) in record.chunks_exact(4).enumerate() {
                tet[corner] = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
            tet
        })
        .collect();

    let grid = TetraGrid { points, tetrahedra };
    grid.validate()?;
    Ok(grid)
}
