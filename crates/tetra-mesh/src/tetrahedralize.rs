//! Volumetric meshing seam.
//!
//! The service treats tetrahedralization as an opaque routine behind
//! [`Tetrahedralizer`]. [`StarTetrahedralizer`] is the bundled reference
//! implementation: it refines the surface, then fills the enclosed volume
//! with concentric prism layers that collapse onto the vertex centroid.
//! That is exact for star-shaped solids (convex ones included); other input
//! yields overlapping cells rather than an error.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::Mesh;
use crate::grid::{Point3, TetraGrid, bounds};

pub const DEFAULT_EDGE_LENGTH_FAC: f64 = 0.1;
pub const DEFAULT_OPTIMIZE: bool = true;

const MAX_SUBDIVISIONS: usize = 16;
const MAX_LAYERS: usize = 16;
const MAX_TETRAHEDRA: usize = 4_000_000;
const DEGENERATE_VOLUME_RATIO: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TetraOptions {
    /// Target edge length as a fraction of the bounding-box diagonal.
    pub edge_length_fac: f64,
    /// Drop degenerate cells and unused points after meshing.
    pub optimize: bool,
}

impl Default for TetraOptions {
    fn default() -> Self {
        Self {
            edge_length_fac: DEFAULT_EDGE_LENGTH_FAC,
            optimize: DEFAULT_OPTIMIZE,
        }
    }
}

impl TetraOptions {
    pub fn validate(&self) -> Result<(), MeshingError> {
        if !self.edge_length_fac.is_finite() || self.edge_length_fac <= 0.0 {
            return Err(MeshingError::InvalidEdgeLength(self.edge_length_fac));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MeshingError {
    #[error("input surface has no faces")]
    EmptySurface,

    #[error("vertex {0} has a non-finite coordinate")]
    NonFiniteVertex(usize),

    #[error("input surface has a zero-size bounding box")]
    DegenerateBounds,

    #[error("edge length factor must be finite and positive, got {0}")]
    InvalidEdgeLength(f64),

    #[error("meshing would produce {0} tetrahedra, above the 4000000 limit")]
    TooLarge(usize),
}

pub trait Tetrahedralizer {
    fn tetrahedralize(&self, surface: &Mesh, options: &TetraOptions)
    -> Result<TetraGrid, MeshingError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StarTetrahedralizer;

impl Tetrahedralizer for StarTetrahedralizer {
    fn tetrahedralize(
        &self,
        surface: &Mesh,
        options: &TetraOptions,
    ) -> Result<TetraGrid, MeshingError> {
        options.validate()?;
        if surface.triangles.is_empty() {
            return Err(MeshingError::EmptySurface);
        }
        if let Some(index) = surface
            .vertices
            .iter()
            .position(|v| v.iter().any(|c| !c.is_finite()))
        {
            return Err(MeshingError::NonFiniteVertex(index));
        }

        let (points, triangles) = weld(surface);
        if triangles.is_empty() {
            return Err(MeshingError::DegenerateBounds);
        }
        let (min, max) = bounds(&points).ok_or(MeshingError::DegenerateBounds)?;
        let diagonal = distance(min, max);
        if diagonal <= f64::EPSILON {
            return Err(MeshingError::DegenerateBounds);
        }
        let target = options.edge_length_fac * diagonal;

        let longest_edge = triangles
            .iter()
            .flat_map(|tri| {
                [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])]
                    .map(|(a, b)| distance(points[a as usize], points[b as usize]))
            })
            .fold(0.0, f64::max);
        let subdivisions = steps_for(longest_edge, target, MAX_SUBDIVISIONS);

        let center = centroid(&points);
        let radius = points
            .iter()
            .map(|&p| distance(p, center))
            .fold(0.0, f64::max);
        let layers = steps_for(radius, target, MAX_LAYERS);

        let estimate = triangles.len() * subdivisions * subdivisions * (3 * layers - 2);
        if estimate > MAX_TETRAHEDRA {
            return Err(MeshingError::TooLarge(estimate));
        }

        let (shell_points, shell_triangles) = subdivide(&points, &triangles, subdivisions);
        let mut grid = fill_layers(center, &shell_points, &shell_triangles, layers);
        orient_positive(&mut grid);
        if options.optimize {
            drop_degenerate(&mut grid, target);
        }

        debug!(
            surface_triangles = triangles.len(),
            subdivisions,
            layers,
            points = grid.points.len(),
            tetrahedra = grid.tetrahedra.len(),
            "tetrahedralized surface"
        );
        Ok(grid)
    }
}

fn steps_for(length: f64, target: f64, cap: usize) -> usize {
    ((length / target).ceil() as usize).clamp(1, cap)
}

/// Merges bit-identical positions and drops vertices no face references.
fn weld(surface: &Mesh) -> (Vec<Point3>, Vec<[u32; 3]>) {
    let mut remap = HashMap::<[u32; 3], u32>::new();
    let mut points = Vec::new();
    let triangles = surface
        .triangles
        .iter()
        .map(|tri| {
            tri.map(|index| {
                let vertex = surface.vertices[index as usize];
                *remap.entry(vertex.map(f32::to_bits)).or_insert_with(|| {
                    points.push(vertex.map(f64::from));
                    (points.len() - 1) as u32
                })
            })
        })
        .filter(|tri| tri[0] != tri[1] && tri[1] != tri[2] && tri[2] != tri[0])
        .collect();
    (points, triangles)
}

/// Splits every triangle into `n * n` with shared points on shared edges.
fn subdivide(
    points: &[Point3],
    triangles: &[[u32; 3]],
    n: usize,
) -> (Vec<Point3>, Vec<[u32; 3]>) {
    if n == 1 {
        return (points.to_vec(), triangles.to_vec());
    }

    let mut out_points = points.to_vec();
    let mut edge_points = HashMap::<(u32, u32, usize), u32>::new();
    let mut out_triangles = Vec::with_capacity(triangles.len() * n * n);

    for tri in triangles {
        let [a, b, c] = *tri;
        // Lattice point (i, j) has barycentric weights (n-i-j, i, j) on (a, b, c).
        let mut lattice = vec![vec![0u32; n + 1]; n + 1];
        for i in 0..=n {
            for j in 0..=(n - i) {
                let k = n - i - j;
                lattice[i][j] = match (i, j, k) {
                    (0, 0, _) => a,
                    (_, 0, 0) => b,
                    (0, _, 0) => c,
                    (_, 0, _) => edge_point(&mut out_points, &mut edge_points, a, b, i, n),
                    (0, _, _) => edge_point(&mut out_points, &mut edge_points, a, c, j, n),
                    (_, _, 0) => edge_point(&mut out_points, &mut edge_points, b, c, j, n),
                    _ => {
                        out_points.push(blend(points, [a, b, c], [k, i, j], n));
                        (out_points.len() - 1) as u32
                    }
                };
            }
        }

        for i in 0..n {
            for j in 0..(n - i) {
                out_triangles.push([lattice[i][j], lattice[i + 1][j], lattice[i][j + 1]]);
                if i + j + 1 < n {
                    out_triangles.push([
                        lattice[i + 1][j],
                        lattice[i + 1][j + 1],
                        lattice[i][j + 1],
                    ]);
                }
            }
        }
    }

    (out_points, out_triangles)
}

/// Point `step` of `n` along edge `from -> to`, keyed on the undirected edge.
fn edge_point(
    points: &mut Vec<Point3>,
    cache: &mut HashMap<(u32, u32, usize), u32>,
    from: u32,
    to: u32,
    step: usize,
    n: usize,
) -> u32 {
    let (lo, hi, step) = if from < to {
        (from, to, step)
    } else {
        (to, from, n - step)
    };
    *cache.entry((lo, hi, step)).or_insert_with(|| {
        let t = step as f64 / n as f64;
        let p = points[lo as usize];
        let q = points[hi as usize];
        points.push([
            p[0] + (q[0] - p[0]) * t,
            p[1] + (q[1] - p[1]) * t,
            p[2] + (q[2] - p[2]) * t,
        ]);
        (points.len() - 1) as u32
    })
}

fn blend(points: &[Point3], corners: [u32; 3], weights: [usize; 3], n: usize) -> Point3 {
    let mut out = [0.0; 3];
    for (corner, weight) in corners.iter().zip(weights) {
        let p = points[*corner as usize];
        let w = weight as f64 / n as f64;
        for axis in 0..3 {
            out[axis] += p[axis] * w;
        }
    }
    out
}

/// Fills the volume between `center` and the shell with `layers` scaled
/// copies of the shell. Prisms split by the lower-bottom-to-higher-top
/// diagonal rule, so neighbouring prisms agree on shared quads.
fn fill_layers(
    center: Point3,
    shell: &[Point3],
    triangles: &[[u32; 3]],
    layers: usize,
) -> TetraGrid {
    let shell_len = shell.len() as u32;
    let mut points = Vec::with_capacity(1 + shell.len() * layers);
    points.push(center);
    for layer in 1..=layers {
        let t = layer as f64 / layers as f64;
        points.extend(shell.iter().map(|p| {
            [
                center[0] + (p[0] - center[0]) * t,
                center[1] + (p[1] - center[1]) * t,
                center[2] + (p[2] - center[2]) * t,
            ]
        }));
    }
    let at = |vertex: u32, layer: usize| 1 + (layer as u32 - 1) * shell_len + vertex;

    let mut tetrahedra = Vec::with_capacity(triangles.len() * (3 * layers - 2));
    for tri in triangles {
        let mut sorted = *tri;
        sorted.sort_unstable();
        let [a, b, c] = sorted;

        tetrahedra.push([0, at(a, 1), at(b, 1), at(c, 1)]);
        for layer in 1..layers {
            let (a0, b0, c0) = (at(a, layer), at(b, layer), at(c, layer));
            let (a1, b1, c1) = (at(a, layer + 1), at(b, layer + 1), at(c, layer + 1));
            tetrahedra.push([a0, b0, c0, c1]);
            tetrahedra.push([a0, b0, b1, c1]);
            tetrahedra.push([a0, a1, b1, c1]);
        }
    }

    TetraGrid { points, tetrahedra }
}

fn signed_volume(points: &[Point3], tet: &[u32; 4]) -> f64 {
    let [p0, p1, p2, p3] = tet.map(|i| points[i as usize]);
    let u = sub(p1, p0);
    let v = sub(p2, p0);
    let w = sub(p3, p0);
    (u[0] * (v[1] * w[2] - v[2] * w[1]) - u[1] * (v[0] * w[2] - v[2] * w[0])
        + u[2] * (v[0] * w[1] - v[1] * w[0]))
        / 6.0
}

fn orient_positive(grid: &mut TetraGrid) {
    for i in 0..grid.tetrahedra.len() {
        if signed_volume(&grid.points, &grid.tetrahedra[i]) < 0.0 {
            grid.tetrahedra[i].swap(2, 3);
        }
    }
}

fn drop_degenerate(grid: &mut TetraGrid, target: f64) {
    let threshold = target.powi(3) * DEGENERATE_VOLUME_RATIO;
    let points = &grid.points;
    grid.tetrahedra
        .retain(|tet| signed_volume(points, tet).abs() > threshold);

    let mut remap = vec![u32::MAX; grid.points.len()];
    let mut kept = Vec::new();
    for tet in &mut grid.tetrahedra {
        for index in tet.iter_mut() {
            let slot = &mut remap[*index as usize];
            if *slot == u32::MAX {
                *slot = kept.len() as u32;
                kept.push(grid.points[*index as usize]);
            }
            *index = *slot;
        }
    }
    grid.points = kept;
}

fn centroid(points: &[Point3]) -> Point3 {
    let mut sum = [0.0; 3];
    for p in points {
        for axis in 0..3 {
            sum[axis] += p[axis];
        }
    }
    let n = points.len().max(1) as f64;
    [sum[0] / n, sum[1] / n, sum[2] / n]
}

#[inline]
fn sub(a: Point3, b: Point3) -> Point3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn distance(a: Point3, b: Point3) -> f64 {
    let d = sub(a, b);
    (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
}

#[cfg(test)]
mod tests {
    use crate::Mesh;
    use crate::demo::unit_cube;

    use super::{
        MeshingError, StarTetrahedralizer, TetraOptions, Tetrahedralizer, signed_volume,
    };

    fn coarse() -> TetraOptions {
        TetraOptions {
            edge_length_fac: 1.0,
            optimize: true,
        }
    }

    #[test]
    fn cube_volume_is_filled_exactly() {
        let grid = StarTetrahedralizer
            .tetrahedralize(&unit_cube(), &TetraOptions::default())
            .expect("cube should mesh");

        assert!(grid.validate().is_ok());
        assert!(grid.tetrahedra.len() > 12);
        let volume: f64 = grid
            .tetrahedra
            .iter()
            .map(|tet| signed_volume(&grid.points, tet))
            .sum();
        assert!((volume - 1.0).abs() < 1e-9, "volume was {volume}");
        assert!(
            grid.tetrahedra
                .iter()
                .all(|tet| signed_volume(&grid.points, tet) > 0.0)
        );
    }

    #[test]
    fn coarse_cube_is_a_centroid_fan() {
        let grid = StarTetrahedralizer
            .tetrahedralize(&unit_cube(), &coarse())
            .expect("cube should mesh");
        assert_eq!(grid.tetrahedra.len(), 12);
        assert_eq!(grid.points.len(), 9);
    }

    #[test]
    fn finer_edge_length_produces_more_cells() {
        let coarse_grid = StarTetrahedralizer
            .tetrahedralize(&unit_cube(), &coarse())
            .expect("coarse");
        let fine_grid = StarTetrahedralizer
            .tetrahedralize(
                &unit_cube(),
                &TetraOptions {
                    edge_length_fac: 0.2,
                    optimize: true,
                },
            )
            .expect("fine");
        assert!(fine_grid.tetrahedra.len() > coarse_grid.tetrahedra.len());
    }

    #[test]
    fn duplicated_corners_are_welded() {
        let cube = unit_cube();
        let mut split = Mesh::empty();
        for tri in &cube.triangles {
            let base = split.vertices.len() as u32;
            for &index in tri {
                split.vertices.push(cube.vertices[index as usize]);
            }
            split.triangles.push([base, base + 1, base + 2]);
        }

        let grid = StarTetrahedralizer
            .tetrahedralize(&split, &coarse())
            .expect("split cube should mesh");
        assert_eq!(grid.points.len(), 9);
    }

    #[test]
    fn invalid_input_is_rejected() {
        let mesher = StarTetrahedralizer;
        assert_eq!(
            mesher.tetrahedralize(&Mesh::empty(), &TetraOptions::default()),
            Err(MeshingError::EmptySurface)
        );

        let mut nan = unit_cube();
        nan.vertices[2][1] = f32::NAN;
        assert_eq!(
            mesher.tetrahedralize(&nan, &TetraOptions::default()),
            Err(MeshingError::NonFiniteVertex(2))
        );

        let flat = Mesh {
            vertices: vec![[1.0, 1.0, 1.0]; 3],
            triangles: vec![[0, 1, 2]],
        };
        assert_eq!(
            mesher.tetrahedralize(&flat, &TetraOptions::default()),
            Err(MeshingError::DegenerateBounds)
        );

        let bad_options = TetraOptions {
            edge_length_fac: 0.0,
            optimize: true,
        };
        assert_eq!(
            mesher.tetrahedralize(&unit_cube(), &bad_options),
            Err(MeshingError::InvalidEdgeLength(0.0))
        );
    }

    #[test]
    fn oversized_requests_are_refused() {
        let tiny = TetraOptions {
            edge_length_fac: 1e-6,
            optimize: false,
        };
        let mut many = Mesh::empty();
        for copy in 0..200u32 {
            let cube = unit_cube();
            let base = many.vertices.len() as u32;
            let offset = copy as f32 * 2.0;
            many.vertices
                .extend(cube.vertices.iter().map(|v| [v[0] + offset, v[1], v[2]]));
            many.triangles
                .extend(cube.triangles.iter().map(|t| t.map(|i| i + base)));
        }
        assert!(matches!(
            StarTetrahedralizer.tetrahedralize(&many, &tiny),
            Err(MeshingError::TooLarge(_))
        ));
    }
}
