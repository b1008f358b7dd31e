//! Point clouds and the geometric operations the fuser needs.
//!
//! # Key types
//!
//! | Type | Role |
//! |------|------|
//! | [`Aabb`]       | World-frame crop box with validated `min ≤ max`.       |
//! | [`CloudPoint`] | A position with an optional unit normal.               |
//! | [`PointCloud`] | Ordered points; crop, normals, flip, voxel downsample. |
//!
//! Every operation is deterministic: the same input produces the same output
//! in the same order, including the parallel normal estimation.
//!
//! # Example
//!
//! ```rust
//! use binpick_perception::cloud::{Aabb, PointCloud};
//! use nalgebra::Point3;
//!
//! let cloud = PointCloud::from_positions(vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(0.001, 0.001, 0.0),
//!     Point3::new(1.0, 1.0, 1.0),
//! ]);
//!
//! let bbox = Aabb::try_new(Point3::new(-0.1, -0.1, -0.1), Point3::new(0.1, 0.1, 0.1)).unwrap();
//! let cropped = cloud.crop(&bbox).unwrap();
//! assert_eq!(cropped.len(), 2);
//!
//! // Both survivors fall into the same 5 mm voxel.
//! assert_eq!(cropped.voxel_downsample(0.005).len(), 1);
//! ```

use std::collections::{BTreeMap, HashMap};

use binpick_types::PickError;
use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};
use rayon::prelude::*;

// ────────────────────────────────────────────────────────────────────────────
// Aabb
// ────────────────────────────────────────────────────────────────────────────

/// An axis-aligned bounding box, defined by its minimum and maximum corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Aabb {
    /// Create a bounding box from two opposite corners, sorting per axis.
    pub fn from_corners(a: Point3<f64>, b: Point3<f64>) -> Self {
        Self {
            min: Point3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Point3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// Create a bounding box from explicit lower and upper corners.
    ///
    /// # Errors
    ///
    /// [`PickError::RegionDegenerate`] if `lower > upper` on any axis or a
    /// bound is not finite.
    pub fn try_new(lower: Point3<f64>, upper: Point3<f64>) -> Result<Self, PickError> {
        let bbox = Self { min: lower, max: upper };
        bbox.validate()?;
        Ok(bbox)
    }

    /// Check `min ≤ max` on every axis.
    pub fn validate(&self) -> Result<(), PickError> {
        for (i, axis) in ['x', 'y', 'z'].into_iter().enumerate() {
            let (lower, upper) = (self.min[i], self.max[i]);
            // Written so NaN also fails.
            if !(lower <= upper) || !lower.is_finite() || !upper.is_finite() {
                return Err(PickError::RegionDegenerate { axis, lower, upper });
            }
        }
        Ok(())
    }

    /// True when the point lies inside or on the boundary of the box.
    pub fn contains_point(&self, p: &Point3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    /// Return the centre point of the box.
    pub fn centre(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PointCloud
// ────────────────────────────────────────────────────────────────────────────

/// A single cloud sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloudPoint {
    pub position: Point3<f64>,
    /// Unit surface normal, once estimated.
    pub normal: Option<Vector3<f64>>,
}

/// An ordered, world-frame point cloud.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    points: Vec<CloudPoint>,
}

impl PointCloud {
    pub fn new(points: Vec<CloudPoint>) -> Self {
        Self { points }
    }

    /// A cloud without normals.
    pub fn from_positions(positions: impl IntoIterator<Item = Point3<f64>>) -> Self {
        Self {
            points: positions
                .into_iter()
                .map(|position| CloudPoint {
                    position,
                    normal: None,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[CloudPoint] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &CloudPoint> {
        self.points.iter()
    }

    /// `true` when every point carries a normal.
    pub fn has_normals(&self) -> bool {
        self.points.iter().all(|p| p.normal.is_some())
    }

    /// Keep the points inside `bbox` (inclusive), preserving order.
    ///
    /// # Errors
    ///
    /// [`PickError::RegionDegenerate`] if `bbox` is inverted on any axis.
    pub fn crop(&self, bbox: &Aabb) -> Result<PointCloud, PickError> {
        bbox.validate()?;
        Ok(Self {
            points: self
                .points
                .iter()
                .filter(|p| bbox.contains_point(&p.position))
                .copied()
                .collect(),
        })
    }

    /// Estimate a unit normal for every point by PCA over its neighbourhood:
    /// up to `max_neighbors` nearest points within `radius`, the point itself
    /// included. Points with fewer than three neighbours get `+z`.
    pub fn estimate_normals(&mut self, radius: f64, max_neighbors: usize) {
        if self.points.is_empty() {
            return;
        }
        let grid = NeighborGrid::new(&self.points, radius);
        let normals: Vec<Vector3<f64>> = self
            .points
            .par_iter()
            .map(|p| {
                let neighbors = grid.nearest_within(&self.points, &p.position, radius, max_neighbors);
                pca_normal(&self.points, &neighbors)
            })
            .collect();
        for (p, n) in self.points.iter_mut().zip(normals) {
            p.normal = Some(n);
        }
    }

    /// Flip every normal whose direction points away from `viewpoint`.
    pub fn flip_normals_towards(&mut self, viewpoint: &Point3<f64>) {
        for p in &mut self.points {
            if let Some(n) = p.normal.as_mut() {
                if n.dot(&(viewpoint - p.position)) < 0.0 {
                    *n = -*n;
                }
            }
        }
    }

    /// Concatenate clouds in the given order.
    pub fn concatenate(clouds: &[PointCloud]) -> PointCloud {
        Self {
            points: clouds.iter().flat_map(|c| c.points.iter().copied()).collect(),
        }
    }

    /// Replace all points inside each `voxel_size` cube by their centroid.
    ///
    /// Output points are ordered by voxel index (x, then y, then z). A
    /// voxel's normal is the re-normalized mean of its normals, present only
    /// when every contributing point had one. A non-positive `voxel_size`
    /// returns the cloud unchanged.
    pub fn voxel_downsample(&self, voxel_size: f64) -> PointCloud {
        if !(voxel_size > 0.0) {
            return self.clone();
        }

        struct Accum {
            position: Vector3<f64>,
            normal: Vector3<f64>,
            first_normal: Option<Vector3<f64>>,
            with_normal: usize,
            count: usize,
        }

        let mut voxels: BTreeMap<(i64, i64, i64), Accum> = BTreeMap::new();
        for p in &self.points {
            let key = (
                (p.position.x / voxel_size).floor() as i64,
                (p.position.y / voxel_size).floor() as i64,
                (p.position.z / voxel_size).floor() as i64,
            );
            let acc = voxels.entry(key).or_insert_with(|| Accum {
                position: Vector3::zeros(),
                normal: Vector3::zeros(),
                first_normal: None,
                with_normal: 0,
                count: 0,
            });
            acc.position += p.position.coords;
            acc.count += 1;
            if let Some(n) = p.normal {
                acc.normal += n;
                acc.with_normal += 1;
                acc.first_normal.get_or_insert(n);
            }
        }

        let points = voxels
            .into_values()
            .map(|acc| {
                let normal = (acc.with_normal == acc.count)
                    .then(|| acc.normal.try_normalize(1e-12).or(acc.first_normal))
                    .flatten();
                CloudPoint {
                    position: Point3::from(acc.position / acc.count as f64),
                    normal,
                }
            })
            .collect();
        Self { points }
    }
}

impl FromIterator<CloudPoint> for PointCloud {
    fn from_iter<I: IntoIterator<Item = CloudPoint>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ────────────────────────────────────────────────────────────────────────────

/// Uniform hash grid with `radius`-sized cells for fixed-radius queries.
struct NeighborGrid {
    cell: f64,
    cells: HashMap<(i64, i64, i64), Vec<usize>>,
}

impl NeighborGrid {
    fn new(points: &[CloudPoint], radius: f64) -> Self {
        let cell = if radius.is_finite() && radius > 0.0 { radius } else { 1e-6 };
        let mut cells: HashMap<(i64, i64, i64), Vec<usize>> = HashMap::new();
        for (i, p) in points.iter().enumerate() {
            cells.entry(Self::key(cell, &p.position)).or_default().push(i);
        }
        Self { cell, cells }
    }

    fn key(cell: f64, p: &Point3<f64>) -> (i64, i64, i64) {
        (
            (p.x / cell).floor() as i64,
            (p.y / cell).floor() as i64,
            (p.z / cell).floor() as i64,
        )
    }

    /// Indices of the `k` nearest points within `radius`, nearest first,
    /// ties broken by index.
    fn nearest_within(&self, points: &[CloudPoint], query: &Point3<f64>, radius: f64, k: usize) -> Vec<usize> {
        let r2 = radius * radius;
        let (cx, cy, cz) = Self::key(self.cell, query);
        let mut found: Vec<(f64, usize)> = Vec::new();
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let Some(bucket) = self.cells.get(&(cx + dx, cy + dy, cz + dz)) else {
                        continue;
                    };
                    for &i in bucket {
                        let d2 = (points[i].position - query).norm_squared();
                        if d2 <= r2 {
                            found.push((d2, i));
                        }
                    }
                }
            }
        }
        found.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        found.truncate(k);
        found.into_iter().map(|(_, i)| i).collect()
    }
}

/// Eigenvector of the smallest covariance eigenvalue.
fn pca_normal(points: &[CloudPoint], neighbors: &[usize]) -> Vector3<f64> {
    if neighbors.len() < 3 {
        return Vector3::z();
    }
    let n = neighbors.len() as f64;
    let centroid = neighbors
        .iter()
        .fold(Vector3::zeros(), |acc, &i| acc + points[i].position.coords)
        / n;
    let covariance = neighbors.iter().fold(Matrix3::zeros(), |acc, &i| {
        let d = points[i].position.coords - centroid;
        acc + d * d.transpose()
    }) / n;

    let eigen = SymmetricEigen::new(covariance);
    let min_idx = eigen.eigenvalues.imin();
    eigen
        .eigenvectors
        .column(min_idx)
        .into_owned()
        .try_normalize(1e-12)
        .unwrap_or_else(Vector3::z)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
