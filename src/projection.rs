//! # Dimensionality reduction
//!
//! Projects the accumulated high-dimensional batch onto its top principal components
//! for 3D plotting.
//!
//! [`Pca::fit`] centers the data (no scaling) and extracts the leading eigenvectors
//! of either the covariance matrix (`d × d`) or the Gram matrix (`n × n`), whichever
//! is smaller, by power iteration with deflation. Components are sign-normalized so
//! that their largest-magnitude coordinate is positive, which keeps repeated fits of
//! the same batch identical. A component with no variance left is a zero vector.
//!
//! [`Projector`] holds the currently displayed projection and decides when to
//! recompute it:
//!
//! | batch     | in flight | effect                                     |
//! |-----------|-----------|--------------------------------------------|
//! | any       | yes       | nothing, wait for the fetch to settle       |
//! | empty     | no        | clear                                      |
//! | non-empty | no        | refit from scratch and replace             |
//!
//! A failed refit is logged and the previous projection is kept.

use ndarray::{Array1, Array2, Axis};
use thiserror::Error;
use tracing::{debug, error};

/// A point in the 3D plot.
pub type ReducedPoint = [f64; 3];

pub const PLOT_COMPONENTS: usize = 3;

const MAX_ITERATIONS: usize = 1000;
const TOLERANCE: f64 = 1e-12;
const NEGLIGIBLE: f64 = 1e-10;

#[derive(Debug, Error, PartialEq)]
pub enum ProjectionError {
    #[error("cannot project an empty batch")]
    Empty,

    #[error("vectors have zero dimensions")]
    ZeroDimensions,

    #[error("vector {index} has {found} dimensions, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("vector {index} contains a non-finite value")]
    NonFinite { index: usize },
}

fn to_matrix(batch: &[Vec<f32>], expected: Option<usize>) -> Result<Array2<f64>, ProjectionError> {
    let first = batch.first().ok_or(ProjectionError::Empty)?;
    let dims = expected.unwrap_or(first.len());
    if dims == 0 {
        return Err(ProjectionError::ZeroDimensions);
    }
    for (index, row) in batch.iter().enumerate() {
        if row.len() != dims {
            return Err(ProjectionError::DimensionMismatch {
                index,
                expected: dims,
                found: row.len(),
            });
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(ProjectionError::NonFinite { index });
        }
    }
    Ok(Array2::from_shape_fn((batch.len(), dims), |(i, j)| {
        f64::from(batch[i][j])
    }))
}

/// Deterministic, non-degenerate starting vector for power iteration.
fn seed_vector(size: usize, component: usize) -> Array1<f64> {
    let seed = Array1::from_shape_fn(size, |i| {
        1.0 + ((i + 7 * component + 1) as f64 * 0.618_033_988_749_895).fract()
    });
    let norm = seed.dot(&seed).sqrt();
    seed / norm
}

/// Top `k` eigenpairs of a symmetric positive semi-definite matrix, largest first.
fn top_eigenpairs(mut matrix: Array2<f64>, k: usize) -> Vec<(f64, Array1<f64>)> {
    let size = matrix.nrows();
    let scale = matrix.diag().sum().abs().max(f64::MIN_POSITIVE);
    let mut pairs = Vec::with_capacity(k);

    for component in 0..k {
        if component >= size {
            pairs.push((0.0, Array1::zeros(size)));
            continue;
        }

        let mut vector = seed_vector(size, component);
        let mut converged_norm = 0.0;
        for _ in 0..MAX_ITERATIONS {
            let next = matrix.dot(&vector);
            let norm = next.dot(&next).sqrt();
            if norm <= scale * NEGLIGIBLE {
                converged_norm = 0.0;
                break;
            }
            let next = next / norm;
            let delta = (&next - &vector).mapv(f64::abs).sum();
            vector = next;
            converged_norm = norm;
            if delta < TOLERANCE {
                break;
            }
        }

        if converged_norm <= scale * NEGLIGIBLE {
            pairs.push((0.0, Array1::zeros(size)));
            continue;
        }

        let lambda = vector.dot(&matrix.dot(&vector));
        let column = vector.view().insert_axis(Axis(1));
        let row = vector.view().insert_axis(Axis(0));
        matrix = matrix - column.dot(&row) * lambda;
        pairs.push((lambda.max(0.0), vector));
    }
    pairs
}

fn normalize_sign(mut component: Array1<f64>) -> Array1<f64> {
    let pivot = component
        .iter()
        .copied()
        .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best });
    if pivot < 0.0 {
        component.mapv_inplace(|v| -v);
    }
    component
}

/// A fitted linear principal-component model.
#[derive(Debug, Clone, PartialEq)]
pub struct Pca {
    mean: Array1<f64>,
    /// `k × d`, one component per row.
    components: Array2<f64>,
    explained_variance: Vec<f64>,
}

impl Pca {
    /// Fit `n_components` principal components on `batch`.
    ///
    /// # Errors
    /// [`ProjectionError`] for an empty batch, zero-length vectors, rows of differing
    /// length, or non-finite values.
    pub fn fit(batch: &[Vec<f32>], n_components: usize) -> Result<Self, ProjectionError> {
        let data = to_matrix(batch, None)?;
        let (rows, dims) = data.dim();
        let mean = data.mean_axis(Axis(0)).ok_or(ProjectionError::Empty)?;
        let centered = &data - &mean;
        let denominator = rows.saturating_sub(1).max(1) as f64;

        let pairs: Vec<(f64, Array1<f64>)> = if rows <= dims {
            let gram = centered.dot(&centered.t());
            top_eigenpairs(gram, n_components)
                .into_iter()
                .map(|(lambda, u)| {
                    let v = centered.t().dot(&u);
                    let norm = v.dot(&v).sqrt();
                    if lambda > 0.0 && norm > 0.0 {
                        (lambda, v / norm)
                    } else {
                        (0.0, Array1::zeros(dims))
                    }
                })
                .collect()
        } else {
            let covariance = centered.t().dot(&centered);
            top_eigenpairs(covariance, n_components)
        };

        let mut components = Array2::zeros((n_components, dims));
        let mut explained_variance = Vec::with_capacity(n_components);
        for (i, (lambda, vector)) in pairs.into_iter().enumerate() {
            components.row_mut(i).assign(&normalize_sign(vector));
            explained_variance.push(lambda / denominator);
        }

        debug!(rows, dims, n_components, variance = ?explained_variance, "PCA fitted");
        Ok(Self {
            mean,
            components,
            explained_variance,
        })
    }

    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }

    /// Variance captured by each component, largest first.
    pub fn explained_variance(&self) -> &[f64] {
        &self.explained_variance
    }

    /// Component `i` as a unit vector (or zeros when degenerate).
    pub fn component(&self, i: usize) -> Option<Vec<f64>> {
        (i < self.n_components()).then(|| self.components.row(i).to_vec())
    }

    /// Project `batch` onto the fitted components: `n × k`.
    pub fn transform(&self, batch: &[Vec<f32>]) -> Result<Array2<f64>, ProjectionError> {
        let data = to_matrix(batch, Some(self.mean.len()))?;
        let centered = &data - &self.mean;
        Ok(centered.dot(&self.components.t()))
    }

    /// Project `batch` to plot points. Coordinates past the fitted components are 0.
    pub fn predict(&self, batch: &[Vec<f32>]) -> Result<Vec<ReducedPoint>, ProjectionError> {
        let projected = self.transform(batch)?;
        Ok(projected
            .rows()
            .into_iter()
            .map(|row| {
                let mut point = [0.0; PLOT_COMPONENTS];
                for (slot, value) in point.iter_mut().zip(row.iter()) {
                    *slot = *value;
                }
                point
            })
            .collect())
    }
}

/// Fit on `batch` and project the same batch to 3D.
pub fn reduce_to_3d(batch: &[Vec<f32>]) -> Result<Vec<ReducedPoint>, ProjectionError> {
    Pca::fit(batch, PLOT_COMPONENTS)?.predict(batch)
}

/// Outcome of [`Projector::refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionUpdate {
    /// A fetch is in flight; nothing changed.
    Deferred,
    /// The batch is empty; the projection was cleared.
    Cleared,
    /// Recomputed, with this many points.
    Updated(usize),
    /// Recompute failed; the previous projection is still shown.
    Failed,
}

/// The currently displayed projection.
#[derive(Debug, Clone, Default)]
pub struct Projector {
    points: Vec<ReducedPoint>,
    revision: u64,
}

impl Projector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[ReducedPoint] {
        &self.points
    }

    /// Bumped on every update or clear.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn refresh(&mut self, batch: &[Vec<f32>], settled: bool) -> ProjectionUpdate {
        if !settled {
            return ProjectionUpdate::Deferred;
        }
        if batch.is_empty() {
            self.points.clear();
            self.revision += 1;
            debug!("no vectors available, projection cleared");
            return ProjectionUpdate::Cleared;
        }

        debug!(vectors = batch.len(), "applying PCA");
        match reduce_to_3d(batch) {
            Ok(points) => {
                let count = points.len();
                self.points = points;
                self.revision += 1;
                debug!(points = count, "PCA completed");
                ProjectionUpdate::Updated(count)
            }
            Err(err) => {
                error!("PCA failed, keeping previous projection: {err}");
                ProjectionUpdate::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-6, "{a} != {b}");
    }

    fn cross() -> Vec<Vec<f32>> {
        vec![
            vec![1.0, 0.0, 0.0, 0.0],
            vec![-1.0, 0.0, 0.0, 0.0],
            vec![0.0, 2.0, 0.0, 0.0],
            vec![0.0, -2.0, 0.0, 0.0],
        ]
    }

    #[test]
    fn test_components_ordered_by_variance() {
        let pca = Pca::fit(&cross(), 3).unwrap();
        let variance = pca.explained_variance();
        assert_close(variance[0], 8.0 / 3.0);
        assert_close(variance[1], 2.0 / 3.0);
        assert_close(variance[2], 0.0);

        let first = pca.component(0).unwrap();
        assert_close(first[1], 1.0);
        let second = pca.component(1).unwrap();
        assert_close(second[0], 1.0);
        assert!(pca.component(2).unwrap().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_reduce_to_3d_projects_each_vector() {
        let points = reduce_to_3d(&cross()).unwrap();
        assert_eq!(points.len(), 4);
        assert_close(points[0][0], 0.0);
        assert_close(points[0][1], 1.0);
        assert_close(points[2][0], 2.0);
        assert_close(points[3][0], -2.0);
        assert!(points.iter().all(|p| p[2].abs() < 1e-6));
    }

    #[test]
    fn test_more_rows_than_dimensions() {
        // Points on the line y = 2x, plus small noise in z.
        let batch: Vec<Vec<f32>> = (0..20)
            .map(|i| {
                let x = i as f32 - 10.0;
                let z = if i % 2 == 0 { 0.01 } else { -0.01 };
                vec![x, 2.0 * x, z]
            })
            .collect();
        let pca = Pca::fit(&batch, 3).unwrap();
        let first = pca.component(0).unwrap();
        let norm = 5.0_f64.sqrt();
        assert_close(first[0], 1.0 / norm);
        assert_close(first[1], 2.0 / norm);
        assert!(pca.explained_variance()[0] > pca.explained_variance()[1]);
        assert!(pca.explained_variance()[1] >= pca.explained_variance()[2]);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let batch: Vec<Vec<f32>> = (0..12)
            .map(|i| (0..6).map(|j| ((i * 7 + j * 3) % 11) as f32 / 5.0).collect())
            .collect();
        assert_eq!(reduce_to_3d(&batch).unwrap(), reduce_to_3d(&batch).unwrap());
    }

    #[test]
    fn test_predict_pads_missing_components() {
        let pca = Pca::fit(&cross(), 1).unwrap();
        let points = pca.predict(&[vec![0.0, 3.0, 0.0, 0.0]]).unwrap();
        assert_close(points[0][0], 3.0);
        assert_eq!(points[0][1], 0.0);
        assert_eq!(points[0][2], 0.0);
        assert!(pca.predict(&[vec![1.0]]).is_err());
    }

    #[test]
    fn test_single_vector_projects_to_origin() {
        let points = reduce_to_3d(&[vec![0.3, 0.4, 0.5]]).unwrap();
        assert_eq!(points, vec![[0.0, 0.0, 0.0]]);
    }

    #[test]
    fn test_invalid_batches() {
        assert_eq!(reduce_to_3d(&[]).unwrap_err(), ProjectionError::Empty);
        assert_eq!(
            reduce_to_3d(&[vec![]]).unwrap_err(),
            ProjectionError::ZeroDimensions
        );
        assert_eq!(
            reduce_to_3d(&[vec![1.0, 2.0], vec![1.0]]).unwrap_err(),
            ProjectionError::DimensionMismatch {
                index: 1,
                expected: 2,
                found: 1
            }
        );
        assert_eq!(
            reduce_to_3d(&[vec![1.0], vec![f32::NAN]]).unwrap_err(),
            ProjectionError::NonFinite { index: 1 }
        );
    }

    #[test]
    fn test_projector_waits_while_in_flight() {
        let mut projector = Projector::new();
        assert_eq!(projector.refresh(&cross(), false), ProjectionUpdate::Deferred);
        assert!(projector.points().is_empty());
        assert_eq!(projector.revision(), 0);
    }

    #[test]
    fn test_projector_updates_then_clears() {
        let mut projector = Projector::new();
        assert_eq!(projector.refresh(&cross(), true), ProjectionUpdate::Updated(4));
        assert_eq!(projector.points().len(), 4);
        assert_eq!(projector.refresh(&[], true), ProjectionUpdate::Cleared);
        assert!(projector.points().is_empty());
        assert_eq!(projector.revision(), 2);
    }

    #[test]
    fn test_projector_keeps_previous_points_on_failure() {
        let mut projector = Projector::new();
        projector.refresh(&cross(), true);
        let before = projector.points().to_vec();

        let broken = vec![vec![1.0, 2.0], vec![3.0]];
        assert_eq!(projector.refresh(&broken, true), ProjectionUpdate::Failed);
        assert_eq!(projector.points(), before.as_slice());
        assert_eq!(projector.revision(), 1);
    }
}
