// Connectivity matrix aggregation: loading per-subject metric matrices,
// restricting them to connections common to the whole population, and
// reshaping them to and from the flat feature table consumed by the
// decomposition step.
//
// Every transform here returns a fresh value. The pipeline is
// load -> mask -> flatten -> [decomposition] -> unpack -> restore zeros,
// and a failure at any stage aborts the whole run.

use crate::matrix_store::MatrixStore;
use crate::{MetricsError, Result};
use ndarray::{Array2, Zip};
use rayon::prelude::*;

/// 0/1 matrix marking connections that are non-zero in every subject
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryMask {
    cells: Array2<f64>,
}

impl BinaryMask {
    /// builds a mask from the non-zero cells of a single matrix
    pub fn from_nonzero(matrix: &Array2<f64>) -> Self {
        Self { cells: matrix.map(|&v| if v != 0.0 { 1.0 } else { 0.0 }) }
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.cells
    }

    pub fn shape(&self) -> (usize, usize) {
        self.cells.dim()
    }

    /// number of retained (non-zero) cells
    pub fn retained(&self) -> usize {
        self.cells.iter().filter(|&&v| v != 0.0).count()
    }
}

/// Per-metric, per-subject connectivity matrices. The metric order follows the
/// order the metrics were requested in, and the subject order is shared across
/// all metrics. Every matrix has the same shape.
#[derive(Debug, Clone)]
pub struct MetricMatrixSet {
    metrics: Vec<String>,
    subjects: Vec<String>,
    // matrices[metric_index][subject_index]
    matrices: Vec<Vec<Array2<f64>>>,
    shape: (usize, usize),
}

impl MetricMatrixSet {
    /// loads one matrix per (subject, metric) pair from the store, failing if
    /// any matrix is absent or if shapes disagree anywhere in the set
    pub fn load(subjects: &[String], metrics: &[String], store: &MatrixStore) -> Result<Self> {
        if subjects.is_empty() {
            return Err(MetricsError::Config("subject list must not be empty".to_string()));
        }
        if metrics.is_empty() {
            return Err(MetricsError::Config("metric list must not be empty".to_string()));
        }

        let matrices = metrics
            .iter()
            .map(|metric| {
                subjects
                    .par_iter()
                    .map(|subject| store.load(subject, metric))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        let shape = matrices[0][0].dim();
        for (metric, per_subject) in metrics.iter().zip(&matrices) {
            for (subject, m) in subjects.iter().zip(per_subject) {
                if m.dim() != shape {
                    return Err(MetricsError::ShapeMismatch {
                        expected: shape,
                        found: m.dim(),
                        context: format!("matrix for subject '{}', metric '{}'", subject, metric),
                    });
                }
            }
        }

        Ok(Self {
            metrics: metrics.to_vec(),
            subjects: subjects.to_vec(),
            matrices,
            shape,
        })
    }

    /// builds a set directly from in-memory matrices, validating shapes
    pub fn from_matrices(
        metrics: Vec<String>,
        subjects: Vec<String>,
        matrices: Vec<Vec<Array2<f64>>>,
    ) -> Result<Self> {
        if metrics.is_empty() || subjects.is_empty() {
            return Err(MetricsError::Config(
                "metric and subject lists must not be empty".to_string(),
            ));
        }
        if metrics.len() != matrices.len()
            || matrices.iter().any(|m| m.len() != subjects.len())
        {
            return Err(MetricsError::Config(
                "expected one matrix per (subject, metric) pair".to_string(),
            ));
        }
        let shape = matrices[0][0].dim();
        for (metric, per_subject) in metrics.iter().zip(&matrices) {
            for (subject, m) in subjects.iter().zip(per_subject) {
                if m.dim() != shape {
                    return Err(MetricsError::ShapeMismatch {
                        expected: shape,
                        found: m.dim(),
                        context: format!("matrix for subject '{}', metric '{}'", subject, metric),
                    });
                }
            }
        }
        Ok(Self { metrics, subjects, matrices, shape })
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    pub fn n_subjects(&self) -> usize {
        self.subjects.len()
    }

    pub fn matrix_shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn matrix(&self, metric_index: usize, subject_index: usize) -> &Array2<f64> {
        &self.matrices[metric_index][subject_index]
    }

    /// binarizes every subject matrix of one metric and keeps only the cells
    /// that are non-zero for every subject in the population
    pub fn extract_common_mask(&self, metric_index: usize) -> BinaryMask {
        let n_subjects = self.n_subjects() as f64;
        let mut sum = Array2::<f64>::zeros(self.shape);
        for m in &self.matrices[metric_index] {
            Zip::from(&mut sum).and(m).for_each(|acc, &v| {
                if v != 0.0 {
                    *acc += 1.0;
                }
            });
        }
        BinaryMask {
            cells: sum.map(|&v| if v == n_subjects { 1.0 } else { 0.0 }),
        }
    }

    /// extracts common-connection masks from two reference metrics and checks
    /// that they retain the same number of cells. Only the cardinality is
    /// compared, not the masks themselves, so this is a cheap self-consistency
    /// test rather than a structural equality guarantee. The mask of the first
    /// reference metric is the one returned and applied downstream.
    pub fn common_mask_checked(&self, metric_a: usize, metric_b: usize) -> Result<BinaryMask> {
        let mask_a = self.extract_common_mask(metric_a);
        let mask_b = self.extract_common_mask(metric_b);
        let (count_a, count_b) = (mask_a.retained(), mask_b.retained());
        if count_a != count_b {
            return Err(MetricsError::InconsistentMask {
                metric_a: self.metrics[metric_a].clone(),
                count_a,
                metric_b: self.metrics[metric_b].clone(),
                count_b,
            });
        }
        Ok(mask_a)
    }

    /// elementwise-multiplies every matrix in the set by the mask, returning a
    /// new set and leaving this one untouched
    pub fn apply_mask(&self, mask: &BinaryMask) -> Result<MetricMatrixSet> {
        if mask.shape() != self.shape {
            return Err(MetricsError::ShapeMismatch {
                expected: self.shape,
                found: mask.shape(),
                context: "binary mask applied to metric matrix set".to_string(),
            });
        }
        let matrices = self
            .matrices
            .iter()
            .map(|per_subject| per_subject.iter().map(|m| m * mask.as_array()).collect())
            .collect();
        Ok(MetricMatrixSet {
            metrics: self.metrics.clone(),
            subjects: self.subjects.clone(),
            matrices,
            shape: self.shape,
        })
    }

    /// flattens the set into the feature table fed to the decomposition step:
    /// one column per metric, one row per (subject, cell) pair with row index
    /// s*R*C + r*C + c
    pub fn to_feature_table(&self) -> FeatureTable {
        let (rows, cols) = self.shape;
        let n_rows = rows * cols * self.n_subjects();
        let n_metrics = self.metrics.len();

        let mut zero_filled = Array2::<f64>::zeros((n_rows, n_metrics));
        for (j, per_subject) in self.matrices.iter().enumerate() {
            let mut column = zero_filled.column_mut(j);
            let mut i = 0;
            for m in per_subject {
                for &v in m.iter() {
                    column[i] = v;
                    i += 1;
                }
            }
        }

        // cells that were exactly 0 carry no connection and are excluded from
        // statistical fitting; the zero-filled variant is kept in parallel for
        // the inverse transform
        let nan_marked = zero_filled.map(|&v| if v == 0.0 { f64::NAN } else { v });

        FeatureTable {
            metrics: self.metrics.clone(),
            matrix_shape: self.shape,
            n_subjects: self.n_subjects(),
            zero_filled,
            nan_marked,
        }
    }
}

/// Flat (R*C*S, M) view of a metric matrix set, in two parallel variants:
/// zero cells marked as NaN for fitting and kept as 0 for the inverse
/// transform (the NaN variant cannot be round-tripped).
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub metrics: Vec<String>,
    pub matrix_shape: (usize, usize),
    pub n_subjects: usize,
    pub zero_filled: Array2<f64>,
    pub nan_marked: Array2<f64>,
}

impl FeatureTable {
    pub fn n_rows(&self) -> usize {
        self.zero_filled.nrows()
    }

    pub fn n_metrics(&self) -> usize {
        self.metrics.len()
    }
}

/// re-zeroes cells of `transformed` wherever `original` holds a zero, so that
/// decomposition noise never populates cells that carry no connection
pub fn restore_zeros(original: &Array2<f64>, transformed: &Array2<f64>) -> Result<Array2<f64>> {
    if original.dim() != transformed.dim() {
        return Err(MetricsError::ShapeMismatch {
            expected: original.dim(),
            found: transformed.dim(),
            context: "restore_zeros inputs".to_string(),
        });
    }
    let mask = BinaryMask::from_nonzero(original);
    Ok(transformed * mask.as_array())
}

/// reshapes per-row component scores back into per-(component, subject)
/// matrices, inverting the `to_feature_table` flattening exactly
pub fn unpack_components(
    scores: &Array2<f64>,
    n_subjects: usize,
    matrix_shape: (usize, usize),
) -> Result<Vec<Vec<Array2<f64>>>> {
    let (rows, cols) = matrix_shape;
    let cell_count = rows * cols;
    let expected_rows = cell_count * n_subjects;
    if scores.nrows() != expected_rows {
        return Err(MetricsError::ShapeMismatch {
            expected: (expected_rows, scores.ncols()),
            found: scores.dim(),
            context: "component score table".to_string(),
        });
    }

    let per_component = (0..scores.ncols())
        .map(|k| {
            let column = scores.column(k);
            (0..n_subjects)
                .map(|s| {
                    let block = column.slice(ndarray::s![s * cell_count..(s + 1) * cell_count]);
                    Array2::from_shape_vec(matrix_shape, block.to_vec())
                        .expect("block length matches matrix shape")
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    Ok(per_component)
}
