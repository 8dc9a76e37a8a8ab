// Standardization and principal component decomposition over the flat
// feature table. The eigenproblem is solved on the (n_metrics x n_metrics)
// covariance matrix, which stays tiny regardless of population size.

use crate::{MetricsError, Result};
use ndarray::{Array1, Array2, Axis};
use ndarray_linalg::{Eigh, UPLO};

/// eigenvalue threshold above which a component is retained as significant
pub const EIGENVALUE_THRESHOLD: f64 = 1.0;

/// Per-column standardizer that ignores NaN-marked cells while fitting and
/// preserves them while transforming.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    mean: Array1<f64>,
    std: Array1<f64>,
}

impl StandardScaler {
    /// computes per-column mean and standard deviation over non-NaN cells.
    /// Columns with no finite cells or vanishing spread get a unit scale so
    /// the transform stays finite.
    pub fn fit(x: &Array2<f64>) -> Self {
        let n_cols = x.ncols();
        let mut mean = Array1::<f64>::zeros(n_cols);
        let mut std = Array1::<f64>::ones(n_cols);

        for (j, col) in x.axis_iter(Axis(1)).enumerate() {
            let mut count = 0usize;
            let mut sum = 0.0;
            for &v in col.iter().filter(|v| !v.is_nan()) {
                count += 1;
                sum += v;
            }
            if count == 0 {
                continue;
            }
            let m = sum / count as f64;
            let ss = col
                .iter()
                .filter(|v| !v.is_nan())
                .map(|&v| (v - m).powi(2))
                .sum::<f64>();
            let s = (ss / count as f64).sqrt();
            mean[j] = m;
            std[j] = if s < 1e-9 { 1.0 } else { s };
        }

        Self { mean, std }
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.clone();
        for (j, mut col) in out.axis_iter_mut(Axis(1)).enumerate() {
            let (m, s) = (self.mean[j], self.std[j]);
            col.mapv_inplace(|v| (v - m) / s);
        }
        out
    }

    pub fn fit_transform(x: &Array2<f64>) -> Array2<f64> {
        Self::fit(x).transform(x)
    }
}

/// keeps only the rows of `x` with no NaN in any column
pub fn complete_rows(x: &Array2<f64>) -> Array2<f64> {
    let keep = x
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().all(|v| !v.is_nan()))
        .map(|(i, _)| i)
        .collect::<Vec<_>>();
    x.select(Axis(0), &keep)
}

/// replaces NaN cells with 0
pub fn nan_to_num(x: &Array2<f64>) -> Array2<f64> {
    x.map(|&v| if v.is_nan() { 0.0 } else { v })
}

/// Principal component decomposition fitted on a 2-D feature table.
/// Components are rows of the loading matrix, sorted by descending
/// eigenvalue.
#[derive(Debug, Clone)]
pub struct Pca {
    mean: Array1<f64>,
    components: Array2<f64>,
    explained_variance: Array1<f64>,
    explained_variance_ratio: Array1<f64>,
}

impl Pca {
    /// fits the decomposition with `n_components` retained directions.
    /// `x` must hold at least two rows and no NaN cells.
    pub fn fit(x: &Array2<f64>, n_components: usize) -> Result<Self> {
        let (n_rows, n_features) = x.dim();
        if n_rows < 2 {
            return Err(MetricsError::Decomposition(format!(
                "need at least 2 complete observations to fit, got {}",
                n_rows
            )));
        }
        if n_components == 0 || n_components > n_features {
            return Err(MetricsError::Decomposition(format!(
                "requested {} components from {} features",
                n_components, n_features
            )));
        }

        let mean = x.mean_axis(Axis(0)).expect("n_rows > 0");
        let centered = x - &mean;
        let cov = centered.t().dot(&centered) / (n_rows - 1) as f64;

        // symmetric eigenproblem, same route the tensor eigenvalue solve takes
        let (eigvals, eigvecs) = cov
            .eigh(UPLO::Lower)
            .map_err(|e| MetricsError::Decomposition(e.to_string()))?;

        // eigh returns ascending eigenvalues; reorder to descending
        let order = {
            let mut idx = (0..n_features).collect::<Vec<_>>();
            idx.sort_by(|&a, &b| eigvals[b].partial_cmp(&eigvals[a]).expect("finite eigenvalues"));
            idx
        };

        let total_variance = eigvals.sum().max(f64::MIN_POSITIVE);
        let mut components = Array2::<f64>::zeros((n_components, n_features));
        let mut explained_variance = Array1::<f64>::zeros(n_components);
        for (k, &i) in order.iter().take(n_components).enumerate() {
            components.row_mut(k).assign(&eigvecs.column(i));
            explained_variance[k] = eigvals[i];
        }
        let explained_variance_ratio = explained_variance.map(|&v| v / total_variance);

        Ok(Self { mean, components, explained_variance, explained_variance_ratio })
    }

    /// projects a table into the component space using the fitted mean
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.mean.len() {
            return Err(MetricsError::Decomposition(format!(
                "transform input has {} features, model was fit with {}",
                x.ncols(),
                self.mean.len()
            )));
        }
        let centered = x - &self.mean;
        Ok(centered.dot(&self.components.t()))
    }

    /// component eigenvalues, descending
    pub fn explained_variance(&self) -> &Array1<f64> {
        &self.explained_variance
    }

    pub fn explained_variance_ratio(&self) -> &Array1<f64> {
        &self.explained_variance_ratio
    }

    /// loading matrix, one row per component
    pub fn components(&self) -> &Array2<f64> {
        &self.components
    }

    /// number of leading components whose eigenvalue clears the significance
    /// threshold
    pub fn n_significant(&self) -> usize {
        self.explained_variance
            .iter()
            .take_while(|&&v| v >= EIGENVALUE_THRESHOLD)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn scaler_ignores_nan_cells() {
        let x = array![[1.0, f64::NAN], [2.0, 10.0], [3.0, 20.0], [4.0, 30.0]];
        let scaler = StandardScaler::fit(&x);
        let z = scaler.transform(&x);

        // column 0: mean 2.5, population std sqrt(1.25)
        let col0 = z.column(0);
        assert!((col0.sum()).abs() < 1e-12);
        assert!((col0[3] - 1.5 / 1.25f64.sqrt()).abs() < 1e-12);

        // column 1 statistics come from the three finite cells only
        assert!(z[[0, 1]].is_nan());
        let finite_mean = (z[[1, 1]] + z[[2, 1]] + z[[3, 1]]) / 3.0;
        assert!(finite_mean.abs() < 1e-12);
    }

    #[test]
    fn constant_column_keeps_unit_scale() {
        let x = array![[5.0, 1.0], [5.0, 2.0], [5.0, 3.0]];
        let z = StandardScaler::fit_transform(&x);
        assert_eq!(z.column(0).to_vec(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn complete_rows_drops_nan_rows() {
        let x = array![[1.0, 2.0], [f64::NAN, 3.0], [4.0, 5.0]];
        let c = complete_rows(&x);
        assert_eq!(c, array![[1.0, 2.0], [4.0, 5.0]]);
        let filled = nan_to_num(&x);
        assert_eq!(filled[[1, 0]], 0.0);
    }

    #[test]
    fn perfectly_correlated_features_collapse_to_one_component() {
        let x = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0], [4.0, 8.0]];
        let z = StandardScaler::fit_transform(&x);
        let pca = Pca::fit(&z, 2).unwrap();

        // standardized correlated columns: first eigenvalue n/(n-1)*2, second 0
        let ev = pca.explained_variance();
        assert!((ev[0] - 8.0 / 3.0).abs() < 1e-9);
        assert!(ev[1].abs() < 1e-9);
        assert!((pca.explained_variance_ratio()[0] - 1.0).abs() < 1e-9);

        let scores = pca.transform(&z).unwrap();
        for &s in scores.column(1).iter() {
            assert!(s.abs() < 1e-9);
        }
        assert_eq!(pca.n_significant(), 1);
    }

    #[test]
    fn rejects_degenerate_inputs() {
        let x = array![[1.0, 2.0]];
        assert!(Pca::fit(&x, 1).is_err());
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        assert!(Pca::fit(&x, 3).is_err());
    }
}
