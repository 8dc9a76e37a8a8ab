// On-disk store for named connectivity matrices following the
// <root>/<subject>/Compute_Connectivity/<metric>.<ext> layout produced by the
// upstream connectivity pipeline. Matrices are stored either as .npy arrays
// or as nested-array .json documents.

use crate::{npy, MetricsError, Result};
use ndarray::Array2;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// subfolder holding the per-subject metric matrices
pub const CONNECTIVITY_SUBDIR: &str = "Compute_Connectivity";

#[derive(Debug, Clone)]
pub struct MatrixStore {
    root: PathBuf,
}

impl MatrixStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn subject_dir(&self, subject: &str) -> PathBuf {
        self.root.join(subject).join(CONNECTIVITY_SUBDIR)
    }

    /// resolves the stored file for a (subject, metric) pair, trying the two
    /// supported extensions then falling back to a glob over `<metric>.*`
    fn resolve(&self, subject: &str, metric: &str) -> Option<PathBuf> {
        let dir = self.subject_dir(subject);
        for ext in ["npy", "json"] {
            let candidate = dir.join(format!("{}.{}", metric, ext));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        let pattern = dir.join(format!("{}.*", metric));
        glob::glob(&pattern.display().to_string())
            .ok()?
            .filter_map(|p| p.ok())
            .find(|p| p.is_file())
    }

    /// loads a single matrix for a (subject, metric) pair in any supported format
    pub fn load(&self, subject: &str, metric: &str) -> Result<Array2<f64>> {
        let path = self.resolve(subject, metric).ok_or_else(|| MetricsError::MissingMatrix {
            subject: subject.to_string(),
            metric: metric.to_string(),
            root: self.root.clone(),
        })?;
        load_matrix_in_any_format(&path)
    }

    /// saves a derived matrix next to the source metrics of a subject, as .npy
    pub fn save(&self, subject: &str, name: &str, matrix: &Array2<f64>) -> Result<PathBuf> {
        let dir = self.subject_dir(subject);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.npy", name));
        npy::write_npy(&path, matrix)?;
        Ok(path)
    }
}

/// loads a matrix from .npy or .json based on the file extension
pub fn load_matrix_in_any_format(path: impl AsRef<Path>) -> Result<Array2<f64>> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some("npy") => npy::read_npy(path),
        Some("json") => read_json_matrix(path),
        other => Err(MetricsError::MatrixFormat {
            path: path.to_path_buf(),
            reason: format!("unsupported extension {:?}, expected .npy or .json", other),
        }),
    }
}

fn read_json_matrix(path: &Path) -> Result<Array2<f64>> {
    let mut s = String::new();
    File::open(path)?.read_to_string(&mut s)?;
    let rows: Vec<Vec<f64>> = serde_json::from_str(&s)?;
    let n_rows = rows.len();
    let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);
    if rows.iter().any(|r| r.len() != n_cols) {
        return Err(MetricsError::MatrixFormat {
            path: path.to_path_buf(),
            reason: "ragged rows, expected a rectangular nested array".to_string(),
        });
    }
    let flat = rows.into_iter().flatten().collect::<Vec<f64>>();
    Array2::from_shape_vec((n_rows, n_cols), flat).map_err(|e| MetricsError::MatrixFormat {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// reads a whitespace-separated subject id list from a text file
pub fn read_subject_ids(txt_file: impl AsRef<Path>) -> Result<Vec<String>> {
    let mut s = String::new();
    File::open(txt_file.as_ref())?.read_to_string(&mut s)?;
    let ids = s.split_ascii_whitespace().map(|t| t.to_string()).collect::<Vec<_>>();
    if ids.is_empty() {
        return Err(MetricsError::Config(format!(
            "subject id file {} is empty",
            txt_file.as_ref().display()
        )));
    }
    Ok(ids)
}
