// Tabular report artifacts for a fitted decomposition: eigenvalues,
// explained-variance ratios and the metric-to-component loading table,
// written as JSON into the analysis output folder.

use crate::pca::Pca;
use crate::Result;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct LabeledSeries<'a> {
    labels: &'a [String],
    values: Vec<f64>,
}

#[derive(Debug, Serialize)]
struct LoadingRow<'a> {
    component: &'a str,
    loadings: Vec<Loading<'a>>,
}

#[derive(Debug, Serialize)]
struct Loading<'a> {
    metric: &'a str,
    weight: f64,
}

/// writes eigenvalues.json, explained_variance.json and loadings.json,
/// labeling components PC1..PCn and matching loading columns to the metric
/// list positionally
pub fn write_pca_report(output_dir: impl AsRef<Path>, metrics: &[String], pca: &Pca) -> Result<Vec<PathBuf>> {
    let output_dir = output_dir.as_ref();
    std::fs::create_dir_all(output_dir)?;

    let component_labels = (1..=pca.explained_variance().len())
        .map(|i| format!("PC{}", i))
        .collect::<Vec<_>>();

    let mut written = Vec::new();
    written.push(write_json(
        output_dir.join("eigenvalues.json"),
        &LabeledSeries {
            labels: &component_labels,
            values: pca.explained_variance().to_vec(),
        },
    )?);
    written.push(write_json(
        output_dir.join("explained_variance.json"),
        &LabeledSeries {
            labels: &component_labels,
            values: pca.explained_variance_ratio().to_vec(),
        },
    )?);

    let rows = component_labels
        .iter()
        .enumerate()
        .map(|(k, label)| LoadingRow {
            component: label,
            loadings: metrics
                .iter()
                .enumerate()
                .map(|(j, metric)| Loading {
                    metric,
                    weight: pca.components()[[k, j]],
                })
                .collect(),
        })
        .collect::<Vec<_>>();
    written.push(write_json(output_dir.join("loadings.json"), &rows)?);

    Ok(written)
}

fn write_json(path: PathBuf, value: &impl Serialize) -> Result<PathBuf> {
    let mut w = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(&mut w, value)?;
    w.write_all(b"\n")?;
    w.flush()?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pca::{Pca, StandardScaler};
    use ndarray::array;

    #[test]
    fn report_files_are_written_and_labeled() {
        let x = array![[1.0, 2.0], [2.0, 4.0], [3.0, 5.0], [4.0, 9.0]];
        let z = StandardScaler::fit_transform(&x);
        let pca = Pca::fit(&z, 2).unwrap();

        let dir = std::env::temp_dir().join(format!("connectome_pca_report_{}", std::process::id()));
        let metrics = vec!["fa".to_string(), "md".to_string()];
        let written = write_pca_report(&dir, &metrics, &pca).unwrap();
        assert_eq!(written.len(), 3);

        let eig: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("eigenvalues.json")).unwrap()).unwrap();
        assert_eq!(eig["labels"][0], "PC1");
        assert_eq!(eig["values"].as_array().unwrap().len(), 2);

        let loadings: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("loadings.json")).unwrap()).unwrap();
        assert_eq!(loadings[0]["component"], "PC1");
        assert_eq!(loadings[0]["loadings"][1]["metric"], "md");

        std::fs::remove_dir_all(dir).unwrap();
    }
}
