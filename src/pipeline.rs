// End-to-end PCA pipeline over a population of connectivity matrices:
// load -> (optional) common-connection masking -> feature table -> scaling
// -> decomposition -> per-component matrices written back into the subject
// tree, reports written to the analysis output folder.

use crate::connectivity::{restore_zeros, unpack_components, MetricMatrixSet};
use crate::matrix_store::{read_subject_ids, MatrixStore};
use crate::pca::{complete_rows, nan_to_num, Pca, StandardScaler};
use crate::report::write_pca_report;
use crate::{MetricsError, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;

/// analysis parameters that can be kept in a TOML file instead of being
/// passed on the command line every run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaConfig {
    /// metrics to include, in loading order
    pub metrics: Vec<String>,
    /// restrict the analysis to connections present in every subject
    pub common: bool,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            metrics: ["ad", "fa", "md", "rd", "afd_fixel", "afd_total", "nufo"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            common: true,
        }
    }
}

impl PcaConfig {
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&s).map_err(|e| MetricsError::Config(e.to_string()))
    }
}

#[derive(Debug, Parser)]
/// Compute a PCA over diffusion metrics stored as per-subject connectivity
/// matrices. Significant principal components (eigenvalue >= 1) are written
/// back next to the source metrics as PC<k>.npy; eigenvalue, variance and
/// loading tables go to the output folder.
pub struct ComputePcaArgs {
    /// root folder holding <subject>/Compute_Connectivity/<metric> matrices
    pub in_folder: PathBuf,
    /// folder receiving the eigenvalue / variance / loading tables
    pub output: PathBuf,
    /// metrics to include in the analysis, in order
    #[clap(long, num_args = 1..)]
    pub metrics: Vec<String>,
    /// text file listing all subject ids
    #[clap(long)]
    pub ids: PathBuf,
    /// include only connections found in all subjects of the population
    #[clap(long, action = clap::ArgAction::Set)]
    pub common: Option<bool>,
    /// optional TOML parameter file (see the pca-params tool)
    #[clap(long)]
    pub config: Option<PathBuf>,
}

pub fn compute_pca(args: &ComputePcaArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => PcaConfig::from_toml_file(path)?,
        None => PcaConfig::default(),
    };
    let metrics = if args.metrics.is_empty() {
        config.metrics.clone()
    } else {
        args.metrics.clone()
    };
    let common = args.common.unwrap_or(config.common);

    if metrics.len() < 2 {
        return Err(MetricsError::Config(format!(
            "PCA needs at least two metrics, got {:?}",
            metrics
        )));
    }

    let subjects = read_subject_ids(&args.ids)?;
    let store = MatrixStore::new(&args.in_folder);

    println!("loading {} matrices ...", subjects.len() * metrics.len());
    let now = Instant::now();
    let set = MetricMatrixSet::load(&subjects, &metrics, &store)?;
    println!("matrices loaded in {:.03} secs", now.elapsed().as_secs_f32());

    let set = if common {
        // the first two requested metrics serve as references for the
        // mask-cardinality consistency check
        let mask = set.common_mask_checked(0, 1)?;
        println!(
            "data shows {} common connections across the population",
            mask.retained()
        );
        set.apply_mask(&mask)?
    } else {
        set
    };

    println!("creating PCA input structure ...");
    let table = set.to_feature_table();

    println!("standardizing data ...");
    let scaled = StandardScaler::fit_transform(&table.nan_marked);
    let fit_rows = complete_rows(&scaled);
    let full = nan_to_num(&scaled);

    println!("performing PCA on {} complete rows ...", fit_rows.nrows());
    let pca = Pca::fit(&fit_rows, metrics.len())?;
    println!("eigenvalues: {:?}", pca.explained_variance().to_vec());

    write_pca_report(&args.output, &metrics, &pca)?;

    let scores = pca.transform(&full)?;
    let scores = restore_zeros(&table.zero_filled, &scores)?;
    let per_component = unpack_components(&scores, set.n_subjects(), set.matrix_shape())?;

    let n_significant = pca.n_significant();
    println!("saving matrices for {} PC with eigenvalues >= 1 ...", n_significant);
    for (k, per_subject) in per_component.iter().take(n_significant).enumerate() {
        for (subject, matrix) in subjects.iter().zip(per_subject) {
            store.save(subject, &format!("PC{}", k + 1), matrix)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npy::read_npy;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::path::Path;

    const SUBJECTS: [&str; 3] = ["sub-01", "sub-02", "sub-03"];

    // synthetic 4x4 connectivity matrices sharing a fixed off-pattern so the
    // common-connection masks of both metrics agree
    fn seed_store(root: &Path) {
        let mut rng = StdRng::seed_from_u64(42);
        let store = MatrixStore::new(root);
        for subject in SUBJECTS {
            let fa = Array2::from_shape_fn((4, 4), |(r, c)| {
                if (r + c) % 3 == 0 { 0.0 } else { rng.random_range(0.2..0.9) }
            });
            // md strongly correlated with fa, same zero pattern
            let md = fa.map(|&v| if v == 0.0 { 0.0 } else { 2.0 * v + 0.01 });
            store.save(subject, "fa", &fa).unwrap();
            store.save(subject, "md", &md).unwrap();
        }
        std::fs::write(root.join("ids.txt"), SUBJECTS.join("\n")).unwrap();
    }

    fn temp_root(name: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "connectome_pca_pipeline_{}_{}",
            std::process::id(),
            name
        ));
        std::fs::create_dir_all(&p).unwrap();
        p
    }

    #[test]
    fn end_to_end_writes_components_and_reports() {
        let root = temp_root("e2e");
        seed_store(&root);
        let output = root.join("analysis");

        let args = ComputePcaArgs {
            in_folder: root.clone(),
            output: output.clone(),
            metrics: vec!["fa".to_string(), "md".to_string()],
            ids: root.join("ids.txt"),
            common: Some(true),
            config: None,
        };
        compute_pca(&args).unwrap();

        assert!(output.join("eigenvalues.json").is_file());
        assert!(output.join("explained_variance.json").is_file());
        assert!(output.join("loadings.json").is_file());

        // two perfectly correlated metrics leave a single significant
        // component, written for every subject
        for subject in SUBJECTS {
            let pc1 = read_npy(
                root.join(subject).join("Compute_Connectivity").join("PC1.npy"),
            )
            .unwrap();
            assert_eq!(pc1.dim(), (4, 4));
            // zero cells of the source data stay zero in the component output
            let fa = MatrixStore::new(&root).load(subject, "fa").unwrap();
            for (o, p) in fa.iter().zip(pc1.iter()) {
                if *o == 0.0 {
                    assert_eq!(*p, 0.0);
                }
            }
            assert!(!root
                .join(subject)
                .join("Compute_Connectivity")
                .join("PC2.npy")
                .is_file());
        }
        std::fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn config_file_supplies_metrics() {
        let root = temp_root("config");
        seed_store(&root);
        let config_path = root.join("pca.toml");
        let config = PcaConfig { metrics: vec!["fa".to_string(), "md".to_string()], common: false };
        std::fs::write(&config_path, toml::to_string(&config).unwrap()).unwrap();

        let args = ComputePcaArgs {
            in_folder: root.clone(),
            output: root.join("analysis"),
            metrics: vec![],
            ids: root.join("ids.txt"),
            common: None,
            config: Some(config_path),
        };
        compute_pca(&args).unwrap();
        assert!(root.join("analysis").join("loadings.json").is_file());
        std::fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn too_few_metrics_is_a_config_error() {
        let root = temp_root("few_metrics");
        seed_store(&root);
        let args = ComputePcaArgs {
            in_folder: root.clone(),
            output: root.join("analysis"),
            metrics: vec!["fa".to_string()],
            ids: root.join("ids.txt"),
            common: Some(false),
            config: None,
        };
        assert!(matches!(compute_pca(&args), Err(MetricsError::Config(_))));
        std::fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn missing_subject_matrix_aborts_before_any_output() {
        let root = temp_root("missing");
        seed_store(&root);
        // one subject lacks the md matrix
        std::fs::remove_file(
            root.join("sub-02").join("Compute_Connectivity").join("md.npy"),
        )
        .unwrap();

        let args = ComputePcaArgs {
            in_folder: root.clone(),
            output: root.join("analysis"),
            metrics: vec!["fa".to_string(), "md".to_string()],
            ids: root.join("ids.txt"),
            common: Some(true),
            config: None,
        };
        assert!(matches!(
            compute_pca(&args),
            Err(MetricsError::MissingMatrix { .. })
        ));
        assert!(!root.join("analysis").exists());
        std::fs::remove_dir_all(root).unwrap();
    }
}
