// Gradient sampling table manipulation: flip (x -> -x) or swap (x <-> y)
// axes of a diffusion gradient scheme, in either FSL (.bvec, 3 rows of N
// values) or MRtrix (.b, N rows of "x y z b") layout.

use crate::{MetricsError, Result};
use clap::Parser;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradientLayout {
    Fsl,
    Mrtrix,
}

/// a parsed final-axis-order token such as "x-yz" or "z-xy": a permutation of
/// the three source axes plus the set of axes to negate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisOrder {
    pub order: [usize; 3],
    pub flips: Vec<usize>,
}

/// parses a final-order token. Each of x, y, z must appear exactly once and
/// may carry a leading '-' to request a flip of that source axis.
pub fn parse_axis_order(token: &str) -> Result<AxisOrder> {
    let mut order = Vec::new();
    let mut flips = Vec::new();
    let mut pending = String::new();
    for c in token.chars() {
        pending.push(c);
        if c == '-' {
            continue;
        }
        let (axis, flip) = match pending.as_str() {
            "x" => (0, false),
            "y" => (1, false),
            "z" => (2, false),
            "-x" => (0, true),
            "-y" => (1, true),
            "-z" => (2, true),
            other => {
                return Err(MetricsError::Config(format!(
                    "final_order token '{}' not understood in '{}'",
                    other, token
                )));
            }
        };
        if flip {
            flips.push(axis);
        }
        order.push(axis);
        pending.clear();
    }

    let mut seen = [false; 3];
    for &a in &order {
        seen[a] = true;
    }
    if order.len() != 3 || !seen.iter().all(|&s| s) {
        return Err(MetricsError::Config(format!(
            "final_order '{}' must contain the three axes exactly once",
            token
        )));
    }

    Ok(AxisOrder { order: [order[0], order[1], order[2]], flips })
}

/// Gradient directions with per-volume b-values in the MRtrix layout; the
/// FSL layout carries directions only.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientTable {
    pub layout: GradientLayout,
    pub directions: Vec<[f64; 3]>,
    pub bvals: Vec<f64>,
}

impl GradientTable {
    /// reads a whitespace-delimited gradient sampling file in the given layout
    pub fn read(path: impl AsRef<Path>, layout: GradientLayout) -> Result<Self> {
        let mut s = String::new();
        File::open(path.as_ref())?.read_to_string(&mut s)?;
        let rows = s
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| {
                l.split_ascii_whitespace()
                    .map(|t| {
                        t.parse::<f64>().map_err(|_| {
                            MetricsError::GradientFormat(format!("unparsable value '{}'", t))
                        })
                    })
                    .collect::<Result<Vec<f64>>>()
            })
            .collect::<Result<Vec<Vec<f64>>>>()?;

        match layout {
            GradientLayout::Fsl => {
                if rows.len() != 3 {
                    return Err(MetricsError::GradientFormat(format!(
                        "FSL bvec file must have 3 rows, found {}",
                        rows.len()
                    )));
                }
                let n = rows[0].len();
                if rows.iter().any(|r| r.len() != n) {
                    return Err(MetricsError::GradientFormat(
                        "FSL bvec rows differ in length".to_string(),
                    ));
                }
                let directions = (0..n).map(|i| [rows[0][i], rows[1][i], rows[2][i]]).collect();
                Ok(Self { layout, directions, bvals: Vec::new() })
            }
            GradientLayout::Mrtrix => {
                let mut directions = Vec::with_capacity(rows.len());
                let mut bvals = Vec::with_capacity(rows.len());
                for row in &rows {
                    if row.len() != 4 {
                        return Err(MetricsError::GradientFormat(format!(
                            "MRtrix scheme rows must hold 4 values, found {}",
                            row.len()
                        )));
                    }
                    directions.push([row[0], row[1], row[2]]);
                    bvals.push(row[3]);
                }
                Ok(Self { layout, directions, bvals })
            }
        }
    }

    /// negates the listed source axes of every direction; b-values untouched
    pub fn flip_axes(&self, axes: &[usize]) -> Self {
        let mut out = self.clone();
        for d in &mut out.directions {
            for &a in axes {
                d[a] = -d[a];
            }
        }
        out
    }

    /// reorders direction components so position i holds source axis order[i]
    pub fn swap_axes(&self, order: &[usize; 3]) -> Self {
        let mut out = self.clone();
        for d in &mut out.directions {
            let src = *d;
            for (i, &a) in order.iter().enumerate() {
                d[i] = src[a];
            }
        }
        out
    }

    /// applies a parsed final order: flips first, then the permutation
    pub fn reorient(&self, order: &AxisOrder) -> Self {
        self.flip_axes(&order.flips).swap_axes(&order.order)
    }

    /// writes the table back out in its own layout and the original tools'
    /// numeric formatting
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut f = File::create(path.as_ref())?;
        match self.layout {
            GradientLayout::Fsl => {
                for axis in 0..3 {
                    let line = self
                        .directions
                        .iter()
                        .map(|d| format!("{:.8}", d[axis]))
                        .collect::<Vec<_>>()
                        .join(" ");
                    writeln!(f, "{}", line)?;
                }
            }
            GradientLayout::Mrtrix => {
                for (d, b) in self.directions.iter().zip(&self.bvals) {
                    writeln!(f, "{:.8} {:.8} {:.8} {:.6}", d[0], d[1], d[2], b)?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Parser)]
/// Flip or swap chosen axes of a gradient sampling file, saving the result in
/// the same layout as the input.
pub struct FlipGradientsArgs {
    /// path to the gradient sampling file (.bvec or .b)
    pub in_gradient_sampling_file: PathBuf,
    /// where to save the reoriented gradient sampling file
    pub out_gradient_sampling_file: PathBuf,
    /// final order of the axes relative to the original, e.g. "x-yz" to flip
    /// y only or "yxz" to swap x and y
    pub final_order: String,
    /// input is in FSL bvec layout
    #[clap(long, conflicts_with = "mrtrix")]
    pub fsl: bool,
    /// input is in MRtrix scheme layout
    #[clap(long)]
    pub mrtrix: bool,
}

pub fn flip_or_swap_gradients(args: &FlipGradientsArgs) -> Result<()> {
    let layout = match (args.fsl, args.mrtrix) {
        (true, false) => GradientLayout::Fsl,
        (false, true) => GradientLayout::Mrtrix,
        _ => {
            return Err(MetricsError::Config(
                "exactly one of --fsl or --mrtrix must be given".to_string(),
            ));
        }
    };

    let ext = args
        .in_gradient_sampling_file
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    match layout {
        GradientLayout::Fsl if ext != "bvec" => {
            return Err(MetricsError::Config(
                "extension for FSL layout should be .bvec".to_string(),
            ));
        }
        GradientLayout::Mrtrix if ext != "b" => {
            return Err(MetricsError::Config(
                "extension for MRtrix layout should be .b".to_string(),
            ));
        }
        _ => {}
    }

    let order = parse_axis_order(&args.final_order)?;
    let table = GradientTable::read(&args.in_gradient_sampling_file, layout)?;
    table.reorient(&order).write(&args.out_gradient_sampling_file)?;
    println!(
        "wrote reoriented gradient table to {}",
        args.out_gradient_sampling_file.display()
    );
    Ok(())
}
