use clap::Parser;
use connectome_pca::pipeline::{compute_pca, ComputePcaArgs};

fn main() {
    let args = ComputePcaArgs::parse();
    if let Err(e) = compute_pca(&args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
