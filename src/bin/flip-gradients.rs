use clap::Parser;
use connectome_pca::gradients::{flip_or_swap_gradients, FlipGradientsArgs};

fn main() {
    let args = FlipGradientsArgs::parse();
    if let Err(e) = flip_or_swap_gradients(&args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
