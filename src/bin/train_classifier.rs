use binary_trainer::cli::{run_classifier, ClassifierCli};
use clap::Parser;

fn main() -> binary_trainer::MainResult {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    run_classifier(ClassifierCli::parse())
}
