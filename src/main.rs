use clap::Parser;
use probtrader::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    probtrader::cli::init_tracing();
    run(Cli::parse())
}
