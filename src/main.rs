#![forbid(unsafe_code)]

//! auxinv: resumable optimization inventory CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = cli_app::Cli::parse();
    cli_app::init_tracing(&args);
    if let Err(e) = cli_app::run(&args) {
        eprintln!("auxinv: {e}");
        std::process::exit(e.exit_code());
    }
}
