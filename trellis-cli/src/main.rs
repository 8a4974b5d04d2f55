//! Trellis CLI: drives the layout builder from a terminal.
//!
//! Talks to a layout store over HTTP, or with `--demo` to a seeded
//! in-process store. Every command loads the layout, runs one intent and
//! prints the resulting outline.

mod app;

use std::process::ExitCode;

use clap::Parser;

use app::Cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
