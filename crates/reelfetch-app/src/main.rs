//! Binary entrypoint for the `reelfetch` command line.

use std::process;

#[tokio::main]
async fn main() {
    let code = reelfetch_app::cli::run().await;
    process::exit(code);
}
