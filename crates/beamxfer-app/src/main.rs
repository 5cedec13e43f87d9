//! `beamxfer` command-line entrypoint.

use std::process;

#[tokio::main]
async fn main() {
    let code = beamxfer_app::run().await;
    process::exit(code);
}
