use clap::Parser;
use tracing_subscriber::EnvFilter;

use payload_extract::cmd::Cmd;

fn main() {
    // RUST_LOG overrides the default; progress bars and logs share stderr.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = Cmd::parse().run() {
        eprintln!("\nERROR: {:#}", e);
        std::process::exit(1);
    }
}
