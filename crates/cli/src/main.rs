/// Entry point for decloak, a JavaScript deobfuscator and bundle unpacker.
///
/// Parses the command line, installs the log subscriber and runs the
/// pipeline over the input.
mod commands;

use clap::Parser;
use commands::{deobfuscate::DeobfuscateArgs, Command};
use tracing_subscriber::EnvFilter;

/// Command-line interface for decloak.
///
/// Reads a script (or `-` for stdin), undoes minification and obfuscation,
/// rebuilds JSX and splits recognised bundles into modules.
#[derive(Parser)]
#[command(name = "decloak")]
#[command(about = "decloak: JavaScript deobfuscator and bundle unpacker")]
struct Cli {
    #[command(flatten)]
    args: DeobfuscateArgs,

    /// Log debug output (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    cli.args.execute().await
}
