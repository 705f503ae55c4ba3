//! Runs the full pipeline over one input and prints or saves the result.
use async_trait::async_trait;
use clap::Args;
use decloak_sandbox::{SandboxLimits, WorkerSandbox};
use decloak_transform::{deobfuscate, MangleMode, Options};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// Arguments for a deobfuscation run.
#[derive(Args, Debug)]
pub struct DeobfuscateArgs {
    /// Input script path, or `-` to read stdin.
    pub input: String,
    /// Directory for `deobfuscated.js` and unpacked modules. Prints to stdout when absent.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Leave compiled JSX factory calls alone.
    #[arg(long)]
    no_jsx: bool,
    /// Do not split bundles into modules.
    #[arg(long)]
    no_unpack: bool,
    /// Skip obfuscator-specific passes.
    #[arg(long)]
    no_deobfuscate: bool,
    /// Skip unminification.
    #[arg(long)]
    no_unminify: bool,
    /// Rename every local binding to a short name.
    #[arg(long)]
    mangle: bool,
    /// Wall-clock limit per sandbox evaluation.
    #[arg(long, default_value_t = 2_000)]
    timeout_ms: u64,
    /// Interpreter step limit per sandbox evaluation.
    #[arg(long, default_value_t = 5_000_000)]
    max_steps: u64,
}

impl DeobfuscateArgs {
    fn options(&self) -> Options {
        let limits = SandboxLimits::default()
            .with_timeout_ms(self.timeout_ms)
            .with_max_steps(self.max_steps);
        let mangle = if self.mangle {
            MangleMode::All
        } else {
            MangleMode::Off
        };
        Options::default()
            .with_jsx(!self.no_jsx)
            .with_unpack(!self.no_unpack)
            .with_deobfuscate(!self.no_deobfuscate)
            .with_unminify(!self.no_unminify)
            .with_mangle(mangle)
            .with_sandbox(Arc::new(WorkerSandbox::new(limits)))
            .with_progress(Arc::new(|percent| debug!("progress {percent:.0}%")))
    }
}

async fn read_input(input: &str) -> Result<String, Box<dyn Error>> {
    if input == "-" {
        let mut source = String::new();
        tokio::io::stdin().read_to_string(&mut source).await?;
        Ok(source)
    } else {
        Ok(tokio::fs::read_to_string(input).await?)
    }
}

#[async_trait]
impl super::Command for DeobfuscateArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let source = read_input(&self.input).await?;
        let options = self.options();
        debug!("{options:?}");

        let result = deobfuscate(&source, options).await?;
        match &self.output {
            Some(dir) => {
                result.save(dir)?;
                let modules = result.bundle.as_ref().map_or(0, |b| b.modules.len());
                info!("wrote {} ({modules} unpacked modules)", dir.display());
            }
            None => println!("{}", result.code),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: DeobfuscateArgs,
    }

    fn parse(argv: &[&str]) -> DeobfuscateArgs {
        Harness::parse_from(std::iter::once("decloak").chain(argv.iter().copied())).args
    }

    #[test]
    fn test_flags_map_to_options() {
        let options = parse(&["in.js", "--no-jsx", "--no-unpack", "--mangle"]).options();
        assert!(!options.jsx);
        assert!(!options.unpack);
        assert!(options.deobfuscate);
        assert!(options.unminify);
        assert!(options.mangle.is_enabled());

        let options = parse(&["in.js"]).options();
        assert!(options.jsx && options.unpack && !options.mangle.is_enabled());
    }

    #[tokio::test]
    async fn test_saves_to_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.js");
        std::fs::write(&input, "a && b();").unwrap();
        let out = dir.path().join("out");

        let args = parse(&[input.to_str().unwrap(), "-o", out.to_str().unwrap()]);
        args.execute().await.unwrap();

        let code = std::fs::read_to_string(out.join("deobfuscated.js")).unwrap();
        assert!(code.contains("if (a)"));
    }

    #[tokio::test]
    async fn test_missing_input_fails() {
        assert!(read_input("/nonexistent/decloak/input.js").await.is_err());
    }
}
