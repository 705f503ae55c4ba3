//! Cross-crate tests for decloak.
//!
//! Each module drives public APIs only: parsing and emission, the rule sets
//! through the fixpoint applicator, the sandboxes, and whole pipeline runs
//! including bundle extraction to disk.

#[cfg(test)]
mod parser;
#[cfg(test)]
mod pipeline;
#[cfg(test)]
mod sandbox;
#[cfg(test)]
mod transforms;

/// Installs a test subscriber once; later calls are no-ops.
#[cfg(test)]
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
