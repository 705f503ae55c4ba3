//! Fixpoint application of transforms.

use crate::util::{AsyncTransform, FixpointConfig, Transform};
use decloak_sandbox::Sandbox;
use decloak_utils::errors::TransformError;
use swc_core::ecma::ast::Module;
use tracing::{debug, warn};

/// Runs one traversal of `unit`.
pub fn apply(module: &mut Module, unit: &dyn Transform) -> Result<usize, TransformError> {
    let changes = unit.apply(module)?;
    if changes > 0 {
        debug!("{:>28} {changes} changes", unit.name());
    }
    Ok(changes)
}

/// Sweeps the whole group until a sweep reports no changes.
///
/// Hitting `max_iterations` is logged and the tree is kept as is; every
/// completed sweep left it valid.
pub fn apply_many(
    module: &mut Module,
    units: &[Box<dyn Transform>],
    cfg: &FixpointConfig,
) -> Result<usize, TransformError> {
    let mut total = 0;
    for iteration in 1..=cfg.max_iterations {
        let mut sweep = 0;
        for unit in units {
            sweep += apply(module, unit.as_ref())?;
        }
        total += sweep;
        if sweep == 0 {
            debug!("converged after {iteration} sweeps, {total} changes");
            return Ok(total);
        }
    }
    warn!(
        "[{}] did not converge after {} sweeps",
        units.iter().map(|u| u.name()).collect::<Vec<_>>().join(", "),
        cfg.max_iterations
    );
    Ok(total)
}

/// Runs an async unit once. Its sandbox evaluations complete before this
/// returns.
pub async fn apply_async(
    module: &mut Module,
    unit: &dyn AsyncTransform,
    sandbox: &dyn Sandbox,
) -> Result<usize, TransformError> {
    let changes = unit.apply(module, sandbox).await?;
    if changes > 0 {
        debug!("{:>28} {changes} changes", unit.name());
    }
    Ok(changes)
}
