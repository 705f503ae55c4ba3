//! Restores modern syntax that was lowered for older targets, giving the
//! unminify rules a single baseline to work on.

pub mod logical_assignments;
pub mod nullish;
pub mod template_literals;

pub use logical_assignments::LogicalAssignments;
pub use nullish::{NullishCoalescing, OptionalChaining};
pub use template_literals::TemplateLiterals;

use crate::util::Transform;

pub fn rules() -> Vec<Box<dyn Transform>> {
    vec![
        Box::new(TemplateLiterals),
        Box::new(OptionalChaining),
        Box::new(NullishCoalescing),
        Box::new(LogicalAssignments),
    ]
}
