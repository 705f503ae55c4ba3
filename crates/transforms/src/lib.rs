pub mod deobfuscate;
pub mod jsx;
pub mod mangle;
pub mod pass;
pub mod pipeline;
pub mod transpile;
pub mod unminify;
pub mod util;

pub use decloak_unpack::Bundle;
pub use pass::{apply, apply_async, apply_many};
pub use pipeline::{deobfuscate, DeobfuscationResult, MangleMode, Options, ProgressFn};
pub use util::{AsyncTransform, FixpointConfig, Transform};
