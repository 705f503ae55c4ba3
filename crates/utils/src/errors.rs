use thiserror::Error;

/// Error type for turning source text into a syntax tree.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The input file could not be read.
    #[error("could not read file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The parser could not produce a tree at all.
    #[error("syntax error at {line}:{column}: {msg}")]
    Syntax {
        line: usize,
        column: usize,
        msg: String,
    },
    /// A `javascript:` bookmarklet contained an escape that is not valid UTF-8.
    #[error("invalid bookmarklet escape sequence: {0}")]
    Bookmarklet(String),
}

/// Errors raised while serialising a tree back to text.
#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("emitter failed: {0}")]
    Emit(#[from] std::io::Error),
    #[error("emitted code is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Failure to evaluate a fragment inside a sandbox.
///
/// Every variant is recoverable from the pipeline's point of view: the
/// candidate expression is left untouched.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error("fragment does not parse: {0}")]
    Syntax(String),
    #[error("{0} is not defined")]
    Reference(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("uncaught exception: {0}")]
    Thrown(String),
    #[error("step limit exceeded ({executed} > {limit})")]
    StepLimit { executed: u64, limit: u64 },
    #[error("call depth limit of {0} exceeded")]
    CallDepth(usize),
    #[error("evaluation timed out after {millis} ms")]
    Timeout { millis: u64 },
    #[error("allocation limit of {0} bytes exceeded")]
    Allocation(usize),
    #[error("unsupported construct: {0}")]
    Unsupported(String),
    #[error("result cannot leave the sandbox: {0}")]
    NotTransferable(String),
    #[error("sandbox worker failed: {0}")]
    Worker(String),
}

impl EvalError {
    /// Resource limits abort the whole evaluation and are never visible to
    /// `try`/`catch` inside the fragment.
    pub const fn is_limit(&self) -> bool {
        matches!(
            self,
            Self::StepLimit { .. }
                | Self::CallDepth(_)
                | Self::Timeout { .. }
                | Self::Allocation(_)
        )
    }
}

/// Error type for transform operations.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("code generation failed: {0}")]
    Codegen(#[from] CodegenError),
    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),
    #[error("invalid transform option: {0}")]
    InvalidOption(String),
    #[error("{0}")]
    Generic(String),
}

/// Errors that can occur while extracting or saving a bundle.
#[derive(Debug, Error)]
pub enum UnpackError {
    #[error("could not write '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("module path '{0}' escapes the output directory")]
    PathEscapes(String),
    #[error("code generation failed: {0}")]
    Codegen(#[from] CodegenError),
}

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    /// Any failure inside a stage. Never caught internally.
    #[error("stage '{stage}' failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: TransformError,
    },
    #[error("code generation failed: {0}")]
    Codegen(#[from] CodegenError),
    #[error("unpack error: {0}")]
    Unpack(#[from] UnpackError),
    #[error("file error: {0}")]
    File(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
