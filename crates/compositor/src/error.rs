use thiserror::Error;

use crate::gpu::GpuError;
use crate::targets::TargetId;

/// Fatal errors: broken built-in programs, pool misuse and re-entrant
/// rendering. User content problems are reported as
/// [`CompileError`](crate::CompileError) records instead.
#[derive(Debug, Error)]
pub enum CompositorError {
    #[error("built-in shader `{name}` failed to build: {log}")]
    BuiltinShader { name: &'static str, log: String },
    #[error("built-in shader `{program}` has no active uniform `{uniform}`")]
    MissingUniform {
        program: &'static str,
        uniform: &'static str,
    },
    #[error("render target {0} released more times than it was requested")]
    DoubleRelease(TargetId),
    #[error("anti-alias render target {0} is permanently allocated and cannot be released")]
    PermanentTarget(TargetId),
    #[error("render target {0} does not belong to this pool")]
    UnknownTarget(TargetId),
    #[error("cannot delete render targets while {0} target(s) are checked out")]
    TargetsInUse(usize),
    #[error("render targets can only be resized at anti-alias level 1 (current level {0})")]
    ResizeWithAntiAlias(u32),
    #[error("render targets have already been deleted")]
    TargetsDeleted,
    #[error("a frame is already being rendered")]
    AlreadyRendering,
    #[error("no layer with id `{0}` in the compiled tree")]
    UnknownLayer(String),
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

pub type Result<T, E = CompositorError> = std::result::Result<T, E>;
