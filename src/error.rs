use std::io;

use thiserror::Error;

/// every way the JIT core can fail.
///
/// the native code itself is not covered here -- a segfault from an
/// out-of-bounds head access terminates the process directly, as the spec
/// for this interpreter requires.
#[derive(Debug, Error)]
pub enum JitError {
    #[error("could not allocate executable memory: {source}")]
    AllocFailed { source: io::Error },

    #[error("could not mark memory executable (region released): {source}")]
    ProtectFailed { source: io::Error },

    #[error("could not release executable memory: {source}")]
    UnmapFailed { source: io::Error },

    #[error(
        "could not mark memory executable ({protect_source}), and the \
         subsequent attempt to release it also failed ({unmap_source}) -- double fault"
    )]
    DoubleFault {
        protect_source: io::Error,
        unmap_source: io::Error,
    },

    #[error("malformed program: {reason}")]
    Malformed { reason: String },
}
