use std::fmt;

/// Errors this crate raises itself, as opposed to errors reported back
/// by a [`crate::Runtime`] implementation (see [`crate::RuntimeError`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadControlError {
    /// The named thread has no tracked node and the operation requires one.
    InvalidThread,
    /// `pop_frames` was asked to pop zero or fewer frames.
    NoMoreFrames,
    /// `add_debug_thread` was called with the fixed-size set already full.
    DebugThreadSetFull,
    /// A runtime primitive failed in a way the caller must handle.
    Runtime(super::RuntimeError),
}

pub type ThreadControlResult<T> = Result<T, ThreadControlError>;

impl fmt::Display for ThreadControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadControlError::InvalidThread => write!(f, "the requested thread is not tracked"),
            ThreadControlError::NoMoreFrames => write!(f, "no more frames to pop"),
            ThreadControlError::DebugThreadSetFull => write!(f, "debug thread set is already full"),
            ThreadControlError::Runtime(e) => write!(f, "runtime primitive failed: {e}"),
        }
    }
}

impl std::error::Error for ThreadControlError {}

impl From<super::RuntimeError> for ThreadControlError {
    fn from(e: super::RuntimeError) -> Self {
        ThreadControlError::Runtime(e)
    }
}
