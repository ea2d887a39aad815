//! Runtime errors that can occur while loading or executing June bytecode.

use crate::vm::value::{Value, ValueType};

/// Coarse error category, matching spec §7's closed set. `None` (no error)
/// is represented by the absence of a `VmError`, so it has no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    FileIo,
    Exec,
    Args,
    Raised,
    Unwrap,
}

/// Runtime errors produced by the engine. `Raised` wraps a value flung by
/// running June code (`raise`-style native calls); it is the only variant a
/// fail block can catch and bind — everything else is an executor-internal
/// failure reported straight to the source's diagnostic formatter.
#[derive(Debug, Clone)]
pub enum VmError {
    /// A value raised by running code. Recoverable by a fail block.
    Raised(Value),
    /// Executor-internal failure: type mismatch, resolution failure, stack
    /// overflow, and similar.
    Exec(String),
    /// Reading or writing bytecode failed.
    FileIo(String),
    /// A host/native call received the wrong argument shape.
    Args(String),
    /// Internal misuse of an optional/result primitive.
    Unwrap(String),
}

impl VmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VmError::Raised(_) => ErrorKind::Raised,
            VmError::Exec(_) => ErrorKind::Exec,
            VmError::FileIo(_) => ErrorKind::FileIo,
            VmError::Args(_) => ErrorKind::Args,
            VmError::Unwrap(_) => ErrorKind::Unwrap,
        }
    }

    pub fn exec(msg: impl Into<String>) -> Self {
        VmError::Exec(msg.into())
    }

    pub fn type_error_expected(instruction: &str, expected: &str, got: ValueType) -> Self {
        VmError::Exec(format!(
            "{}: expected {}, got {:?}",
            instruction, expected, got
        ))
    }

    /// A failing `Call` reports the callee's type name plus a one-line reason (spec §7).
    pub fn call_failed(type_name: &str, reason: impl std::fmt::Display) -> Self {
        VmError::Exec(format!("cannot call value of type `{}`: {}", type_name, reason))
    }

    /// A failed `Store` shows both operand types (spec §7).
    pub fn store_type_mismatch(target: ValueType, source: ValueType) -> Self {
        VmError::Exec(format!(
            "Store: target has type {:?}, value has type {:?}",
            target, source
        ))
    }

    pub fn module_load_failed(module: &str, cause: impl std::fmt::Display) -> Self {
        VmError::Exec(format!("failed to load module `{}`: {}", module, cause))
    }
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmError::Raised(v) => write!(f, "unhandled raise: {}", v.display_for_error()),
            VmError::Exec(msg) => write!(f, "{}", msg),
            VmError::FileIo(msg) => write!(f, "I/O error: {}", msg),
            VmError::Args(msg) => write!(f, "argument error: {}", msg),
            VmError::Unwrap(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for VmError {}

/// A `VmError` paired with the source location it occurred at, for
/// diagnostic rendering (`SrcFile::format_diagnostic`).
#[derive(Debug, Clone)]
pub struct SpannedVmError {
    pub error: VmError,
    pub src_id: u64,
    pub idx: u64,
}

impl SpannedVmError {
    pub fn new(error: VmError, src_id: u64, idx: u64) -> Self {
        Self { error, src_id, idx }
    }
}

impl std::fmt::Display for SpannedVmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (src {}, op {})", self.error, self.src_id, self.idx)
    }
}

impl std::error::Error for SpannedVmError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_matches_variant() {
        assert_eq!(VmError::exec("x").kind(), ErrorKind::Exec);
        assert_eq!(VmError::FileIo("x".into()).kind(), ErrorKind::FileIo);
        assert_eq!(VmError::Args("x".into()).kind(), ErrorKind::Args);
        assert_eq!(VmError::Unwrap("x".into()).kind(), ErrorKind::Unwrap);
    }

    #[test]
    fn store_type_mismatch_mentions_both_types() {
        let e = VmError::store_type_mismatch(ValueType::Int, ValueType::Str);
        assert!(format!("{}", e).contains("Int"));
        assert!(format!("{}", e).contains("Str"));
    }

    #[test]
    fn spanned_error_displays_location() {
        let e = SpannedVmError::new(VmError::exec("bad"), 3, 7);
        let s = format!("{}", e);
        assert!(s.contains("src 3"));
        assert!(s.contains("op 7"));
    }
}
