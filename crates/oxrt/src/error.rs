//! Error types for the `OxRT` runtime.
//!
//! Every failure the runtime can report falls into one of four kinds:
//!
//! - **Configuration**: a malformed class descriptor. Fatal when reached
//!   through [`resolve_class`](crate::runtime::resolve_class).
//! - **Allocation**: the allocator could not provide instance storage.
//!   Returned to the caller.
//! - **Initialization**: an initializer rejected its arguments. Returned to the
//!   caller after the partially built object has been torn down.
//! - **Contract violation**: calling an unimplemented slot, over-releasing,
//!   casting to the wrong class. Always fatal, see [`fatal`].

use thiserror::Error;

/// Broad category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed class declaration.
    Configuration,
    /// Memory exhaustion.
    Allocation,
    /// An initializer refused to build the object.
    Initialization,
    /// Misuse of the runtime that cannot be recovered from.
    ContractViolation,
}

impl ErrorKind {
    /// Returns `true` for the kinds that terminate the operation when raised.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::Configuration | ErrorKind::ContractViolation
        )
    }
}

/// Error type for `OxRT` runtime operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A descriptor without a superclass that is not the root `Object` class.
    #[error("class '{class}' has no superclass and is not the root class")]
    MissingRootAncestor {
        /// Offending class.
        class: &'static str,
    },

    /// A descriptor appears in its own superclass chain.
    #[error("inheritance cycle detected while resolving class '{class}'")]
    InheritanceCycle {
        /// Class whose resolution re-entered itself.
        class: &'static str,
    },

    /// Two distinct descriptors declare the same class name.
    #[error("class name '{name}' is already registered by another descriptor")]
    ClassAlreadyExists {
        /// Duplicated name.
        name: &'static str,
    },

    /// Instance storage cannot hold the superclass's instance.
    #[error(
        "class '{class}' declares {size} byte instances, smaller than the {required} bytes of '{superclass}'"
    )]
    InstanceTooSmall {
        /// Offending class.
        class: &'static str,
        /// Declared instance size.
        size: usize,
        /// Superclass (or header) name.
        superclass: &'static str,
        /// Minimum size.
        required: usize,
    },

    /// Instance alignment is weaker than the object header's.
    #[error("class '{class}' declares alignment {align}, the header needs {required}")]
    InstanceMisaligned {
        /// Offending class.
        class: &'static str,
        /// Declared alignment.
        align: usize,
        /// Header alignment.
        required: usize,
    },

    /// A slot constant does not agree with the inherited table layout.
    #[error("class '{class}': slot '{slot}' expected at index {expected}, declared at {index}")]
    SlotLayoutMismatch {
        /// Class being built.
        class: &'static str,
        /// Slot name.
        slot: &'static str,
        /// Index the table layout requires.
        expected: usize,
        /// Index carried by the slot constant.
        index: usize,
    },

    /// A slot is overridden with a function of another signature.
    #[error("class '{class}': slot '{slot}' has signature '{expected}', got '{found}'")]
    SlotSignatureMismatch {
        /// Class being built (or the receiver's class at call time).
        class: &'static str,
        /// Slot name.
        slot: &'static str,
        /// Signature stored in the table.
        expected: &'static str,
        /// Signature of the offered function.
        found: &'static str,
    },

    /// An override names a slot the inherited table does not have.
    #[error("class '{class}' overrides unknown slot '{slot}' (index {index})")]
    UnknownSlot {
        /// Class being built.
        class: &'static str,
        /// Slot name.
        slot: &'static str,
        /// Index carried by the slot constant.
        index: usize,
    },

    /// An unresolved class was requested from inside an `interface` function.
    #[error("class '{class}' was resolved from inside an interface function")]
    ReentrantResolution {
        /// Class that was requested.
        class: &'static str,
    },

    /// A class's declared layout differs from the Rust type allocated for it.
    #[error("class '{class}' declares a {declared} byte layout but '{ty}' is {actual} bytes")]
    LayoutMismatch {
        /// Class name.
        class: &'static str,
        /// Rust instance type.
        ty: &'static str,
        /// Size from the descriptor.
        declared: usize,
        /// Size of the Rust type.
        actual: usize,
    },

    /// The allocator returned no memory.
    #[error("out of memory allocating {size} bytes for '{class}'")]
    OutOfMemory {
        /// Class being instantiated.
        class: &'static str,
        /// Requested bytes.
        size: usize,
    },

    /// An initializer rejected its arguments.
    #[error("initialization of '{class}' failed: {reason}")]
    InitializationFailed {
        /// Level whose initializer failed.
        class: &'static str,
        /// Initializer supplied reason.
        reason: String,
    },

    /// A slot was called that is explicitly unimplemented.
    #[error("'{class}' does not implement '{slot}'")]
    Unimplemented {
        /// Receiver class.
        class: &'static str,
        /// Slot name.
        slot: &'static str,
    },

    /// The receiver's interface table has no such slot.
    #[error("'{class}' has no slot '{slot}' at index {index}")]
    NoSuchSlot {
        /// Receiver class.
        class: &'static str,
        /// Slot name.
        slot: &'static str,
        /// Requested index.
        index: usize,
    },

    /// Release on an object whose count is already zero.
    #[error("over-release of '{class}' instance at {address:#x}")]
    OverRelease {
        /// Class of the object.
        class: &'static str,
        /// Object address.
        address: usize,
    },

    /// Retain past the counter's range.
    #[error("reference count overflow on '{class}' instance at {address:#x}")]
    RefCountOverflow {
        /// Class of the object.
        class: &'static str,
        /// Object address.
        address: usize,
    },

    /// Retain on an object that is being deallocated.
    #[error("retain of deallocating '{class}' instance at {address:#x}")]
    RetainDuringDealloc {
        /// Class of the object.
        class: &'static str,
        /// Object address.
        address: usize,
    },

    /// A checked cast to a class the object is not a kind of.
    #[error("'{class}' instance is not a kind of '{target}'")]
    InvalidCast {
        /// Actual class.
        class: &'static str,
        /// Requested class.
        target: &'static str,
    },

    /// The initialization chain was not followed.
    #[error("initializer chain of '{class}' broken: {detail}")]
    BrokenInitChain {
        /// Level that noticed the problem.
        class: &'static str,
        /// What went wrong.
        detail: &'static str,
    },
}

impl Error {
    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingRootAncestor { .. }
            | Error::InheritanceCycle { .. }
            | Error::ClassAlreadyExists { .. }
            | Error::InstanceTooSmall { .. }
            | Error::InstanceMisaligned { .. }
            | Error::SlotLayoutMismatch { .. }
            | Error::SlotSignatureMismatch { .. }
            | Error::UnknownSlot { .. }
            | Error::ReentrantResolution { .. }
            | Error::LayoutMismatch { .. } => ErrorKind::Configuration,
            Error::OutOfMemory { .. } => ErrorKind::Allocation,
            Error::InitializationFailed { .. } => ErrorKind::Initialization,
            Error::Unimplemented { .. }
            | Error::NoSuchSlot { .. }
            | Error::OverRelease { .. }
            | Error::RefCountOverflow { .. }
            | Error::RetainDuringDealloc { .. }
            | Error::InvalidCast { .. }
            | Error::BrokenInitChain { .. } => ErrorKind::ContractViolation,
        }
    }

    /// Shorthand for [`ErrorKind::is_fatal`] on this error's kind.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }
}

/// Result type for `OxRT` runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Terminates the current operation with `err`.
///
/// Logs the error at `error` level, with a backtrace when the
/// `violation-backtrace` feature is enabled, then panics with the error's
/// message. Used for configuration errors and contract violations, which leave
/// no state worth recovering.
#[cold]
#[track_caller]
pub fn fatal(err: Error) -> ! {
    let kind = err.kind();

    #[cfg(feature = "violation-backtrace")]
    {
        let trace = backtrace::Backtrace::new();
        tracing::error!(?kind, error = %err, backtrace = ?trace, "fatal runtime error");
    }
    #[cfg(not(feature = "violation-backtrace"))]
    tracing::error!(?kind, error = %err, "fatal runtime error");

    panic!("{err}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::OutOfMemory {
                class: "Counter",
                size: 32
            }
            .to_string(),
            "out of memory allocating 32 bytes for 'Counter'"
        );
        assert_eq!(
            Error::Unimplemented {
                class: "Shape",
                slot: "area"
            }
            .to_string(),
            "'Shape' does not implement 'area'"
        );
        assert_eq!(
            Error::OverRelease {
                class: "Object",
                address: 0x10
            }
            .to_string(),
            "over-release of 'Object' instance at 0x10"
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::InheritanceCycle { class: "A" }.kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            Error::OutOfMemory {
                class: "A",
                size: 1
            }
            .kind(),
            ErrorKind::Allocation
        );
        assert_eq!(
            Error::InitializationFailed {
                class: "A",
                reason: "no".into()
            }
            .kind(),
            ErrorKind::Initialization
        );
        assert_eq!(
            Error::InvalidCast {
                class: "A",
                target: "B"
            }
            .kind(),
            ErrorKind::ContractViolation
        );
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(ErrorKind::Configuration.is_fatal());
        assert!(ErrorKind::ContractViolation.is_fatal());
        assert!(!ErrorKind::Allocation.is_fatal());
        assert!(!ErrorKind::Initialization.is_fatal());
    }

    #[test]
    #[should_panic(expected = "does not implement 'describe'")]
    fn test_fatal_panics_with_message() {
        fatal(Error::Unimplemented {
            class: "Object",
            slot: "describe",
        });
    }
}
