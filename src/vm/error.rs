//! VM fault reasons.

use thiserror::Error;

use super::opcode::OpCode;

/// A VM runtime failure. `At` is the dispatcher's wrapper carrying the
/// failing instruction pointer and opcode; everything else is the reason
/// an opcode handler bailed out.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("error encountered at instruction {ip} ({op}): {source}")]
    At {
        ip: usize,
        op: OpCode,
        #[source]
        source: Box<VmError>,
    },

    #[error("no program loaded")]
    NoProgram,

    #[error("VM has failed")]
    Faulted,

    #[error("stack is too big")]
    StackOverflow,

    #[error("invocation stack is too big")]
    InvocationOverflow,

    #[error("big integer is too big")]
    IntegerOverflow,

    #[error("too big item: {0}")]
    ItemTooLarge(usize),

    #[error("too long collection")]
    CollectionTooLarge,

    #[error("unknown opcode {0}")]
    UnknownOpcode(OpCode),

    #[error("interop hook {0:?} not registered")]
    UnknownInterop(String),

    #[error("{0}")]
    Runtime(String),
}

impl VmError {
    /// Shorthand for ad-hoc runtime failures.
    pub fn runtime(msg: impl Into<String>) -> Self {
        VmError::Runtime(msg.into())
    }

    /// The instruction pointer recorded by the dispatcher, if any.
    pub fn instruction_pointer(&self) -> Option<usize> {
        match self {
            VmError::At { ip, .. } => Some(*ip),
            _ => None,
        }
    }
}

pub type VmResult<T> = Result<T, VmError>;
