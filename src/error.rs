//! Error types for the TPU simulator
//!
//! Faults raised by the units carry no position information; the scheduler
//! wraps them into [`TpuError::Fault`] together with the offending instruction
//! index and the cycle at which execution stopped.

use serde::Serialize;
use thiserror::Error;

/// Result type for simulator operations
pub type TpuResult<T> = Result<T, TpuError>;

/// Memories that can be addressed by an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Memory {
    UnifiedBuffer,
    Accumulator,
    HostMemory,
    WeightStore,
}

impl std::fmt::Display for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Memory::UnifiedBuffer => write!(f, "unified buffer"),
            Memory::Accumulator => write!(f, "accumulator"),
            Memory::HostMemory => write!(f, "host memory"),
            Memory::WeightStore => write!(f, "weight store"),
        }
    }
}

/// Resources an in-flight instruction may occupy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Resource {
    UnifiedBuffer,
    Accumulator,
    Array,
    ActivationUnit,
    WeightStore,
    HostMemory,
}

impl Resource {
    pub const ALL: [Resource; 6] = [
        Resource::UnifiedBuffer,
        Resource::Accumulator,
        Resource::Array,
        Resource::ActivationUnit,
        Resource::WeightStore,
        Resource::HostMemory,
    ];

    pub fn index(self) -> usize {
        match self {
            Resource::UnifiedBuffer => 0,
            Resource::Accumulator => 1,
            Resource::Array => 2,
            Resource::ActivationUnit => 3,
            Resource::WeightStore => 4,
            Resource::HostMemory => 5,
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::UnifiedBuffer => write!(f, "unified buffer port"),
            Resource::Accumulator => write!(f, "accumulator port"),
            Resource::Array => write!(f, "systolic array"),
            Resource::ActivationUnit => write!(f, "activation unit"),
            Resource::WeightStore => write!(f, "weight store port"),
            Resource::HostMemory => write!(f, "host memory port"),
        }
    }
}

/// Instruction words the decoder refuses to dispatch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unrecognized opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("flags {flags:#04x} are not valid for {mnemonic}")]
    InvalidFlags { mnemonic: &'static str, flags: u8 },

    #[error("reserved activation selector {0}")]
    ReservedActivation(u8),

    #[error("{mnemonic} with zero length")]
    ZeroLength { mnemonic: &'static str },

    #[error("{memory} range {address}..{address}+{length} exceeds capacity {capacity}")]
    AddressOutOfRange {
        memory: Memory,
        address: u64,
        length: u64,
        capacity: u64,
    },
}

/// Instructions whose fields do not fit the binary encoding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("unified-buffer address {0:#x} does not fit in 24 bits")]
    UbAddressOverflow(u32),
}

/// Timing violations of the instruction stream
///
/// The simulator never inserts stalls; the program is expected to schedule
/// enough idle cycles itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HazardError {
    #[error("{resource} is occupied until cycle {busy_until}")]
    ResourceBusy { resource: Resource, busy_until: u64 },

    #[error("weight switch with an empty weight FIFO")]
    FifoEmpty,

    #[error("weight FIFO is full ({capacity} tiles)")]
    FifoFull { capacity: usize },

    #[error("weight tile at the FIFO head lands at cycle {ready_at}")]
    TileNotReady { ready_at: u64 },

    #[error("staged weights overwritten while the previous switch is still propagating")]
    SwitchInFlight,
}

/// Fatal conditions raised while executing a single instruction
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Fault {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("hazard: {0}")]
    Hazard(#[from] HazardError),

    #[error("{memory} access at {address} (+{count}) exceeds capacity {capacity}")]
    OutOfRange {
        memory: Memory,
        address: u64,
        count: usize,
        capacity: usize,
    },

    #[error("{memory} vector has width {got}, expected {expected}")]
    WidthMismatch {
        memory: Memory,
        expected: usize,
        got: usize,
    },
}

impl Fault {
    pub fn out_of_range(memory: Memory, address: u64, count: usize, capacity: usize) -> Self {
        Fault::OutOfRange {
            memory,
            address,
            count,
            capacity,
        }
    }

    pub fn width(memory: Memory, expected: usize, got: usize) -> Self {
        Fault::WidthMismatch {
            memory,
            expected,
            got,
        }
    }
}

/// Top-level simulator errors
#[derive(Debug, Error)]
pub enum TpuError {
    #[error("instruction {pc} faulted at cycle {cycle}: {fault}")]
    Fault { pc: usize, cycle: u64, fault: Fault },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Invalid program image: {message}")]
    Program { message: String },

    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TpuError {
    pub fn fault(pc: usize, cycle: u64, fault: impl Into<Fault>) -> Self {
        TpuError::Fault {
            pc,
            cycle,
            fault: fault.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        TpuError::Config { message: msg.into() }
    }

    pub fn program(msg: impl Into<String>) -> Self {
        TpuError::Program { message: msg.into() }
    }

    /// The underlying fault, if this error stopped a running program
    pub fn as_fault(&self) -> Option<&Fault> {
        match self {
            TpuError::Fault { fault, .. } => Some(fault),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_message_carries_position() {
        let err = TpuError::fault(3, 17, HazardError::FifoEmpty);
        assert_eq!(
            err.to_string(),
            "instruction 3 faulted at cycle 17: hazard: weight switch with an empty weight FIFO"
        );
        assert_eq!(err.as_fault(), Some(&Fault::Hazard(HazardError::FifoEmpty)));
    }

    #[test]
    fn test_resource_indices_are_dense() {
        for (i, resource) in Resource::ALL.iter().enumerate() {
            assert_eq!(resource.index(), i);
        }
    }
}
