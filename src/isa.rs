//! Instruction set and binary encoding
//!
//! Every instruction is a 14-byte word with little-endian fields:
//!
//! | Bytes | Field                                              |
//! |-------|----------------------------------------------------|
//! | 0     | opcode                                             |
//! | 1     | flags                                              |
//! | 2     | length in vectors                                  |
//! | 3-5   | unified-buffer address (24 bit)                    |
//! | 6-13  | host address, weight tile or accumulator address   |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::config::TpuConfig;
use crate::error::{EncodeError, TpuError, TpuResult};

/// Size of one instruction word in bytes
pub const INSTRUCTION_BYTES: usize = 14;

/// Largest unified-buffer address the 24-bit field can hold
pub const MAX_UB_ADDRESS: u32 = (1 << 24) - 1;

/// MMC: pop the weight FIFO and switch tiles at the first vector
pub const FLAG_SWITCH: u8 = 0x01;
/// MMC: overwrite the accumulator instead of adding to it
pub const FLAG_OVERWRITE: u8 = 0x02;
pub const ACTIVATION_SHIFT: u8 = 2;
pub const ACTIVATION_MASK: u8 = 0x0c;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,
    ReadHostMemory = 0x01,
    WriteHostMemory = 0x02,
    ReadWeights = 0x03,
    MatrixMultiply = 0x04,
    Activate = 0x05,
    Sync = 0x06,
    Halt = 0xff,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Opcode::Nop),
            0x01 => Some(Opcode::ReadHostMemory),
            0x02 => Some(Opcode::WriteHostMemory),
            0x03 => Some(Opcode::ReadWeights),
            0x04 => Some(Opcode::MatrixMultiply),
            0x05 => Some(Opcode::Activate),
            0x06 => Some(Opcode::Sync),
            0xff => Some(Opcode::Halt),
            _ => None,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::ReadHostMemory => "RHM",
            Opcode::WriteHostMemory => "WHM",
            Opcode::ReadWeights => "RW",
            Opcode::MatrixMultiply => "MMC",
            Opcode::Activate => "ACT",
            Opcode::Sync => "SYNC",
            Opcode::Halt => "HLT",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    Nop,
    /// Host memory to unified buffer
    ReadHostMemory { host_addr: u64, ub_addr: u32, len: u8 },
    /// Unified buffer to host memory
    WriteHostMemory { ub_addr: u32, host_addr: u64, len: u8 },
    /// One tile from the weight store into the weight FIFO
    ReadWeights { weight_addr: u64 },
    /// Unified buffer through the array into the accumulator
    MatrixMultiply {
        ub_addr: u32,
        acc_addr: u32,
        len: u8,
        switch: bool,
        overwrite: bool,
    },
    /// Accumulator through the activation unit into the unified buffer
    Activate {
        acc_addr: u32,
        ub_addr: u32,
        len: u8,
        function: Activation,
    },
    /// Wait until the weight store has no fetch in flight
    Sync,
    Halt,
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Nop => Opcode::Nop,
            Instruction::ReadHostMemory { .. } => Opcode::ReadHostMemory,
            Instruction::WriteHostMemory { .. } => Opcode::WriteHostMemory,
            Instruction::ReadWeights { .. } => Opcode::ReadWeights,
            Instruction::MatrixMultiply { .. } => Opcode::MatrixMultiply,
            Instruction::Activate { .. } => Opcode::Activate,
            Instruction::Sync => Opcode::Sync,
            Instruction::Halt => Opcode::Halt,
        }
    }

    /// Cycles the instruction occupies once dispatched
    ///
    /// SYNC reports its one-cycle minimum; the scheduler extends it while a
    /// weight fetch is outstanding.
    pub fn latency(&self, config: &TpuConfig, weight_bytes: usize) -> u64 {
        match *self {
            Instruction::Nop | Instruction::Sync | Instruction::Halt => 1,
            Instruction::ReadHostMemory { len, .. } | Instruction::WriteHostMemory { len, .. } => {
                len as u64
            }
            Instruction::ReadWeights { .. } => config.weight_transfer_cycles(weight_bytes),
            Instruction::MatrixMultiply { len, .. } => config.matmul_cycles(len as usize),
            Instruction::Activate { len, .. } => len as u64 + 1,
        }
    }

    pub fn encode(&self) -> Result<InstructionWord, EncodeError> {
        let (flags, len, ub_addr, ext) = match *self {
            Instruction::Nop | Instruction::Sync | Instruction::Halt => (0, 0, 0, 0),
            Instruction::ReadHostMemory {
                host_addr,
                ub_addr,
                len,
            } => (0, len, ub_addr, host_addr),
            Instruction::WriteHostMemory {
                ub_addr,
                host_addr,
                len,
            } => (0, len, ub_addr, host_addr),
            Instruction::ReadWeights { weight_addr } => (0, 0, 0, weight_addr),
            Instruction::MatrixMultiply {
                ub_addr,
                acc_addr,
                len,
                switch,
                overwrite,
            } => {
                let mut flags = 0;
                if switch {
                    flags |= FLAG_SWITCH;
                }
                if overwrite {
                    flags |= FLAG_OVERWRITE;
                }
                (flags, len, ub_addr, acc_addr as u64)
            }
            Instruction::Activate {
                acc_addr,
                ub_addr,
                len,
                function,
            } => (
                function.selector() << ACTIVATION_SHIFT,
                len,
                ub_addr,
                acc_addr as u64,
            ),
        };

        if ub_addr > MAX_UB_ADDRESS {
            return Err(EncodeError::UbAddressOverflow(ub_addr));
        }

        let mut bytes = [0u8; INSTRUCTION_BYTES];
        bytes[0] = self.opcode() as u8;
        bytes[1] = flags;
        bytes[2] = len;
        bytes[3..6].copy_from_slice(&ub_addr.to_le_bytes()[..3]);
        bytes[6..14].copy_from_slice(&ext.to_le_bytes());
        Ok(InstructionWord(bytes))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Instruction::Nop | Instruction::Sync | Instruction::Halt => {
                write!(f, "{}", self.opcode())
            }
            Instruction::ReadHostMemory {
                host_addr,
                ub_addr,
                len,
            } => write!(f, "RHM host[{}] -> ub[{}] x{}", host_addr, ub_addr, len),
            Instruction::WriteHostMemory {
                ub_addr,
                host_addr,
                len,
            } => write!(f, "WHM ub[{}] -> host[{}] x{}", ub_addr, host_addr, len),
            Instruction::ReadWeights { weight_addr } => write!(f, "RW tile[{}]", weight_addr),
            Instruction::MatrixMultiply {
                ub_addr,
                acc_addr,
                len,
                switch,
                overwrite,
            } => {
                let mut suffix = String::new();
                if switch {
                    suffix.push('S');
                }
                if overwrite {
                    suffix.push('O');
                }
                if !suffix.is_empty() {
                    suffix.insert(0, '.');
                }
                write!(f, "MMC{} ub[{}] -> acc[{}] x{}", suffix, ub_addr, acc_addr, len)
            }
            Instruction::Activate {
                acc_addr,
                ub_addr,
                len,
                function,
            } => write!(
                f,
                "ACT.{} acc[{}] -> ub[{}] x{}",
                function, acc_addr, ub_addr, len
            ),
        }
    }
}

/// Raw 14-byte instruction word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstructionWord(pub [u8; INSTRUCTION_BYTES]);

impl InstructionWord {
    pub fn opcode_byte(&self) -> u8 {
        self.0[0]
    }

    pub fn flags(&self) -> u8 {
        self.0[1]
    }

    pub fn length(&self) -> u8 {
        self.0[2]
    }

    pub fn ub_addr(&self) -> u32 {
        u32::from_le_bytes([self.0[3], self.0[4], self.0[5], 0])
    }

    pub fn ext_addr(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.0[6..14]);
        u64::from_le_bytes(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Instruction memory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    words: Vec<InstructionWord>,
}

impl Program {
    pub fn new(words: Vec<InstructionWord>) -> Self {
        Self { words }
    }

    pub fn from_instructions(instructions: &[Instruction]) -> TpuResult<Self> {
        let words = instructions
            .iter()
            .map(Instruction::encode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { words })
    }

    /// Parse a binary image of concatenated instruction words
    pub fn from_bytes(bytes: &[u8]) -> TpuResult<Self> {
        if bytes.len() % INSTRUCTION_BYTES != 0 {
            return Err(TpuError::program(format!(
                "image of {} bytes is not a multiple of {}",
                bytes.len(),
                INSTRUCTION_BYTES
            )));
        }
        let words = bytes
            .chunks_exact(INSTRUCTION_BYTES)
            .map(|chunk| {
                let mut word = [0u8; INSTRUCTION_BYTES];
                word.copy_from_slice(chunk);
                InstructionWord(word)
            })
            .collect();
        Ok(Self { words })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.words
            .iter()
            .flat_map(|w| w.as_bytes().iter().copied())
            .collect()
    }

    pub fn get(&self, pc: usize) -> Option<&InstructionWord> {
        self.words.get(pc)
    }

    pub fn words(&self) -> &[InstructionWord] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}
