//! Instruction decoder
//!
//! Turns a raw word into an [`Instruction`] and checks every address range
//! against the configured on-chip capacities. Fields an opcode does not use
//! are ignored.
//!
//! Encoding only checks that fields fit the word, so an instruction can
//! encode and still fail to decode on a core with smaller buffers. Every
//! instruction that encodes and whose ranges fit the decoder's capacities
//! decodes back to itself.

use crate::activation::Activation;
use crate::config::TpuConfig;
use crate::error::{DecodeError, Memory};
use crate::isa::{
    Instruction, InstructionWord, Opcode, ACTIVATION_MASK, ACTIVATION_SHIFT, FLAG_OVERWRITE,
    FLAG_SWITCH,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoder {
    ub_capacity: u64,
    acc_capacity: u64,
}

impl Decoder {
    pub fn new(config: &TpuConfig) -> Self {
        Self {
            ub_capacity: config.ub_capacity as u64,
            acc_capacity: config.acc_capacity as u64,
        }
    }

    pub fn decode(&self, word: &InstructionWord) -> Result<Instruction, DecodeError> {
        let opcode =
            Opcode::from_byte(word.opcode_byte()).ok_or(DecodeError::UnknownOpcode(word.opcode_byte()))?;
        let flags = word.flags();
        let len = word.length();
        let ub_addr = word.ub_addr();
        let ext = word.ext_addr();

        let allowed = match opcode {
            Opcode::MatrixMultiply => FLAG_SWITCH | FLAG_OVERWRITE,
            Opcode::Activate => ACTIVATION_MASK,
            _ => 0,
        };
        if flags & !allowed != 0 {
            return Err(DecodeError::InvalidFlags {
                mnemonic: opcode.mnemonic(),
                flags,
            });
        }

        let instruction = match opcode {
            Opcode::Nop => Instruction::Nop,
            Opcode::Sync => Instruction::Sync,
            Opcode::Halt => Instruction::Halt,
            Opcode::ReadWeights => Instruction::ReadWeights { weight_addr: ext },
            Opcode::ReadHostMemory => {
                self.check_transfer(opcode, len)?;
                self.check_ub(ub_addr, len)?;
                check_host(ext, len)?;
                Instruction::ReadHostMemory {
                    host_addr: ext,
                    ub_addr,
                    len,
                }
            }
            Opcode::WriteHostMemory => {
                self.check_transfer(opcode, len)?;
                self.check_ub(ub_addr, len)?;
                check_host(ext, len)?;
                Instruction::WriteHostMemory {
                    ub_addr,
                    host_addr: ext,
                    len,
                }
            }
            Opcode::MatrixMultiply => {
                self.check_transfer(opcode, len)?;
                self.check_ub(ub_addr, len)?;
                let acc_addr = self.check_acc(ext, len)?;
                Instruction::MatrixMultiply {
                    ub_addr,
                    acc_addr,
                    len,
                    switch: flags & FLAG_SWITCH != 0,
                    overwrite: flags & FLAG_OVERWRITE != 0,
                }
            }
            Opcode::Activate => {
                let selector = (flags & ACTIVATION_MASK) >> ACTIVATION_SHIFT;
                let function =
                    Activation::from_selector(selector).ok_or(DecodeError::ReservedActivation(selector))?;
                self.check_transfer(opcode, len)?;
                let acc_addr = self.check_acc(ext, len)?;
                self.check_ub(ub_addr, len)?;
                Instruction::Activate {
                    acc_addr,
                    ub_addr,
                    len,
                    function,
                }
            }
        };
        Ok(instruction)
    }

    fn check_transfer(&self, opcode: Opcode, len: u8) -> Result<(), DecodeError> {
        if len == 0 {
            return Err(DecodeError::ZeroLength {
                mnemonic: opcode.mnemonic(),
            });
        }
        Ok(())
    }

    fn check_ub(&self, addr: u32, len: u8) -> Result<(), DecodeError> {
        check_range(Memory::UnifiedBuffer, addr as u64, len, self.ub_capacity)
    }

    fn check_acc(&self, addr: u64, len: u8) -> Result<u32, DecodeError> {
        check_range(Memory::Accumulator, addr, len, self.acc_capacity)?;
        // Capacity never exceeds u32::MAX, so an in-range address fits
        u32::try_from(addr).map_err(|_| DecodeError::AddressOutOfRange {
            memory: Memory::Accumulator,
            address: addr,
            length: len as u64,
            capacity: self.acc_capacity,
        })
    }
}

fn check_range(memory: Memory, address: u64, len: u8, capacity: u64) -> Result<(), DecodeError> {
    match address.checked_add(len as u64) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(DecodeError::AddressOutOfRange {
            memory,
            address,
            length: len as u64,
            capacity,
        }),
    }
}

/// The host range must not wrap the 64-bit address space
fn check_host(address: u64, len: u8) -> Result<(), DecodeError> {
    check_range(Memory::HostMemory, address, len, u64::MAX)
}
