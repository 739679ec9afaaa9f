//! Emitting bytecode programmatically.

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};

use crate::util::UInt160;

use super::error::{VmError, VmResult};
use super::opcode::OpCode;
use super::stack_item::bigint_to_bytes;

/// Builds a script opcode by opcode; used for redeem scripts and tests.
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    script: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        ScriptBuilder::default()
    }

    pub fn into_script(self) -> Vec<u8> {
        self.script
    }

    pub fn emit(&mut self, op: OpCode) -> &mut Self {
        self.script.push(op.byte());
        self
    }

    pub fn emit_raw(&mut self, data: &[u8]) -> &mut Self {
        self.script.extend_from_slice(data);
        self
    }

    /// Pushes an integer using the shortest encoding: the dedicated
    /// opcodes for -1..=16, byte pushes otherwise.
    pub fn emit_push_int(&mut self, value: i64) -> VmResult<&mut Self> {
        match value {
            -1 => Ok(self.emit(OpCode::PushM1)),
            0 => Ok(self.emit(OpCode::Push0)),
            1..=16 => Ok(self.emit(OpCode::Push(value as u8))),
            _ => self.emit_push_bytes(&bigint_to_bytes(&BigInt::from(value))),
        }
    }

    /// Pushes a byte string with the width-appropriate push opcode.
    pub fn emit_push_bytes(&mut self, data: &[u8]) -> VmResult<&mut Self> {
        match data.len() {
            0 => {
                self.emit(OpCode::Push0);
            }
            n @ 1..=75 => {
                self.script.push(n as u8);
                self.script.extend_from_slice(data);
            }
            n @ 76..=0xff => {
                self.emit(OpCode::PushData1);
                self.script.push(n as u8);
                self.script.extend_from_slice(data);
            }
            n @ 0x100..=0xffff => {
                self.emit(OpCode::PushData2);
                self.script.extend_from_slice(&(n as u16).to_le_bytes());
                self.script.extend_from_slice(data);
            }
            n if n <= super::MAX_ITEM_SIZE => {
                self.emit(OpCode::PushData4);
                self.script.extend_from_slice(&(n as u32).to_le_bytes());
                self.script.extend_from_slice(data);
            }
            n => return Err(VmError::ItemTooLarge(n)),
        }
        Ok(self)
    }

    pub fn emit_push_bigint(&mut self, value: &BigInt) -> VmResult<&mut Self> {
        if value.abs().bits() > super::MAX_INTEGER_BITS as u64 {
            return Err(VmError::IntegerOverflow);
        }
        match value.to_i64() {
            Some(small @ -1..=16) => self.emit_push_int(small),
            _ => self.emit_push_bytes(&bigint_to_bytes(value)),
        }
    }

    pub fn emit_push_bool(&mut self, value: bool) -> &mut Self {
        // PUSHT / PUSHF
        if value {
            self.emit(OpCode::Push(1))
        } else {
            self.emit(OpCode::Push0)
        }
    }

    /// `SYSCALL` with a name operand; names are limited to 252 bytes.
    pub fn emit_syscall(&mut self, name: &str) -> VmResult<&mut Self> {
        if name.is_empty() || name.len() > 252 {
            return Err(VmError::runtime(format!(
                "invalid syscall name length {}",
                name.len()
            )));
        }
        self.emit(OpCode::Syscall);
        self.script.push(name.len() as u8);
        self.script.extend_from_slice(name.as_bytes());
        Ok(self)
    }

    pub fn emit_appcall(&mut self, script_hash: &UInt160, tail: bool) -> &mut Self {
        self.emit(if tail { OpCode::TailCall } else { OpCode::AppCall });
        self.script.extend_from_slice(&script_hash.bytes());
        self
    }

    pub fn emit_jump(&mut self, op: OpCode, offset: i16) -> &mut Self {
        self.emit(op);
        self.script.extend_from_slice(&offset.to_le_bytes());
        self
    }
}

/// One decoded instruction of a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instr {
    pub ip: usize,
    pub op: OpCode,
    pub operand: Vec<u8>,
}

/// Walks a program, decoding each instruction and its operand. Stops at
/// the first malformed instruction, returning it as an error.
pub fn disassemble(script: &[u8]) -> Result<Vec<Instr>, VmError> {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::context::Context;
    use super::stack::Stack;

    let estack = Rc::new(RefCell::new(Stack::new()));
    let astack = Rc::new(RefCell::new(Stack::new()));
    let mut ctx = Context::new(script.to_vec(), estack, astack);
    let mut instrs = Vec::new();
    loop {
        let (op, operand) = ctx.next()?;
        let ip = ctx.ip();
        if ip >= script.len() {
            break;
        }
        instrs.push(Instr { ip, op, operand });
    }
    Ok(instrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_int_encodings() {
        let mut b = ScriptBuilder::new();
        b.emit_push_int(-1).unwrap();
        b.emit_push_int(0).unwrap();
        b.emit_push_int(16).unwrap();
        b.emit_push_int(17).unwrap();
        assert_eq!(b.into_script(), vec![0x4f, 0x00, 0x60, 0x01, 17]);
    }

    #[test]
    fn push_bytes_width_selection() {
        let mut b = ScriptBuilder::new();
        b.emit_push_bytes(&[0xaa; 75]).unwrap();
        b.emit_push_bytes(&[0xbb; 76]).unwrap();
        b.emit_push_bytes(&[0xcc; 300]).unwrap();
        let script = b.into_script();
        assert_eq!(script[0], 75);
        assert_eq!(script[76], 0x4c); // PUSHDATA1
        assert_eq!(script[76 + 2 + 76], 0x4d); // PUSHDATA2
    }

    #[test]
    fn disassemble_round_trip() {
        let mut b = ScriptBuilder::new();
        b.emit_push_int(2).unwrap();
        b.emit_push_int(3).unwrap();
        b.emit(OpCode::Add);
        b.emit(OpCode::Ret);
        let script = b.into_script();
        let instrs = disassemble(&script).unwrap();
        let ops: Vec<OpCode> = instrs.iter().map(|i| i.op).collect();
        assert_eq!(
            ops,
            vec![OpCode::Push(2), OpCode::Push(3), OpCode::Add, OpCode::Ret]
        );
    }

    #[test]
    fn syscall_name_bounds() {
        let mut b = ScriptBuilder::new();
        assert!(b.emit_syscall("").is_err());
        assert!(b.emit_syscall(&"x".repeat(253)).is_err());
        assert!(b.emit_syscall("Cobalt.Runtime.Log").is_ok());
    }
}
