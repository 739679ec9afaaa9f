//! Execution contexts on the invocation stack.

use std::cell::RefCell;
use std::rc::Rc;

use super::error::{VmError, VmResult};
use super::opcode::OpCode;
use super::stack::Stack;
use super::MAX_ITEM_SIZE;

/// One frame of the invocation stack: a script, the instruction pointer
/// and the evaluation/alt stacks the frame operates on.
///
/// Contexts created by `CALL`/`JMP` share the caller's stacks; the typed
/// call opcodes (`CALLI` and friends) bind fresh ones.
#[derive(Clone)]
pub struct Context {
    script: Rc<[u8]>,
    ip: usize,
    next_ip: usize,
    /// Number of values returned to the caller; -1 means "everything".
    pub rvcount: i32,
    break_points: Vec<usize>,
    pub estack: Rc<RefCell<Stack>>,
    pub astack: Rc<RefCell<Stack>>,
}

impl Context {
    pub fn new(script: Vec<u8>, estack: Rc<RefCell<Stack>>, astack: Rc<RefCell<Stack>>) -> Self {
        Context {
            script: script.into(),
            ip: 0,
            next_ip: 0,
            rvcount: -1,
            break_points: Vec::new(),
            estack,
            astack,
        }
    }

    /// Position of the most recently fetched instruction.
    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn script(&self) -> &[u8] {
        &self.script
    }

    pub fn add_break_point(&mut self, ip: usize) {
        self.break_points.push(ip);
    }

    pub fn at_break_point(&self) -> bool {
        self.break_points.contains(&self.next_ip)
    }

    /// Absolute jump; the target may be one past the end (implicit RET).
    pub fn jump(&mut self, target: usize) -> VmResult<()> {
        if target > self.script.len() {
            return Err(VmError::runtime(format!(
                "invalid jump offset {target} with ip at {}",
                self.ip
            )));
        }
        self.next_ip = target;
        Ok(())
    }

    fn read(&mut self, n: usize) -> VmResult<Vec<u8>> {
        if self.next_ip + n > self.script.len() {
            return Err(VmError::runtime("failed to read instruction operand"));
        }
        let data = self.script[self.next_ip..self.next_ip + n].to_vec();
        self.next_ip += n;
        Ok(data)
    }

    fn read_le(&mut self, width: usize) -> VmResult<usize> {
        let bytes = self.read(width)?;
        let mut value = 0usize;
        for (i, b) in bytes.iter().enumerate() {
            value |= (*b as usize) << (8 * i);
        }
        Ok(value)
    }

    /// Fetches the next instruction and its immediate operand. Running off
    /// the end of the program yields an implicit `RET`.
    pub fn next(&mut self) -> VmResult<(OpCode, Vec<u8>)> {
        self.ip = self.next_ip;
        if self.ip >= self.script.len() {
            return Ok((OpCode::Ret, Vec::new()));
        }
        let op = OpCode::from_byte(self.script[self.ip]);
        self.next_ip += 1;

        let operand = match op {
            OpCode::PushBytes(n) => self.read(n as usize)?,
            OpCode::PushData1 => {
                let n = self.read_le(1)?;
                self.read(n)?
            }
            OpCode::PushData2 => {
                let n = self.read_le(2)?;
                self.read(n)?
            }
            OpCode::PushData4 => {
                let n = self.read_le(4)?;
                if n > MAX_ITEM_SIZE {
                    return Err(VmError::ItemTooLarge(n));
                }
                self.read(n)?
            }
            OpCode::Jmp | OpCode::JmpIf | OpCode::JmpIfNot | OpCode::Call => self.read(2)?,
            OpCode::AppCall | OpCode::TailCall => self.read(20)?,
            OpCode::Syscall => {
                let n = self.read_le(1)?;
                self.read(n)?
            }
            OpCode::CallI => self.read(4)?,
            OpCode::CallE | OpCode::CallET => self.read(22)?,
            OpCode::CallED | OpCode::CallEDT => self.read(2)?,
            _ => Vec::new(),
        };
        Ok((op, operand))
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("ip", &self.ip)
            .field("next_ip", &self.next_ip)
            .field("script_len", &self.script.len())
            .field("rvcount", &self.rvcount)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(script: &[u8]) -> Context {
        let estack = Rc::new(RefCell::new(Stack::new()));
        let astack = Rc::new(RefCell::new(Stack::new()));
        Context::new(script.to_vec(), estack, astack)
    }

    #[test]
    fn pushbytes_operand() {
        let mut c = ctx(&[0x03, 0xaa, 0xbb, 0xcc, 0x61]);
        let (op, operand) = c.next().unwrap();
        assert_eq!(op, OpCode::PushBytes(3));
        assert_eq!(operand, vec![0xaa, 0xbb, 0xcc]);
        let (op, _) = c.next().unwrap();
        assert_eq!(op, OpCode::Nop);
    }

    #[test]
    fn pushdata2_length_is_le() {
        let mut script = vec![0x4d, 0x02, 0x00, 0x11, 0x22];
        let mut c = ctx(&script);
        let (op, operand) = c.next().unwrap();
        assert_eq!(op, OpCode::PushData2);
        assert_eq!(operand, vec![0x11, 0x22]);

        // truncated operand
        script.pop();
        let mut c = ctx(&script);
        assert!(c.next().is_err());
    }

    #[test]
    fn end_of_program_is_ret() {
        let mut c = ctx(&[0x61]);
        assert_eq!(c.next().unwrap().0, OpCode::Nop);
        assert_eq!(c.next().unwrap().0, OpCode::Ret);
        assert_eq!(c.next().unwrap().0, OpCode::Ret);
    }

    #[test]
    fn break_point_matches_next_instruction() {
        let mut c = ctx(&[0x61, 0x61]);
        c.add_break_point(1);
        assert!(!c.at_break_point());
        c.next().unwrap();
        assert!(c.at_break_point());
    }
}
