//! The virtual machine: state, execution loop and opcode dispatch.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use tracing::debug;

use crate::crypto::hash;
use crate::crypto::keys::PublicKey;
use crate::util::{UInt160, UInt256};

use super::context::Context;
use super::error::{VmError, VmResult};
use super::interop::{InteropEntry, InteropFn};
use super::opcode::OpCode;
use super::serialization;
use super::stack::{SharedAccount, SizeAccount, Stack};
use super::stack_item::StackItem;
use super::{MAX_ARRAY_SIZE, MAX_INTEGER_BITS, MAX_INVOCATION_STACK_SIZE, MAX_ITEM_SIZE, MAX_STACK_SIZE};

/// VM execution state flags. Halt, fault and break are not exclusive of
/// each other in transient combinations, hence a flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VmState(u8);

impl VmState {
    pub const NONE: VmState = VmState(0);
    pub const HALT: VmState = VmState(1);
    pub const FAULT: VmState = VmState(1 << 1);
    pub const BREAK: VmState = VmState(1 << 2);

    pub fn has(self, flag: VmState) -> bool {
        self.0 & flag.0 != 0
    }

    pub fn insert(&mut self, flag: VmState) {
        self.0 |= flag.0;
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == VmState::NONE {
            return f.write_str("NONE");
        }
        let mut parts = Vec::new();
        if self.has(VmState::HALT) {
            parts.push("HALT");
        }
        if self.has(VmState::FAULT) {
            parts.push("FAULT");
        }
        if self.has(VmState::BREAK) {
            parts.push("BREAK");
        }
        f.write_str(&parts.join(", "))
    }
}

/// Callback resolving a script hash to contract bytecode for the call
/// opcodes.
pub type ScriptGetter = Box<dyn Fn(&UInt160) -> Option<Vec<u8>>>;

/// A stack-based interpreter for contract and witness scripts.
pub struct Vm {
    state: VmState,
    istack: Vec<Context>,
    estack: Rc<RefCell<Stack>>,
    astack: Rc<RefCell<Stack>>,
    account: SharedAccount,

    interops: HashMap<String, InteropEntry>,
    script_getter: Option<ScriptGetter>,

    /// Digest verified by CHECKSIG/CHECKMULTISIG, normally the sighash of
    /// the enclosing transaction.
    checked_hash: Option<UInt256>,

    /// Items emitted through the runtime notification hook.
    notifications: Vec<StackItem>,

    /// Out-of-range SUBSTR offsets yield an empty string instead of a
    /// fault while this is set; deployed scripts depend on it.
    pub legacy_slices: bool,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        let account = SizeAccount::new_shared();
        let mut vm = Vm {
            state: VmState::HALT,
            istack: Vec::new(),
            estack: Rc::new(RefCell::new(Stack::with_account(account.clone()))),
            astack: Rc::new(RefCell::new(Stack::with_account(account.clone()))),
            account,
            interops: HashMap::new(),
            script_getter: None,
            checked_hash: None,
            notifications: Vec::new(),
            legacy_slices: true,
        };
        vm.register_defaults();
        vm
    }

    fn register_defaults(&mut self) {
        self.register_interop("Cobalt.Runtime.Log", 1, Rc::new(runtime_log));
        self.register_interop("Cobalt.Runtime.Notify", 1, Rc::new(runtime_notify));
        for name in ["Cobalt.Runtime.Serialize", "System.Runtime.Serialize"] {
            self.register_interop(name, 1, Rc::new(runtime_serialize));
        }
        for name in ["Cobalt.Runtime.Deserialize", "System.Runtime.Deserialize"] {
            self.register_interop(name, 1, Rc::new(runtime_deserialize));
        }
    }

    /// Registers a named host function callable via SYSCALL.
    /// Re-registration replaces the previous hook.
    pub fn register_interop(&mut self, name: &str, price: u32, func: InteropFn) {
        self.interops.insert(name.to_string(), InteropEntry { func, price });
    }

    /// Sets the digest CHECKSIG/CHECKMULTISIG verify against.
    pub fn set_checked_hash(&mut self, hash: UInt256) {
        self.checked_hash = Some(hash);
    }

    /// Sets the contract-script resolver used by the call opcodes.
    pub fn set_script_getter(&mut self, getter: ScriptGetter) {
        self.script_getter = Some(getter);
    }

    /// Initializes the VM with a program, clearing all previous state.
    pub fn load(&mut self, script: Vec<u8>) {
        self.istack.clear();
        self.estack.borrow_mut().clear();
        self.astack.borrow_mut().clear();
        self.notifications.clear();
        self.state = VmState::NONE;
        self.load_script(script);
    }

    /// Pushes a new context running `script` on the current stacks.
    pub fn load_script(&mut self, script: Vec<u8>) {
        let ctx = Context::new(script, self.estack.clone(), self.astack.clone());
        self.istack.push(ctx);
    }

    /// Pushes the entry-point arguments: the args array, then the method.
    pub fn load_args(&mut self, method: Option<&[u8]>, args: Vec<StackItem>) {
        if !args.is_empty() {
            self.push(StackItem::new_array(args));
        }
        if let Some(method) = method {
            self.push(StackItem::from(method));
        }
    }

    pub fn context(&self) -> Option<&Context> {
        self.istack.last()
    }

    pub fn context_mut(&mut self) -> Option<&mut Context> {
        self.istack.last_mut()
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn has_failed(&self) -> bool {
        self.state.has(VmState::FAULT)
    }

    pub fn has_halted(&self) -> bool {
        self.state.has(VmState::HALT)
    }

    pub fn has_stopped(&self) -> bool {
        self.has_halted() || self.has_failed()
    }

    pub fn at_break_point(&self) -> bool {
        self.state.has(VmState::BREAK)
    }

    pub fn ready(&self) -> bool {
        !self.istack.is_empty()
    }

    pub fn invocation_depth(&self) -> usize {
        self.istack.len()
    }

    /// Total item count across the accounted stacks.
    pub fn stack_size(&self) -> usize {
        self.account.borrow().total()
    }

    pub fn notifications(&self) -> &[StackItem] {
        &self.notifications
    }

    pub fn take_notifications(&mut self) -> Vec<StackItem> {
        std::mem::take(&mut self.notifications)
    }

    /// Number of items on the evaluation stack.
    pub fn estack_len(&self) -> usize {
        self.estack.borrow().len()
    }

    /// Pops the result off the evaluation stack, if any.
    pub fn pop_result(&mut self) -> Option<StackItem> {
        self.estack.borrow_mut().pop().ok()
    }

    pub fn add_break_point(&mut self, ip: usize) {
        if let Some(ctx) = self.context_mut() {
            ctx.add_break_point(ip);
        }
    }

    pub fn add_break_point_rel(&mut self, offset: usize) {
        if let Some(ctx) = self.context_mut() {
            let ip = ctx.ip() + offset;
            ctx.add_break_point(ip);
        }
    }

    // -- stack helpers -----------------------------------------------------

    pub fn push(&self, item: StackItem) {
        self.estack.borrow_mut().push(item);
    }

    pub fn pop(&self) -> VmResult<StackItem> {
        self.estack.borrow_mut().pop()
    }

    fn pop_bigint(&self) -> VmResult<BigInt> {
        self.pop()?.to_bigint()
    }

    fn pop_int(&self) -> VmResult<i64> {
        self.pop_bigint()?
            .to_i64()
            .ok_or_else(|| VmError::runtime("integer operand out of range"))
    }

    fn pop_bytes(&self) -> VmResult<Vec<u8>> {
        self.pop()?.to_bytes()
    }

    fn pop_bool(&self) -> VmResult<bool> {
        self.pop()?.to_bool()
    }

    fn check_integer(value: &BigInt) -> VmResult<BigInt> {
        if value.abs().bits() > MAX_INTEGER_BITS as u64 {
            return Err(VmError::IntegerOverflow);
        }
        Ok(value.clone())
    }

    fn pop_checked_bigint(&self) -> VmResult<BigInt> {
        Self::check_integer(&self.pop_bigint()?)
    }

    fn check_invocation_size(&self) -> VmResult<()> {
        if self.istack.len() >= MAX_INVOCATION_STACK_SIZE {
            return Err(VmError::InvocationOverflow);
        }
        Ok(())
    }

    fn check_stack_size(&self) -> VmResult<()> {
        if self.account.borrow().total() > MAX_STACK_SIZE {
            return Err(VmError::StackOverflow);
        }
        Ok(())
    }

    // -- execution ---------------------------------------------------------

    /// Runs the loaded program until it halts or faults.
    pub fn run(&mut self) -> VmResult<()> {
        if !self.ready() {
            self.state = VmState::FAULT;
            return Err(VmError::NoProgram);
        }
        if self.state.has(VmState::FAULT) {
            // A failed VM's state is undefined; refuse to resume.
            return Err(VmError::Faulted);
        }
        self.state = VmState::NONE;
        loop {
            if self.context().is_some_and(|ctx| ctx.at_break_point()) {
                self.state.insert(VmState::BREAK);
            }
            if self.state.has(VmState::FAULT) {
                return Err(VmError::Faulted);
            }
            if self.state.has(VmState::HALT) || self.state.has(VmState::BREAK) {
                return Ok(());
            }
            self.step()?;
        }
    }

    /// Executes a single instruction. Every failure is wrapped with the
    /// faulting instruction pointer and opcode and flips the VM to fault;
    /// this is the only error-surfacing path out of opcode handlers.
    pub fn step(&mut self) -> VmResult<()> {
        let fetched = {
            let ctx = self.context_mut().ok_or(VmError::NoProgram)?;
            ctx.next()
        };
        let ip = self.context().map(|c| c.ip()).unwrap_or_default();
        match fetched {
            Err(err) => {
                // The opcode byte itself was readable; only its operand
                // was truncated. Record it for the error report.
                let op = self
                    .context()
                    .and_then(|c| c.script().get(ip).copied())
                    .map(OpCode::from_byte)
                    .unwrap_or(OpCode::Ret);
                self.state = VmState::FAULT;
                Err(VmError::At {
                    ip,
                    op,
                    source: Box::new(err),
                })
            }
            Ok((op, operand)) => {
                let result = self
                    .execute(op, &operand)
                    .and_then(|_| self.check_stack_size());
                if let Err(err) = result {
                    self.state = VmState::FAULT;
                    return Err(VmError::At {
                        ip,
                        op,
                        source: Box::new(err),
                    });
                }
                Ok(())
            }
        }
    }

    /// Steps one instruction, following calls into their contexts.
    pub fn step_into(&mut self) -> VmResult<()> {
        if self.context().is_none() {
            self.state.insert(VmState::HALT);
        }
        if self.has_stopped() {
            return Ok(());
        }
        self.step()?;
        if self.context().is_some_and(|ctx| ctx.at_break_point()) {
            self.state = VmState::BREAK;
        }
        Ok(())
    }

    /// Runs until the current context is popped off the invocation stack.
    pub fn step_out(&mut self) -> VmResult<()> {
        if self.state == VmState::BREAK {
            self.state = VmState::NONE;
        } else {
            self.state = VmState::BREAK;
        }
        let expected = self.istack.len();
        let mut result = Ok(());
        while self.state == VmState::NONE && self.istack.len() >= expected {
            result = self.step_into();
            if result.is_err() {
                break;
            }
        }
        result
    }

    /// Steps one instruction, running any called function to completion.
    pub fn step_over(&mut self) -> VmResult<()> {
        if self.has_stopped() {
            return Ok(());
        }
        if self.state == VmState::BREAK {
            self.state = VmState::NONE;
        } else {
            self.state = VmState::BREAK;
        }
        let expected = self.istack.len();
        let mut result;
        loop {
            result = self.step_into();
            if result.is_err() || !(self.state == VmState::NONE && self.istack.len() > expected) {
                break;
            }
        }
        if self.state == VmState::NONE {
            self.state = VmState::BREAK;
        }
        result
    }

    fn execute(&mut self, op: OpCode, operand: &[u8]) -> VmResult<()> {
        use OpCode::*;
        match op {
            PushBytes(_) | PushData1 | PushData2 | PushData4 => {
                self.push(StackItem::from(operand));
            }
            Push0 => self.push(StackItem::from(Vec::<u8>::new())),
            PushM1 => self.push(StackItem::from(-1i64)),
            Push(n) => self.push(StackItem::from(n as i64)),

            // Stack shuffling.
            ToAltStack => {
                let item = self.pop()?;
                self.astack.borrow_mut().push(item);
            }
            FromAltStack => {
                let item = self.astack.borrow_mut().pop()?;
                self.push(item);
            }
            DupFromAltStack => {
                let item = self.astack.borrow().dup(0)?;
                self.push(item);
            }
            Dup => {
                let item = self.estack.borrow().dup(0)?;
                self.push(item);
            }
            Swap => self.estack.borrow_mut().swap(0, 1)?,
            Tuck => {
                let mut estack = self.estack.borrow_mut();
                let item = estack.dup(0)?;
                if estack.len() < 2 {
                    return Err(VmError::runtime("can't TUCK with a one-element stack"));
                }
                estack.insert_at(item, 2)?;
            }
            XDrop => {
                let n = self.pop_int()?;
                if n < 0 {
                    return Err(VmError::runtime("invalid length"));
                }
                self.estack.borrow_mut().remove_at(n as usize)?;
            }
            XSwap => {
                let n = self.pop_int()?;
                if n < 0 {
                    return Err(VmError::runtime("XSWAP: invalid length"));
                }
                if n > 0 {
                    self.estack.borrow_mut().swap(0, n as usize)?;
                }
            }
            XTuck => {
                let n = self.pop_int()?;
                if n <= 0 {
                    return Err(VmError::runtime("XTUCK: invalid length"));
                }
                let mut estack = self.estack.borrow_mut();
                let item = estack.dup(0)?;
                if n as usize > estack.len() {
                    return Err(VmError::runtime("can't push to the position specified"));
                }
                estack.insert_at(item, n as usize)?;
            }
            Rot => {
                let mut estack = self.estack.borrow_mut();
                let item = estack.remove_at(2)?;
                estack.push(item);
            }
            Depth => {
                let depth = self.estack.borrow().len();
                self.push(StackItem::from(depth));
            }
            Nip => {
                self.estack.borrow_mut().remove_at(1)?;
            }
            Over => {
                let item = self.estack.borrow().dup(1)?;
                self.push(item);
            }
            Pick => {
                let n = self.pop_int()?;
                if n < 0 {
                    return Err(VmError::runtime("negative stack depth"));
                }
                let item = self.estack.borrow().dup(n as usize)?;
                self.push(item);
            }
            Roll => {
                let n = self.pop_int()?;
                if n < 0 {
                    return Err(VmError::runtime("negative stack depth"));
                }
                if n > 0 {
                    let mut estack = self.estack.borrow_mut();
                    let item = estack.remove_at(n as usize)?;
                    estack.push(item);
                }
            }
            Drop => {
                self.pop()?;
            }

            // Slices.
            Cat => {
                let b = self.pop_bytes()?;
                let mut a = self.pop_bytes()?;
                if a.len() + b.len() > MAX_ITEM_SIZE {
                    return Err(VmError::ItemTooLarge(a.len() + b.len()));
                }
                a.extend_from_slice(&b);
                self.push(StackItem::from(a));
            }
            SubStr => {
                let l = self.pop_int()?;
                if l < 0 {
                    return Err(VmError::runtime("negative length"));
                }
                let o = self.pop_int()?;
                if o < 0 {
                    return Err(VmError::runtime("negative index"));
                }
                let s = self.pop_bytes()?;
                let (o, l) = (o as usize, l as usize);
                if o > s.len() {
                    if self.legacy_slices {
                        self.push(StackItem::from(Vec::<u8>::new()));
                        return Ok(());
                    }
                    return Err(VmError::runtime("invalid offset"));
                }
                let last = (o + l).min(s.len());
                self.push(StackItem::from(s[o..last].to_vec()));
            }
            Left => {
                let l = self.pop_int()?;
                if l < 0 {
                    return Err(VmError::runtime("negative length"));
                }
                let s = self.pop_bytes()?;
                let l = (l as usize).min(s.len());
                self.push(StackItem::from(s[..l].to_vec()));
            }
            Right => {
                let l = self.pop_int()?;
                if l < 0 {
                    return Err(VmError::runtime("negative length"));
                }
                let s = self.pop_bytes()?;
                if l as usize > s.len() {
                    return Err(VmError::runtime("not enough bytes"));
                }
                self.push(StackItem::from(s[s.len() - l as usize..].to_vec()));
            }
            Size => {
                let s = self.pop_bytes()?;
                self.push(StackItem::from(s.len()));
            }

            // Bit operations.
            Invert => {
                let a = self.pop_bigint()?;
                self.push(StackItem::Integer(!a));
            }
            And => {
                let b = self.pop_bigint()?;
                let a = self.pop_bigint()?;
                self.push(StackItem::Integer(a & b));
            }
            Or => {
                let b = self.pop_bigint()?;
                let a = self.pop_bigint()?;
                self.push(StackItem::Integer(a | b));
            }
            Xor => {
                let b = self.pop_bigint()?;
                let a = self.pop_bigint()?;
                self.push(StackItem::Integer(a ^ b));
            }
            Equal => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(StackItem::Bool(a.equals(&b)));
            }

            // Arithmetic.
            Add => {
                let a = self.pop_checked_bigint()?;
                let b = self.pop_checked_bigint()?;
                let c = Self::check_integer(&(a + b))?;
                self.push(StackItem::Integer(c));
            }
            Sub => {
                let b = self.pop_checked_bigint()?;
                let a = self.pop_checked_bigint()?;
                let c = Self::check_integer(&(a - b))?;
                self.push(StackItem::Integer(c));
            }
            Mul => {
                let a = self.pop_checked_bigint()?;
                let b = self.pop_checked_bigint()?;
                let c = Self::check_integer(&(a * b))?;
                self.push(StackItem::Integer(c));
            }
            Div => {
                let b = self.pop_checked_bigint()?;
                let a = self.pop_checked_bigint()?;
                if b.is_zero() {
                    return Err(VmError::runtime("division by zero"));
                }
                self.push(StackItem::Integer(a / b));
            }
            Mod => {
                let b = self.pop_checked_bigint()?;
                let a = self.pop_checked_bigint()?;
                if b.is_zero() {
                    return Err(VmError::runtime("division by zero"));
                }
                self.push(StackItem::Integer(a % b));
            }
            Shl | Shr => {
                let shift = self.pop_int()?;
                if shift == 0 {
                    return Ok(());
                }
                if !(-(MAX_INTEGER_BITS as i64)..=MAX_INTEGER_BITS as i64).contains(&shift) {
                    return Err(VmError::runtime(format!(
                        "shift operand must be between {} and {}",
                        -(MAX_INTEGER_BITS as i64),
                        MAX_INTEGER_BITS
                    )));
                }
                let a = self.pop_checked_bigint()?;
                // A negative count shifts the other way.
                let left = (op == Shl) == (shift > 0);
                let amount = shift.unsigned_abs() as usize;
                let result = if left { a << amount } else { a >> amount };
                let result = Self::check_integer(&result)?;
                self.push(StackItem::Integer(result));
            }
            BoolAnd => {
                let b = self.pop_bool()?;
                let a = self.pop_bool()?;
                self.push(StackItem::Bool(a && b));
            }
            BoolOr => {
                let b = self.pop_bool()?;
                let a = self.pop_bool()?;
                self.push(StackItem::Bool(a || b));
            }
            NumEqual => {
                let b = self.pop_bigint()?;
                let a = self.pop_bigint()?;
                self.push(StackItem::Bool(a == b));
            }
            NumNotEqual => {
                let b = self.pop_bigint()?;
                let a = self.pop_bigint()?;
                self.push(StackItem::Bool(a != b));
            }
            Lt => {
                let b = self.pop_bigint()?;
                let a = self.pop_bigint()?;
                self.push(StackItem::Bool(a < b));
            }
            Gt => {
                let b = self.pop_bigint()?;
                let a = self.pop_bigint()?;
                self.push(StackItem::Bool(a > b));
            }
            Lte => {
                let b = self.pop_bigint()?;
                let a = self.pop_bigint()?;
                self.push(StackItem::Bool(a <= b));
            }
            Gte => {
                let b = self.pop_bigint()?;
                let a = self.pop_bigint()?;
                self.push(StackItem::Bool(a >= b));
            }
            Min => {
                let b = self.pop_bigint()?;
                let a = self.pop_bigint()?;
                self.push(StackItem::Integer(a.min(b)));
            }
            Max => {
                let b = self.pop_bigint()?;
                let a = self.pop_bigint()?;
                self.push(StackItem::Integer(a.max(b)));
            }
            Within => {
                let b = self.pop_bigint()?;
                let a = self.pop_bigint()?;
                let x = self.pop_bigint()?;
                self.push(StackItem::Bool(a <= x && x < b));
            }
            Inc => {
                let x = self.pop_bigint()?;
                let a = Self::check_integer(&(x + 1))?;
                self.push(StackItem::Integer(a));
            }
            Dec => {
                let x = self.pop_bigint()?;
                let a = Self::check_integer(&(x - 1))?;
                self.push(StackItem::Integer(a));
            }
            Sign => {
                let x = self.pop_bigint()?;
                let sign: i64 = match x.sign() {
                    num_bigint::Sign::Minus => -1,
                    num_bigint::Sign::NoSign => 0,
                    num_bigint::Sign::Plus => 1,
                };
                self.push(StackItem::from(sign));
            }
            Negate => {
                let x = self.pop_bigint()?;
                self.push(StackItem::Integer(-x));
            }
            Abs => {
                let x = self.pop_bigint()?;
                self.push(StackItem::Integer(x.abs()));
            }
            Not => {
                let x = self.pop_bool()?;
                self.push(StackItem::Bool(!x));
            }
            Nz => {
                let x = self.pop_bigint()?;
                self.push(StackItem::Bool(!x.is_zero()));
            }

            // Collections.
            NewArray => {
                let item = self.pop()?;
                match item {
                    StackItem::Struct(list) => {
                        let copied = list.borrow().clone();
                        self.push(StackItem::new_array(copied));
                    }
                    StackItem::Array(_) => self.push(item),
                    other => {
                        let n = Self::collection_len(&other)?;
                        self.push(StackItem::new_array(vec![StackItem::Bool(false); n]));
                    }
                }
            }
            NewStruct => {
                let item = self.pop()?;
                match item {
                    StackItem::Array(list) => {
                        let copied = list.borrow().clone();
                        self.push(StackItem::new_struct(copied));
                    }
                    StackItem::Struct(_) => self.push(item),
                    other => {
                        let n = Self::collection_len(&other)?;
                        self.push(StackItem::new_struct(vec![StackItem::Bool(false); n]));
                    }
                }
            }
            NewMap => self.push(StackItem::new_map()),
            Append => {
                let item = self.pop()?;
                let target = self.pop()?;
                let value = item.clone_if_struct();
                let list = target
                    .as_list()
                    .ok_or_else(|| VmError::runtime("APPEND: not an array or struct"))?;
                if list.borrow().len() >= MAX_ARRAY_SIZE {
                    return Err(VmError::CollectionTooLarge);
                }
                list.borrow_mut().push(value.clone());
                self.account.borrow_mut().add(&value);
            }
            Pack => {
                let n = self.pop_int()?;
                if n < 0 || n as usize > self.estack.borrow().len() || n as usize > MAX_ARRAY_SIZE {
                    return Err(VmError::runtime("PACK: invalid length"));
                }
                let mut items = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    items.push(self.pop()?);
                }
                self.push(StackItem::new_array(items));
            }
            Unpack => {
                let item = self.pop()?;
                let list = item
                    .as_list()
                    .ok_or_else(|| VmError::runtime("UNPACK: not an array"))?;
                let elements = list.borrow().clone();
                let len = elements.len();
                for element in elements.into_iter().rev() {
                    self.push(element);
                }
                self.push(StackItem::from(len));
            }
            PickItem => {
                let key = self.pop()?;
                key.to_map_key()?;
                let obj = self.pop()?;
                match &obj {
                    StackItem::Array(list) | StackItem::Struct(list) => {
                        let index = Self::index_of(&key, list.borrow().len())?;
                        let item = list.borrow()[index].clone();
                        self.push(item);
                    }
                    StackItem::Map(map) => {
                        let map_key = key.to_map_key()?;
                        let value = map
                            .borrow()
                            .get(&map_key)
                            .cloned()
                            .ok_or_else(|| VmError::runtime("invalid key"))?;
                        self.push(value);
                    }
                    other => {
                        let bytes = other.to_bytes()?;
                        let index = Self::index_of(&key, bytes.len())?;
                        self.push(StackItem::from(bytes[index] as i64));
                    }
                }
            }
            SetItem => {
                let value = self.pop()?;
                let key = self.pop()?;
                key.to_map_key()?;
                let obj = self.pop()?;
                match &obj {
                    StackItem::Array(list) | StackItem::Struct(list) => {
                        let index = Self::index_of(&key, list.borrow().len())?;
                        let old = list.borrow()[index].clone();
                        self.account.borrow_mut().remove(&old);
                        list.borrow_mut()[index] = value.clone();
                        self.account.borrow_mut().add(&value);
                    }
                    StackItem::Map(map) => {
                        let map_key = key.to_map_key()?;
                        let existing = map.borrow().get(&map_key).cloned();
                        match existing {
                            Some(old) => self.account.borrow_mut().remove(&old),
                            None if map.borrow().len() >= MAX_ARRAY_SIZE => {
                                return Err(VmError::CollectionTooLarge);
                            }
                            None => {}
                        }
                        map.borrow_mut().insert(map_key, value.clone());
                        self.account.borrow_mut().add(&value);
                    }
                    other => {
                        return Err(VmError::runtime(format!(
                            "SETITEM: invalid item type {}",
                            other.type_name()
                        )));
                    }
                }
            }
            Reverse => {
                let item = self.pop()?;
                let list = item
                    .as_list()
                    .ok_or_else(|| VmError::runtime("REVERSE: not an array"))?;
                list.borrow_mut().reverse();
            }
            Remove => {
                let key = self.pop()?;
                key.to_map_key()?;
                let obj = self.pop()?;
                match &obj {
                    StackItem::Array(list) | StackItem::Struct(list) => {
                        let index = Self::index_of(&key, list.borrow().len())?;
                        let removed = list.borrow_mut().remove(index);
                        self.account.borrow_mut().remove(&removed);
                    }
                    StackItem::Map(map) => {
                        let map_key = key.to_map_key()?;
                        if let Some(removed) = map.borrow_mut().remove(&map_key) {
                            self.account.borrow_mut().remove(&removed);
                        }
                    }
                    _ => return Err(VmError::runtime("REMOVE: invalid type")),
                }
            }
            ArraySize => {
                let item = self.pop()?;
                let size = match &item {
                    StackItem::Array(list) | StackItem::Struct(list) => list.borrow().len(),
                    StackItem::Map(map) => map.borrow().len(),
                    other => other.to_bytes()?.len(),
                };
                self.push(StackItem::from(size));
            }
            Keys => {
                let item = self.pop()?;
                let StackItem::Map(map) = &item else {
                    return Err(VmError::runtime("KEYS: not a map"));
                };
                let keys: Vec<StackItem> =
                    map.borrow().keys().cloned().map(StackItem::from).collect();
                self.push(StackItem::new_array(keys));
            }
            Values => {
                let item = self.pop()?;
                let values: Vec<StackItem> = match &item {
                    StackItem::Array(list) | StackItem::Struct(list) => {
                        list.borrow().iter().map(|it| it.clone_if_struct()).collect()
                    }
                    StackItem::Map(map) => {
                        map.borrow().values().map(|it| it.clone_if_struct()).collect()
                    }
                    _ => return Err(VmError::runtime("VALUES: not a map, array or struct")),
                };
                self.push(StackItem::new_array(values));
            }
            HasKey => {
                let key = self.pop()?;
                key.to_map_key()?;
                let item = self.pop()?;
                let result = match &item {
                    StackItem::Array(list) | StackItem::Struct(list) => {
                        let index = key
                            .to_bigint()?
                            .to_i64()
                            .ok_or_else(|| VmError::runtime("index out of range"))?;
                        if index < 0 {
                            return Err(VmError::runtime("negative index"));
                        }
                        (index as usize) < list.borrow().len()
                    }
                    StackItem::Map(map) => map.borrow().contains_key(&key.to_map_key()?),
                    _ => return Err(VmError::runtime("HASKEY: wrong collection type")),
                };
                self.push(StackItem::Bool(result));
            }

            // Control flow.
            Jmp | JmpIf | JmpIfNot => {
                let offset = i16::from_le_bytes([operand[0], operand[1]]) as isize;
                let condition = match op {
                    Jmp => true,
                    JmpIf => self.pop_bool()?,
                    _ => !self.pop_bool()?,
                };
                if condition {
                    let ctx = self.context_mut().ok_or(VmError::NoProgram)?;
                    let target = ctx.ip() as isize + offset;
                    if target < 0 {
                        return Err(VmError::runtime("invalid negative jump offset"));
                    }
                    ctx.jump(target as usize)?;
                }
            }
            Call => {
                self.check_invocation_size()?;
                let mut new_ctx = self.context().ok_or(VmError::NoProgram)?.clone();
                new_ctx.rvcount = -1;
                self.istack.push(new_ctx);
                self.execute(OpCode::Jmp, operand)?;
            }
            Ret => self.execute_ret()?,
            AppCall | TailCall => {
                let hash = UInt160::from_slice(operand)
                    .ok_or_else(|| VmError::runtime("invalid script hash operand"))?;
                if op == AppCall {
                    self.check_invocation_size()?;
                }
                let script = self.resolve_script(&hash)?;
                if op == TailCall {
                    self.istack.pop();
                }
                self.load_script(script);
            }
            Syscall => {
                let name = String::from_utf8(operand.to_vec())
                    .map_err(|_| VmError::runtime("invalid syscall name"))?;
                let entry = self
                    .interops
                    .get(&name)
                    .cloned()
                    .ok_or(VmError::UnknownInterop(name))?;
                (entry.func)(self)?;
            }
            CallI | CallE | CallED | CallET | CallEDT => {
                self.execute_typed_call(op, operand)?;
            }

            // Crypto.
            Sha1 => {
                let data = self.pop_bytes()?;
                self.push(StackItem::from(hash::sha1(&data).to_vec()));
            }
            Sha256 => {
                let data = self.pop_bytes()?;
                self.push(StackItem::from(hash::sha256(&data).0.to_vec()));
            }
            Hash160 => {
                let data = self.pop_bytes()?;
                self.push(StackItem::from(hash::hash160(&data).0.to_vec()));
            }
            Hash256 => {
                let data = self.pop_bytes()?;
                self.push(StackItem::from(hash::double_sha256(&data).0.to_vec()));
            }
            CheckSig | Verify => {
                let key_bytes = self.pop_bytes()?;
                let signature = self.pop_bytes()?;
                let digest = if op == CheckSig {
                    self.checked_hash
                        .ok_or_else(|| VmError::runtime("VM is not set up for signature checks"))?
                } else {
                    let message = self.pop_bytes()?;
                    hash::sha256(&message)
                };
                let key = PublicKey::from_bytes(&key_bytes)
                    .map_err(|e| VmError::runtime(e.to_string()))?;
                self.push(StackItem::Bool(key.verify(&signature, &digest)));
            }
            CheckMultisig => self.execute_checkmultisig()?,

            Throw => return Err(VmError::runtime("THROW")),
            ThrowIfNot => {
                if !self.pop_bool()? {
                    return Err(VmError::runtime("THROWIFNOT"));
                }
            }

            Nop => {}
            Unknown(_) => return Err(VmError::UnknownOpcode(op)),
        }
        Ok(())
    }

    fn collection_len(item: &StackItem) -> VmResult<usize> {
        let n = item
            .to_bigint()?
            .to_i64()
            .ok_or(VmError::CollectionTooLarge)?;
        if n < 0 || n as usize > MAX_ARRAY_SIZE {
            return Err(VmError::CollectionTooLarge);
        }
        Ok(n as usize)
    }

    fn index_of(key: &StackItem, len: usize) -> VmResult<usize> {
        let index = key
            .to_bigint()?
            .to_i64()
            .ok_or_else(|| VmError::runtime("index out of range"))?;
        if index < 0 || index as usize >= len {
            return Err(VmError::runtime("invalid index"));
        }
        Ok(index as usize)
    }

    fn resolve_script(&self, script_hash: &UInt160) -> VmResult<Vec<u8>> {
        let getter = self
            .script_getter
            .as_ref()
            .ok_or_else(|| VmError::runtime("no script getter is set up"))?;
        getter(script_hash)
            .ok_or_else(|| VmError::runtime(format!("could not find script {script_hash}")))
    }

    fn execute_ret(&mut self) -> VmResult<()> {
        let old_ctx = self
            .istack
            .pop()
            .ok_or_else(|| VmError::runtime("RET with an empty invocation stack"))?;
        let mut rvcount = old_ctx.rvcount;
        let old_estack = old_ctx.estack.clone();

        if rvcount > 0 && (old_estack.borrow().len() as i32) < rvcount {
            return Err(VmError::runtime("missing some return elements"));
        }
        let Some(current) = self.istack.last() else {
            self.state.insert(VmState::HALT);
            return Ok(());
        };
        let new_estack = current.estack.clone();
        let new_astack = current.astack.clone();
        if !Rc::ptr_eq(&old_estack, &new_estack) {
            if rvcount < 0 {
                rvcount = old_estack.borrow().len() as i32;
            }
            // Move the bottom-most of the returned values first so the
            // order is preserved on the caller's stack.
            for i in (0..rvcount).rev() {
                let item = old_estack.borrow_mut().remove_at(i as usize)?;
                new_estack.borrow_mut().push(item);
            }
            self.estack = new_estack;
            self.astack = new_astack;
        }
        Ok(())
    }

    fn execute_typed_call(&mut self, op: OpCode, operand: &[u8]) -> VmResult<()> {
        use OpCode::*;
        let tail_call = op == CallET || op == CallEDT;
        let hash_on_stack = op == CallED || op == CallEDT;
        let extra = usize::from(hash_on_stack);

        let rvcount = operand[0] as i32;
        let pcount = operand[1] as usize;
        if self.estack.borrow().len() < pcount + extra {
            return Err(VmError::runtime("missing some parameters"));
        }
        if tail_call {
            let current_rv = self.context().ok_or(VmError::NoProgram)?.rvcount;
            if current_rv != rvcount {
                return Err(VmError::runtime("context and parameter rvcount mismatch"));
            }
        } else {
            self.check_invocation_size()?;
        }

        let mut new_ctx = if op == CallI {
            self.context().ok_or(VmError::NoProgram)?.clone()
        } else {
            let hash_bytes = if hash_on_stack {
                self.pop_bytes()?
            } else {
                operand[2..].to_vec()
            };
            let script_hash = UInt160::from_slice(&hash_bytes)
                .ok_or_else(|| VmError::runtime("invalid script hash"))?;
            let script = self.resolve_script(&script_hash)?;
            Context::new(script, self.estack.clone(), self.astack.clone())
        };
        new_ctx.rvcount = rvcount;
        new_ctx.estack = Rc::new(RefCell::new(Stack::with_account(self.account.clone())));
        new_ctx.astack = Rc::new(RefCell::new(Stack::with_account(self.account.clone())));

        // Move parameters bottom-first onto the fresh stack.
        for i in (0..pcount).rev() {
            let item = self.estack.borrow_mut().remove_at(i)?;
            new_ctx.estack.borrow_mut().push(item);
        }
        if tail_call {
            self.istack.pop();
        }
        self.estack = new_ctx.estack.clone();
        self.astack = new_ctx.astack.clone();
        self.istack.push(new_ctx);
        if op == CallI {
            self.execute(OpCode::Jmp, &operand[2..])?;
        }
        Ok(())
    }

    /// Pops either an array of byte strings or a count followed by that
    /// many byte strings; the form both key and signature lists use.
    fn pop_sig_elements(&mut self) -> VmResult<Vec<Vec<u8>>> {
        let item = self.pop()?;
        match &item {
            StackItem::Array(list) | StackItem::Struct(list) => {
                list.borrow().iter().map(|it| it.to_bytes()).collect()
            }
            other => {
                let count = other
                    .to_bigint()?
                    .to_i64()
                    .ok_or_else(|| VmError::runtime("invalid element count"))?;
                if count < 0 || count as usize > self.estack.borrow().len() {
                    return Err(VmError::runtime("invalid element count"));
                }
                let mut elements = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    elements.push(self.pop_bytes()?);
                }
                Ok(elements)
            }
        }
    }

    fn execute_checkmultisig(&mut self) -> VmResult<()> {
        let key_blobs = self.pop_sig_elements()?;
        let signatures = self.pop_sig_elements()?;
        // More keys than signatures just means some keys didn't sign;
        // the other way around can never verify.
        if key_blobs.len() < signatures.len() {
            return Err(VmError::runtime("more signatures than there are keys"));
        }
        let digest = self
            .checked_hash
            .ok_or_else(|| VmError::runtime("VM is not set up for signature checks"))?;

        let mut ok = true;
        let mut sig_idx = 0;
        let mut key_idx = 0;
        while ok && key_idx < key_blobs.len() && sig_idx < signatures.len() {
            let key = PublicKey::from_bytes(&key_blobs[key_idx])
                .map_err(|e| VmError::runtime(e.to_string()))?;
            // Keys advance on every round; the signature index only moves
            // forward on a successful check, which is what makes the
            // matching order-sensitive.
            if key.verify(&signatures[sig_idx], &digest) {
                sig_idx += 1;
            }
            key_idx += 1;
            if signatures.len() - sig_idx > key_blobs.len() - key_idx {
                ok = false;
            }
        }
        self.push(StackItem::Bool(ok));
        Ok(())
    }
}

// -- default interop hooks ----------------------------------------------

fn runtime_log(vm: &mut Vm) -> VmResult<()> {
    let message = vm.pop()?.to_bytes()?;
    debug!(target: "vm", message = %String::from_utf8_lossy(&message), "runtime log");
    Ok(())
}

fn runtime_notify(vm: &mut Vm) -> VmResult<()> {
    let item = vm.pop()?;
    vm.notifications.push(item);
    Ok(())
}

fn runtime_serialize(vm: &mut Vm) -> VmResult<()> {
    let item = vm.pop()?;
    let data = serialization::serialize_item(&item)?;
    if data.len() > MAX_ITEM_SIZE {
        return Err(VmError::ItemTooLarge(data.len()));
    }
    vm.push(StackItem::from(data));
    Ok(())
}

fn runtime_deserialize(vm: &mut Vm) -> VmResult<()> {
    let data = vm.pop()?.to_bytes()?;
    let item = serialization::deserialize_item(&data)?;
    vm.push(item);
    Ok(())
}
