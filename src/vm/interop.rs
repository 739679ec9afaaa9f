//! Registry types for named host functions.

use std::rc::Rc;

use super::engine::Vm;
use super::error::VmResult;

/// A host function callable from bytecode via `SYSCALL`.
pub type InteropFn = Rc<dyn Fn(&mut Vm) -> VmResult<()>>;

/// A registered hook and its execution price.
#[derive(Clone)]
pub struct InteropEntry {
    pub func: InteropFn,
    pub price: u32,
}
