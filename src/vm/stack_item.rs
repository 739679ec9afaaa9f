//! Typed operand values and their conversion rules.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use super::error::{VmError, VmResult};

/// A mutable item list shared between stack slots. Arrays and structs both
/// use this carrier; the difference is copy semantics at the opcode level.
pub type SharedList = Rc<RefCell<Vec<StackItem>>>;

/// A shared key→value map. Only scalar keys are allowed.
pub type SharedMap = Rc<RefCell<BTreeMap<MapKey, StackItem>>>;

/// An operand on the evaluation or alt stack.
///
/// `Array` and `Map` have reference semantics: cloning the item clones the
/// handle, so mutation is visible through every copy and `EQUAL` compares
/// them by identity. `Struct` uses the same carrier but is deep-copied
/// whenever it is appended or returned by value.
#[derive(Debug, Clone)]
pub enum StackItem {
    Bool(bool),
    Integer(BigInt),
    ByteArray(Vec<u8>),
    Array(SharedList),
    Struct(SharedList),
    Map(SharedMap),
    Interop(InteropItem),
}

/// An opaque host object handed to scripts by interop hooks.
#[derive(Clone)]
pub struct InteropItem {
    pub name: &'static str,
    pub value: Rc<dyn Any>,
}

impl std::fmt::Debug for InteropItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InteropItem({})", self.name)
    }
}

/// A map key: the scalar subset of [`StackItem`] with total ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum MapKey {
    Bool(bool),
    Integer(BigInt),
    Bytes(Vec<u8>),
}

/// Converts an integer to the wire byte form: little-endian two's
/// complement with zero encoding as the empty string.
pub fn bigint_to_bytes(value: &BigInt) -> Vec<u8> {
    if value.is_zero() {
        return Vec::new();
    }
    value.to_signed_bytes_le()
}

/// Inverse of [`bigint_to_bytes`].
pub fn bigint_from_bytes(data: &[u8]) -> BigInt {
    if data.is_empty() {
        return BigInt::zero();
    }
    BigInt::from_signed_bytes_le(data)
}

impl StackItem {
    pub fn new_array(items: Vec<StackItem>) -> StackItem {
        StackItem::Array(Rc::new(RefCell::new(items)))
    }

    pub fn new_struct(items: Vec<StackItem>) -> StackItem {
        StackItem::Struct(Rc::new(RefCell::new(items)))
    }

    pub fn new_map() -> StackItem {
        StackItem::Map(Rc::new(RefCell::new(BTreeMap::new())))
    }

    pub fn new_interop(name: &'static str, value: Rc<dyn Any>) -> StackItem {
        StackItem::Interop(InteropItem { name, value })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            StackItem::Bool(_) => "Boolean",
            StackItem::Integer(_) => "Integer",
            StackItem::ByteArray(_) => "ByteArray",
            StackItem::Array(_) => "Array",
            StackItem::Struct(_) => "Struct",
            StackItem::Map(_) => "Map",
            StackItem::Interop(_) => "InteropInterface",
        }
    }

    /// The shared list behind an array or struct.
    pub fn as_list(&self) -> Option<&SharedList> {
        match self {
            StackItem::Array(list) | StackItem::Struct(list) => Some(list),
            _ => None,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            StackItem::Array(_) | StackItem::Struct(_) | StackItem::Map(_)
        )
    }

    /// Address of the shared carrier, the identity used for `EQUAL` and
    /// reference counting. `None` for value types.
    pub fn identity(&self) -> Option<usize> {
        match self {
            StackItem::Array(l) | StackItem::Struct(l) => Some(Rc::as_ptr(l) as usize),
            StackItem::Map(m) => Some(Rc::as_ptr(m) as usize),
            _ => None,
        }
    }

    pub fn to_bigint(&self) -> VmResult<BigInt> {
        match self {
            StackItem::Bool(b) => Ok(BigInt::from(u8::from(*b))),
            StackItem::Integer(i) => Ok(i.clone()),
            StackItem::ByteArray(data) => Ok(bigint_from_bytes(data)),
            other => Err(VmError::runtime(format!(
                "can't convert {} to an integer",
                other.type_name()
            ))),
        }
    }

    /// Byte form of the item. Boolean false maps to the empty string, the
    /// legacy behavior `SIZE` depends on.
    pub fn to_bytes(&self) -> VmResult<Vec<u8>> {
        match self {
            StackItem::ByteArray(data) => Ok(data.clone()),
            StackItem::Integer(i) => Ok(bigint_to_bytes(i)),
            StackItem::Bool(true) => Ok(vec![1]),
            StackItem::Bool(false) => Ok(Vec::new()),
            other => Err(VmError::runtime(format!(
                "can't convert {} to bytes",
                other.type_name()
            ))),
        }
    }

    pub fn to_bool(&self) -> VmResult<bool> {
        match self {
            StackItem::Bool(b) => Ok(*b),
            StackItem::Integer(i) => Ok(!i.is_zero()),
            StackItem::ByteArray(data) => Ok(data.iter().any(|b| *b != 0)),
            other => Err(VmError::runtime(format!(
                "can't convert {} to a boolean",
                other.type_name()
            ))),
        }
    }

    /// Key form for map operations; collections and interop handles fault.
    pub fn to_map_key(&self) -> VmResult<MapKey> {
        match self {
            StackItem::Bool(b) => Ok(MapKey::Bool(*b)),
            StackItem::Integer(i) => Ok(MapKey::Integer(i.clone())),
            StackItem::ByteArray(data) => Ok(MapKey::Bytes(data.clone())),
            StackItem::Array(_) | StackItem::Struct(_) | StackItem::Map(_) => {
                Err(VmError::runtime("key can't be a collection"))
            }
            StackItem::Interop(_) => Err(VmError::runtime("wrong map key type")),
        }
    }

    /// By-value copy applied when an item enters a struct: structs are
    /// cloned recursively, everything else keeps its handle.
    pub fn clone_if_struct(&self) -> StackItem {
        match self {
            StackItem::Struct(list) => {
                let cloned: Vec<StackItem> =
                    list.borrow().iter().map(|it| it.clone_if_struct()).collect();
                StackItem::new_struct(cloned)
            }
            other => other.clone(),
        }
    }

    /// `EQUAL` semantics: arrays and maps by identity, structs element by
    /// element, scalars by type and value.
    pub fn equals(&self, other: &StackItem) -> bool {
        let mut visited = Vec::new();
        self.equals_inner(other, &mut visited)
    }

    fn equals_inner(&self, other: &StackItem, visited: &mut Vec<(usize, usize)>) -> bool {
        use StackItem::*;
        match (self, other) {
            (Array(a), Array(b)) => Rc::ptr_eq(a, b),
            (Map(a), Map(b)) => Rc::ptr_eq(a, b),
            (Struct(a), Struct(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                // Pairs already on the comparison path are assumed equal,
                // which terminates self-referential structures.
                let pair = (Rc::as_ptr(a) as usize, Rc::as_ptr(b) as usize);
                if visited.contains(&pair) {
                    return true;
                }
                visited.push(pair);
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.equals_inner(y, visited))
            }
            (Bool(a), Bool(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (ByteArray(a), ByteArray(b)) => a == b,
            (Interop(a), Interop(b)) => Rc::ptr_eq(&a.value, &b.value),
            _ => false,
        }
    }

    /// Whether an integer fits the 256-bit limit.
    pub fn integer_fits(value: &BigInt) -> bool {
        value.abs().bits() <= super::MAX_INTEGER_BITS as u64
    }
}

impl From<bool> for StackItem {
    fn from(v: bool) -> Self {
        StackItem::Bool(v)
    }
}

impl From<BigInt> for StackItem {
    fn from(v: BigInt) -> Self {
        StackItem::Integer(v)
    }
}

impl From<i64> for StackItem {
    fn from(v: i64) -> Self {
        StackItem::Integer(BigInt::from(v))
    }
}

impl From<usize> for StackItem {
    fn from(v: usize) -> Self {
        StackItem::Integer(BigInt::from(v))
    }
}

impl From<Vec<u8>> for StackItem {
    fn from(v: Vec<u8>) -> Self {
        StackItem::ByteArray(v)
    }
}

impl From<&[u8]> for StackItem {
    fn from(v: &[u8]) -> Self {
        StackItem::ByteArray(v.to_vec())
    }
}

impl From<MapKey> for StackItem {
    fn from(key: MapKey) -> Self {
        match key {
            MapKey::Bool(b) => StackItem::Bool(b),
            MapKey::Integer(i) => StackItem::Integer(i),
            MapKey::Bytes(data) => StackItem::ByteArray(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_bytes_are_le_twos_complement() {
        assert_eq!(bigint_to_bytes(&BigInt::from(0)), Vec::<u8>::new());
        assert_eq!(bigint_to_bytes(&BigInt::from(1)), vec![1]);
        assert_eq!(bigint_to_bytes(&BigInt::from(-1)), vec![0xff]);
        assert_eq!(bigint_to_bytes(&BigInt::from(255)), vec![0xff, 0x00]);
        assert_eq!(bigint_from_bytes(&[0xff, 0x00]), BigInt::from(255));
        assert_eq!(bigint_from_bytes(&[]), BigInt::from(0));
    }

    #[test]
    fn bool_bytes_legacy_behavior() {
        assert_eq!(StackItem::Bool(false).to_bytes().unwrap().len(), 0);
        assert_eq!(StackItem::Bool(true).to_bytes().unwrap(), vec![1]);
    }

    #[test]
    fn arrays_compare_by_identity() {
        let a = StackItem::new_array(vec![StackItem::from(1i64)]);
        let b = StackItem::new_array(vec![StackItem::from(1i64)]);
        assert!(!a.equals(&b));
        assert!(a.equals(&a.clone()));
    }

    #[test]
    fn structs_compare_by_value() {
        let a = StackItem::new_struct(vec![StackItem::from(1i64), StackItem::from(vec![2u8])]);
        let b = StackItem::new_struct(vec![StackItem::from(1i64), StackItem::from(vec![2u8])]);
        assert!(a.equals(&b));

        let c = StackItem::new_struct(vec![StackItem::from(2i64)]);
        assert!(!a.equals(&c));
    }

    #[test]
    fn struct_clone_is_deep() {
        let inner = StackItem::new_struct(vec![StackItem::from(1i64)]);
        let outer = StackItem::new_struct(vec![inner.clone()]);
        let copy = outer.clone_if_struct();

        // Mutating the original must not affect the copy.
        if let StackItem::Struct(list) = &inner {
            list.borrow_mut().push(StackItem::from(9i64));
        }
        let StackItem::Struct(copied) = &copy else { panic!() };
        let StackItem::Struct(elem) = &copied.borrow()[0] else { panic!() };
        assert_eq!(elem.borrow().len(), 1);
    }

    #[test]
    fn map_keys_reject_collections() {
        assert!(StackItem::new_array(vec![]).to_map_key().is_err());
        assert!(StackItem::from(3i64).to_map_key().is_ok());
    }

    #[test]
    fn cyclic_struct_equality_terminates() {
        let a = StackItem::new_struct(vec![]);
        if let StackItem::Struct(list) = &a {
            list.borrow_mut().push(a.clone());
        }
        let b = StackItem::new_struct(vec![]);
        if let StackItem::Struct(list) = &b {
            list.borrow_mut().push(b.clone());
        }
        // Both are one-element self-referential structs; comparison must
        // not loop forever.
        assert!(a.equals(&b));
    }
}
