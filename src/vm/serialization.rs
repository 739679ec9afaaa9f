//! Binary form of stack items for the runtime (de)serialization hooks
//! and notification persistence.

use std::collections::HashSet;

use crate::io::{BinReader, BinWriter};

use super::error::{VmError, VmResult};
use super::stack_item::{bigint_from_bytes, bigint_to_bytes, StackItem};
use super::MAX_ARRAY_SIZE;

const TAG_BYTE_ARRAY: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INTEGER: u8 = 0x02;
const TAG_ARRAY: u8 = 0x80;
const TAG_STRUCT: u8 = 0x81;
const TAG_MAP: u8 = 0x82;

/// Serializes an item. Interop handles are not serializable, and cyclic
/// structures are detected and rejected.
pub fn serialize_item(item: &StackItem) -> VmResult<Vec<u8>> {
    let mut w = BinWriter::new();
    let mut visited = HashSet::new();
    write_item(item, &mut w, &mut visited)?;
    Ok(w.into_bytes())
}

fn write_item(
    item: &StackItem,
    w: &mut BinWriter,
    visited: &mut HashSet<usize>,
) -> VmResult<()> {
    let io_err = |e: crate::io::IoError| VmError::runtime(e.to_string());
    if let Some(id) = item.identity() {
        if !visited.insert(id) {
            return Err(VmError::runtime("serialization of cyclic item"));
        }
    }
    match item {
        StackItem::ByteArray(data) => {
            w.write_u8(TAG_BYTE_ARRAY).map_err(io_err)?;
            w.write_var_bytes(data).map_err(io_err)?;
        }
        StackItem::Bool(b) => {
            w.write_u8(TAG_BOOL).map_err(io_err)?;
            w.write_bool(*b).map_err(io_err)?;
        }
        StackItem::Integer(i) => {
            w.write_u8(TAG_INTEGER).map_err(io_err)?;
            w.write_var_bytes(&bigint_to_bytes(i)).map_err(io_err)?;
        }
        StackItem::Array(list) | StackItem::Struct(list) => {
            let tag = if matches!(item, StackItem::Array(_)) {
                TAG_ARRAY
            } else {
                TAG_STRUCT
            };
            w.write_u8(tag).map_err(io_err)?;
            let list = list.borrow();
            w.write_var_uint(list.len() as u64).map_err(io_err)?;
            for element in list.iter() {
                write_item(element, w, visited)?;
            }
        }
        StackItem::Map(map) => {
            w.write_u8(TAG_MAP).map_err(io_err)?;
            let map = map.borrow();
            w.write_var_uint(map.len() as u64).map_err(io_err)?;
            for (key, value) in map.iter() {
                write_item(&StackItem::from(key.clone()), w, visited)?;
                write_item(value, w, visited)?;
            }
        }
        StackItem::Interop(_) => {
            return Err(VmError::runtime("interop item can't be serialized"));
        }
    }
    if let Some(id) = item.identity() {
        visited.remove(&id);
    }
    Ok(())
}

/// Inverse of [`serialize_item`].
pub fn deserialize_item(data: &[u8]) -> VmResult<StackItem> {
    let mut r = BinReader::new(data);
    read_item(&mut r)
}

fn read_item(r: &mut BinReader<'_>) -> VmResult<StackItem> {
    let io_err = |e: crate::io::IoError| VmError::runtime(e.to_string());
    match r.read_u8().map_err(io_err)? {
        TAG_BYTE_ARRAY => Ok(StackItem::from(r.read_var_bytes().map_err(io_err)?)),
        TAG_BOOL => Ok(StackItem::Bool(r.read_bool().map_err(io_err)?)),
        TAG_INTEGER => {
            let bytes = r.read_var_bytes().map_err(io_err)?;
            Ok(StackItem::Integer(bigint_from_bytes(&bytes)))
        }
        tag @ (TAG_ARRAY | TAG_STRUCT) => {
            let len = r.read_var_uint().map_err(io_err)? as usize;
            if len > MAX_ARRAY_SIZE {
                return Err(VmError::CollectionTooLarge);
            }
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(read_item(r)?);
            }
            if tag == TAG_ARRAY {
                Ok(StackItem::new_array(items))
            } else {
                Ok(StackItem::new_struct(items))
            }
        }
        TAG_MAP => {
            let len = r.read_var_uint().map_err(io_err)? as usize;
            if len > MAX_ARRAY_SIZE {
                return Err(VmError::CollectionTooLarge);
            }
            let map = StackItem::new_map();
            {
                let StackItem::Map(inner) = &map else { unreachable!() };
                let mut inner = inner.borrow_mut();
                for _ in 0..len {
                    let key = read_item(r)?.to_map_key()?;
                    let value = read_item(r)?;
                    inner.insert(key, value);
                }
            }
            Ok(map)
        }
        other => Err(VmError::runtime(format!(
            "unknown serialized item tag {other:#04x}"
        ))),
    }
}
