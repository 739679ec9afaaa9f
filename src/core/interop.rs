//! Ledger-bound interop hooks for invocation scripts.
//!
//! These bridge a running VM to chain state: storage reads and writes go
//! through the block overlay so a faulting script leaves nothing behind,
//! and lookups see the chain as of the block being persisted.

use std::rc::Rc;
use std::sync::Arc;

use crate::crypto::hash;
use crate::io::{self, Decodable};
use crate::util::{UInt160, UInt256};
use crate::vm::{StackItem, Vm, VmError, VmResult};

use super::block::Header;
use super::state::{ContractState, StorageItem};
use super::storage::{CachedStore, KeyPrefix, Store};
use super::transaction::Transaction;

const MAX_STORAGE_KEY_LEN: usize = 1024;

/// Everything the hooks need to know about the execution surroundings.
#[derive(Clone)]
pub struct InteropContext {
    /// Block-level overlay the script reads from and writes to.
    pub store: Arc<CachedStore>,
    /// Height of the chain including the block being persisted.
    pub height: u32,
    /// Timestamp of the persisting block.
    pub timestamp: u32,
    /// Script hashes the enclosing transaction verified witnesses for.
    pub witnesses: Vec<UInt160>,
}

/// A storage-context handle as seen by scripts.
struct StorageContext {
    script_hash: UInt160,
}

fn storage_key(contract: &UInt160, key: &[u8]) -> Vec<u8> {
    let mut suffix = contract.bytes().to_vec();
    suffix.extend_from_slice(key);
    KeyPrefix::STStorage.key(&suffix)
}

fn pop_storage_context(vm: &mut Vm) -> VmResult<UInt160> {
    let item = vm.pop()?;
    let StackItem::Interop(interop) = item else {
        return Err(VmError::runtime("expected a storage context"));
    };
    interop
        .value
        .downcast_ref::<StorageContext>()
        .map(|ctx| ctx.script_hash)
        .ok_or_else(|| VmError::runtime("expected a storage context"))
}

fn pop_hash160(vm: &mut Vm) -> VmResult<UInt160> {
    let bytes = vm.pop()?.to_bytes()?;
    UInt160::from_slice(&bytes).ok_or_else(|| VmError::runtime("expected a 20-byte script hash"))
}

fn storage_err(e: super::storage::StorageError) -> VmError {
    VmError::runtime(format!("storage failure: {e}"))
}

fn get_contract(store: &dyn Store, script_hash: &UInt160) -> VmResult<Option<ContractState>> {
    let key = KeyPrefix::STContract.key(&script_hash.bytes());
    match store.get(&key).map_err(storage_err)? {
        Some(data) => {
            let contract: ContractState = io::from_bytes(&data)
                .map_err(|e| VmError::runtime(format!("corrupt contract record: {e}")))?;
            Ok(Some(contract))
        }
        None => Ok(None),
    }
}

/// Registers every ledger hook on the VM, plus a script getter resolving
/// contracts through the same overlay.
pub fn register_ledger_interops(vm: &mut Vm, ctx: InteropContext) {
    let store = ctx.store.clone();
    vm.set_script_getter(Box::new(move |script_hash| {
        get_contract(store.as_ref(), script_hash)
            .ok()
            .flatten()
            .map(|contract| contract.script)
    }));

    // Storage.
    vm.register_interop("Cobalt.Storage.GetContext", 1, {
        Rc::new(move |vm: &mut Vm| {
            let script = vm
                .context()
                .map(|c| c.script().to_vec())
                .ok_or(VmError::NoProgram)?;
            let script_hash = hash::hash160(&script);
            vm.push(StackItem::new_interop(
                "StorageContext",
                Rc::new(StorageContext { script_hash }),
            ));
            Ok(())
        })
    });

    let store = ctx.store.clone();
    vm.register_interop("Cobalt.Storage.Get", 100, {
        Rc::new(move |vm: &mut Vm| {
            let contract = pop_storage_context(vm)?;
            let key = vm.pop()?.to_bytes()?;
            let value = store
                .get(&storage_key(&contract, &key))
                .map_err(storage_err)?
                .map(|data| {
                    io::from_bytes::<StorageItem>(&data)
                        .map(|item| item.value)
                        .map_err(|e| VmError::runtime(format!("corrupt storage item: {e}")))
                })
                .transpose()?
                .unwrap_or_default();
            vm.push(StackItem::from(value));
            Ok(())
        })
    });

    let store = ctx.store.clone();
    vm.register_interop("Cobalt.Storage.Put", 1000, {
        Rc::new(move |vm: &mut Vm| {
            let contract = pop_storage_context(vm)?;
            let key = vm.pop()?.to_bytes()?;
            let value = vm.pop()?.to_bytes()?;
            if key.len() > MAX_STORAGE_KEY_LEN {
                return Err(VmError::runtime("storage key is too long"));
            }
            let owner = get_contract(store.as_ref(), &contract)?
                .ok_or_else(|| VmError::runtime("no contract for storage context"))?;
            if !owner.has_storage() {
                return Err(VmError::runtime("contract has no storage"));
            }
            let item = StorageItem { value };
            let data = io::to_bytes(&item).map_err(|e| VmError::runtime(e.to_string()))?;
            store
                .put(&storage_key(&contract, &key), &data)
                .map_err(storage_err)
        })
    });

    let store = ctx.store.clone();
    vm.register_interop("Cobalt.Storage.Delete", 100, {
        Rc::new(move |vm: &mut Vm| {
            let contract = pop_storage_context(vm)?;
            let key = vm.pop()?.to_bytes()?;
            store
                .delete(&storage_key(&contract, &key))
                .map_err(storage_err)
        })
    });

    // Blockchain lookups.
    let height = ctx.height;
    vm.register_interop("Cobalt.Blockchain.GetHeight", 1, {
        Rc::new(move |vm: &mut Vm| {
            vm.push(StackItem::from(height as i64));
            Ok(())
        })
    });

    let store = ctx.store.clone();
    vm.register_interop("Cobalt.Blockchain.GetTransaction", 100, {
        Rc::new(move |vm: &mut Vm| {
            let bytes = vm.pop()?.to_bytes()?;
            let tx_hash = UInt256::from_slice(&bytes)
                .ok_or_else(|| VmError::runtime("expected a 32-byte hash"))?;
            let key = KeyPrefix::DataTransaction.key(&tx_hash.bytes_reversed());
            let Some(record) = store.get(&key).map_err(storage_err)? else {
                return Err(VmError::runtime("transaction not found"));
            };
            // Record layout: u32 height, then the transaction.
            let mut reader = crate::io::BinReader::new(&record);
            reader
                .read_u32_le()
                .map_err(|e| VmError::runtime(e.to_string()))?;
            let tx = Transaction::decode_binary(&mut reader)
                .map_err(|e| VmError::runtime(format!("corrupt transaction record: {e}")))?;
            vm.push(StackItem::new_interop("Transaction", Rc::new(tx)));
            Ok(())
        })
    });

    let store = ctx.store.clone();
    vm.register_interop("Cobalt.Blockchain.GetContract", 100, {
        Rc::new(move |vm: &mut Vm| {
            let script_hash = pop_hash160(vm)?;
            let contract = get_contract(store.as_ref(), &script_hash)?
                .ok_or_else(|| VmError::runtime("contract not found"))?;
            vm.push(StackItem::new_interop("Contract", Rc::new(contract)));
            Ok(())
        })
    });

    let store = ctx.store.clone();
    vm.register_interop("Cobalt.Blockchain.GetHeader", 100, {
        Rc::new(move |vm: &mut Vm| {
            let bytes = vm.pop()?.to_bytes()?;
            let block_hash = UInt256::from_slice(&bytes)
                .ok_or_else(|| VmError::runtime("expected a 32-byte hash"))?;
            let key = KeyPrefix::DataBlock.key(&block_hash.bytes_reversed());
            let Some(record) = store.get(&key).map_err(storage_err)? else {
                return Err(VmError::runtime("header not found"));
            };
            let header = decode_header_record(&record)?;
            vm.push(StackItem::new_interop("Header", Rc::new(header)));
            Ok(())
        })
    });

    // Attribute accessors for the handles above.
    vm.register_interop("Cobalt.Header.GetIndex", 1, {
        Rc::new(|vm: &mut Vm| {
            let header = pop_interop::<Header>(vm, "Header")?;
            vm.push(StackItem::from(header.base.index as i64));
            Ok(())
        })
    });
    vm.register_interop("Cobalt.Header.GetHash", 1, {
        Rc::new(|vm: &mut Vm| {
            let header = pop_interop::<Header>(vm, "Header")?;
            vm.push(StackItem::from(header.hash().bytes().to_vec()));
            Ok(())
        })
    });
    vm.register_interop("Cobalt.Header.GetTimestamp", 1, {
        Rc::new(|vm: &mut Vm| {
            let header = pop_interop::<Header>(vm, "Header")?;
            vm.push(StackItem::from(header.base.timestamp as i64));
            Ok(())
        })
    });
    vm.register_interop("Cobalt.Transaction.GetHash", 1, {
        Rc::new(|vm: &mut Vm| {
            let tx = pop_interop::<Transaction>(vm, "Transaction")?;
            vm.push(StackItem::from(tx.hash().bytes().to_vec()));
            Ok(())
        })
    });
    vm.register_interop("Cobalt.Contract.GetScript", 1, {
        Rc::new(|vm: &mut Vm| {
            let contract = pop_interop::<ContractState>(vm, "Contract")?;
            vm.push(StackItem::from(contract.script.clone()));
            Ok(())
        })
    });

    // Runtime environment.
    let timestamp = ctx.timestamp;
    vm.register_interop("Cobalt.Runtime.GetTime", 1, {
        Rc::new(move |vm: &mut Vm| {
            vm.push(StackItem::from(timestamp as i64));
            Ok(())
        })
    });

    let witnesses = ctx.witnesses.clone();
    vm.register_interop("Cobalt.Runtime.CheckWitness", 200, {
        Rc::new(move |vm: &mut Vm| {
            let bytes = vm.pop()?.to_bytes()?;
            let script_hash = match bytes.len() {
                20 => UInt160::from_slice(&bytes)
                    .ok_or_else(|| VmError::runtime("bad witness argument"))?,
                33 => crate::crypto::keys::PublicKey::from_bytes(&bytes)
                    .map_err(|e| VmError::runtime(e.to_string()))?
                    .script_hash(),
                other => {
                    return Err(VmError::runtime(format!(
                        "witness argument of {other} bytes"
                    )))
                }
            };
            vm.push(StackItem::Bool(witnesses.contains(&script_hash)));
            Ok(())
        })
    });
}

fn pop_interop<T: 'static>(vm: &mut Vm, expected: &str) -> VmResult<Rc<T>> {
    let item = vm.pop()?;
    let StackItem::Interop(interop) = item else {
        return Err(VmError::runtime(format!("expected a {expected} handle")));
    };
    interop
        .value
        .downcast::<T>()
        .map_err(|_| VmError::runtime(format!("expected a {expected} handle")))
}

/// Block records hold either a bare header or a full block; both start
/// with the same base fields.
fn decode_header_record(record: &[u8]) -> VmResult<Header> {
    if let Ok(header) = io::from_bytes::<Header>(record) {
        return Ok(header);
    }
    io::from_bytes::<super::block::Block>(record)
        .map(|block| block.header())
        .map_err(|e| VmError::runtime(format!("corrupt block record: {e}")))
}
