//! Stack-based virtual machine executing contract and witness scripts.

mod context;
mod engine;
mod error;
mod interop;
mod opcode;
mod script_builder;
pub mod serialization;
mod stack;
mod stack_item;

pub use context::Context;
pub use engine::{ScriptGetter, Vm, VmState};
pub use error::{VmError, VmResult};
pub use interop::{InteropEntry, InteropFn};
pub use opcode::{OpCode, PUSHF, PUSHT};
pub use script_builder::{disassemble, Instr, ScriptBuilder};
pub use stack::{SizeAccount, Stack};
pub use stack_item::{bigint_from_bytes, bigint_to_bytes, InteropItem, MapKey, StackItem};

/// Maximum number of elements in an array, struct or map.
pub const MAX_ARRAY_SIZE: usize = 1024;

/// Maximum byte-string length.
pub const MAX_ITEM_SIZE: usize = 1024 * 1024;

/// Maximum invocation-stack depth.
pub const MAX_INVOCATION_STACK_SIZE: usize = 1024;

/// Maximum integer width in bits.
pub const MAX_INTEGER_BITS: usize = 256;

/// Maximum number of items across all accounted stacks.
pub const MAX_STACK_SIZE: usize = 2 * 1024;

#[cfg(test)]
mod tests {
    use num_bigint::BigInt;

    use super::*;
    use crate::crypto::hash;
    use crate::crypto::keys::KeyPair;

    fn run_script(script: Vec<u8>) -> Vm {
        let mut vm = Vm::new();
        vm.load(script);
        let _ = vm.run();
        vm
    }

    fn assert_halted_with_int(script: Vec<u8>, expected: i64) {
        let mut vm = run_script(script);
        assert!(vm.has_halted(), "state: {}", vm.state());
        let result = vm.pop_result().unwrap().to_bigint().unwrap();
        assert_eq!(result, BigInt::from(expected));
    }

    #[test]
    fn pushdata_round_trip() {
        // PUSHDATA1 03 01 02 03 RET
        let script = vec![0x4c, 0x03, 0x01, 0x02, 0x03, 0x66];
        let mut vm = run_script(script);
        assert!(vm.has_halted());
        assert_eq!(vm.pop_result().unwrap().to_bytes().unwrap(), vec![1, 2, 3]);
        assert_eq!(vm.estack_len(), 0);
    }

    #[test]
    fn stack_size_limit_faults() {
        // 2049 consecutive PUSH1 instructions exceed the 2048-item cap.
        let script = vec![0x51u8; MAX_STACK_SIZE + 1];
        let vm = run_script(script);
        assert!(vm.has_failed());
    }

    #[test]
    fn stack_size_limit_allows_exactly_max() {
        let script = vec![0x51u8; MAX_STACK_SIZE];
        let vm = run_script(script);
        assert!(vm.has_halted());
        assert_eq!(vm.stack_size(), MAX_STACK_SIZE);
    }

    #[test]
    fn arithmetic_basics() {
        let mut b = ScriptBuilder::new();
        b.emit_push_int(2).unwrap();
        b.emit_push_int(3).unwrap();
        b.emit(OpCode::Add);
        assert_halted_with_int(b.into_script(), 5);

        let mut b = ScriptBuilder::new();
        b.emit_push_int(10).unwrap();
        b.emit_push_int(4).unwrap();
        b.emit(OpCode::Sub);
        assert_halted_with_int(b.into_script(), 6);
    }

    #[test]
    fn integer_width_fault() {
        // (1 << 255) * 2 needs 257 bits.
        let mut b = ScriptBuilder::new();
        b.emit_push_bigint(&(BigInt::from(1) << 255)).unwrap();
        b.emit_push_int(2).unwrap();
        b.emit(OpCode::Mul);
        let vm = run_script(b.into_script());
        assert!(vm.has_failed());
    }

    #[test]
    fn shift_semantics() {
        let mut b = ScriptBuilder::new();
        b.emit_push_int(3).unwrap();
        b.emit_push_int(2).unwrap();
        b.emit(OpCode::Shl);
        assert_halted_with_int(b.into_script(), 12);

        // Shift by zero leaves the operand untouched.
        let mut b = ScriptBuilder::new();
        b.emit_push_int(7).unwrap();
        b.emit_push_int(0).unwrap();
        b.emit(OpCode::Shr);
        assert_halted_with_int(b.into_script(), 7);

        // Out-of-range count faults.
        let mut b = ScriptBuilder::new();
        b.emit_push_int(1).unwrap();
        b.emit_push_int(257).unwrap();
        b.emit(OpCode::Shl);
        assert!(run_script(b.into_script()).has_failed());
    }

    #[test]
    fn division_by_zero_faults() {
        let mut b = ScriptBuilder::new();
        b.emit_push_int(1).unwrap();
        b.emit_push_int(0).unwrap();
        b.emit(OpCode::Div);
        assert!(run_script(b.into_script()).has_failed());
    }

    #[test]
    fn substr_legacy_out_of_range() {
        // offset 10 into a 3-byte string: legacy behavior pushes "".
        let mut b = ScriptBuilder::new();
        b.emit_push_bytes(&[1, 2, 3]).unwrap();
        b.emit_push_int(10).unwrap();
        b.emit_push_int(2).unwrap();
        b.emit(OpCode::SubStr);
        let mut vm = run_script(b.into_script());
        assert!(vm.has_halted());
        assert!(vm.pop_result().unwrap().to_bytes().unwrap().is_empty());

        // The strict switch turns the same program into a fault.
        let mut b = ScriptBuilder::new();
        b.emit_push_bytes(&[1, 2, 3]).unwrap();
        b.emit_push_int(10).unwrap();
        b.emit_push_int(2).unwrap();
        b.emit(OpCode::SubStr);
        let mut vm = Vm::new();
        vm.legacy_slices = false;
        vm.load(b.into_script());
        let _ = vm.run();
        assert!(vm.has_failed());
    }

    #[test]
    fn size_of_bool_legacy() {
        // NOT yields a Boolean item; SIZE of false is 0 on the deployed
        // network and must stay that way.
        let mut b = ScriptBuilder::new();
        b.emit_push_bool(true);
        b.emit(OpCode::Not);
        b.emit(OpCode::Size);
        let mut vm = run_script(b.into_script());
        assert!(vm.has_halted());
        assert_eq!(vm.pop_result().unwrap().to_bigint().unwrap(), 0.into());
    }

    #[test]
    fn equal_arrays_by_identity_structs_by_value() {
        // Two freshly packed arrays with equal contents are not EQUAL.
        let mut b = ScriptBuilder::new();
        b.emit_push_int(1).unwrap();
        b.emit_push_int(1).unwrap();
        b.emit(OpCode::Pack);
        b.emit_push_int(1).unwrap();
        b.emit_push_int(1).unwrap();
        b.emit(OpCode::Pack);
        b.emit(OpCode::Equal);
        let mut vm = run_script(b.into_script());
        assert!(vm.has_halted());
        assert!(!vm.pop_result().unwrap().to_bool().unwrap());

        // A DUPed reference is EQUAL to itself.
        let mut b = ScriptBuilder::new();
        b.emit_push_int(1).unwrap();
        b.emit_push_int(1).unwrap();
        b.emit(OpCode::Pack);
        b.emit(OpCode::Dup);
        b.emit(OpCode::Equal);
        let mut vm = run_script(b.into_script());
        assert!(vm.has_halted());
        assert!(vm.pop_result().unwrap().to_bool().unwrap());
    }

    #[test]
    fn append_copies_structs() {
        // arr = []; s = struct[42]; APPEND(arr, s); SETITEM(s, 0, 7);
        // arr[0][0] must still be 42.
        let mut vm = Vm::new();
        let arr = StackItem::new_array(vec![]);
        let s = StackItem::new_struct(vec![StackItem::from(42i64)]);

        vm.load(vec![OpCode::Append.byte()]);
        vm.push(arr.clone());
        vm.push(s.clone());
        vm.run().unwrap();

        if let StackItem::Struct(inner) = &s {
            inner.borrow_mut()[0] = StackItem::from(7i64);
        }
        let StackItem::Array(list) = &arr else { panic!() };
        let StackItem::Struct(copied) = &list.borrow()[0] else {
            panic!("expected struct element");
        };
        assert_eq!(copied.borrow()[0].to_bigint().unwrap(), 42.into());
    }

    #[test]
    fn newarray_converts_struct() {
        let mut vm = Vm::new();
        vm.load(vec![OpCode::NewArray.byte()]);
        vm.push(StackItem::new_struct(vec![
            StackItem::from(1i64),
            StackItem::from(2i64),
        ]));
        vm.run().unwrap();
        let result = vm.pop_result().unwrap();
        assert!(matches!(result, StackItem::Array(_)));
        assert_eq!(result.as_list().unwrap().borrow().len(), 2);
    }

    #[test]
    fn newarray_of_n_falses() {
        let mut b = ScriptBuilder::new();
        b.emit_push_int(3).unwrap();
        b.emit(OpCode::NewArray);
        b.emit(OpCode::ArraySize);
        assert_halted_with_int(b.into_script(), 3);
    }

    #[test]
    fn pickitem_indexes_bytes() {
        let mut b = ScriptBuilder::new();
        b.emit_push_bytes(&[10, 20, 30]).unwrap();
        b.emit_push_int(1).unwrap();
        b.emit(OpCode::PickItem);
        assert_halted_with_int(b.into_script(), 20);
    }

    #[test]
    fn map_missing_key_faults() {
        let mut b = ScriptBuilder::new();
        b.emit(OpCode::NewMap);
        b.emit_push_int(5).unwrap();
        b.emit(OpCode::PickItem);
        assert!(run_script(b.into_script()).has_failed());
    }

    #[test]
    fn jump_and_call() {
        // 2 + 3 via a CALLed add routine:
        //   PUSH2 PUSH3 CALL +5 RET ADD RET
        let mut b = ScriptBuilder::new();
        b.emit_push_int(2).unwrap(); // ip 0
        b.emit_push_int(3).unwrap(); // ip 1
        b.emit_jump(OpCode::Call, 5); // ip 2, target = 2 + 5 = 7
        b.emit(OpCode::Ret); // ip 5 (return after call)
        b.emit(OpCode::Nop); // ip 6
        b.emit(OpCode::Add); // ip 7
        b.emit(OpCode::Ret); // ip 8
        assert_halted_with_int(b.into_script(), 5);
    }

    #[test]
    fn jmpifnot_takes_branch_on_false() {
        // PUSH0 -> empty bytes is falsy; skip the THROW.
        let mut b = ScriptBuilder::new();
        b.emit(OpCode::Push0);
        b.emit_jump(OpCode::JmpIfNot, 4); // ip 1, target 5
        b.emit(OpCode::Throw); // ip 4
        b.emit_push_int(1).unwrap(); // ip 5
        assert_halted_with_int(b.into_script(), 1);
    }

    #[test]
    fn unknown_opcode_faults_with_location() {
        let script = vec![0x61, 0xff];
        let mut vm = Vm::new();
        vm.load(script);
        let err = vm.run().unwrap_err();
        assert!(vm.has_failed());
        assert_eq!(err.instruction_pointer(), Some(1));
    }

    #[test]
    fn faulted_vm_refuses_to_resume() {
        let mut vm = Vm::new();
        vm.load(vec![0xff]);
        assert!(vm.run().is_err());
        assert!(matches!(vm.run(), Err(VmError::Faulted)));
    }

    #[test]
    fn throwifnot_passes_on_true() {
        let mut b = ScriptBuilder::new();
        b.emit_push_bool(true);
        b.emit(OpCode::ThrowIfNot);
        b.emit_push_int(1).unwrap();
        assert_halted_with_int(b.into_script(), 1);

        let mut b = ScriptBuilder::new();
        b.emit_push_bool(false);
        b.emit(OpCode::ThrowIfNot);
        assert!(run_script(b.into_script()).has_failed());
    }

    #[test]
    fn checksig_accepts_valid_and_rejects_tampered() {
        let pair = KeyPair::random();
        let sighash = hash::sha256(b"transaction data");
        let signature = pair.sign(&sighash);

        let build = |sig: &[u8]| {
            let mut b = ScriptBuilder::new();
            b.emit_push_bytes(sig).unwrap();
            b.emit_push_bytes(&pair.public_key().to_bytes()).unwrap();
            b.emit(OpCode::CheckSig);
            b.into_script()
        };

        let mut vm = Vm::new();
        vm.set_checked_hash(sighash);
        vm.load(build(&signature));
        vm.run().unwrap();
        assert!(vm.pop_result().unwrap().to_bool().unwrap());

        let mut reversed = signature.clone();
        reversed.reverse();
        let mut vm = Vm::new();
        vm.set_checked_hash(sighash);
        vm.load(build(&reversed));
        vm.run().unwrap();
        assert!(!vm.pop_result().unwrap().to_bool().unwrap());
    }

    #[test]
    fn checksig_without_checked_hash_faults() {
        let pair = KeyPair::random();
        let mut b = ScriptBuilder::new();
        b.emit_push_bytes(&[0u8; 64]).unwrap();
        b.emit_push_bytes(&pair.public_key().to_bytes()).unwrap();
        b.emit(OpCode::CheckSig);
        assert!(run_script(b.into_script()).has_failed());
    }

    #[test]
    fn verify_hashes_the_message_itself() {
        let pair = KeyPair::random();
        let message = b"arbitrary message".to_vec();
        let digest = hash::sha256(&message);
        let signature = pair.sign(&digest);

        let mut b = ScriptBuilder::new();
        b.emit_push_bytes(&message).unwrap();
        b.emit_push_bytes(&signature).unwrap();
        b.emit_push_bytes(&pair.public_key().to_bytes()).unwrap();
        b.emit(OpCode::Verify);
        let mut vm = run_script(b.into_script());
        assert!(vm.has_halted());
        assert!(vm.pop_result().unwrap().to_bool().unwrap());
    }

    fn multisig_script(signatures: &[Vec<u8>], keys: &[&KeyPair]) -> Vec<u8> {
        let mut b = ScriptBuilder::new();
        for sig in signatures.iter().rev() {
            b.emit_push_bytes(sig).unwrap();
        }
        b.emit_push_int(signatures.len() as i64).unwrap();
        for pair in keys.iter().rev() {
            b.emit_push_bytes(&pair.public_key().to_bytes()).unwrap();
        }
        b.emit_push_int(keys.len() as i64).unwrap();
        b.emit(OpCode::CheckMultisig);
        b.into_script()
    }

    #[test]
    fn checkmultisig_ordering() {
        let k1 = KeyPair::random();
        let k2 = KeyPair::random();
        let sighash = hash::sha256(b"multisig tx");
        let s1 = k1.sign(&sighash);
        let s2 = k2.sign(&sighash);

        // In-order signatures verify.
        let mut vm = Vm::new();
        vm.set_checked_hash(sighash);
        vm.load(multisig_script(&[s1.clone(), s2.clone()], &[&k1, &k2]));
        vm.run().unwrap();
        assert!(vm.pop_result().unwrap().to_bool().unwrap());

        // Reversed signatures fail: the signature index only advances on
        // success, so s2 can never match once k2 has been passed.
        let mut vm = Vm::new();
        vm.set_checked_hash(sighash);
        vm.load(multisig_script(&[s2, s1], &[&k1, &k2]));
        vm.run().unwrap();
        assert!(!vm.pop_result().unwrap().to_bool().unwrap());
    }

    #[test]
    fn checkmultisig_more_sigs_than_keys_fails() {
        let k1 = KeyPair::random();
        let sighash = hash::sha256(b"multisig tx");
        let s1 = k1.sign(&sighash);
        let mut vm = Vm::new();
        vm.set_checked_hash(sighash);
        vm.load(multisig_script(&[s1.clone(), s1], &[&k1]));
        assert!(vm.run().is_err());
        assert!(vm.has_failed());
    }

    #[test]
    fn one_of_two_multisig() {
        let k1 = KeyPair::random();
        let k2 = KeyPair::random();
        let sighash = hash::sha256(b"1-of-2");
        // Only the second key signed; keys advance past k1 and match k2.
        let s2 = k2.sign(&sighash);
        let mut vm = Vm::new();
        vm.set_checked_hash(sighash);
        vm.load(multisig_script(&[s2], &[&k1, &k2]));
        vm.run().unwrap();
        assert!(vm.pop_result().unwrap().to_bool().unwrap());
    }

    #[test]
    fn syscall_unknown_name_faults() {
        let mut b = ScriptBuilder::new();
        b.emit_syscall("No.Such.Hook").unwrap();
        let vm = run_script(b.into_script());
        assert!(vm.has_failed());
    }

    #[test]
    fn serialize_deserialize_round_trip_via_syscalls() {
        let mut b = ScriptBuilder::new();
        b.emit_push_int(1).unwrap();
        b.emit_push_int(2).unwrap();
        b.emit_push_int(2).unwrap();
        b.emit(OpCode::Pack);
        b.emit_syscall("Cobalt.Runtime.Serialize").unwrap();
        b.emit_syscall("Cobalt.Runtime.Deserialize").unwrap();
        b.emit(OpCode::ArraySize);
        assert_halted_with_int(b.into_script(), 2);
    }

    #[test]
    fn appcall_runs_callee() {
        let callee_hash = crate::util::UInt160([7u8; 20]);
        let mut callee = ScriptBuilder::new();
        callee.emit_push_int(11).unwrap();
        let callee_script = callee.into_script();

        let mut b = ScriptBuilder::new();
        b.emit_appcall(&callee_hash, false);
        let mut vm = Vm::new();
        vm.set_script_getter(Box::new(move |h| {
            (*h == callee_hash).then(|| callee_script.clone())
        }));
        vm.load(b.into_script());
        vm.run().unwrap();
        assert_eq!(vm.pop_result().unwrap().to_bigint().unwrap(), 11.into());
    }

    #[test]
    fn calli_moves_parameters_and_returns() {
        // Entry: PUSH5 PUSH6 CALLI rv=1 pc=2 offset -> routine; routine ADDs
        // on its own fresh stack and returns one value.
        let mut b = ScriptBuilder::new();
        b.emit_push_int(5).unwrap(); // ip 0
        b.emit_push_int(6).unwrap(); // ip 1
        b.emit(OpCode::CallI); // ip 2
        b.emit_raw(&[1, 2]); // rvcount, pcount
        b.emit_raw(&6i16.to_le_bytes()); // relative to ip 2 -> 8
        b.emit(OpCode::Ret); // ip 7
        b.emit(OpCode::Add); // ip 8
        b.emit(OpCode::Ret); // ip 9
        let mut vm = Vm::new();
        vm.load(b.into_script());
        vm.run().unwrap();
        assert!(vm.has_halted());
        assert_eq!(vm.pop_result().unwrap().to_bigint().unwrap(), 11.into());
        assert_eq!(vm.estack_len(), 0);
    }

    #[test]
    fn debugger_step_over_call() {
        let mut b = ScriptBuilder::new();
        b.emit_push_int(2).unwrap(); // ip 0
        b.emit_push_int(3).unwrap(); // ip 1
        b.emit_jump(OpCode::Call, 5); // ip 2
        b.emit(OpCode::Ret); // ip 5
        b.emit(OpCode::Nop); // ip 6
        b.emit(OpCode::Add); // ip 7
        b.emit(OpCode::Ret); // ip 8
        let script = b.into_script();

        let mut vm = Vm::new();
        vm.load(script);
        vm.add_break_point(2);
        vm.run().unwrap();
        assert!(vm.at_break_point());
        let depth = vm.invocation_depth();

        // Stepping over the CALL runs the whole routine and stops with
        // the invocation stack back at its pre-call depth.
        vm.step_over().unwrap();
        assert_eq!(vm.invocation_depth(), depth);
        assert_eq!(vm.estack_len(), 1);

        // Finishing the program from the break state.
        vm.run().unwrap();
        assert!(vm.has_halted());
        assert_eq!(vm.pop_result().unwrap().to_bigint().unwrap(), 5.into());
    }

    #[test]
    fn invocation_stack_depth_limit() {
        // CALL 0 loops into itself, growing the invocation stack.
        let mut b = ScriptBuilder::new();
        b.emit_jump(OpCode::Call, 0);
        let vm = run_script(b.into_script());
        assert!(vm.has_failed());
    }
}
