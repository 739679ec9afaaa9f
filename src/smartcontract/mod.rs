//! Contract parameter types, property flags and redeem-script builders.

use thiserror::Error;

use crate::crypto::keys::PublicKey;
use crate::io::{BinReader, BinWriter, Decodable, Encodable, IoError, IoResult};
use crate::vm::{OpCode, ScriptBuilder};

/// Type tag of a contract parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ParamType {
    Signature = 0x00,
    Boolean = 0x01,
    Integer = 0x02,
    Hash160 = 0x03,
    Hash256 = 0x04,
    ByteArray = 0x05,
    PublicKey = 0x06,
    String = 0x07,
    Array = 0x10,
    InteropInterface = 0xf0,
    Void = 0xff,
}

impl ParamType {
    pub fn from_byte(b: u8) -> Option<ParamType> {
        use ParamType::*;
        Some(match b {
            0x00 => Signature,
            0x01 => Boolean,
            0x02 => Integer,
            0x03 => Hash160,
            0x04 => Hash256,
            0x05 => ByteArray,
            0x06 => PublicKey,
            0x07 => String,
            0x10 => Array,
            0xf0 => InteropInterface,
            0xff => Void,
            _ => return None,
        })
    }
}

impl Encodable for ParamType {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_u8(*self as u8)
    }
}

impl Decodable for ParamType {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        let b = r.read_u8()?;
        ParamType::from_byte(b)
            .ok_or_else(|| IoError::InvalidFormat(format!("invalid parameter type {b:#04x}")))
    }
}

/// Contract property bit flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PropertyState(pub u8);

impl PropertyState {
    pub const NONE: PropertyState = PropertyState(0);
    pub const HAS_STORAGE: PropertyState = PropertyState(1 << 0);
    pub const HAS_DYNAMIC_INVOKE: PropertyState = PropertyState(1 << 1);
    pub const IS_PAYABLE: PropertyState = PropertyState(1 << 2);

    pub fn contains(self, flag: PropertyState) -> bool {
        self.0 & flag.0 != 0
    }
}

impl std::ops::BitOr for PropertyState {
    type Output = PropertyState;
    fn bitor(self, rhs: PropertyState) -> PropertyState {
        PropertyState(self.0 | rhs.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RedeemScriptError {
    #[error("signature threshold {m} out of range for {keys} keys")]
    InvalidThreshold { m: usize, keys: usize },
}

/// Builds the canonical single-signature verification script:
/// `PUSH <key> CHECKSIG`.
pub fn create_signature_redeem_script(key: &PublicKey) -> Vec<u8> {
    let mut b = ScriptBuilder::new();
    b.emit_push_bytes(&key.to_bytes())
        .expect("a compressed key always fits a byte push");
    b.emit(OpCode::CheckSig);
    b.into_script()
}

/// Builds an m-of-n multi-signature verification script. Keys are sorted
/// into their canonical order before being emitted.
pub fn create_multisig_redeem_script(
    m: usize,
    keys: &[PublicKey],
) -> Result<Vec<u8>, RedeemScriptError> {
    if m < 1 || m > keys.len() || keys.len() > 1024 {
        return Err(RedeemScriptError::InvalidThreshold { m, keys: keys.len() });
    }
    let mut sorted = keys.to_vec();
    sorted.sort();

    let mut b = ScriptBuilder::new();
    b.emit_push_int(m as i64)
        .expect("threshold fits the push encoding");
    for key in &sorted {
        b.emit_push_bytes(&key.to_bytes())
            .expect("a compressed key always fits a byte push");
    }
    b.emit_push_int(sorted.len() as i64)
        .expect("key count fits the push encoding");
    b.emit(OpCode::CheckMultisig);
    Ok(b.into_script())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash;
    use crate::crypto::keys::KeyPair;
    use crate::vm::Vm;

    #[test]
    fn param_type_round_trip() {
        for t in [
            ParamType::Signature,
            ParamType::Boolean,
            ParamType::Array,
            ParamType::InteropInterface,
            ParamType::Void,
        ] {
            let bytes = crate::io::to_bytes(&t).unwrap();
            let back: ParamType = crate::io::from_bytes(&bytes).unwrap();
            assert_eq!(t, back);
        }
        assert!(ParamType::from_byte(0x42).is_none());
    }

    #[test]
    fn property_flags() {
        let flags = PropertyState::HAS_STORAGE | PropertyState::IS_PAYABLE;
        assert!(flags.contains(PropertyState::HAS_STORAGE));
        assert!(flags.contains(PropertyState::IS_PAYABLE));
        assert!(!flags.contains(PropertyState::HAS_DYNAMIC_INVOKE));
    }

    #[test]
    fn signature_redeem_script_verifies() {
        let pair = KeyPair::random();
        let sighash = hash::sha256(b"some tx");
        let signature = pair.sign(&sighash);

        let verification = create_signature_redeem_script(pair.public_key());
        let mut invocation = ScriptBuilder::new();
        invocation.emit_push_bytes(&signature).unwrap();

        let mut vm = Vm::new();
        vm.set_checked_hash(sighash);
        vm.load_script(verification);
        vm.load_script(invocation.into_script());
        vm.run().unwrap();
        assert!(vm.has_halted());
        assert!(vm.pop_result().unwrap().to_bool().unwrap());
    }

    #[test]
    fn multisig_redeem_script_verifies() {
        let pairs: Vec<KeyPair> = (0..3).map(|_| KeyPair::random()).collect();
        let keys: Vec<_> = pairs.iter().map(|p| p.public_key().clone()).collect();
        let script = create_multisig_redeem_script(2, &keys).unwrap();

        // Signatures must come in the sorted-key order.
        let mut sorted = keys.clone();
        sorted.sort();
        let sighash = hash::sha256(b"multisig tx");
        let signatures: Vec<Vec<u8>> = sorted
            .iter()
            .take(2)
            .map(|key| {
                pairs
                    .iter()
                    .find(|p| p.public_key() == key)
                    .unwrap()
                    .sign(&sighash)
            })
            .collect();

        let mut invocation = ScriptBuilder::new();
        for sig in &signatures {
            invocation.emit_push_bytes(sig).unwrap();
        }

        let mut vm = Vm::new();
        vm.set_checked_hash(sighash);
        vm.load_script(script);
        vm.load_script(invocation.into_script());
        vm.run().unwrap();
        assert!(vm.has_halted());
        assert!(vm.pop_result().unwrap().to_bool().unwrap());
    }

    #[test]
    fn multisig_rejects_bad_threshold() {
        let keys: Vec<PublicKey> =
            (0..2).map(|_| KeyPair::random().public_key().clone()).collect();
        assert!(create_multisig_redeem_script(0, &keys).is_err());
        assert!(create_multisig_redeem_script(3, &keys).is_err());
    }
}
