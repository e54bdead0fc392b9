//! # Message Compilation & Signing
//!
//! Turns a list of [`Instruction`]s into the wire format the ledger expects.
//!
//! ## Account ordering
//!
//! Every account referenced by any instruction is collected once, flags
//! merged, then ordered: writable signers (fee payer first), read-only
//! signers, writable non-signers, read-only non-signers. Instructions refer
//! to accounts by index into that list.
//!
//! ## Versions
//!
//! Without lookup tables the result is a legacy message. With lookup tables
//! it is a v0 message: non-signer accounts that appear in a table (and are
//! not invoked as programs) are moved out of the static list and referenced
//! through the table instead, which is what lets an aggregator route with
//! dozens of accounts fit in one packet.

use std::collections::HashMap;

use super::address::Address;
use super::instruction::Instruction;
use super::signer::Keypair;
use crate::error::{EngineError, EngineResult};

/// Largest serialized transaction the network accepts.
pub const PACKET_DATA_SIZE: usize = 1232;

/// Size of the fixed header in front of a lookup table's addresses.
pub const LOOKUP_TABLE_META_SIZE: usize = 56;

const V0_PREFIX: u8 = 0x80;

/// Appends a compact-u16 length.
pub fn encode_shortvec_len(out: &mut Vec<u8>, len: usize) -> EngineResult<()> {
    let mut rem = u16::try_from(len)
        .map_err(|_| EngineError::invariant(format!("shortvec length {} exceeds u16", len)))?;
    loop {
        let mut byte = (rem & 0x7f) as u8;
        rem >>= 7;
        if rem == 0 {
            out.push(byte);
            return Ok(());
        }
        byte |= 0x80;
        out.push(byte);
    }
}

/// An on-chain address lookup table, as loaded from its account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressLookupTable {
    pub key: Address,
    pub addresses: Vec<Address>,
}

impl AddressLookupTable {
    /// Parses the account data: a 56-byte header followed by packed addresses.
    pub fn decode(key: Address, data: &[u8]) -> EngineResult<Self> {
        if data.len() < LOOKUP_TABLE_META_SIZE
            || (data.len() - LOOKUP_TABLE_META_SIZE) % 32 != 0
        {
            return Err(EngineError::AccountDecode {
                kind: "lookup table",
                address: key,
                reason: format!("unexpected length {}", data.len()),
            });
        }
        let addresses = data[LOOKUP_TABLE_META_SIZE..]
            .chunks_exact(32)
            .map(|chunk| {
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(chunk);
                Address::new_from_array(bytes)
            })
            .collect();
        Ok(Self { key, addresses })
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct KeyMeta {
    is_signer: bool,
    is_writable: bool,
    is_invoked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TableLookup {
    table: Address,
    writable: Vec<u8>,
    readonly: Vec<u8>,
}

/// A compiled, unsigned message.
#[derive(Debug, Clone)]
pub struct Message {
    bytes: Vec<u8>,
    signers: Vec<Address>,
    static_keys: Vec<Address>,
}

impl Message {
    /// Compiles `instructions` with `payer` as fee payer.
    pub fn compile(
        payer: &Address,
        instructions: &[Instruction],
        lookup_tables: &[AddressLookupTable],
        recent_blockhash: &[u8; 32],
    ) -> EngineResult<Self> {
        // Collect keys in first-seen order with merged flags.
        let mut order: Vec<Address> = vec![*payer];
        let mut metas: HashMap<Address, KeyMeta> = HashMap::new();
        metas.insert(
            *payer,
            KeyMeta {
                is_signer: true,
                is_writable: true,
                is_invoked: false,
            },
        );
        for ix in instructions {
            let meta = metas.entry(ix.program_id).or_insert_with(|| {
                order.push(ix.program_id);
                KeyMeta::default()
            });
            meta.is_invoked = true;
            for account in &ix.accounts {
                let meta = metas.entry(account.pubkey).or_insert_with(|| {
                    order.push(account.pubkey);
                    KeyMeta::default()
                });
                meta.is_signer |= account.is_signer;
                meta.is_writable |= account.is_writable;
            }
        }

        // Move eligible keys into lookup tables.
        let mut lookups: Vec<TableLookup> = Vec::new();
        let mut loaded_writable: Vec<Address> = Vec::new();
        let mut loaded_readonly: Vec<Address> = Vec::new();
        let mut remaining: Vec<Address> = order.clone();
        for table in lookup_tables {
            let mut lookup = TableLookup {
                table: table.key,
                writable: Vec::new(),
                readonly: Vec::new(),
            };
            remaining.retain(|key| {
                let meta = metas[key];
                if meta.is_signer || meta.is_invoked {
                    return true;
                }
                let Some(position) = table.addresses.iter().position(|a| a == key) else {
                    return true;
                };
                let Ok(index) = u8::try_from(position) else {
                    return true;
                };
                if meta.is_writable {
                    lookup.writable.push(index);
                    loaded_writable.push(*key);
                } else {
                    lookup.readonly.push(index);
                    loaded_readonly.push(*key);
                }
                false
            });
            if !lookup.writable.is_empty() || !lookup.readonly.is_empty() {
                lookups.push(lookup);
            }
        }

        // Static keys by category. `sort_by_key` is stable, so the payer stays first.
        let mut static_keys = remaining;
        static_keys.sort_by_key(|key| {
            let m = metas[key];
            match (m.is_signer, m.is_writable) {
                (true, true) => 0u8,
                (true, false) => 1,
                (false, true) => 2,
                (false, false) => 3,
            }
        });
        if static_keys.len() > 256 {
            return Err(EngineError::invariant("too many static accounts in message"));
        }

        let num_signers = static_keys.iter().filter(|k| metas[*k].is_signer).count();
        let num_readonly_signed = static_keys
            .iter()
            .filter(|k| metas[*k].is_signer && !metas[*k].is_writable)
            .count();
        let num_readonly_unsigned = static_keys
            .iter()
            .filter(|k| !metas[*k].is_signer && !metas[*k].is_writable)
            .count();

        let mut index_of: HashMap<Address, u8> = HashMap::new();
        for (i, key) in static_keys
            .iter()
            .chain(loaded_writable.iter())
            .chain(loaded_readonly.iter())
            .enumerate()
        {
            let i = u8::try_from(i)
                .map_err(|_| EngineError::invariant("more than 256 accounts in message"))?;
            index_of.insert(*key, i);
        }

        let mut bytes = Vec::with_capacity(PACKET_DATA_SIZE);
        let versioned = !lookup_tables.is_empty();
        if versioned {
            bytes.push(V0_PREFIX);
        }
        bytes.push(num_signers as u8);
        bytes.push(num_readonly_signed as u8);
        bytes.push(num_readonly_unsigned as u8);

        encode_shortvec_len(&mut bytes, static_keys.len())?;
        for key in &static_keys {
            bytes.extend_from_slice(key.as_bytes());
        }
        bytes.extend_from_slice(recent_blockhash);

        encode_shortvec_len(&mut bytes, instructions.len())?;
        for ix in instructions {
            bytes.push(index_of[&ix.program_id]);
            encode_shortvec_len(&mut bytes, ix.accounts.len())?;
            for account in &ix.accounts {
                bytes.push(index_of[&account.pubkey]);
            }
            encode_shortvec_len(&mut bytes, ix.data.len())?;
            bytes.extend_from_slice(&ix.data);
        }

        if versioned {
            encode_shortvec_len(&mut bytes, lookups.len())?;
            for lookup in &lookups {
                bytes.extend_from_slice(lookup.table.as_bytes());
                encode_shortvec_len(&mut bytes, lookup.writable.len())?;
                bytes.extend_from_slice(&lookup.writable);
                encode_shortvec_len(&mut bytes, lookup.readonly.len())?;
                bytes.extend_from_slice(&lookup.readonly);
            }
        }

        let signers = static_keys[..num_signers].to_vec();
        Ok(Self {
            bytes,
            signers,
            static_keys,
        })
    }

    /// The serialized message, i.e. what gets signed.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Required signers, in signature order.
    pub fn signers(&self) -> &[Address] {
        &self.signers
    }

    /// Accounts stored directly in the message.
    pub fn static_keys(&self) -> &[Address] {
        &self.static_keys
    }

    /// Signs with the provided keypairs. Every required signer must be
    /// present; extra keypairs are ignored.
    pub fn sign(self, keypairs: &[&Keypair]) -> EngineResult<SignedTransaction> {
        let mut signatures = Vec::with_capacity(self.signers.len());
        for required in &self.signers {
            let keypair = keypairs
                .iter()
                .find(|kp| kp.pubkey() == *required)
                .ok_or_else(|| EngineError::Config(format!("missing signer {}", required)))?;
            signatures.push(keypair.sign_message(&self.bytes));
        }
        Ok(SignedTransaction {
            signatures,
            message: self.bytes,
        })
    }
}

/// A fully signed transaction.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    signatures: Vec<[u8; 64]>,
    message: Vec<u8>,
}

impl SignedTransaction {
    /// The transaction id: base58 of the fee payer's signature.
    pub fn signature(&self) -> String {
        self.signatures
            .first()
            .map(|s| bs58::encode(s).into_string())
            .unwrap_or_default()
    }

    /// Wire bytes, rejected if they would not fit in one packet.
    pub fn serialize(&self) -> EngineResult<Vec<u8>> {
        let mut out = Vec::with_capacity(PACKET_DATA_SIZE);
        encode_shortvec_len(&mut out, self.signatures.len())?;
        for sig in &self.signatures {
            out.extend_from_slice(sig);
        }
        out.extend_from_slice(&self.message);
        if out.len() > PACKET_DATA_SIZE {
            return Err(EngineError::invariant(format!(
                "transaction is {} bytes, limit is {}",
                out.len(),
                PACKET_DATA_SIZE
            )));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::instruction::AccountMeta;

    fn addr(b: u8) -> Address {
        Address::new_from_array([b; 32])
    }

    #[test]
    fn shortvec_encoding() {
        let cases: [(usize, &[u8]); 4] = [
            (0, &[0x00]),
            (127, &[0x7f]),
            (128, &[0x80, 0x01]),
            (16_384, &[0x80, 0x80, 0x01]),
        ];
        for (len, expected) in cases {
            let mut out = Vec::new();
            encode_shortvec_len(&mut out, len).unwrap();
            assert_eq!(out, expected, "len {}", len);
        }
        assert!(encode_shortvec_len(&mut Vec::new(), 70_000).is_err());
    }

    #[test]
    fn legacy_header_and_ordering() {
        let payer = Keypair::from_seed(&[1; 32]);
        let ix = Instruction {
            program_id: addr(9),
            accounts: vec![
                AccountMeta::new_readonly(addr(5), false),
                AccountMeta::new(addr(6), false),
                AccountMeta::new(payer.pubkey(), true),
            ],
            data: vec![1, 2, 3],
        };
        let msg = Message::compile(&payer.pubkey(), &[ix], &[], &[0; 32]).unwrap();

        // 1 signer, 0 readonly signed, 2 readonly unsigned (addr5, program).
        assert_eq!(&msg.as_bytes()[..3], &[1, 0, 2]);
        assert_eq!(msg.signers(), &[payer.pubkey()]);
        assert_eq!(msg.static_keys()[0], payer.pubkey());
        assert_eq!(msg.static_keys()[1], addr(6));
        assert_eq!(msg.static_keys().len(), 4);
    }

    #[test]
    fn lookup_table_moves_non_signers_out_of_static_list() {
        let payer = Keypair::from_seed(&[1; 32]);
        let ix = Instruction {
            program_id: addr(9),
            accounts: vec![
                AccountMeta::new(addr(5), false),
                AccountMeta::new_readonly(addr(6), false),
                AccountMeta::new_readonly(addr(7), false),
            ],
            data: vec![],
        };
        let table = AddressLookupTable {
            key: addr(200),
            // The program id is in the table too but must stay static.
            addresses: vec![addr(6), addr(5), addr(9)],
        };
        let msg = Message::compile(&payer.pubkey(), &[ix], &[table], &[0; 32]).unwrap();

        assert_eq!(msg.as_bytes()[0], V0_PREFIX);
        assert_eq!(msg.static_keys(), &[payer.pubkey(), addr(9), addr(7)]);
        let bytes = msg.as_bytes();
        // Trailer: 1 lookup, table key, [1] writable, [0] readonly.
        let tail = &bytes[bytes.len() - (1 + 32 + 2 + 2)..];
        assert_eq!(tail[0], 1);
        assert_eq!(&tail[1..33], addr(200).as_bytes());
        assert_eq!(&tail[33..], &[1, 1, 1, 0]);
    }

    #[test]
    fn signing_requires_every_signer() {
        let payer = Keypair::from_seed(&[1; 32]);
        let other = Keypair::from_seed(&[2; 32]);
        let ix = Instruction {
            program_id: addr(9),
            accounts: vec![AccountMeta::new(other.pubkey(), true)],
            data: vec![],
        };
        let msg = Message::compile(&payer.pubkey(), &[ix.clone()], &[], &[0; 32]).unwrap();
        assert!(msg.sign(&[&payer]).is_err());

        let msg = Message::compile(&payer.pubkey(), &[ix], &[], &[0; 32]).unwrap();
        let tx = msg.sign(&[&other, &payer]).unwrap();
        let wire = tx.serialize().unwrap();
        assert_eq!(wire[0], 2);
        assert_eq!(bs58::encode(&wire[1..65]).into_string(), tx.signature());
    }

    #[test]
    fn lookup_table_account_decode() {
        let mut data = vec![0u8; LOOKUP_TABLE_META_SIZE];
        data.extend_from_slice(addr(3).as_bytes());
        data.extend_from_slice(addr(4).as_bytes());
        let table = AddressLookupTable::decode(addr(1), &data).unwrap();
        assert_eq!(table.addresses, vec![addr(3), addr(4)]);
        assert!(AddressLookupTable::decode(addr(1), &data[..70]).is_err());
    }
}
