//! Composed transaction ready for wallet signing and broadcast

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use solana_sdk::{
    instruction::Instruction, pubkey::Pubkey, signature::Signature, transaction::Transaction,
};

use crate::errors::FeeGateError;

/// A transaction plus the blockhash validity window it was built against
#[derive(Debug, Clone)]
pub struct ComposedTransaction {
    pub tx: Transaction,
    /// Last block height at which the blockhash is still accepted
    pub last_valid_block_height: u64,
}

impl ComposedTransaction {
    pub fn new(tx: Transaction, last_valid_block_height: u64) -> Self {
        Self {
            tx,
            last_valid_block_height,
        }
    }

    /// Fee payer's signature, once signed
    pub fn signature(&self) -> Option<Signature> {
        self.tx
            .signatures
            .first()
            .copied()
            .filter(|sig| *sig != Signature::default())
    }

    pub fn is_fully_signed(&self) -> bool {
        self.tx.is_signed()
    }

    /// Signer keys whose signature slots are still empty
    pub fn missing_signers(&self) -> Vec<Pubkey> {
        let required = usize::from(self.tx.message.header.num_required_signatures);
        self.tx
            .message
            .account_keys
            .iter()
            .take(required)
            .zip(self.tx.signatures.iter())
            .filter(|(_, sig)| **sig == Signature::default())
            .map(|(key, _)| *key)
            .collect()
    }

    /// Instructions in execution order, decompiled from the message
    pub fn instructions(&self) -> Vec<Instruction> {
        let keys = &self.tx.message.account_keys;
        self.tx
            .message
            .instructions
            .iter()
            .map(|ci| Instruction {
                program_id: keys[usize::from(ci.program_id_index)],
                accounts: ci
                    .accounts
                    .iter()
                    .map(|idx| {
                        let i = usize::from(*idx);
                        solana_sdk::instruction::AccountMeta {
                            pubkey: keys[i],
                            is_signer: self.tx.message.is_signer(i),
                            is_writable: self.tx.message.is_maybe_writable(i, None),
                        }
                    })
                    .collect(),
                data: ci.data.clone(),
            })
            .collect()
    }

    /// Wire form for handing the transaction to an external wallet
    pub fn to_base64(&self) -> Result<String, FeeGateError> {
        let bytes = bincode::serialize(&self.tx)
            .map_err(|e| FeeGateError::internal(format!("failed to serialize transaction: {e}")))?;
        Ok(BASE64_STANDARD.encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{
        hash::Hash, message::Message, signature::Keypair, signer::Signer, system_instruction,
    };

    fn unsigned(payer: &Keypair) -> ComposedTransaction {
        let message = Message::new_with_blockhash(
            &[system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 7)],
            Some(&payer.pubkey()),
            &Hash::new_unique(),
        );
        ComposedTransaction::new(Transaction::new_unsigned(message), 100)
    }

    #[test]
    fn test_signature_absent_until_signed() {
        let payer = Keypair::new();
        let mut composed = unsigned(&payer);
        assert!(composed.signature().is_none());
        assert_eq!(composed.missing_signers(), vec![payer.pubkey()]);

        let blockhash = composed.tx.message.recent_blockhash;
        composed.tx.sign(&[&payer], blockhash);
        assert!(composed.signature().is_some());
        assert!(composed.is_fully_signed());
        assert!(composed.missing_signers().is_empty());
    }

    #[test]
    fn test_instructions_round_trip_through_message() {
        let payer = Keypair::new();
        let composed = unsigned(&payer);
        let ixs = composed.instructions();
        assert_eq!(ixs.len(), 1);
        assert_eq!(ixs[0].accounts[0].pubkey, payer.pubkey());
        assert!(ixs[0].accounts[0].is_signer);
    }

    #[test]
    fn test_base64_wire_form_decodes() {
        let payer = Keypair::new();
        let composed = unsigned(&payer);
        let encoded = composed.to_base64().unwrap();
        let bytes = BASE64_STANDARD.decode(encoded).unwrap();
        let tx: Transaction = bincode::deserialize(&bytes).unwrap();
        assert_eq!(tx.message, composed.tx.message);
    }
}
