//! Transaction composition
//!
//! Operation instructions keep caller order and the payment instruction goes
//! last. Generated keypairs sign here; the wallet signature is added later by
//! the caller through `WalletSigner`, so the composed transaction is only
//! partially signed when it leaves this module.

use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    message::Message,
    pubkey::Pubkey,
    signature::Keypair,
    transaction::Transaction,
};
use tracing::debug;

use crate::errors::FeeGateError;
use crate::tx_builder::instructions::{sanity_check_ix_order, InstructionPlan};
use crate::tx_builder::output::ComposedTransaction;

/// Compose a transaction from an operation plan and an optional payment.
pub fn compose(
    plan: &InstructionPlan,
    payment: Option<&Instruction>,
    payer: &Pubkey,
    extra_signers: &[&Keypair],
    blockhash: Hash,
    last_valid_block_height: u64,
) -> Result<ComposedTransaction, FeeGateError> {
    let mut instructions = Vec::with_capacity(plan.instructions.len() + 1);
    instructions.extend(plan.instructions.iter().cloned());
    if let Some(payment) = payment {
        instructions.push(payment.clone());
    }

    sanity_check_ix_order(&instructions)?;

    let message = Message::new_with_blockhash(&instructions, Some(payer), &blockhash);
    let mut tx = Transaction::new_unsigned(message);

    if !extra_signers.is_empty() {
        tx.try_partial_sign(extra_signers, blockhash)
            .map_err(|e| FeeGateError::Signing(format!("generated keypair signing failed: {e}")))?;
    }

    debug!(
        instructions = instructions.len(),
        with_payment = payment.is_some(),
        extra_signers = extra_signers.len(),
        "composed transaction"
    );

    Ok(ComposedTransaction::new(tx, last_valid_block_height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::wallet::{KeypairWallet, WalletSigner};
    use crate::tx_builder::instructions::{
        classify_instruction, plan_create_token_instructions, CreateTokenPlan, OperationStep,
    };
    use crate::tx_builder::payment::{build_payment_instruction, Treasury};
    use solana_sdk::signer::Signer;

    fn creation(payer: &Pubkey, mint: &Pubkey) -> InstructionPlan {
        plan_create_token_instructions(&CreateTokenPlan {
            payer: *payer,
            mint: *mint,
            decimals: 6,
            raw_supply: 1_000,
            rent_lamports: 1_461_600,
            name: "Gate",
            symbol: "GATE",
            uri: "https://cdn/meta.json",
            revoke_mint: true,
            revoke_freeze: false,
            lock_metadata: false,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_mint_signs_first_wallet_last() {
        let wallet = KeypairWallet::from_keypair(Keypair::new());
        let mint = Keypair::new();
        let treasury = Treasury::from_pubkey(Pubkey::new_unique()).unwrap();
        let payment = build_payment_instruction(&wallet.pubkey(), &treasury, 50_000_000).unwrap();

        let mut composed = compose(
            &creation(&wallet.pubkey(), &mint.pubkey()),
            Some(&payment),
            &wallet.pubkey(),
            &[&mint],
            Hash::new_unique(),
            500,
        )
        .unwrap();

        assert!(!composed.is_fully_signed());
        assert_eq!(composed.missing_signers(), vec![wallet.pubkey()]);

        wallet.sign_transaction(&mut composed.tx).await.unwrap();
        assert!(composed.is_fully_signed());
        assert!(composed.tx.verify().is_ok());
        assert_eq!(composed.last_valid_block_height, 500);
    }

    #[test]
    fn test_payment_is_last() {
        let payer = Keypair::new();
        let mint = Keypair::new();
        let treasury = Treasury::from_pubkey(Pubkey::new_unique()).unwrap();
        let payment = build_payment_instruction(&payer.pubkey(), &treasury, 1_000).unwrap();

        let composed = compose(
            &creation(&payer.pubkey(), &mint.pubkey()),
            Some(&payment),
            &payer.pubkey(),
            &[&mint],
            Hash::new_unique(),
            1,
        )
        .unwrap();
        let steps: Vec<_> = composed.instructions().iter().map(classify_instruction).collect();
        assert_eq!(steps.last(), Some(&OperationStep::Payment));
        assert_eq!(steps.iter().filter(|s| **s == OperationStep::Payment).count(), 1);
    }

    #[test]
    fn test_payment_only_transaction() {
        let payer = Keypair::new();
        let treasury = Treasury::from_pubkey(Pubkey::new_unique()).unwrap();
        let payment = build_payment_instruction(&payer.pubkey(), &treasury, 1_000_000_000).unwrap();
        let composed = compose(
            &InstructionPlan::default(),
            Some(&payment),
            &payer.pubkey(),
            &[],
            Hash::new_unique(),
            1,
        )
        .unwrap();
        assert_eq!(composed.tx.message.instructions.len(), 1);
    }

    #[test]
    fn test_empty_composition_rejected() {
        let payer = Pubkey::new_unique();
        let result = compose(&InstructionPlan::default(), None, &payer, &[], Hash::new_unique(), 1);
        assert!(matches!(result, Err(FeeGateError::InvalidInstructionOrder(_))));
    }

    #[test]
    fn test_unrelated_keypair_cannot_sign() {
        let payer = Keypair::new();
        let mint = Keypair::new();
        let stranger = Keypair::new();
        let result = compose(
            &creation(&payer.pubkey(), &mint.pubkey()),
            None,
            &payer.pubkey(),
            &[&mint, &stranger],
            Hash::new_unique(),
            1,
        );
        assert!(matches!(result, Err(FeeGateError::Signing(_))));
    }
}
