//! Service fee payment instruction
//!
//! The fee is a plain system transfer from the payer to the treasury, placed
//! last in the transaction so it only lands if every operation before it
//! succeeded.

use std::fmt;
use std::str::FromStr;

use solana_sdk::{
    instruction::Instruction, native_token::LAMPORTS_PER_SOL, pubkey::Pubkey, system_instruction,
    system_program,
};

use crate::errors::FeeGateError;

/// System program `Transfer` discriminator (u32 little-endian)
const TRANSFER_DISCRIMINATOR: [u8; 4] = [2, 0, 0, 0];

/// Validated treasury address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Treasury(Pubkey);

impl Treasury {
    /// Parse and validate a configured treasury address.
    ///
    /// Rejects empty input, invalid base58 and the all-ones default address
    /// (which is also the system program id).
    pub fn parse(address: &str) -> Result<Self, FeeGateError> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(FeeGateError::config("treasury wallet address is not set"));
        }
        let pubkey = Pubkey::from_str(trimmed).map_err(|e| {
            FeeGateError::config(format!("treasury wallet address {trimmed:?} is invalid: {e}"))
        })?;
        Self::from_pubkey(pubkey)
    }

    pub fn from_pubkey(pubkey: Pubkey) -> Result<Self, FeeGateError> {
        if pubkey == Pubkey::default() || pubkey == system_program::id() {
            return Err(FeeGateError::config(
                "treasury wallet address is the placeholder default address",
            ));
        }
        Ok(Self(pubkey))
    }

    pub fn pubkey(&self) -> Pubkey {
        self.0
    }
}

impl fmt::Display for Treasury {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Convert a SOL amount to lamports, rounding to the nearest lamport.
pub fn sol_to_lamports(sol: f64) -> Result<u64, FeeGateError> {
    if !sol.is_finite() || sol < 0.0 {
        return Err(FeeGateError::InvalidAmount(format!("{sol} SOL")));
    }
    let lamports = (sol * LAMPORTS_PER_SOL as f64).round();
    if lamports < 1.0 || lamports > u64::MAX as f64 {
        return Err(FeeGateError::InvalidAmount(format!(
            "{sol} SOL does not convert to a positive lamport amount"
        )));
    }
    Ok(lamports as u64)
}

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Build the fee transfer from `payer` to the treasury.
pub fn build_payment_instruction(
    payer: &Pubkey,
    treasury: &Treasury,
    lamports: u64,
) -> Result<Instruction, FeeGateError> {
    if lamports == 0 {
        return Err(FeeGateError::InvalidAmount(
            "payment amount must be at least one lamport".to_string(),
        ));
    }
    Ok(system_instruction::transfer(payer, &treasury.0, lamports))
}

/// Decode a system transfer's lamport amount from raw instruction data.
pub fn decode_transfer(program_id: &Pubkey, data: &[u8]) -> Option<u64> {
    if *program_id != system_program::id() || data.len() != 12 || data[..4] != TRANSFER_DISCRIMINATOR {
        return None;
    }
    let mut amount = [0u8; 8];
    amount.copy_from_slice(&data[4..12]);
    Some(u64::from_le_bytes(amount))
}

/// Whether `ix` is a system transfer (any recipient)
pub fn is_transfer(ix: &Instruction) -> bool {
    decode_transfer(&ix.program_id, &ix.data).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_treasury_rejects_placeholders() {
        assert!(matches!(
            Treasury::parse(""),
            Err(FeeGateError::Configuration(_))
        ));
        assert!(matches!(
            Treasury::parse("11111111111111111111111111111111"),
            Err(FeeGateError::Configuration(_))
        ));
        assert!(matches!(
            Treasury::parse("not-a-key"),
            Err(FeeGateError::Configuration(_))
        ));

        let key = Pubkey::new_unique();
        let treasury = Treasury::parse(&format!("  {key} ")).unwrap();
        assert_eq!(treasury.pubkey(), key);
    }

    #[test]
    fn test_sol_to_lamports_rounding() {
        assert_eq!(sol_to_lamports(0.05).unwrap(), 50_000_000);
        assert_eq!(sol_to_lamports(0.1).unwrap(), 100_000_000);
        assert_eq!(sol_to_lamports(0.000001).unwrap(), 1_000);
        assert_eq!(sol_to_lamports(3.0).unwrap(), 3_000_000_000);
        // Rounds to nearest
        assert_eq!(sol_to_lamports(0.0000000016).unwrap(), 2);
    }

    #[test]
    fn test_sol_to_lamports_rejects_bad_amounts() {
        assert!(matches!(sol_to_lamports(0.0), Err(FeeGateError::InvalidAmount(_))));
        assert!(matches!(sol_to_lamports(-1.0), Err(FeeGateError::InvalidAmount(_))));
        assert!(matches!(sol_to_lamports(f64::NAN), Err(FeeGateError::InvalidAmount(_))));
        assert!(matches!(
            sol_to_lamports(0.0000000001),
            Err(FeeGateError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_build_payment_instruction() {
        let payer = Pubkey::new_unique();
        let treasury = Treasury::from_pubkey(Pubkey::new_unique()).unwrap();

        let ix = build_payment_instruction(&payer, &treasury, 1_000).unwrap();
        assert_eq!(ix.program_id, system_program::id());
        assert_eq!(ix.accounts[0].pubkey, payer);
        assert!(ix.accounts[0].is_signer);
        assert_eq!(ix.accounts[1].pubkey, treasury.pubkey());
        assert_eq!(decode_transfer(&ix.program_id, &ix.data), Some(1_000));

        assert!(matches!(
            build_payment_instruction(&payer, &treasury, 0),
            Err(FeeGateError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_decode_transfer_ignores_other_instructions() {
        let payer = Pubkey::new_unique();
        let new_account = Pubkey::new_unique();
        let ix = system_instruction::create_account(&payer, &new_account, 10, 82, &Pubkey::new_unique());
        assert!(!is_transfer(&ix));
    }
}
