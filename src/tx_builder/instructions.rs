//! Instruction planning and ordering validation
//!
//! Operation instructions for each action, in the order they must execute:
//! 1. Compute budget (optional)
//! 2. Create mint account, initialize mint, create associated account, mint-to
//! 3. Create metadata
//! 4. Revoke mint authority, revoke freeze authority
//! 5. Lock metadata
//! 6. Service fee payment (appended by the composer)

use solana_sdk::{
    compute_budget::{self, ComputeBudgetInstruction},
    instruction::Instruction,
    pubkey::Pubkey,
    system_instruction, system_program,
};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account,
};
use spl_token::solana_program::program_pack::Pack;

use crate::errors::FeeGateError;
use crate::tx_builder::metadata_program::{
    self, create_metadata_account_v3, decode_update_args, update_metadata_account_v2, DataV2,
    UpdateArgs, MAX_URI_LENGTH, TOKEN_METADATA_PROGRAM_ID,
};
use crate::tx_builder::payment::is_transfer;
use crate::types::AuthorityKind;

/// What an instruction does, in required execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationStep {
    ComputeBudget,
    CreateMintAccount,
    InitializeMint,
    CreateAssociatedAccount,
    MintTo,
    CreateMetadata,
    UpdateMetadata,
    RevokeMintAuthority,
    RevokeFreezeAuthority,
    LockMetadata,
    Burn,
    Payment,
    Other,
}

/// Classify an instruction by program id and discriminator
pub fn classify_instruction(ix: &Instruction) -> OperationStep {
    if ix.program_id == compute_budget::id() {
        return OperationStep::ComputeBudget;
    }
    if ix.program_id == system_program::id() {
        if is_transfer(ix) {
            return OperationStep::Payment;
        }
        if ix.data.get(..4) == Some(&[0u8, 0, 0, 0][..]) {
            return OperationStep::CreateMintAccount;
        }
        return OperationStep::Other;
    }
    if ix.program_id == spl_associated_token_account::id() {
        return OperationStep::CreateAssociatedAccount;
    }
    if ix.program_id == spl_token::id() {
        return match (ix.data.first(), ix.data.get(1)) {
            (Some(0 | 20), _) => OperationStep::InitializeMint,
            (Some(7 | 14), _) => OperationStep::MintTo,
            (Some(6), Some(0)) => OperationStep::RevokeMintAuthority,
            (Some(6), Some(1)) => OperationStep::RevokeFreezeAuthority,
            (Some(8 | 15), _) => OperationStep::Burn,
            _ => OperationStep::Other,
        };
    }
    if ix.program_id == TOKEN_METADATA_PROGRAM_ID {
        return match ix.data.first() {
            Some(&metadata_program::CREATE_METADATA_V3_DISCRIMINATOR) => OperationStep::CreateMetadata,
            Some(&metadata_program::UPDATE_METADATA_V2_DISCRIMINATOR) => {
                match decode_update_args(&ix.data) {
                    Ok(args) if args.is_lock() => OperationStep::LockMetadata,
                    Ok(_) => OperationStep::UpdateMetadata,
                    Err(_) => OperationStep::Other,
                }
            }
            _ => OperationStep::Other,
        };
    }
    OperationStep::Other
}

/// Ordered operation instructions for one transaction (payment excluded)
#[derive(Debug, Clone, Default)]
pub struct InstructionPlan {
    pub instructions: Vec<Instruction>,
}

impl InstructionPlan {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    /// Prepend a compute-unit-limit instruction when configured
    pub fn with_compute_unit_limit(mut self, limit: Option<u32>) -> Self {
        if let Some(limit) = limit.filter(|l| *l > 0) {
            self.instructions
                .insert(0, ComputeBudgetInstruction::set_compute_unit_limit(limit));
        }
        self
    }

    pub fn steps(&self) -> Vec<OperationStep> {
        self.instructions.iter().map(classify_instruction).collect()
    }
}

/// Inputs for a token creation plan
#[derive(Debug, Clone)]
pub struct CreateTokenPlan<'a> {
    pub payer: Pubkey,
    pub mint: Pubkey,
    pub decimals: u8,
    /// Supply in base units (already scaled by decimals)
    pub raw_supply: u64,
    /// Rent-exempt balance for a mint account
    pub rent_lamports: u64,
    pub name: &'a str,
    pub symbol: &'a str,
    pub uri: &'a str,
    pub revoke_mint: bool,
    pub revoke_freeze: bool,
    pub lock_metadata: bool,
}

fn token_ix_error(what: &str, err: impl std::fmt::Display) -> FeeGateError {
    FeeGateError::internal(format!("failed to build {what} instruction: {err}"))
}

/// Plan a token creation.
///
/// The payer is mint authority, freeze authority and update authority. The
/// metadata is created mutable; locking is a separate update placed after
/// the revocations so it cannot block them.
pub fn plan_create_token_instructions(
    p: &CreateTokenPlan<'_>,
) -> Result<InstructionPlan, FeeGateError> {
    if p.raw_supply == 0 {
        return Err(FeeGateError::validation("initial supply must be greater than zero"));
    }
    if p.uri.len() > MAX_URI_LENGTH {
        return Err(FeeGateError::validation(format!(
            "metadata uri exceeds {MAX_URI_LENGTH} bytes"
        )));
    }

    let token_program = spl_token::id();
    let ata = get_associated_token_address(&p.payer, &p.mint);

    let mut instructions = Vec::with_capacity(8);
    instructions.push(system_instruction::create_account(
        &p.payer,
        &p.mint,
        p.rent_lamports,
        spl_token::state::Mint::LEN as u64,
        &token_program,
    ));
    instructions.push(
        spl_token::instruction::initialize_mint2(
            &token_program,
            &p.mint,
            &p.payer,
            Some(&p.payer),
            p.decimals,
        )
        .map_err(|e| token_ix_error("initialize_mint2", e))?,
    );
    instructions.push(create_associated_token_account(
        &p.payer,
        &p.payer,
        &p.mint,
        &token_program,
    ));
    instructions.push(
        spl_token::instruction::mint_to(&token_program, &p.mint, &ata, &p.payer, &[], p.raw_supply)
            .map_err(|e| token_ix_error("mint_to", e))?,
    );
    instructions.push(create_metadata_account_v3(
        &p.mint,
        &p.payer,
        &p.payer,
        &p.payer,
        &DataV2::new(p.name, p.symbol, p.uri),
        true,
    ));
    if p.revoke_mint {
        instructions.push(revoke_authority_instruction(&p.mint, &p.payer, AuthorityKind::Mint)?);
    }
    if p.revoke_freeze {
        instructions.push(revoke_authority_instruction(&p.mint, &p.payer, AuthorityKind::Freeze)?);
    }
    if p.lock_metadata {
        instructions.push(lock_metadata_instruction(&p.mint, &p.payer));
    }

    Ok(InstructionPlan::new(instructions))
}

fn revoke_authority_instruction(
    mint: &Pubkey,
    authority: &Pubkey,
    kind: AuthorityKind,
) -> Result<Instruction, FeeGateError> {
    spl_token::instruction::set_authority(&spl_token::id(), mint, None, kind.to_spl(), authority, &[])
        .map_err(|e| token_ix_error("set_authority", e))
}

fn lock_metadata_instruction(mint: &Pubkey, update_authority: &Pubkey) -> Instruction {
    update_metadata_account_v2(
        mint,
        update_authority,
        &UpdateArgs {
            is_mutable: Some(false),
            ..Default::default()
        },
    )
}

pub fn plan_revoke_authority_instructions(
    mint: &Pubkey,
    authority: &Pubkey,
    kind: AuthorityKind,
) -> Result<InstructionPlan, FeeGateError> {
    Ok(InstructionPlan::new(vec![revoke_authority_instruction(
        mint, authority, kind,
    )?]))
}

/// Burn `raw_amount` base units from the owner's associated account
pub fn plan_burn_instructions(
    owner: &Pubkey,
    mint: &Pubkey,
    raw_amount: u64,
    decimals: u8,
) -> Result<InstructionPlan, FeeGateError> {
    if raw_amount == 0 {
        return Err(FeeGateError::validation("burn amount must be greater than zero"));
    }
    let ata = get_associated_token_address(owner, mint);
    let ix = spl_token::instruction::burn_checked(
        &spl_token::id(),
        &ata,
        mint,
        owner,
        &[],
        raw_amount,
        decimals,
    )
    .map_err(|e| token_ix_error("burn_checked", e))?;
    Ok(InstructionPlan::new(vec![ix]))
}

/// Replace the on-chain data, optionally locking in the same instruction.
/// With `data = None` and `make_immutable` this is a pure lock.
pub fn plan_update_metadata_instructions(
    mint: &Pubkey,
    update_authority: &Pubkey,
    data: Option<DataV2>,
    make_immutable: bool,
) -> Result<InstructionPlan, FeeGateError> {
    if data.is_none() && !make_immutable {
        return Err(FeeGateError::validation("metadata update changes nothing"));
    }
    if let Some(data) = &data {
        if data.uri.len() > MAX_URI_LENGTH {
            return Err(FeeGateError::validation(format!(
                "metadata uri exceeds {MAX_URI_LENGTH} bytes"
            )));
        }
    }
    let args = UpdateArgs {
        data,
        is_mutable: make_immutable.then_some(false),
        ..Default::default()
    };
    Ok(InstructionPlan::new(vec![update_metadata_account_v2(
        mint,
        update_authority,
        &args,
    )]))
}

/// Validate instruction ordering before signing.
///
/// Rules:
/// - the list is not empty
/// - compute budget instructions only lead
/// - the payment transfer appears at most once and only last
/// - every other recognised step follows the creation order (metadata after
///   mint-to, revocations after metadata, lock after revocations)
pub fn sanity_check_ix_order(instructions: &[Instruction]) -> Result<(), FeeGateError> {
    if instructions.is_empty() {
        return Err(FeeGateError::invalid_order("Instruction list is empty"));
    }

    let steps: Vec<OperationStep> = instructions.iter().map(classify_instruction).collect();
    let last = steps.len() - 1;

    for (idx, step) in steps.iter().enumerate() {
        if *step == OperationStep::Payment && idx != last {
            return Err(FeeGateError::invalid_order(format!(
                "payment transfer must be the last instruction (found at position {idx} of {})",
                steps.len()
            )));
        }
    }

    let mut seen_operation = false;
    let mut previous: Option<(usize, OperationStep)> = None;
    for (idx, step) in steps.iter().copied().enumerate() {
        match step {
            OperationStep::ComputeBudget => {
                if seen_operation {
                    return Err(FeeGateError::invalid_order(format!(
                        "compute budget instruction at position {idx} follows program instructions"
                    )));
                }
                continue;
            }
            OperationStep::Other => {
                seen_operation = true;
                continue;
            }
            _ => seen_operation = true,
        }
        if let Some((prev_idx, prev)) = previous {
            if step < prev {
                return Err(FeeGateError::invalid_order(format!(
                    "{step:?} at position {idx} must not precede {prev:?} at position {prev_idx}"
                )));
            }
        }
        previous = Some((idx, step));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creation_plan(revoke_mint: bool, revoke_freeze: bool, lock: bool) -> InstructionPlan {
        plan_create_token_instructions(&CreateTokenPlan {
            payer: Pubkey::new_unique(),
            mint: Pubkey::new_unique(),
            decimals: 9,
            raw_supply: 1_000_000 * 1_000_000_000,
            rent_lamports: 1_461_600,
            name: "Gate",
            symbol: "GATE",
            uri: "https://cdn/meta.json",
            revoke_mint,
            revoke_freeze,
            lock_metadata: lock,
        })
        .unwrap()
    }

    #[test]
    fn test_full_creation_order() {
        let plan = creation_plan(true, true, true);
        assert_eq!(
            plan.steps(),
            vec![
                OperationStep::CreateMintAccount,
                OperationStep::InitializeMint,
                OperationStep::CreateAssociatedAccount,
                OperationStep::MintTo,
                OperationStep::CreateMetadata,
                OperationStep::RevokeMintAuthority,
                OperationStep::RevokeFreezeAuthority,
                OperationStep::LockMetadata,
            ]
        );
        sanity_check_ix_order(&plan.instructions).unwrap();
    }

    #[test]
    fn test_minimal_creation_has_no_revocations() {
        let plan = creation_plan(false, false, false);
        assert_eq!(plan.instructions.len(), 5);
        assert_eq!(plan.steps().last(), Some(&OperationStep::CreateMetadata));
    }

    #[test]
    fn test_compute_unit_limit_leads() {
        let plan = creation_plan(false, false, false).with_compute_unit_limit(Some(300_000));
        assert_eq!(plan.steps()[0], OperationStep::ComputeBudget);
        sanity_check_ix_order(&plan.instructions).unwrap();

        let plan = creation_plan(false, false, false).with_compute_unit_limit(None);
        assert_eq!(plan.steps()[0], OperationStep::CreateMintAccount);
    }

    #[test]
    fn test_zero_supply_rejected() {
        let result = plan_create_token_instructions(&CreateTokenPlan {
            payer: Pubkey::new_unique(),
            mint: Pubkey::new_unique(),
            decimals: 0,
            raw_supply: 0,
            rent_lamports: 1,
            name: "a",
            symbol: "b",
            uri: "c",
            revoke_mint: false,
            revoke_freeze: false,
            lock_metadata: false,
        });
        assert!(matches!(result, Err(FeeGateError::Validation(_))));
    }

    #[test]
    fn test_sanity_check_rejects_payment_not_last() {
        let payer = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let mut ixs = plan_burn_instructions(&payer, &mint, 10, 6).unwrap().instructions;
        ixs.insert(0, system_instruction::transfer(&payer, &Pubkey::new_unique(), 5));

        let err = sanity_check_ix_order(&ixs).unwrap_err();
        assert!(matches!(err, FeeGateError::InvalidInstructionOrder(_)));
    }

    #[test]
    fn test_sanity_check_rejects_revoke_before_metadata() {
        let mut ixs = creation_plan(true, false, false).instructions;
        // swap create-metadata (4) and revoke-mint (5)
        ixs.swap(4, 5);
        assert!(sanity_check_ix_order(&ixs).is_err());
    }

    #[test]
    fn test_sanity_check_rejects_lock_before_revocations() {
        let mut ixs = creation_plan(true, true, true).instructions;
        let lock = ixs.pop().unwrap();
        ixs.insert(5, lock);
        assert!(sanity_check_ix_order(&ixs).is_err());
    }

    #[test]
    fn test_sanity_check_rejects_empty() {
        assert!(sanity_check_ix_order(&[]).is_err());
    }

    #[test]
    fn test_update_plans() {
        let mint = Pubkey::new_unique();
        let authority = Pubkey::new_unique();

        let lock = plan_update_metadata_instructions(&mint, &authority, None, true).unwrap();
        assert_eq!(lock.steps(), vec![OperationStep::LockMetadata]);

        let update = plan_update_metadata_instructions(
            &mint,
            &authority,
            Some(DataV2::new("n", "s", "u")),
            true,
        )
        .unwrap();
        assert_eq!(update.steps(), vec![OperationStep::UpdateMetadata]);

        assert!(plan_update_metadata_instructions(&mint, &authority, None, false).is_err());
    }

    #[test]
    fn test_revoke_plan_classification() {
        let mint = Pubkey::new_unique();
        let authority = Pubkey::new_unique();
        let plan = plan_revoke_authority_instructions(&mint, &authority, AuthorityKind::Freeze).unwrap();
        assert_eq!(plan.steps(), vec![OperationStep::RevokeFreezeAuthority]);
    }
}
