//! Fee policy: what each action costs, given membership state
//!
//! Resolution is pure. The caller reads membership fresh before every
//! fee-gated action and passes `None` when the lookup failed, which resolves
//! exactly like an inactive membership.

use serde::{Deserialize, Serialize};

use crate::config::FeeConfig;
use crate::errors::FeeGateError;
use crate::membership::plan::Plan;
use crate::membership::MembershipStatus;
use crate::tx_builder::payment::sol_to_lamports;
use crate::types::AuthorityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeeActionKind {
    CreateToken,
    RevokeMintAuthority,
    RevokeFreezeAuthority,
    UpdateMetadata,
    BurnTokens,
    MembershipPurchase(Plan),
}

impl FeeActionKind {
    /// Membership purchases are the one gated action members still pay in full.
    pub fn is_discountable(&self) -> bool {
        !matches!(self, FeeActionKind::MembershipPurchase(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeeActionKind::CreateToken => "create_token",
            FeeActionKind::RevokeMintAuthority => "revoke_mint_authority",
            FeeActionKind::RevokeFreezeAuthority => "revoke_freeze_authority",
            FeeActionKind::UpdateMetadata => "update_metadata",
            FeeActionKind::BurnTokens => "burn_tokens",
            FeeActionKind::MembershipPurchase(_) => "membership_purchase",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeAction {
    pub kind: FeeActionKind,
    /// Number of premium sub-features; only token creation uses more than one
    pub multiplicity: u32,
}

impl FeeAction {
    pub fn token_creation(premium_features: u32) -> Self {
        Self {
            kind: FeeActionKind::CreateToken,
            multiplicity: premium_features,
        }
    }

    pub fn revoke(authority: AuthorityKind) -> Self {
        let kind = match authority {
            AuthorityKind::Mint => FeeActionKind::RevokeMintAuthority,
            AuthorityKind::Freeze => FeeActionKind::RevokeFreezeAuthority,
        };
        Self { kind, multiplicity: 1 }
    }

    pub fn metadata_update() -> Self {
        Self {
            kind: FeeActionKind::UpdateMetadata,
            multiplicity: 1,
        }
    }

    pub fn burn() -> Self {
        Self {
            kind: FeeActionKind::BurnTokens,
            multiplicity: 1,
        }
    }

    pub fn membership(plan: Plan) -> Self {
        Self {
            kind: FeeActionKind::MembershipPurchase(plan),
            multiplicity: 1,
        }
    }
}

/// Base fees in lamports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeSchedule {
    pub premium_feature_fee: u64,
    pub revoke_authority_fee: u64,
    pub burn_fee: u64,
    pub metadata_update_fee: u64,
    /// Flat fee charged to active members for gated actions (non-zero)
    pub member_fee: u64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            premium_feature_fee: 50_000_000,
            revoke_authority_fee: 50_000_000,
            burn_fee: 50_000_000,
            metadata_update_fee: 100_000_000,
            member_fee: 1_000,
        }
    }
}

impl FeeSchedule {
    pub fn from_config(cfg: &FeeConfig) -> Result<Self, FeeGateError> {
        Ok(Self {
            premium_feature_fee: sol_to_lamports(cfg.premium_feature_fee_sol)?,
            revoke_authority_fee: sol_to_lamports(cfg.revoke_authority_fee_sol)?,
            burn_fee: sol_to_lamports(cfg.burn_fee_sol)?,
            metadata_update_fee: sol_to_lamports(cfg.metadata_update_fee_sol)?,
            member_fee: sol_to_lamports(cfg.member_fee_sol)?,
        })
    }

    /// Base fee for one unit of the action, before multiplicity and discounts
    pub fn base_fee(&self, action: &FeeAction) -> u64 {
        match action.kind {
            FeeActionKind::CreateToken if action.multiplicity == 0 => 0,
            FeeActionKind::CreateToken => self.premium_feature_fee,
            FeeActionKind::RevokeMintAuthority | FeeActionKind::RevokeFreezeAuthority => {
                self.revoke_authority_fee
            }
            FeeActionKind::UpdateMetadata => self.metadata_update_fee,
            FeeActionKind::BurnTokens => self.burn_fee,
            FeeActionKind::MembershipPurchase(plan) => plan.sol_price_lamports(),
        }
    }
}

/// Effective fee in lamports for `action`.
///
/// Ungated actions (zero base fee) are free for everyone. Gated actions cost
/// `member_fee` for an active member and `base × max(1, multiplicity)`
/// otherwise. Membership purchases are never discounted.
pub fn resolve_fee(
    action: &FeeAction,
    membership: Option<&MembershipStatus>,
    schedule: &FeeSchedule,
    now_ms: i64,
) -> u64 {
    let base = schedule.base_fee(action);
    if base == 0 {
        return 0;
    }

    let is_member = membership.is_some_and(|m| m.is_active_at(now_ms));
    if is_member && action.kind.is_discountable() {
        return schedule.member_fee;
    }

    base.saturating_mul(u64::from(action.multiplicity.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const NOW: i64 = 1_700_000_000_000;

    fn active() -> MembershipStatus {
        MembershipStatus {
            is_active: true,
            expires_at: Some(NOW + 60_000),
            revision: 1,
        }
    }

    fn expired_at(expires_at: i64) -> MembershipStatus {
        MembershipStatus {
            is_active: true,
            expires_at: Some(expires_at),
            revision: 1,
        }
    }

    #[test]
    fn test_creation_without_premium_features_is_free() {
        let schedule = FeeSchedule::default();
        assert_eq!(resolve_fee(&FeeAction::token_creation(0), None, &schedule, NOW), 0);
        assert_eq!(
            resolve_fee(&FeeAction::token_creation(0), Some(&active()), &schedule, NOW),
            0
        );
    }

    #[test]
    fn test_creation_with_two_revocations_non_member() {
        let schedule = FeeSchedule::default();
        assert_eq!(
            resolve_fee(&FeeAction::token_creation(2), None, &schedule, NOW),
            100_000_000
        );
    }

    #[test]
    fn test_member_pays_minimal_fee() {
        let schedule = FeeSchedule::default();
        for action in [
            FeeAction::token_creation(2),
            FeeAction::burn(),
            FeeAction::metadata_update(),
            FeeAction::revoke(AuthorityKind::Freeze),
        ] {
            assert_eq!(resolve_fee(&action, Some(&active()), &schedule, NOW), 1_000);
        }
    }

    #[test]
    fn test_membership_purchase_never_discounted() {
        let schedule = FeeSchedule::default();
        let action = FeeAction::membership(Plan::Monthly);
        assert_eq!(
            resolve_fee(&action, Some(&active()), &schedule, NOW),
            3_000_000_000
        );
    }

    #[test]
    fn test_expiry_boundary_is_inactive() {
        let schedule = FeeSchedule::default();
        let status = expired_at(NOW);
        // expiresAt == now is already expired, even with a stale is_active flag
        assert_eq!(
            resolve_fee(&FeeAction::burn(), Some(&status), &schedule, NOW),
            50_000_000
        );
        let status = expired_at(NOW + 1);
        assert_eq!(resolve_fee(&FeeAction::burn(), Some(&status), &schedule, NOW), 1_000);
    }

    #[test]
    fn test_schedule_from_config_defaults() {
        let schedule = FeeSchedule::from_config(&FeeConfig::default()).unwrap();
        assert_eq!(schedule, FeeSchedule::default());
    }

    fn any_action() -> impl Strategy<Value = FeeAction> {
        prop_oneof![
            (0u32..8).prop_map(FeeAction::token_creation),
            Just(FeeAction::revoke(AuthorityKind::Mint)),
            Just(FeeAction::revoke(AuthorityKind::Freeze)),
            Just(FeeAction::metadata_update()),
            Just(FeeAction::burn()),
            Just(FeeAction::membership(Plan::Weekly)),
            Just(FeeAction::membership(Plan::Monthly)),
        ]
    }

    proptest! {
        #[test]
        fn prop_non_member_pays_base_times_multiplicity(action in any_action(), now in 0i64..i64::MAX / 2) {
            let schedule = FeeSchedule::default();
            let fee = resolve_fee(&action, None, &schedule, now);
            let expected = schedule.base_fee(&action) * u64::from(action.multiplicity.max(1));
            prop_assert_eq!(fee, expected);
        }

        #[test]
        fn prop_member_pays_minimal_fee_for_gated_actions(action in any_action(), ahead in 1i64..1_000_000_000) {
            let schedule = FeeSchedule::default();
            let status = MembershipStatus { is_active: true, expires_at: Some(NOW + ahead), revision: 3 };
            let fee = resolve_fee(&action, Some(&status), &schedule, NOW);
            let base = schedule.base_fee(&action);
            if base == 0 {
                prop_assert_eq!(fee, 0);
            } else if action.kind.is_discountable() {
                prop_assert_eq!(fee, schedule.member_fee);
            } else {
                prop_assert_eq!(fee, base);
            }
        }

        #[test]
        fn prop_expired_membership_resolves_like_none(action in any_action(), behind in 0i64..1_000_000_000) {
            let schedule = FeeSchedule::default();
            let status = expired_at(NOW - behind);
            prop_assert_eq!(
                resolve_fee(&action, Some(&status), &schedule, NOW),
                resolve_fee(&action, None, &schedule, NOW)
            );
        }
    }
}
