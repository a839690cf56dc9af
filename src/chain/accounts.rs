//! Parsing of the account types the orchestrator reads back from chain

use solana_sdk::pubkey::Pubkey;
use spl_token::solana_program::program_pack::Pack;

use crate::chain::codec::Reader;
use crate::chain::ChainError;

/// `Key::MetadataV1` tag of the Token Metadata program
pub const METADATA_V1_KEY: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintState {
    pub decimals: u8,
    pub supply: u64,
    pub mint_authority: Option<Pubkey>,
    pub freeze_authority: Option<Pubkey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAccountState {
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainMetadata {
    pub update_authority: Pubkey,
    pub mint: Pubkey,
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub seller_fee_basis_points: u16,
    pub primary_sale_happened: bool,
    pub is_mutable: bool,
}

pub fn parse_mint(address: &Pubkey, data: &[u8]) -> Result<MintState, ChainError> {
    let mint = spl_token::state::Mint::unpack(data).map_err(|e| ChainError::MalformedAccount {
        account: *address,
        reason: format!("not an initialized SPL mint: {e}"),
    })?;
    Ok(MintState {
        decimals: mint.decimals,
        supply: mint.supply,
        mint_authority: mint.mint_authority.into(),
        freeze_authority: mint.freeze_authority.into(),
    })
}

pub fn parse_token_account(address: &Pubkey, data: &[u8]) -> Result<TokenAccountState, ChainError> {
    let account =
        spl_token::state::Account::unpack(data).map_err(|e| ChainError::MalformedAccount {
            account: *address,
            reason: format!("not an initialized SPL token account: {e}"),
        })?;
    Ok(TokenAccountState {
        mint: account.mint,
        owner: account.owner,
        amount: account.amount,
    })
}

pub fn parse_metadata(address: &Pubkey, data: &[u8]) -> Result<OnChainMetadata, ChainError> {
    read_metadata(data).map_err(|reason| ChainError::MalformedAccount {
        account: *address,
        reason,
    })
}

fn read_metadata(data: &[u8]) -> Result<OnChainMetadata, String> {
    let mut r = Reader::new(data);
    let key = r.u8()?;
    if key != METADATA_V1_KEY {
        return Err(format!("unexpected metadata key {key}"));
    }
    let update_authority = r.pubkey()?;
    let mint = r.pubkey()?;
    // On-chain strings are padded with NUL to their maximum length
    let name = trim_padding(r.string()?);
    let symbol = trim_padding(r.string()?);
    let uri = trim_padding(r.string()?);
    let seller_fee_basis_points = r.u16()?;
    if r.option()? {
        let count = r.u32()? as usize;
        r.skip(count * 34)?;
    }
    let primary_sale_happened = r.bool()?;
    let is_mutable = r.bool()?;

    Ok(OnChainMetadata {
        update_authority,
        mint,
        name,
        symbol,
        uri,
        seller_fee_basis_points,
        primary_sale_happened,
        is_mutable,
    })
}

fn trim_padding(s: String) -> String {
    s.trim_end_matches('\0').to_string()
}

/// Serialize metadata the way the program lays it out, padding included.
#[cfg(any(test, feature = "test_utils"))]
pub fn encode_metadata_account(meta: &OnChainMetadata) -> Vec<u8> {
    use crate::chain::codec::Writer;
    use crate::tx_builder::metadata_program::{MAX_NAME_LENGTH, MAX_SYMBOL_LENGTH, MAX_URI_LENGTH};

    fn padded(s: &str, len: usize) -> String {
        let mut out = s.to_string();
        while out.len() < len {
            out.push('\0');
        }
        out
    }

    let mut w = Writer::new();
    w.u8(METADATA_V1_KEY)
        .pubkey(&meta.update_authority)
        .pubkey(&meta.mint)
        .string(&padded(&meta.name, MAX_NAME_LENGTH))
        .string(&padded(&meta.symbol, MAX_SYMBOL_LENGTH))
        .string(&padded(&meta.uri, MAX_URI_LENGTH))
        .u16(meta.seller_fee_basis_points)
        .none()
        .bool(meta.primary_sale_happened)
        .bool(meta.is_mutable);
    w.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use spl_token::solana_program::program_option::COption;

    #[test]
    fn test_parse_mint_authorities() {
        let authority = Pubkey::new_unique();
        let mint = spl_token::state::Mint {
            mint_authority: COption::Some(authority),
            supply: 1_000,
            decimals: 6,
            is_initialized: true,
            freeze_authority: COption::None,
        };
        let mut data = vec![0u8; spl_token::state::Mint::LEN];
        spl_token::state::Mint::pack(mint, &mut data).unwrap();

        let state = parse_mint(&Pubkey::new_unique(), &data).unwrap();
        assert_eq!(state.decimals, 6);
        assert_eq!(state.supply, 1_000);
        assert_eq!(state.mint_authority, Some(authority));
        assert_eq!(state.freeze_authority, None);
    }

    #[test]
    fn test_parse_mint_rejects_garbage() {
        let err = parse_mint(&Pubkey::new_unique(), &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, ChainError::MalformedAccount { .. }));
    }

    #[test]
    fn test_metadata_padding_is_trimmed() {
        let meta = OnChainMetadata {
            update_authority: Pubkey::new_unique(),
            mint: Pubkey::new_unique(),
            name: "Gate".to_string(),
            symbol: "GATE".to_string(),
            uri: "https://cdn/meta.json".to_string(),
            seller_fee_basis_points: 0,
            primary_sale_happened: false,
            is_mutable: true,
        };
        let data = encode_metadata_account(&meta);
        let parsed = parse_metadata(&Pubkey::new_unique(), &data).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_metadata_wrong_key() {
        let err = parse_metadata(&Pubkey::new_unique(), &[9; 80]).unwrap_err();
        assert!(matches!(err, ChainError::MalformedAccount { .. }));
    }
}
