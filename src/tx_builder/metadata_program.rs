//! Token Metadata program instructions
//!
//! Only the two instructions the service issues are encoded here:
//! `CreateMetadataAccountV3` (discriminator 33) and
//! `UpdateMetadataAccountV2` (discriminator 15). Creators, collection and
//! uses are always `None` for fungible tokens created by this service.

use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
};

use crate::chain::codec::{Reader, Writer};

/// Token Metadata program id
pub const TOKEN_METADATA_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s");

pub const CREATE_METADATA_V3_DISCRIMINATOR: u8 = 33;
pub const UPDATE_METADATA_V2_DISCRIMINATOR: u8 = 15;

/// On-chain limits enforced by the metadata program
pub const MAX_NAME_LENGTH: usize = 32;
pub const MAX_SYMBOL_LENGTH: usize = 10;
pub const MAX_URI_LENGTH: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataV2 {
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub seller_fee_basis_points: u16,
}

impl DataV2 {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            uri: uri.into(),
            seller_fee_basis_points: 0,
        }
    }

    fn encode(&self, w: &mut Writer) {
        w.string(&self.name)
            .string(&self.symbol)
            .string(&self.uri)
            .u16(self.seller_fee_basis_points)
            .none() // creators
            .none() // collection
            .none(); // uses
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, String> {
        let name = r.string()?;
        let symbol = r.string()?;
        let uri = r.string()?;
        let seller_fee_basis_points = r.u16()?;
        if r.option()? {
            let count = r.u32()? as usize;
            r.skip(count * 34)?;
        }
        if r.option()? {
            r.skip(33)?;
        }
        if r.option()? {
            r.skip(17)?;
        }
        Ok(Self {
            name,
            symbol,
            uri,
            seller_fee_basis_points,
        })
    }
}

/// Arguments of an `UpdateMetadataAccountV2` instruction
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateArgs {
    pub data: Option<DataV2>,
    pub new_update_authority: Option<Pubkey>,
    pub primary_sale_happened: Option<bool>,
    pub is_mutable: Option<bool>,
}

impl UpdateArgs {
    /// An update that only flips `is_mutable` to false
    pub fn is_lock(&self) -> bool {
        self.data.is_none() && self.new_update_authority.is_none() && self.is_mutable == Some(false)
    }
}

/// Derive the metadata account address for `mint`
pub fn find_metadata_address(mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[
            b"metadata",
            TOKEN_METADATA_PROGRAM_ID.as_ref(),
            mint.as_ref(),
        ],
        &TOKEN_METADATA_PROGRAM_ID,
    )
    .0
}

pub fn create_metadata_account_v3(
    mint: &Pubkey,
    mint_authority: &Pubkey,
    payer: &Pubkey,
    update_authority: &Pubkey,
    data: &DataV2,
    is_mutable: bool,
) -> Instruction {
    let mut w = Writer::new();
    w.u8(CREATE_METADATA_V3_DISCRIMINATOR);
    data.encode(&mut w);
    w.bool(is_mutable).none(); // collection_details

    Instruction {
        program_id: TOKEN_METADATA_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(find_metadata_address(mint), false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(*mint_authority, true),
            AccountMeta::new(*payer, true),
            AccountMeta::new_readonly(*update_authority, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data: w.into_bytes(),
    }
}

pub fn update_metadata_account_v2(
    mint: &Pubkey,
    update_authority: &Pubkey,
    args: &UpdateArgs,
) -> Instruction {
    let mut w = Writer::new();
    w.u8(UPDATE_METADATA_V2_DISCRIMINATOR);
    match &args.data {
        Some(data) => {
            w.some();
            data.encode(&mut w);
        }
        None => {
            w.none();
        }
    }
    match &args.new_update_authority {
        Some(key) => w.some().pubkey(key),
        None => w.none(),
    };
    for flag in [args.primary_sale_happened, args.is_mutable] {
        match flag {
            Some(v) => w.some().bool(v),
            None => w.none(),
        };
    }

    Instruction {
        program_id: TOKEN_METADATA_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(find_metadata_address(mint), false),
            AccountMeta::new_readonly(*update_authority, true),
        ],
        data: w.into_bytes(),
    }
}

/// Decode `CreateMetadataAccountV3` arguments: the data and `is_mutable`
pub fn decode_create_args(data: &[u8]) -> Result<(DataV2, bool), String> {
    let mut r = Reader::new(data);
    if r.u8()? != CREATE_METADATA_V3_DISCRIMINATOR {
        return Err("not a CreateMetadataAccountV3 instruction".to_string());
    }
    let data = DataV2::decode(&mut r)?;
    let is_mutable = r.bool()?;
    Ok((data, is_mutable))
}

pub fn decode_update_args(data: &[u8]) -> Result<UpdateArgs, String> {
    let mut r = Reader::new(data);
    if r.u8()? != UPDATE_METADATA_V2_DISCRIMINATOR {
        return Err("not an UpdateMetadataAccountV2 instruction".to_string());
    }
    let data = if r.option()? {
        Some(DataV2::decode(&mut r)?)
    } else {
        None
    };
    let new_update_authority = if r.option()? { Some(r.pubkey()?) } else { None };
    let primary_sale_happened = if r.option()? { Some(r.bool()?) } else { None };
    let is_mutable = if r.option()? { Some(r.bool()?) } else { None };
    Ok(UpdateArgs {
        data,
        new_update_authority,
        primary_sale_happened,
        is_mutable,
    })
}
