//! Shared request, result and document types

use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey::Pubkey, signature::Signature};

use crate::chain::accounts::{MintState, OnChainMetadata};
use crate::membership::{MembershipStatus, Plan};

/// Which mint authority an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorityKind {
    Mint,
    Freeze,
}

impl AuthorityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorityKind::Mint => "mint",
            AuthorityKind::Freeze => "freeze",
        }
    }

    pub fn to_spl(self) -> spl_token::instruction::AuthorityType {
        match self {
            AuthorityKind::Mint => spl_token::instruction::AuthorityType::MintTokens,
            AuthorityKind::Freeze => spl_token::instruction::AuthorityType::FreezeAccount,
        }
    }
}

/// Social links carried in the off-chain metadata document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord: Option<String>,
}

impl SocialLinks {
    pub fn is_empty(&self) -> bool {
        self.website.is_none()
            && self.twitter.is_none()
            && self.telegram.is_none()
            && self.discord.is_none()
    }

    /// Overlay `other` on top of `self`; fields absent in `other` are kept.
    pub fn merged_with(&self, other: &SocialLinks) -> SocialLinks {
        SocialLinks {
            website: other.website.clone().or_else(|| self.website.clone()),
            twitter: other.twitter.clone().or_else(|| self.twitter.clone()),
            telegram: other.telegram.clone().or_else(|| self.telegram.clone()),
            discord: other.discord.clone().or_else(|| self.discord.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFile {
    pub uri: String,
    #[serde(rename = "type")]
    pub file_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataProperties {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<MetadataFile>,
    #[serde(default, skip_serializing_if = "SocialLinks::is_empty")]
    pub links: SocialLinks,
}

/// Off-chain JSON referenced by the on-chain metadata `uri`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadataDocument {
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub properties: MetadataProperties,
}

impl TokenMetadataDocument {
    pub fn new(
        name: impl Into<String>,
        symbol: impl Into<String>,
        description: impl Into<String>,
        links: SocialLinks,
    ) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            description: description.into(),
            image: None,
            properties: MetadataProperties {
                files: Vec::new(),
                links,
            },
        }
    }

    /// Point the document at an uploaded image
    pub fn set_image(&mut self, url: &str, content_type: &str) {
        self.image = Some(url.to_string());
        self.properties.files = vec![MetadataFile {
            uri: url.to_string(),
            file_type: content_type.to_string(),
        }];
    }
}

/// Logo supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoFile {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTokenRequest {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Whole tokens; scaled by `10^decimals` when minted
    pub initial_supply: u64,
    pub description: String,
    pub logo: Option<LogoFile>,
    pub links: SocialLinks,
    pub revoke_mint_authority: bool,
    pub revoke_freeze_authority: bool,
    pub lock_metadata: bool,
}

impl CreateTokenRequest {
    /// Revocations requested at creation; each one is a premium feature
    pub fn premium_feature_count(&self) -> u32 {
        u32::from(self.revoke_mint_authority) + u32::from(self.revoke_freeze_authority)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityVerification {
    pub mint_authority_revoked: bool,
    pub freeze_authority_revoked: bool,
    pub metadata_locked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCreationResult {
    pub mint: Pubkey,
    pub signature: Signature,
    pub metadata_uri: String,
    pub image_uri: Option<String>,
    pub fee_lamports: u64,
    /// Read back from chain after confirmation; `None` when the read failed
    pub verifications: Option<AuthorityVerification>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataUpdateRequest {
    pub mint: Pubkey,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub description: Option<String>,
    pub logo: Option<LogoFile>,
    pub links: Option<SocialLinks>,
    /// Lock the metadata in the same transaction
    pub make_immutable: bool,
}

/// Signature and fee of a confirmed fee-gated action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationReceipt {
    pub signature: Signature,
    pub fee_lamports: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnResult {
    pub signature: Signature,
    pub burned_raw: u64,
    pub decimals: u8,
    pub fee_lamports: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataUpdateResult {
    pub signature: Signature,
    pub metadata_uri: String,
    pub fee_lamports: u64,
}

/// On-chain and off-chain view of a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub mint: Pubkey,
    pub mint_state: MintState,
    pub metadata: Option<OnChainMetadata>,
    pub document: Option<TokenMetadataDocument>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipPurchaseResult {
    pub plan: Plan,
    pub signature: Signature,
    pub fee_lamports: u64,
    pub status: MembershipStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_json_shape() {
        let mut doc = TokenMetadataDocument::new(
            "Gate",
            "GATE",
            "A token",
            SocialLinks {
                website: Some("https://gate.example".to_string()),
                ..Default::default()
            },
        );
        doc.set_image("https://cdn/logo.png", "image/png");

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["image"], "https://cdn/logo.png");
        assert_eq!(json["properties"]["files"][0]["type"], "image/png");
        assert_eq!(json["properties"]["links"]["website"], "https://gate.example");
        assert!(json["properties"]["links"].get("twitter").is_none());
    }

    #[test]
    fn test_links_merge_keeps_existing() {
        let current = SocialLinks {
            website: Some("a".to_string()),
            twitter: Some("b".to_string()),
            ..Default::default()
        };
        let change = SocialLinks {
            twitter: Some("c".to_string()),
            ..Default::default()
        };
        let merged = current.merged_with(&change);
        assert_eq!(merged.website.as_deref(), Some("a"));
        assert_eq!(merged.twitter.as_deref(), Some("c"));
    }

    #[test]
    fn test_premium_feature_count() {
        let req = CreateTokenRequest {
            name: "n".to_string(),
            symbol: "s".to_string(),
            decimals: 9,
            initial_supply: 1,
            description: String::new(),
            logo: None,
            links: SocialLinks::default(),
            revoke_mint_authority: true,
            revoke_freeze_authority: true,
            lock_metadata: true,
        };
        assert_eq!(req.premium_feature_count(), 2);
    }
}
