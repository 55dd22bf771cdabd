use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Input,
    Connected,
}

/// A wallet in the interaction graph. Identity is the address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletNode {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub entity: Option<EntityAnnotation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    #[serde(rename = "NFT")]
    Nft,
    #[serde(rename = "SPL_TOKEN")]
    SplToken,
    #[serde(rename = "NATIVE")]
    Native,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nft => write!(f, "NFT"),
            Self::SplToken => write!(f, "SPL_TOKEN"),
            Self::Native => write!(f, "NATIVE"),
        }
    }
}

/// One transfer between two wallets. `is_direct` and `is_incidental` are
/// never both true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub kind: TransferKind,
    pub raw_amount: String,
    pub ui_amount: f64,
    pub decimals: u8,
    pub mint: Option<String>,
    /// `None` until known; enrichment fills it from token metadata.
    pub token_symbol: Option<String>,
    pub signature: String,
    pub timestamp_ms: i64,
    pub is_direct: bool,
    pub is_incidental: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Marketplace,
    Dex,
    Staking,
    Wallet,
    Bridge,
    Exchange,
    Lending,
    Yield,
    Gaming,
    Defi,
    Oracle,
    Dao,
    SnsDomain,
    LabeledAddress,
    Token,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Marketplace => "marketplace",
            Self::Dex => "dex",
            Self::Staking => "staking",
            Self::Wallet => "wallet",
            Self::Bridge => "bridge",
            Self::Exchange => "exchange",
            Self::Lending => "lending",
            Self::Yield => "yield",
            Self::Gaming => "gaming",
            Self::Defi => "defi",
            Self::Oracle => "oracle",
            Self::Dao => "dao",
            Self::SnsDomain => "sns_domain",
            Self::LabeledAddress => "labeled_address",
            Self::Token => "token",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Marketplace => "🛒",
            Self::Dex => "🔄",
            Self::Staking => "🥩",
            Self::Wallet => "👛",
            Self::Bridge => "🌉",
            Self::Exchange => "🏦",
            Self::Lending => "💰",
            Self::Yield => "🌾",
            Self::Gaming => "🎮",
            Self::Defi => "⚙️",
            Self::Oracle => "🔮",
            Self::Dao => "🏛️",
            Self::SnsDomain => "🌐",
            Self::LabeledAddress => "🏷️",
            Self::Token => "🪙",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Self::Marketplace => "#e91e63",
            Self::Dex => "#2196f3",
            Self::Staking => "#4caf50",
            Self::Wallet => "#9e9e9e",
            Self::Bridge => "#ff9800",
            Self::Exchange => "#f44336",
            Self::Lending => "#009688",
            Self::Yield => "#8bc34a",
            Self::Gaming => "#673ab7",
            Self::Defi => "#3f51b5",
            Self::Oracle => "#795548",
            Self::Dao => "#607d8b",
            Self::SnsDomain => "#00bcd4",
            Self::LabeledAddress => "#ffc107",
            Self::Token => "#ffeb3b",
        }
    }

    /// Map a free-form category string from a label provider.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "marketplace" | "nft_marketplace" => Some(Self::Marketplace),
            "dex" | "amm" | "aggregator" | "dex_aggregator" => Some(Self::Dex),
            "staking" | "liquid_staking" | "stake_pool" => Some(Self::Staking),
            "wallet" => Some(Self::Wallet),
            "bridge" => Some(Self::Bridge),
            "exchange" | "cex" | "centralized_exchange" => Some(Self::Exchange),
            "lending" | "borrowing" => Some(Self::Lending),
            "yield" | "yield_farming" | "vault" => Some(Self::Yield),
            "gaming" | "game" => Some(Self::Gaming),
            "defi" => Some(Self::Defi),
            "oracle" => Some(Self::Oracle),
            "dao" | "governance" => Some(Self::Dao),
            "sns_domain" | "domain" => Some(Self::SnsDomain),
            "labeled_address" | "label" => Some(Self::LabeledAddress),
            "token" | "fungible" | "mint" => Some(Self::Token),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an [`EntityAnnotation`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationSource {
    Registry,
    NameService,
    LabelService,
    TokenList,
}

/// The real-world actor behind an address. At most one per address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityAnnotation {
    pub name: String,
    pub kind: EntityKind,
    pub description: String,
    pub source: AnnotationSource,
    pub icon: String,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<serde_json::Value>,
}

impl EntityAnnotation {
    pub fn new(
        name: impl Into<String>,
        kind: EntityKind,
        description: impl Into<String>,
        source: AnnotationSource,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            source,
            icon: kind.icon().to_string(),
            color: kind.color().to_string(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Token metadata keyed by mint. Absence of a record means "unknown".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadataRecord {
    pub mint: String,
    pub symbol: String,
    pub name: String,
    pub decimals: Option<u8>,
    pub supply: Option<u64>,
    pub collection: Option<String>,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRangeInput {
    pub start: String,
    pub end: String,
}

/// Pipeline request as received from the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphRequest {
    pub address: String,
    #[serde(default)]
    pub time_range: Option<TimeRangeInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphResponse {
    pub nodes: Vec<WalletNode>,
    pub edges: Vec<TransferEdge>,
    pub total_transactions: usize,
    pub processed_at: DateTime<Utc>,
    pub entity_info: BTreeMap<String, EntityAnnotation>,
    pub token_metadata: BTreeMap<String, TokenMetadataRecord>,
}
