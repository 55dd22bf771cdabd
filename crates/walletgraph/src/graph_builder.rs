use std::collections::{BTreeMap, HashMap, HashSet};

use crate::helius::{RawGenericTransfer, RawNativeTransfer, RawTokenTransfer, RawTransaction};
use crate::ingestion::normalize_timestamp_ms;
use crate::types::{
    EntityAnnotation, NodeKind, TokenMetadataRecord, TransferEdge, TransferKind, WalletNode,
};
use crate::validation::shorten_address;

const LAMPORTS_DECIMALS: u8 = 9;
const NATIVE_SYMBOL: &str = "SOL";

/// Mints whose symbol is known without asking anyone.
const WELL_KNOWN_MINTS: &[(&str, &str)] = &[
    ("So11111111111111111111111111111111111111112", "wSOL"),
    ("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", "USDC"),
    ("Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB", "USDT"),
];

pub fn well_known_symbol(mint: &str) -> Option<&'static str> {
    WELL_KNOWN_MINTS
        .iter()
        .find(|(m, _)| *m == mint)
        .map(|(_, s)| *s)
}

/// One transfer leg normalized across the upstream shapes.
#[derive(Debug, Clone, PartialEq)]
struct Transfer {
    from: String,
    to: String,
    kind: TransferKind,
    raw_amount: String,
    ui_amount: f64,
    decimals: u8,
    mint: Option<String>,
    symbol: Option<String>,
}

fn parse_f64(s: Option<&str>) -> Option<f64> {
    s.and_then(|s| s.trim().parse::<f64>().ok())
}

fn is_single_unit(ui_amount: f64, raw_amount: &str) -> bool {
    (ui_amount - 1.0).abs() < f64::EPSILON || raw_amount.trim() == "1"
}

fn token_kind(ui_amount: f64, raw_amount: &str) -> TransferKind {
    if is_single_unit(ui_amount, raw_amount) {
        TransferKind::Nft
    } else {
        TransferKind::SplToken
    }
}

fn from_token(t: &RawTokenTransfer) -> Transfer {
    let decimals = t
        .raw_token_amount
        .as_ref()
        .and_then(|r| r.decimals)
        .unwrap_or(0);
    let raw_amount = t
        .raw_token_amount
        .as_ref()
        .and_then(|r| r.token_amount.clone())
        .or_else(|| t.token_amount.clone())
        .unwrap_or_else(|| "0".to_string());
    let ui_amount = parse_f64(t.token_amount.as_deref())
        .or_else(|| {
            parse_f64(Some(&raw_amount)).map(|raw| raw / 10f64.powi(i32::from(decimals)))
        })
        .unwrap_or(0.0);

    Transfer {
        from: t.from_user_account.clone().unwrap_or_default(),
        to: t.to_user_account.clone().unwrap_or_default(),
        kind: token_kind(ui_amount, &raw_amount),
        symbol: t
            .mint
            .as_deref()
            .and_then(well_known_symbol)
            .map(str::to_string),
        mint: t.mint.clone(),
        raw_amount,
        ui_amount,
        decimals,
    }
}

fn from_native(n: &RawNativeTransfer) -> Transfer {
    let raw_amount = n.amount.clone().unwrap_or_else(|| "0".to_string());
    let ui_amount = parse_f64(Some(&raw_amount)).unwrap_or(0.0)
        / 10f64.powi(i32::from(LAMPORTS_DECIMALS));
    Transfer {
        from: n.from_user_account.clone().unwrap_or_default(),
        to: n.to_user_account.clone().unwrap_or_default(),
        kind: TransferKind::Native,
        raw_amount,
        ui_amount,
        decimals: LAMPORTS_DECIMALS,
        mint: None,
        symbol: Some(NATIVE_SYMBOL.to_string()),
    }
}

/// The generic shape reports UI amounts. No mint means SOL.
fn from_generic(g: &RawGenericTransfer) -> Transfer {
    let raw_amount = g.amount.clone().unwrap_or_else(|| "0".to_string());
    let ui_amount = parse_f64(Some(&raw_amount)).unwrap_or(0.0);
    let (kind, decimals, symbol) = match g.mint.as_deref() {
        None => (
            TransferKind::Native,
            g.decimals.unwrap_or(LAMPORTS_DECIMALS),
            Some(NATIVE_SYMBOL.to_string()),
        ),
        Some(mint) => (
            token_kind(ui_amount, &raw_amount),
            g.decimals.unwrap_or(0),
            well_known_symbol(mint).map(str::to_string),
        ),
    };
    Transfer {
        from: g.from.clone().unwrap_or_default(),
        to: g.to.clone().unwrap_or_default(),
        kind,
        raw_amount,
        ui_amount,
        decimals,
        mint: g.mint.clone(),
        symbol,
    }
}

/// Every transfer leg in the transaction, across all recognised shapes, in
/// upstream order.
fn extract_transfers(tx: &RawTransaction) -> Vec<Transfer> {
    tx.token_transfers
        .iter()
        .map(from_token)
        .chain(tx.native_transfers.iter().map(from_native))
        .chain(tx.transfers.iter().map(from_generic))
        .collect()
}

/// Nodes in insertion order (input node first) plus edges in transaction
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletGraph {
    queried: String,
    nodes: Vec<WalletNode>,
    index: HashMap<String, usize>,
    edges: Vec<TransferEdge>,
}

impl WalletGraph {
    pub fn new(queried: &str) -> Self {
        let mut graph = Self {
            queried: queried.to_string(),
            nodes: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
        };
        graph.push_node(queried, NodeKind::Input);
        graph
    }

    fn push_node(&mut self, address: &str, kind: NodeKind) {
        if self.index.contains_key(address) {
            return;
        }
        self.index.insert(address.to_string(), self.nodes.len());
        self.nodes.push(WalletNode {
            id: address.to_string(),
            label: shorten_address(address),
            kind,
            entity: None,
        });
    }

    pub fn queried(&self) -> &str {
        &self.queried
    }

    pub fn nodes(&self) -> &[WalletNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[TransferEdge] {
        &self.edges
    }

    pub fn node(&self, address: &str) -> Option<&WalletNode> {
        self.index.get(address).map(|&i| &self.nodes[i])
    }

    pub fn into_parts(self) -> (Vec<WalletNode>, Vec<TransferEdge>) {
        (self.nodes, self.edges)
    }

    fn add_transaction(&mut self, tx_index: usize, tx: &RawTransaction) {
        if !tx.has_transfers() {
            return;
        }
        let timestamp_ms = tx.timestamp.map_or(0, normalize_timestamp_ms);
        let queried_in_accounts = tx.touches_account(&self.queried);

        for (transfer_index, t) in extract_transfers(tx).into_iter().enumerate() {
            // Mint and burn legs have no counterparty.
            if t.from.is_empty() || t.to.is_empty() {
                continue;
            }
            let is_direct = t.from == self.queried || t.to == self.queried;
            let is_incidental = !is_direct && queried_in_accounts;
            if !is_direct && !is_incidental {
                continue;
            }

            self.push_node(&t.from, NodeKind::Connected);
            self.push_node(&t.to, NodeKind::Connected);
            self.edges.push(TransferEdge {
                id: format!("{}-{}-{tx_index}-{transfer_index}", t.from, t.to),
                source: t.from,
                target: t.to,
                kind: t.kind,
                raw_amount: t.raw_amount,
                ui_amount: t.ui_amount,
                decimals: t.decimals,
                mint: t.mint,
                token_symbol: t.symbol,
                signature: tx.signature.clone(),
                timestamp_ms,
                is_direct,
                is_incidental,
            });
        }
    }

    /// Distinct edge endpoints in first-seen order.
    pub fn edge_endpoints(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for edge in &self.edges {
            for addr in [&edge.source, &edge.target] {
                if seen.insert(addr.as_str()) {
                    out.push(addr.clone());
                }
            }
        }
        out
    }

    /// Distinct mints of edges that still lack a symbol.
    pub fn mints_missing_symbol(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for edge in self.edges.iter().filter(|e| e.token_symbol.is_none()) {
            if let Some(mint) = &edge.mint {
                if seen.insert(mint.as_str()) {
                    out.push(mint.clone());
                }
            }
        }
        out
    }

    pub fn apply_entities(&mut self, entities: &BTreeMap<String, EntityAnnotation>) {
        for node in &mut self.nodes {
            if let Some(annotation) = entities.get(&node.id) {
                node.entity = Some(annotation.clone());
            }
        }
    }

    /// Fill symbols on every edge that shares a resolved mint.
    pub fn apply_token_metadata(&mut self, records: &BTreeMap<String, TokenMetadataRecord>) {
        for edge in &mut self.edges {
            if edge.token_symbol.is_some() {
                continue;
            }
            if let Some(record) = edge.mint.as_ref().and_then(|m| records.get(m)) {
                edge.token_symbol = Some(record.symbol.clone());
            }
        }
    }
}

/// Build the interaction graph of `queried` from already-filtered
/// transactions.
pub fn build_graph(txs: &[RawTransaction], queried: &str) -> WalletGraph {
    let mut graph = WalletGraph::new(queried);
    for (tx_index, tx) in txs.iter().enumerate() {
        graph.add_transaction(tx_index, tx);
    }
    graph
}
