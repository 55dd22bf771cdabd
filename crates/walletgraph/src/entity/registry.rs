use std::collections::HashMap;

use crate::types::{AnnotationSource, EntityAnnotation, EntityKind};

/// Well-known program ids and hot wallets: (address, name, kind, description).
#[rustfmt::skip]
const BUILTIN: &[(&str, &str, EntityKind, &str)] = &[
    // Exchanges
    ("5tzFkiKscXHK5ZXCGbXZxdw7gTjjD1mBwuoFbhUvuAi9", "Binance", EntityKind::Exchange, "Binance hot wallet"),
    ("H8sMJSCQxfKiFTCfDR3DUMLPwcRbM61LGFJ8N4dK3WjS", "Coinbase", EntityKind::Exchange, "Coinbase hot wallet"),
    ("FWznbcNXWQuHTawe9RxvQ2LdCENssh12dsznf4RiouN5", "Kraken", EntityKind::Exchange, "Kraken hot wallet"),
    ("5VCwKtCXgCJ6kit5FybXjvriW3xELsFDhYrPSqtJNmcD", "OKX", EntityKind::Exchange, "OKX hot wallet"),
    ("AC5RDfQFmDS1deWZos921JfqscXdByf8BKHs5ACWjtW2", "Bybit", EntityKind::Exchange, "Bybit hot wallet"),
    // NFT marketplaces
    ("M2mx93ekt1fmXSVkTrUL9xVFHkmME8HTUi5Cyc5aF7K", "Magic Eden", EntityKind::Marketplace, "Magic Eden v2 marketplace program"),
    ("TSWAPaqyCSx2KABk68Shruf4rp7CxcNi8hAsbdwmHbN", "Tensor Swap", EntityKind::Marketplace, "Tensor AMM marketplace program"),
    ("TCMPhJdwDryooaGtiocG1u3xcYbRpiJzb283XfCZsDp", "Tensor", EntityKind::Marketplace, "Tensor compressed marketplace program"),
    ("hausS13jsjafwWwGqZTUQRmWyvyxn9EQpqMwV1PBBmk", "Metaplex Auction House", EntityKind::Marketplace, "Auction house program"),
    // DEXs and aggregators
    ("JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4", "Jupiter", EntityKind::Dex, "Jupiter aggregator v6"),
    ("JUP4Fb2cqiRUcaTHdrPC8h2gNsA2ETXiPDD33WcGuJB", "Jupiter v4", EntityKind::Dex, "Jupiter aggregator v4"),
    ("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8", "Raydium", EntityKind::Dex, "Raydium AMM v4 program"),
    ("5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1", "Raydium Authority", EntityKind::Dex, "Raydium AMM v4 pool authority"),
    ("CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK", "Raydium CLMM", EntityKind::Dex, "Raydium concentrated liquidity program"),
    ("whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc", "Orca Whirlpools", EntityKind::Dex, "Orca concentrated liquidity program"),
    ("9W959DqEETiGZocYWCQPaJ6sBmUzgfxXfqGeTEdp3aQP", "Orca", EntityKind::Dex, "Orca token swap v2"),
    ("LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo", "Meteora DLMM", EntityKind::Dex, "Meteora dynamic liquidity market maker"),
    ("PhoeNiXZ8ByJGLkxNfZRnkUfjvmuYqLR89jjFHGqdXY", "Phoenix", EntityKind::Dex, "Phoenix order book"),
    ("opnb2LAfJYbRMAHHvqjCwQxanZn7ReEHp1k81EohpZb", "OpenBook v2", EntityKind::Dex, "OpenBook order book"),
    // Staking
    ("MarBmsSgKXdrN1egZf5sqe1TMai9K1rChYNDJgjq7aD", "Marinade", EntityKind::Staking, "Marinade liquid staking"),
    ("Jito4APyf642JPZPx3hGc6WWJ8zPKtRbRs4P815Awbb", "Jito Stake Pool", EntityKind::Staking, "JitoSOL stake pool"),
    ("CrX7kMhLC3cSsXJdT7JDgqrRVWGnUpX3gfEfxxU2NVLi", "Lido", EntityKind::Staking, "Lido for Solana"),
    // Lending
    ("So1endDq2YkqhipRh3WViPa8hdiSpxWy6z3Z6tMCpAo", "Solend", EntityKind::Lending, "Solend lending program"),
    ("MFv2hWf31Z9kbCa1snEPYctwafyhdvnV7FZnsebVacA", "marginfi", EntityKind::Lending, "marginfi v2 lending program"),
    ("KLend2g3cP87fffoy8q1mQqGKjrxjC8boSyAYavgmjD", "Kamino Lend", EntityKind::Lending, "Kamino lending program"),
    // Bridges
    ("wormDTUJ6AWPNvk59vGQbDvGJmqbDTdgWgAqcLBCgUb", "Wormhole Token Bridge", EntityKind::Bridge, "Wormhole token bridge"),
    ("worm2ZoG2kUd4vFXhvjh93UUH596ayRfgQ2MgjNMTth", "Wormhole", EntityKind::Bridge, "Wormhole core bridge"),
    // Oracles
    ("FsJ3A3u2vn5cTVofAjvy6y5kwABJAqYWpe4975bi2epH", "Pyth", EntityKind::Oracle, "Pyth price oracle"),
    ("SW1TCH7qEPTdLsDHRgPuMQjbQxKdH2aBStViMFnt64f", "Switchboard", EntityKind::Oracle, "Switchboard v2 oracle"),
    // Governance
    ("GovER5Lthms3bLBqWub97yVrMmEogzX7xNjdXpPPCVZw", "Realms", EntityKind::Dao, "SPL governance program"),
];

/// Static address book consulted before any network lookup. Built once at
/// startup and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entries: HashMap<String, EntityAnnotation>,
}

impl EntityRegistry {
    pub fn builtin() -> Self {
        Self::from_entries(
            BUILTIN
                .iter()
                .map(|(addr, name, kind, desc)| ((*addr).to_string(), *name, *kind, *desc)),
        )
    }

    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, &'a str, EntityKind, &'a str)>,
    {
        let entries = entries
            .into_iter()
            .map(|(addr, name, kind, desc)| {
                let annotation =
                    EntityAnnotation::new(name, kind, desc, AnnotationSource::Registry);
                (addr, annotation)
            })
            .collect();
        Self { entries }
    }

    pub fn lookup(&self, address: &str) -> Option<&EntityAnnotation> {
        self.entries.get(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
