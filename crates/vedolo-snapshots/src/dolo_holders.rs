//! DOLO ERC-20 holders across Ethereum and Berachain

use alloy_primitives::{Address, I256, U256};
use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::aggregate::{rank_by, round_to};
use crate::config::Config;
use crate::constants;
use crate::decode::{lower_hex, scale_signed};
use crate::explorer::{ExplorerClient, TokenTransfer, chain_name};
use crate::fetcher::{FailurePolicy, Pagination, paginate_blocks};
use crate::reports;
use crate::roles::format_address;

/// Balances at or above the dust threshold, per lowercase address
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainBalances {
    pub balances: BTreeMap<String, f64>,
    /// Transfers whose value could not be parsed
    pub skipped: usize,
}

/// Fold transfers in (block, log index) order. The zero address is never credited or debited.
pub fn build_balances(transfers: &[TokenTransfer]) -> ChainBalances {
    let zero = lower_hex(&Address::ZERO);
    let mut ordered: Vec<&TokenTransfer> = transfers.iter().collect();
    ordered.sort_by_key(|t| (t.block_number, t.log_index));

    let mut raw: BTreeMap<String, I256> = BTreeMap::new();
    let mut skipped = 0;
    for transfer in ordered {
        let Some(value) = U256::from_str_radix(&transfer.value, 10)
            .ok()
            .and_then(|v| I256::try_from(v).ok())
        else {
            skipped += 1;
            continue;
        };
        let from = transfer.from.to_lowercase();
        let to = transfer.to.to_lowercase();
        if from != zero {
            let entry = raw.entry(from).or_insert(I256::ZERO);
            *entry = entry.saturating_sub(value);
        }
        if to != zero {
            let entry = raw.entry(to).or_insert(I256::ZERO);
            *entry = entry.saturating_add(value);
        }
    }

    let decimals = transfers
        .first()
        .and_then(|t| t.token_decimal.parse().ok())
        .unwrap_or(constants::DOLO_DECIMALS);
    let balances = raw
        .into_iter()
        .map(|(addr, bal)| (addr, scale_signed(bal, decimals)))
        .filter(|(_, bal)| *bal >= constants::MIN_HOLDER_BALANCE)
        .map(|(addr, bal)| (addr, round_to(bal, 4)))
        .collect();

    ChainBalances { balances, skipped }
}

#[derive(Debug, Clone, Serialize)]
pub struct DoloHolder {
    pub rank: usize,
    pub address: String,
    pub balance: f64,
    pub balance_eth: f64,
    pub balance_bera: f64,
    pub chains: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct DoloHolderStats {
    pub total_holders: usize,
    pub eth_holders: usize,
    pub bera_holders: usize,
    pub both_chains: usize,
    pub total_supply: f64,
    /// Whether the chain's transfer history was fetched to the end
    pub eth_complete: bool,
    pub bera_complete: bool,
}

#[derive(Debug, Serialize)]
pub struct DoloHoldersSnapshot {
    pub contract: String,
    pub last_updated: String,
    pub stats: DoloHolderStats,
    pub holders: Vec<DoloHolder>,
}

/// Transfer history of one chain as fetched
#[derive(Debug, Default)]
pub struct ChainFetch {
    pub balances: ChainBalances,
    pub complete: bool,
}

/// Merge both chains per address, rank by combined balance
pub fn merge_holders(
    eth: &ChainFetch,
    bera: &ChainFetch,
    config: &Config,
    now: DateTime<Utc>,
) -> DoloHoldersSnapshot {
    let addresses: BTreeSet<&String> = eth
        .balances
        .balances
        .keys()
        .chain(bera.balances.balances.keys())
        .collect();

    let mut holders: Vec<DoloHolder> = addresses
        .into_iter()
        .map(|addr| {
            let balance_eth = eth.balances.balances.get(addr).copied().unwrap_or(0.0);
            let balance_bera = bera.balances.balances.get(addr).copied().unwrap_or(0.0);
            let mut chains = Vec::new();
            if balance_eth > 0.0 {
                chains.push(chain_name(constants::ETHEREUM_CHAIN_ID));
            }
            if balance_bera > 0.0 {
                chains.push(chain_name(constants::BERACHAIN_CHAIN_ID));
            }
            DoloHolder {
                rank: 0,
                address: addr.clone(),
                balance: round_to(balance_eth + balance_bera, 4),
                balance_eth,
                balance_bera,
                chains,
            }
        })
        .collect();

    rank_by(&mut holders, |h| h.balance, |h| h.address.as_str());
    for (i, holder) in holders.iter_mut().enumerate() {
        holder.rank = i + 1;
        if config.checksum_addresses {
            if let Ok(addr) = holder.address.parse::<Address>() {
                holder.address = format_address(&addr, true);
            }
        }
    }

    let stats = DoloHolderStats {
        total_holders: holders.len(),
        eth_holders: holders.iter().filter(|h| h.balance_eth > 0.0).count(),
        bera_holders: holders.iter().filter(|h| h.balance_bera > 0.0).count(),
        both_chains: holders.iter().filter(|h| h.chains.len() == 2).count(),
        total_supply: round_to(holders.iter().map(|h| h.balance).sum(), 2),
        eth_complete: eth.complete,
        bera_complete: bera.complete,
    };

    DoloHoldersSnapshot {
        contract: format_address(&config.dolo, config.checksum_addresses),
        last_updated: reports::format_timestamp(now),
        stats,
        holders,
    }
}

async fn fetch_chain(config: &Config, chain_id: u64) -> Result<Option<ChainFetch>> {
    let name = chain_name(chain_id);
    let Some(api_key) = config.etherscan_key() else {
        warn!(chain = name, "ETHERSCAN_API_KEY not set, skipping chain");
        return Ok(None);
    };

    info!(chain = name, "fetching DOLO transfers");
    let explorer = ExplorerClient::etherscan(config, chain_id, api_key)?;
    let dolo = lower_hex(&config.dolo);
    let params = Pagination {
        start_block: 0,
        end_block: constants::OPEN_END_BLOCK,
        offset: config.block_page_size,
        page_ceiling: config.page_ceiling,
        delay: config.page_delay,
        retry: config.retry,
        policy: FailurePolicy::Partial,
    };
    let outcome = paginate_blocks(&explorer.tokentx(&dolo), &params).await?;
    if !outcome.complete {
        warn!(chain = name, transfers = outcome.items.len(), "transfer history is incomplete");
    }
    if outcome.items.is_empty() {
        return Ok(None);
    }

    let balances = build_balances(&outcome.items);
    if balances.skipped > 0 {
        warn!(chain = name, skipped = balances.skipped, "transfers with unreadable values");
    }
    info!(
        chain = name,
        transfers = outcome.items.len(),
        requests = outcome.requests,
        holders = balances.balances.len(),
        "balances built"
    );
    Ok(Some(ChainFetch {
        balances,
        complete: outcome.complete,
    }))
}

pub async fn run(config: &Config, now: DateTime<Utc>) -> Result<()> {
    let eth = fetch_chain(config, constants::ETHEREUM_CHAIN_ID).await?;
    let bera = fetch_chain(config, constants::BERACHAIN_CHAIN_ID).await?;
    if eth.is_none() && bera.is_none() {
        bail!("No DOLO transfers found on any chain");
    }

    let snapshot = merge_holders(
        &eth.unwrap_or_default(),
        &bera.unwrap_or_default(),
        config,
        now,
    );
    reports::write_json(&config.output_path(constants::DOLO_HOLDERS_FILENAME), &snapshot)?;

    let stats = &snapshot.stats;
    info!(
        holders = stats.total_holders,
        eth = stats.eth_holders,
        bera = stats.bera_holders,
        both = stats.both_chains,
        supply = stats.total_supply,
        "DOLO holders complete"
    );
    for holder in snapshot.holders.iter().take(10) {
        info!(
            rank = holder.rank,
            address = %holder.address,
            balance = holder.balance,
            chains = %holder.chains.join("+"),
            "top holder"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileConfig, Overrides};
    use chrono::TimeZone;

    const ZERO: &str = "0x0000000000000000000000000000000000000000";
    const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn dolo(whole: u64) -> String {
        (U256::from(whole) * U256::from(10u64).pow(U256::from(18u64))).to_string()
    }

    fn transfer(block: u64, log_index: u64, from: &str, to: &str, value: String) -> TokenTransfer {
        TokenTransfer {
            hash: format!("0x{block:x}{log_index:x}"),
            block_number: block,
            log_index,
            from: from.to_string(),
            to: to.to_string(),
            value,
            token_decimal: "18".to_string(),
        }
    }

    fn config() -> Config {
        let mut file = FileConfig::default();
        file.output.checksum_addresses = false;
        Config::from_file(&file, Overrides::default()).unwrap()
    }

    #[test]
    fn test_balances_fold_in_chain_order() {
        // Listed out of order: the spend at block 5 must come after the mint at block 1
        let transfers = vec![
            transfer(5, 0, ALICE, BOB, dolo(40)),
            transfer(1, 0, ZERO, ALICE, dolo(100)),
        ];
        let result = build_balances(&transfers);
        assert_eq!(result.balances.get(ALICE), Some(&60.0));
        assert_eq!(result.balances.get(BOB), Some(&40.0));
        assert!(!result.balances.contains_key(ZERO));
    }

    #[test]
    fn test_dust_and_burned_balances_dropped() {
        let transfers = vec![
            transfer(1, 0, ZERO, ALICE, dolo(10)),
            transfer(2, 0, ALICE, BOB, "500000000000000000".to_string()),
            transfer(3, 0, ALICE, ZERO, dolo(9)),
            transfer(4, 0, ALICE, BOB, "not-a-number".to_string()),
        ];
        let result = build_balances(&transfers);
        assert!(!result.balances.contains_key(ALICE));
        assert!(!result.balances.contains_key(BOB));
        assert_eq!(result.skipped, 1);
    }

    #[test]
    fn test_merge_across_chains() {
        let eth = ChainFetch {
            balances: ChainBalances {
                balances: BTreeMap::from([(ALICE.to_string(), 10.0), (BOB.to_string(), 50.0)]),
                skipped: 0,
            },
            complete: true,
        };
        let bera = ChainFetch {
            balances: ChainBalances {
                balances: BTreeMap::from([(ALICE.to_string(), 45.5)]),
                skipped: 0,
            },
            complete: false,
        };
        let now = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
        let snapshot = merge_holders(&eth, &bera, &config(), now);

        assert_eq!(snapshot.holders[0].address, ALICE);
        assert_eq!(snapshot.holders[0].balance, 55.5);
        assert_eq!(snapshot.holders[0].chains, vec!["eth", "bera"]);
        assert_eq!(snapshot.holders[1].rank, 2);
        assert_eq!(snapshot.holders[1].chains, vec!["eth"]);
        assert_eq!(snapshot.holders[1].balance_bera, 0.0);

        let stats = &snapshot.stats;
        assert_eq!(stats.total_holders, 2);
        assert_eq!(stats.eth_holders, 2);
        assert_eq!(stats.bera_holders, 1);
        assert_eq!(stats.both_chains, 1);
        assert_eq!(stats.total_supply, 105.5);
        assert!(stats.eth_complete);
        assert!(!stats.bera_complete);
    }

    #[test]
    fn test_single_chain_merge() {
        let eth = ChainFetch {
            balances: ChainBalances {
                balances: BTreeMap::from([(BOB.to_string(), 2.0)]),
                skipped: 0,
            },
            complete: true,
        };
        let now = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
        let snapshot = merge_holders(&eth, &ChainFetch::default(), &config(), now);
        assert_eq!(snapshot.stats.bera_holders, 0);
        assert!(!snapshot.stats.bera_complete);
        assert_eq!(snapshot.holders.len(), 1);
    }
}
