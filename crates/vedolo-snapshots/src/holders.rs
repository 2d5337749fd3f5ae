//! veDOLO NFT holders snapshot
//!
//! Ownership comes from the full ERC-721 transfer history. Locked amounts are
//! immutable per token id once read and live in the locked cache; vote weights
//! decay with time and are read fresh every run.

use alloy_primitives::{Address, U256};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

use crate::aggregate::{rank_by, round_to};
use crate::cache::JsonCache;
use crate::config::Config;
use crate::constants;
use crate::decode::{self, LOCKED_RETURN, UINT_RETURN, lower_hex};
use crate::error::{DecodeError, SourceError};
use crate::explorer::{ExplorerClient, NftTransfer};
use crate::fetcher::{FailurePolicy, Pagination, paginate_blocks};
use crate::reports::{self, format_lock_end};
use crate::resolver::{PoolOptions, Resolver, resolve_fresh, resolve_missing};
use crate::roles::format_address;
use crate::rpc::RpcClient;

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Amount and unlock time of one lock position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LockedPosition {
    pub amount: f64,
    pub end: i64,
}

/// Decode a `locked(uint256)` return. Empty or short returns mean no lock.
pub fn decode_locked(raw: &str) -> Result<LockedPosition, DecodeError> {
    let bytes = decode::hex_bytes(raw)?;
    if bytes.len() < LOCKED_RETURN.min_len() {
        return Ok(LockedPosition { amount: 0.0, end: 0 });
    }
    let decoded = decode::decode(&LOCKED_RETURN, &bytes)?;
    Ok(LockedPosition {
        amount: decode::scale_signed(decoded.int("amount")?, constants::DOLO_DECIMALS),
        end: decoded.i64("end")?,
    })
}

/// Decode a single uint256 return scaled to DOLO units. Empty means zero.
pub fn decode_weight(raw: &str) -> Result<f64, DecodeError> {
    let bytes = decode::hex_bytes(raw)?;
    if bytes.is_empty() {
        return Ok(0.0);
    }
    let decoded = decode::decode(&UINT_RETURN, &bytes)?;
    Ok(decode::scale(decoded.uint("value")?, constants::DOLO_DECIMALS))
}

/// A per-token view function read through batched eth_call
pub struct TokenCall<T> {
    rpc: Arc<RpcClient>,
    contract: Address,
    selector: &'static str,
    per_call: usize,
    decode: fn(&str) -> Result<T, DecodeError>,
}

impl<T> TokenCall<T> {
    pub fn new(
        rpc: Arc<RpcClient>,
        contract: Address,
        selector: &'static str,
        per_call: usize,
        decode: fn(&str) -> Result<T, DecodeError>,
    ) -> Self {
        Self {
            rpc,
            contract,
            selector,
            per_call,
            decode,
        }
    }
}

impl<T: Send + 'static> Resolver for TokenCall<T> {
    type Input = u64;
    type Output = T;

    fn key(&self, token_id: &u64) -> String {
        token_id.to_string()
    }

    fn inputs_per_call(&self) -> usize {
        self.per_call
    }

    async fn resolve(&self, token_ids: Vec<u64>) -> Result<Vec<(String, Option<T>)>, SourceError> {
        let calls: Vec<(Address, String)> = token_ids
            .iter()
            .map(|id| {
                (
                    self.contract,
                    decode::encode_uint_call(self.selector, U256::from(*id)),
                )
            })
            .collect();
        let batch = self.rpc.batch_call(&calls).await?;

        Ok(token_ids
            .iter()
            .zip(batch.results)
            .map(|(id, raw)| {
                let value = raw.and_then(|hex| match (self.decode)(&hex) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        warn!(token_id = id, error = %e, "undecodable eth_call return");
                        None
                    }
                });
                (id.to_string(), value)
            })
            .collect())
    }
}

/// Current owner of every token seen in the transfer history
#[derive(Debug, Default)]
pub struct Ownership {
    owners: BTreeMap<u64, String>,
    minted: BTreeSet<u64>,
}

impl Ownership {
    /// Replay transfers in chain order; the last recipient owns the token
    pub fn build(transfers: &[NftTransfer]) -> Self {
        let mut ordered: Vec<&NftTransfer> = transfers.iter().collect();
        ordered.sort_by_key(|t| (t.block_number, t.transaction_index, t.log_index));

        let mut ownership = Self::default();
        for transfer in ordered {
            if transfer.from.eq_ignore_ascii_case(ZERO_ADDRESS) {
                ownership.minted.insert(transfer.token_id);
            }
            ownership
                .owners
                .insert(transfer.token_id, transfer.to.to_lowercase());
        }
        ownership
    }

    pub fn total_minted(&self) -> usize {
        self.minted.len()
    }

    pub fn total_burned(&self) -> usize {
        self.owners.values().filter(|o| *o == ZERO_ADDRESS).count()
    }

    /// Live token ids per holder, ascending
    pub fn by_holder(&self) -> BTreeMap<String, Vec<u64>> {
        let mut holders: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        for (token_id, owner) in &self.owners {
            if owner != ZERO_ADDRESS {
                holders.entry(owner.clone()).or_default().push(*token_id);
            }
        }
        holders
    }

    pub fn active_token_ids(&self) -> Vec<u64> {
        self.owners
            .iter()
            .filter(|(_, owner)| *owner != ZERO_ADDRESS)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenDetail {
    pub id: u64,
    /// `None` when the lock could not be read this run
    pub dolo: Option<f64>,
    pub end: i64,
    pub vote_weight: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Holder {
    pub address: String,
    pub nft_count: usize,
    pub token_ids: Vec<u64>,
    pub total_dolo: f64,
    pub total_vote_weight: f64,
    pub earliest_lock_end: i64,
    pub latest_lock_end: i64,
    pub token_details: Vec<TokenDetail>,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HolderStats {
    pub total_minted: usize,
    pub total_burned: usize,
    pub active_nfts: usize,
    pub unique_holders: usize,
    pub total_locked_dolo: f64,
    pub total_vote_weight: f64,
    /// Live tokens whose lock could not be read
    pub unresolved_locks: usize,
}

#[derive(Debug, Serialize)]
pub struct HoldersSnapshot {
    pub contract: String,
    pub network: &'static str,
    pub last_updated: String,
    pub stats: HolderStats,
    pub holders: Vec<Holder>,
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    rank: usize,
    address: &'a str,
    nft_count: usize,
    total_dolo: f64,
    vote_weight: f64,
    earliest_lock_end: String,
    latest_lock_end: String,
    token_ids: String,
}

const CSV_HEADER: [&str; 8] = [
    "Rank",
    "Address",
    "NFT_Count",
    "Total_DOLO",
    "Vote_Weight",
    "Earliest_Lock_End",
    "Latest_Lock_End",
    "Token_IDs",
];

/// Merge ownership, lock positions and vote weights into ranked holders
pub fn build_snapshot(
    ownership: &Ownership,
    locked: impl Fn(u64) -> Option<LockedPosition>,
    weights: &HashMap<String, f64>,
    config: &Config,
    now: DateTime<Utc>,
) -> HoldersSnapshot {
    let mut holders = Vec::new();
    let mut total_locked = 0.0;
    let mut total_weight = 0.0;
    let mut unresolved = 0;

    for (address, token_ids) in ownership.by_holder() {
        let mut dolo = 0.0;
        let mut weight = 0.0;
        let mut earliest: Option<i64> = None;
        let mut latest = 0;
        let mut details = Vec::with_capacity(token_ids.len());

        for &id in &token_ids {
            let position = locked(id);
            let vote_weight = weights.get(&id.to_string()).copied();
            match position {
                Some(p) => {
                    dolo += p.amount;
                    if p.end > 0 {
                        earliest = Some(earliest.map_or(p.end, |e| e.min(p.end)));
                        latest = latest.max(p.end);
                    }
                }
                None => unresolved += 1,
            }
            weight += vote_weight.unwrap_or(0.0);
            details.push(TokenDetail {
                id,
                dolo: position.map(|p| round_to(p.amount, 2)),
                end: position.map_or(0, |p| p.end),
                vote_weight: vote_weight.map(|w| round_to(w, 4)),
            });
        }

        total_locked += dolo;
        total_weight += weight;
        holders.push(Holder {
            address,
            nft_count: token_ids.len(),
            token_ids,
            total_dolo: round_to(dolo, 2),
            total_vote_weight: round_to(weight, 4),
            earliest_lock_end: earliest.unwrap_or(0),
            latest_lock_end: latest,
            token_details: details,
            rank: 0,
        });
    }

    rank_by(&mut holders, |h| h.total_dolo, |h| h.address.as_str());
    for (i, holder) in holders.iter_mut().enumerate() {
        holder.rank = i + 1;
    }
    if config.checksum_addresses {
        for holder in &mut holders {
            if let Ok(addr) = holder.address.parse::<Address>() {
                holder.address = format_address(&addr, true);
            }
        }
    }

    let total_minted = ownership.total_minted();
    let total_burned = ownership.total_burned();
    HoldersSnapshot {
        contract: format_address(&config.vedolo, config.checksum_addresses),
        network: "berachain",
        last_updated: reports::format_timestamp(now),
        stats: HolderStats {
            total_minted,
            total_burned,
            active_nfts: total_minted.saturating_sub(total_burned),
            unique_holders: holders.len(),
            total_locked_dolo: round_to(total_locked, 2),
            total_vote_weight: round_to(total_weight, 4),
            unresolved_locks: unresolved,
        },
        holders,
    }
}

fn csv_rows(holders: &[Holder]) -> Vec<CsvRow<'_>> {
    holders
        .iter()
        .map(|h| CsvRow {
            rank: h.rank,
            address: &h.address,
            nft_count: h.nft_count,
            total_dolo: h.total_dolo,
            vote_weight: h.total_vote_weight,
            earliest_lock_end: format_lock_end(h.earliest_lock_end),
            latest_lock_end: format_lock_end(h.latest_lock_end),
            token_ids: h
                .token_ids
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(";"),
        })
        .collect()
}

pub async fn run(config: &Config, now: DateTime<Utc>) -> Result<()> {
    let api_key = config.berachain_key()?;
    let explorer = ExplorerClient::etherscan(config, constants::BERACHAIN_CHAIN_ID, api_key)?;

    info!("Phase 1: fetching veDOLO NFT transfers");
    let vedolo = lower_hex(&config.vedolo);
    let source = explorer.tokennfttx(&vedolo);
    let params = Pagination {
        start_block: 0,
        end_block: constants::OPEN_END_BLOCK,
        offset: config.block_page_size,
        page_ceiling: config.page_ceiling,
        delay: config.page_delay,
        retry: config.retry,
        policy: FailurePolicy::Abort,
    };
    let outcome = paginate_blocks(&source, &params)
        .await
        .context("Failed to fetch veDOLO NFT transfers")?;

    if outcome.items.is_empty() {
        warn!("no transfers found, keeping existing holder files");
        return Ok(());
    }

    let ownership = Ownership::build(&outcome.items);
    let token_ids = ownership.active_token_ids();
    info!(
        transfers = outcome.items.len(),
        minted = ownership.total_minted(),
        burned = ownership.total_burned(),
        active = token_ids.len(),
        "ownership built"
    );

    let rpc = Arc::new(RpcClient::new(config)?);
    let options = PoolOptions {
        workers: config.call_workers,
        batch_size: config.resolver_batch_size,
        batch_delay: config.resolver_batch_delay,
    };

    info!(tokens = token_ids.len(), "Phase 2: reading locked DOLO");
    let locked_reader = Arc::new(TokenCall::new(
        Arc::clone(&rpc),
        config.vedolo,
        constants::LOCKED_SELECTOR,
        config.calls_per_batch,
        decode_locked,
    ));
    let mut cache = JsonCache::load(&config.data_path(constants::LOCKED_CACHE_FILENAME))?;
    let locked_stats =
        resolve_missing(&locked_reader, token_ids.clone(), &mut cache, &options).await?;
    info!(
        cached = locked_stats.cached,
        fetched = locked_stats.fetched,
        errors = locked_stats.errors,
        "locked DOLO resolved"
    );

    info!(tokens = token_ids.len(), "Phase 3: reading vote weights");
    let weight_reader = Arc::new(TokenCall::new(
        rpc,
        config.vedolo,
        constants::BALANCE_OF_NFT_SELECTOR,
        config.calls_per_batch,
        decode_weight,
    ));
    let (weights, weight_stats) = resolve_fresh(&weight_reader, token_ids, &options).await;
    if weight_stats.errors > 0 {
        warn!(errors = weight_stats.errors, "some vote weights could not be read");
    }

    let snapshot = build_snapshot(
        &ownership,
        |id| cache.get(&id.to_string()).copied(),
        &weights,
        config,
        now,
    );

    reports::write_json(&config.output_path(constants::HOLDERS_JSON_FILENAME), &snapshot)?;
    reports::write_csv(
        &config.output_path(constants::HOLDERS_CSV_FILENAME),
        &CSV_HEADER,
        &csv_rows(&snapshot.holders),
    )?;

    let stats = &snapshot.stats;
    info!(
        holders = stats.unique_holders,
        locked_dolo = stats.total_locked_dolo,
        vote_weight = stats.total_vote_weight,
        unresolved = stats.unresolved_locks,
        "holders snapshot complete"
    );
    for holder in snapshot.holders.iter().take(5) {
        info!(
            rank = holder.rank,
            address = %holder.address,
            nfts = holder.nft_count,
            dolo = holder.total_dolo,
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

    const ALICE: &str = "0x1111111111111111111111111111111111111111";
    const BOB: &str = "0x2222222222222222222222222222222222222222";

    fn transfer(hash: &str, block: u64, from: &str, to: &str, token_id: u64) -> NftTransfer {
        NftTransfer {
            hash: hash.to_string(),
            block_number: block,
            transaction_index: 0,
            log_index: 0,
            from: from.to_string(),
            to: to.to_string(),
            token_id,
        }
    }

    fn config(checksum: bool) -> Config {
        let mut file = FileConfig::default();
        file.output.checksum_addresses = checksum;
        Config::from_file(&file, Overrides::default()).unwrap()
    }

    fn history() -> Vec<NftTransfer> {
        vec![
            // Listed out of order on purpose
            transfer("0x04", 40, ALICE, BOB, 1),
            transfer("0x01", 10, ZERO_ADDRESS, ALICE, 1),
            transfer("0x02", 20, ZERO_ADDRESS, ALICE, 2),
            transfer("0x03", 30, ZERO_ADDRESS, BOB, 3),
            transfer("0x05", 50, BOB, ZERO_ADDRESS, 3),
        ]
    }

    #[test]
    fn test_ownership_follows_chain_order() {
        let ownership = Ownership::build(&history());
        assert_eq!(ownership.total_minted(), 3);
        assert_eq!(ownership.total_burned(), 1);
        assert_eq!(ownership.active_token_ids(), vec![1, 2]);

        let holders = ownership.by_holder();
        assert_eq!(holders.get(ALICE), Some(&vec![2]));
        assert_eq!(holders.get(BOB), Some(&vec![1]));
    }

    #[test]
    fn test_decode_locked() {
        let amount = format!("{:064x}", 1_500_000_000_000_000_000u128);
        let end = format!("{:064x}", 1_800_000_000u64);
        let position = decode_locked(&format!("0x{amount}{end}")).unwrap();
        assert_eq!(position, LockedPosition { amount: 1.5, end: 1_800_000_000 });

        assert_eq!(decode_locked("0x").unwrap(), LockedPosition { amount: 0.0, end: 0 });
        assert_eq!(decode_locked(&format!("0x{amount}")).unwrap().end, 0);
    }

    #[test]
    fn test_decode_weight() {
        let raw = format!("0x{:064x}", 2_000_000_000_000_000_000u128);
        assert_eq!(decode_weight(&raw).unwrap(), 2.0);
        assert_eq!(decode_weight("0x").unwrap(), 0.0);
    }

    #[test]
    fn test_snapshot_totals_and_ranking() {
        let ownership = Ownership::build(&history());
        let locked = |id: u64| match id {
            1 => Some(LockedPosition { amount: 100.0, end: 1_800_000_000 }),
            2 => Some(LockedPosition { amount: 250.556, end: 1_760_000_000 }),
            _ => None,
        };
        let weights = HashMap::from([("1".to_string(), 50.0), ("2".to_string(), 10.25)]);
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        let snapshot = build_snapshot(&ownership, locked, &weights, &config(false), now);

        assert_eq!(snapshot.stats.unique_holders, 2);
        assert_eq!(snapshot.stats.active_nfts, 2);
        assert_eq!(snapshot.stats.total_locked_dolo, 350.56);
        assert_eq!(snapshot.stats.total_vote_weight, 60.25);
        assert_eq!(snapshot.last_updated, "2025-07-01T00:00:00Z");

        let first = &snapshot.holders[0];
        assert_eq!(first.address, ALICE);
        assert_eq!(first.rank, 1);
        assert_eq!(first.total_dolo, 250.56);
        assert_eq!(first.earliest_lock_end, 1_760_000_000);
        assert_eq!(snapshot.holders[1].rank, 2);
    }

    #[test]
    fn test_unresolved_lock_is_null_and_excluded() {
        let ownership = Ownership::build(&history());
        let locked = |id: u64| (id == 2).then_some(LockedPosition { amount: 5.0, end: 0 });
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        let snapshot = build_snapshot(&ownership, locked, &HashMap::new(), &config(false), now);

        assert_eq!(snapshot.stats.unresolved_locks, 1);
        assert_eq!(snapshot.stats.total_locked_dolo, 5.0);
        let bob = snapshot.holders.iter().find(|h| h.address == BOB).unwrap();
        assert_eq!(bob.token_details[0].dolo, None);
        assert_eq!(bob.token_details[0].vote_weight, None);
        assert_eq!(bob.earliest_lock_end, 0);
    }

    #[test]
    fn test_csv_rows() {
        let ownership = Ownership::build(&[
            transfer("0x01", 1, ZERO_ADDRESS, ALICE, 7),
            transfer("0x02", 2, ZERO_ADDRESS, ALICE, 3),
        ]);
        let locked = |_| Some(LockedPosition { amount: 1.0, end: 1_750_896_000 });
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        let snapshot = build_snapshot(&ownership, locked, &HashMap::new(), &config(true), now);

        let rows = csv_rows(&snapshot.holders);
        assert_eq!(rows[0].token_ids, "3;7");
        assert_eq!(rows[0].earliest_lock_end, "2025-06-26");
        assert_eq!(rows[0].address, "0x1111111111111111111111111111111111111111");
        assert_eq!(snapshot.contract, constants::VEDOLO_CONTRACT);
    }
}
