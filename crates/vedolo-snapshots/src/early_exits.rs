//! veDOLO early-exit penalties
//!
//! A withdraw before lock expiry splits the locked DOLO between the burn
//! address, the recoup fee recipients and the user. The split is read back
//! from the DOLO transfers the escrow made in the withdraw transaction.

use alloy_primitives::Address;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::aggregate::{Observation, fold_groups, round_to, split_by};
use crate::cache::JsonCache;
use crate::config::Config;
use crate::constants;
use crate::decode::{self, INDEXED_ADDRESS, WITHDRAW_DATA, lower_hex};
use crate::error::{DecodeError, SourceError};
use crate::fetcher::{FailurePolicy, RetryPolicy, scan_windows};
use crate::reports;
use crate::resolver::{PoolOptions, Resolver, resolve_missing};
use crate::roles::{AddressRole, RoleTable, format_address};
use crate::rpc::{LogEntry, Receipt, RpcClient};

/// Decoded `Withdraw` event
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawEvent {
    pub provider: Address,
    pub token_id: u64,
    /// DOLO reported by the event
    pub value: f64,
    pub timestamp: i64,
    pub block: u64,
    pub tx_index: u64,
    pub log_index: u64,
    pub tx_hash: String,
}

impl WithdrawEvent {
    pub fn from_log(log: &LogEntry) -> Result<Self, DecodeError> {
        let provider_topic = log
            .topics
            .get(1)
            .ok_or(DecodeError::MissingField("provider"))?;
        let provider = decode::decode_hex(&INDEXED_ADDRESS, provider_topic)?.address("address")?;
        let data = decode::decode_hex(&WITHDRAW_DATA, &log.data)?;
        let tx_hash = log
            .transaction_hash
            .clone()
            .ok_or(DecodeError::MissingField("transactionHash"))?;

        Ok(Self {
            provider,
            token_id: data.u64("token_id")?,
            value: data.fixed("value")?,
            timestamp: data.i64("timestamp")?,
            block: log.block(),
            tx_index: log.tx_index(),
            log_index: log.index(),
            tx_hash: tx_hash.to_lowercase(),
        })
    }
}

impl Observation for WithdrawEvent {
    fn group(&self) -> String {
        self.tx_hash.clone()
    }
    fn amount(&self) -> Option<f64> {
        Some(self.value)
    }
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
    fn position(&self) -> (u64, u64, u64) {
        (self.block, self.tx_index, self.log_index)
    }
}

/// Where the escrowed DOLO went in one withdraw transaction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Penalty {
    pub burn_fee: f64,
    pub recoup_fee: f64,
    pub total_penalty: f64,
    pub original_locked: f64,
    pub user_received: f64,
    pub penalty_pct: f64,
    pub is_early_exit: bool,
}

impl Penalty {
    fn from_amounts(burn: f64, recoup: f64, user: f64) -> Self {
        let total_penalty = burn + recoup;
        let original_locked = burn + recoup + user;
        let penalty_pct = if original_locked > 0.0 {
            total_penalty / original_locked * 100.0
        } else {
            0.0
        };
        Self {
            burn_fee: round_to(burn, 4),
            recoup_fee: round_to(recoup, 4),
            total_penalty: round_to(total_penalty, 4),
            original_locked: round_to(original_locked, 4),
            user_received: round_to(user, 4),
            penalty_pct: round_to(penalty_pct, 2),
            is_early_exit: total_penalty > 0.0,
        }
    }
}

/// Classify DOLO transfers leaving the escrow by destination.
///
/// Returns `None` when the receipt holds no escrow transfer at all, so an
/// unreadable split is never reported as a zero-penalty exit.
pub fn penalty_from_receipt(
    receipt: &Receipt,
    dolo: Address,
    escrow: Address,
    roles: &RoleTable,
) -> Option<Penalty> {
    let mut burn = 0.0;
    let mut recoup = 0.0;
    let mut user = 0.0;
    let mut matched = false;

    for transfer in receipt.logs.iter().filter_map(LogEntry::transfer) {
        if transfer.token != dolo || transfer.from != escrow {
            continue;
        }
        matched = true;
        let amount = decode::scale(transfer.value, constants::DOLO_DECIMALS);
        match roles.classify(&transfer.to) {
            AddressRole::Burn => burn += amount,
            AddressRole::FeeRecipient | AddressRole::SecondaryFeeRecipient => recoup += amount,
            AddressRole::Other => user += amount,
        }
    }
    matched.then(|| Penalty::from_amounts(burn, recoup, user))
}

/// Receipt lookups for withdraw transactions, keyed by tx hash
pub struct PenaltyReader {
    rpc: Arc<RpcClient>,
    dolo: Address,
    escrow: Address,
    roles: RoleTable,
}

impl Resolver for PenaltyReader {
    type Input = String;
    type Output = Penalty;

    fn key(&self, tx_hash: &String) -> String {
        tx_hash.clone()
    }

    async fn resolve(
        &self,
        hashes: Vec<String>,
    ) -> Result<Vec<(String, Option<Penalty>)>, SourceError> {
        let mut out = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let penalty = match self.rpc.receipt(&hash).await? {
                Some(receipt) => {
                    let penalty =
                        penalty_from_receipt(&receipt, self.dolo, self.escrow, &self.roles);
                    if penalty.is_none() {
                        warn!(tx = %hash, "no DOLO transfer from escrow in receipt");
                    }
                    penalty
                }
                None => {
                    warn!(tx = %hash, "receipt not available");
                    None
                }
            };
            out.push((hash, penalty));
        }
        Ok(out)
    }
}

/// One withdraw transaction with its penalty split
#[derive(Debug, Clone, Serialize)]
pub struct ExitEntry {
    pub tx_hash: String,
    pub provider: String,
    pub token_ids: Vec<u64>,
    pub value: f64,
    pub timestamp: i64,
    pub date: String,
    pub block: u64,
    #[serde(flatten)]
    pub penalty: Penalty,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExitStats {
    pub total_early_exits: usize,
    pub total_normal_exits: usize,
    /// Withdraw events, several per transaction when tokens were merged
    pub total_withdrawals: usize,
    pub total_burn_fee_dolo: f64,
    pub total_recoup_fee_dolo: f64,
    pub total_penalty_dolo: f64,
    pub total_original_locked: f64,
    pub avg_penalty_pct: f64,
    /// Transactions whose split could not be read this run (missing receipt
    /// or no escrow transfer); neither counted as early nor normal
    pub unresolved_transactions: usize,
    pub last_updated: String,
}

#[derive(Debug, Serialize)]
pub struct ExitReport {
    pub stats: ExitStats,
    pub early_exits: Vec<ExitEntry>,
}

#[derive(Debug, Serialize)]
struct StatsOnly<'a> {
    stats: &'a ExitStats,
}

/// Join events with their transaction's penalty and compute the totals
pub fn build_report(
    events: &[WithdrawEvent],
    penalty_for: impl Fn(&str) -> Option<Penalty>,
    checksum: bool,
    now: DateTime<Utc>,
) -> ExitReport {
    let folded = fold_groups(events);
    let mut entries = Vec::new();
    let mut unresolved = 0;

    for (tx_hash, totals) in &folded.groups {
        let Some(penalty) = penalty_for(tx_hash) else {
            unresolved += 1;
            continue;
        };
        let Some(first) = totals.records.first() else {
            continue;
        };
        let timestamp = totals.last_ts.unwrap_or(first.timestamp);
        entries.push(ExitEntry {
            tx_hash: tx_hash.clone(),
            provider: format_address(&first.provider, checksum),
            token_ids: totals.records.iter().map(|e| e.token_id).collect(),
            value: round_to(totals.sum, 4),
            timestamp,
            date: reports::format_date(timestamp).unwrap_or_default(),
            block: first.block,
            penalty,
        });
    }

    let split = split_by(&entries, |e| e.penalty.is_early_exit);
    let sum = |f: fn(&Penalty) -> f64| split.matching.iter().map(|e| f(&e.penalty)).sum::<f64>();
    let total_penalty = sum(|p| p.total_penalty);
    let total_original = sum(|p| p.original_locked);

    let stats = ExitStats {
        total_early_exits: split.matching.len(),
        total_normal_exits: split.rest.len(),
        total_withdrawals: events.len(),
        total_burn_fee_dolo: round_to(sum(|p| p.burn_fee), 2),
        total_recoup_fee_dolo: round_to(sum(|p| p.recoup_fee), 2),
        total_penalty_dolo: round_to(total_penalty, 2),
        total_original_locked: round_to(total_original, 2),
        avg_penalty_pct: if total_original > 0.0 {
            round_to(total_penalty / total_original * 100.0, 2)
        } else {
            0.0
        },
        unresolved_transactions: unresolved,
        last_updated: reports::format_timestamp(now),
    };

    let mut early_exits: Vec<ExitEntry> = split.matching.into_iter().cloned().collect();
    early_exits.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.tx_hash.cmp(&b.tx_hash))
    });

    ExitReport { stats, early_exits }
}

pub async fn run(config: &Config, now: DateTime<Utc>) -> Result<()> {
    let rpc = Arc::new(RpcClient::new(config)?);

    info!("Phase 1: scanning Withdraw events");
    let latest = rpc.block_number().await.context("Failed to read latest block")?;
    info!(latest_block = latest, "chain head");

    // The client already retries each endpoint; one attempt per window here
    let window_retry = RetryPolicy {
        max_attempts: 1,
        ..config.retry
    };
    let logs = scan_windows(
        0,
        latest,
        config.log_window_blocks,
        &window_retry,
        FailurePolicy::Abort,
        |from, to| rpc.get_logs(config.vedolo, constants::WITHDRAW_TOPIC, from, to),
    )
    .await
    .context("Failed to scan Withdraw events")?;

    if logs.items.is_empty() {
        warn!("no Withdraw events found, keeping existing files");
        return Ok(());
    }

    info!(logs = logs.items.len(), "Phase 2: decoding events");
    let mut events = Vec::with_capacity(logs.items.len());
    for log in &logs.items {
        match WithdrawEvent::from_log(log) {
            Ok(event) => events.push(event),
            Err(e) => warn!(
                tx = ?log.transaction_hash,
                error = %e,
                "skipping undecodable Withdraw log"
            ),
        }
    }

    info!(events = events.len(), "Phase 3: reading withdraw receipts");
    let reader = Arc::new(PenaltyReader {
        rpc,
        dolo: config.dolo,
        escrow: config.vedolo,
        roles: RoleTable::penalty_recipients(config),
    });
    let mut cache = JsonCache::load(&config.data_path(constants::EARLY_EXITS_CACHE_FILENAME))?;
    let hashes: Vec<String> = events.iter().map(|e| e.tx_hash.clone()).collect();
    let options = PoolOptions {
        workers: config.receipt_workers,
        batch_size: config.resolver_batch_size,
        batch_delay: config.resolver_batch_delay,
    };
    let resolved = resolve_missing(&reader, hashes, &mut cache, &options).await?;
    info!(
        cached = resolved.cached,
        fetched = resolved.fetched,
        errors = resolved.errors,
        "receipts resolved"
    );

    info!("Phase 4: computing statistics");
    let report = build_report(
        &events,
        |hash| cache.get(hash).copied(),
        config.checksum_addresses,
        now,
    );

    reports::write_json(&config.output_path(constants::EARLY_EXITS_FULL_FILENAME), &report)?;
    reports::write_json(
        &config.output_path(constants::EARLY_EXITS_FILENAME),
        &StatsOnly {
            stats: &report.stats,
        },
    )?;

    let stats = &report.stats;
    info!(
        early = stats.total_early_exits,
        normal = stats.total_normal_exits,
        burn = stats.total_burn_fee_dolo,
        recoup = stats.total_recoup_fee_dolo,
        penalty = stats.total_penalty_dolo,
        avg_pct = stats.avg_penalty_pct,
        escrow = %lower_hex(&config.vedolo),
        "early exits complete"
    );
    Ok(())
}
