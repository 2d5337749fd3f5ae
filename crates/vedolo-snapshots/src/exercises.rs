//! oDOLO exercises: per-address volume, lock durations and USD totals
//!
//! Exercises are vester calls to `closePositionAndBuyTokens`. The caller pays
//! USDC.e into the vester, the vester burns the exercised oDOLO, and the call
//! input carries the chosen lock end. Every exercise is cached as a full
//! record so the outputs are always rebuilt from the complete history.

use alloy_primitives::Address;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::aggregate::{
    BucketCounts, LOCK_DURATION, Observation, fold_groups, mean, rank_by, round_to,
};
use crate::cache::{JsonCache, write_atomic};
use crate::config::Config;
use crate::constants;
use crate::decode::{self, EXERCISE_INPUT, lower_hex};
use crate::error::{CacheError, SourceError};
use crate::explorer::{ExplorerClient, ExplorerTx};
use crate::fetcher::{
    ChainItem, FailurePolicy, Pagination, RetryPolicy, paginate_pages, retry_with_backoff,
};
use crate::reports;
use crate::resolver::{PoolOptions, Resolver, resolve_missing};
use crate::roles::format_address;
use crate::rpc::Receipt;

/// One exercise, as cached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseRecord {
    pub hash: String,
    /// Lowercase caller address
    pub from: String,
    pub block: u64,
    pub tx_index: u64,
    pub timestamp: i64,
    /// Seconds between the exercise and the chosen lock end, when plausible
    pub lock_seconds: Option<i64>,
    /// USDC.e paid; `None` when the receipt has no payment to the vester
    pub usdc: Option<f64>,
    /// oDOLO burned by the vester, which equals the veDOLO received
    pub vedolo: Option<f64>,
}

impl ExerciseRecord {
    pub fn lock_days(&self) -> Option<f64> {
        self.lock_seconds
            .map(|s| s as f64 / constants::SECONDS_PER_DAY as f64)
    }
}

impl Observation for ExerciseRecord {
    fn group(&self) -> String {
        self.from.clone()
    }
    fn amount(&self) -> Option<f64> {
        self.usdc
    }
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
    fn position(&self) -> (u64, u64, u64) {
        (self.block, self.tx_index, 0)
    }
}

/// Whether a vester transaction is a successful exercise
pub fn is_exercise(tx: &ExplorerTx) -> bool {
    tx.selector().eq_ignore_ascii_case(constants::EXERCISE_SELECTOR) && tx.succeeded()
}

/// Lock duration in seconds from the exercise input, if within (0, 3 years]
pub fn lock_seconds(tx: &ExplorerTx) -> Option<i64> {
    let decoded = decode::decode_hex(&EXERCISE_INPUT, &tx.input).ok()?;
    let lock_end = decoded.i64("lock_end").ok()?;
    let duration = lock_end - tx.time_stamp as i64;
    (duration > 0 && duration <= constants::MAX_LOCK_SECONDS).then_some(duration)
}

/// USDC.e paid into the vester and oDOLO burned by it
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExerciseAmounts {
    pub usdc: Option<f64>,
    pub vedolo: Option<f64>,
}

pub fn amounts_from_receipt(
    receipt: &Receipt,
    usdc_e: Address,
    odolo: Address,
    vester: Address,
) -> ExerciseAmounts {
    let mut amounts = ExerciseAmounts::default();
    for transfer in receipt.logs.iter().filter_map(|log| log.transfer()) {
        if transfer.token == usdc_e && transfer.to == vester {
            amounts.usdc = Some(decode::scale(transfer.value, constants::USDC_DECIMALS));
        }
        if transfer.token == odolo && transfer.from == vester && transfer.to == Address::ZERO {
            let burned = decode::scale(transfer.value, constants::ODOLO_DECIMALS);
            if burned > 0.0 {
                amounts.vedolo = Some(burned);
            }
        }
    }
    amounts
}

/// Receipt lookups through the explorer proxy, keyed by tx hash
pub struct ExerciseReader {
    explorer: ExplorerClient,
    usdc_e: Address,
    odolo: Address,
    vester: Address,
    retry: RetryPolicy,
}

impl Resolver for ExerciseReader {
    type Input = ExplorerTx;
    type Output = ExerciseRecord;

    fn key(&self, tx: &ExplorerTx) -> String {
        tx.key()
    }

    async fn resolve(
        &self,
        txs: Vec<ExplorerTx>,
    ) -> Result<Vec<(String, Option<ExerciseRecord>)>, SourceError> {
        let mut out = Vec::with_capacity(txs.len());
        for tx in txs {
            let key = tx.key();
            let receipt =
                retry_with_backoff(&self.retry, || self.explorer.receipt(&tx.hash)).await?;
            let record = match receipt {
                Some(receipt) => {
                    let amounts =
                        amounts_from_receipt(&receipt, self.usdc_e, self.odolo, self.vester);
                    Some(ExerciseRecord {
                        hash: key.clone(),
                        from: tx.from.to_lowercase(),
                        block: tx.block_number,
                        tx_index: tx.transaction_index,
                        timestamp: tx.time_stamp as i64,
                        lock_seconds: lock_seconds(&tx),
                        usdc: amounts.usdc,
                        vedolo: amounts.vedolo,
                    })
                }
                None => {
                    warn!(tx = %tx.hash, "receipt not available yet");
                    None
                }
            };
            out.push((key, record));
        }
        Ok(out)
    }
}

/// Where the next run starts listing vester transactions (inclusive)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub next_block: u64,
}

impl Cursor {
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| CacheError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        write_atomic(path, &serde_json::to_vec(self)?)
    }

    /// Lowest block that still needs work, else the highest block listed
    pub fn advance(&self, listed: &[ExplorerTx], failed_blocks: &[u64]) -> Self {
        let next_block = failed_blocks
            .iter()
            .min()
            .copied()
            .or_else(|| listed.iter().map(|tx| tx.block_number).max())
            .unwrap_or(self.next_block);
        Self { next_block }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TxDetail {
    pub hash: String,
    pub date: String,
    pub usdc: f64,
    pub vedolo: Option<f64>,
    /// USDC paid per veDOLO received
    pub price: Option<f64>,
    pub lock_days: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Exerciser {
    pub address: String,
    pub total_usdc: f64,
    pub exercises: usize,
    pub avg_lock_days: Option<f64>,
    pub first: Option<String>,
    pub last: Option<String>,
    pub txs: Vec<TxDetail>,
}

#[derive(Debug, Serialize)]
pub struct ExercisersReport {
    pub updated: String,
    pub last_updated: String,
    pub total_addresses: usize,
    pub total_usdc: f64,
    pub total_exercises: usize,
    /// Exercises with no USDC.e payment found
    pub unresolved: usize,
    pub exercisers: Vec<Exerciser>,
}

fn tx_detail(record: &ExerciseRecord) -> TxDetail {
    let usdc = record.usdc.unwrap_or(0.0);
    let price = match record.vedolo {
        Some(vedolo) if usdc > 0.0 && vedolo > 0.0 => Some(round_to(usdc / vedolo, 6)),
        _ => None,
    };
    TxDetail {
        hash: record.hash.clone(),
        date: reports::format_date(record.timestamp).unwrap_or_default(),
        usdc: round_to(usdc, 2),
        vedolo: record.vedolo.map(|v| round_to(v, 2)),
        price,
        lock_days: record.lock_days().map(|d| round_to(d, 1)),
    }
}

/// Per-address totals over every exercise with a known payment
pub fn build_exercisers(
    records: &[ExerciseRecord],
    checksum: bool,
    now: DateTime<Utc>,
) -> ExercisersReport {
    let folded = fold_groups(records);
    let mut exercisers: Vec<Exerciser> = folded
        .groups
        .iter()
        .filter(|(_, totals)| totals.count > 0)
        .map(|(address, totals)| {
            let txs: Vec<TxDetail> = totals.records.iter().map(tx_detail).collect();
            let locks: Vec<f64> = txs.iter().filter_map(|t| t.lock_days).collect();
            Exerciser {
                address: address.clone(),
                total_usdc: round_to(totals.sum, 2),
                exercises: totals.count,
                avg_lock_days: mean(&locks).map(|d| round_to(d, 1)),
                first: totals.first_ts.and_then(reports::format_date),
                last: totals.last_ts.and_then(reports::format_date),
                txs,
            }
        })
        .collect();

    rank_by(&mut exercisers, |e| e.total_usdc, |e| e.address.as_str());
    if checksum {
        for exerciser in &mut exercisers {
            if let Ok(addr) = exerciser.address.parse::<Address>() {
                exerciser.address = format_address(&addr, true);
            }
        }
    }

    let stamp = reports::format_timestamp(now);
    ExercisersReport {
        updated: stamp.clone(),
        last_updated: stamp,
        total_addresses: exercisers.len(),
        total_usdc: round_to(exercisers.iter().map(|e| e.total_usdc).sum(), 2),
        total_exercises: exercisers.iter().map(|e| e.exercises).sum(),
        unresolved: folded.errors,
        exercisers,
    }
}

#[derive(Debug, Serialize)]
pub struct LockReport {
    pub avg_lock_days: f64,
    pub avg_lock_months: f64,
    pub avg_lock_years: f64,
    pub avg_discount_pct: f64,
    pub total_exercises: usize,
    pub valid_durations: usize,
    pub distribution: BucketCounts,
    pub last_updated: String,
}

/// Exercise discount for a lock length: linear between the curve's end points, clamped
pub fn discount_pct(days: f64) -> f64 {
    let span = constants::DISCOUNT_MAX_DAYS - constants::DISCOUNT_MIN_DAYS;
    let slope = (constants::DISCOUNT_MAX_PCT - constants::DISCOUNT_MIN_PCT) / span;
    (constants::DISCOUNT_MIN_PCT + (days - constants::DISCOUNT_MIN_DAYS) * slope)
        .clamp(constants::DISCOUNT_MIN_PCT, constants::DISCOUNT_MAX_PCT)
}

/// Lock-duration averages and distribution. `None` when no duration is valid.
pub fn build_lock_report(records: &[ExerciseRecord], now: DateTime<Utc>) -> Option<LockReport> {
    let days: Vec<f64> = records.iter().filter_map(ExerciseRecord::lock_days).collect();
    let avg_days = mean(&days)?;

    Some(LockReport {
        avg_lock_days: round_to(avg_days, 1),
        avg_lock_months: round_to(avg_days / constants::DAYS_PER_MONTH, 1),
        avg_lock_years: round_to(avg_days / constants::DAYS_PER_YEAR, 2),
        avg_discount_pct: round_to(discount_pct(avg_days), 1),
        total_exercises: records.len(),
        valid_durations: days.len(),
        distribution: LOCK_DURATION.count(days.iter().copied()),
        last_updated: reports::format_timestamp(now),
    })
}

#[derive(Debug, Serialize)]
pub struct VolumeReport {
    pub total_usdc: f64,
    pub total_txs: usize,
    pub last_block: u64,
    pub period: String,
    pub last_updated: String,
}

pub fn build_volume_report(
    records: &[ExerciseRecord],
    last_block: u64,
    now: DateTime<Utc>,
) -> VolumeReport {
    let paid: Vec<&ExerciseRecord> = records.iter().filter(|r| r.usdc.is_some()).collect();
    let total: f64 = paid.iter().filter_map(|r| r.usdc).sum();
    let today = now.format(constants::DATE_FORMAT).to_string();
    let start = paid
        .iter()
        .map(|r| r.timestamp)
        .min()
        .and_then(reports::format_date)
        .unwrap_or_else(|| today.clone());

    VolumeReport {
        total_usdc: round_to(total, 2),
        total_txs: paid.len(),
        last_block: records
            .iter()
            .map(|r| r.block)
            .max()
            .unwrap_or(0)
            .max(last_block),
        period: format!("{start} to {today}"),
        last_updated: reports::format_timestamp(now),
    }
}

pub async fn run(config: &Config, now: DateTime<Utc>) -> Result<()> {
    let cursor_path = config.data_path(constants::EXERCISES_CURSOR_FILENAME);
    let cursor = Cursor::load(&cursor_path)?;
    let vester = lower_hex(&config.odolo_vester);

    info!(from_block = cursor.next_block, "Phase 1: listing vester transactions");
    let explorer = ExplorerClient::routescan(config)?;
    let params = Pagination {
        start_block: cursor.next_block,
        end_block: constants::OPEN_END_BLOCK,
        offset: config.page_size,
        page_ceiling: config.page_ceiling,
        delay: config.page_delay,
        retry: config.retry,
        policy: FailurePolicy::Abort,
    };
    let listed = paginate_pages(&explorer.txlist(&vester), &params)
        .await
        .context("Failed to list vester transactions")?;

    let exercises: Vec<ExplorerTx> = listed
        .items
        .iter()
        .filter(|tx| is_exercise(tx))
        .cloned()
        .collect();
    info!(
        listed = listed.items.len(),
        exercises = exercises.len(),
        requests = listed.requests,
        "Phase 2: filtered exercise calls"
    );

    let mut cache = JsonCache::load(&config.data_path(constants::EXERCISES_CACHE_FILENAME))?;
    let reader = Arc::new(ExerciseReader {
        explorer: ExplorerClient::routescan(config)?,
        usdc_e: config.usdc_e,
        odolo: config.odolo,
        vester: config.odolo_vester,
        retry: config.retry,
    });
    let options = PoolOptions {
        workers: config.receipt_workers,
        batch_size: config.resolver_batch_size,
        batch_delay: config.resolver_batch_delay,
    };

    info!("Phase 3: reading exercise receipts");
    let resolved = resolve_missing(&reader, exercises.clone(), &mut cache, &options).await?;
    info!(
        cached = resolved.cached,
        fetched = resolved.fetched,
        errors = resolved.errors,
        "receipts resolved"
    );

    let failed_blocks: Vec<u64> = exercises
        .iter()
        .filter(|tx| !cache.contains(&tx.key()))
        .map(|tx| tx.block_number)
        .collect();
    let next = cursor.advance(&listed.items, &failed_blocks);
    next.save(&cursor_path)?;
    info!(next_block = next.next_block, "cursor saved");

    if cache.is_empty() {
        warn!("no exercises recorded yet, keeping existing files");
        return Ok(());
    }

    info!(records = cache.len(), "Phase 4: aggregating");
    let records: Vec<ExerciseRecord> = cache.iter().map(|(_, r)| r.clone()).collect();

    let exercisers = build_exercisers(&records, config.checksum_addresses, now);
    reports::write_json(&config.output_path(constants::EXERCISERS_FILENAME), &exercisers)?;

    match build_lock_report(&records, now) {
        Some(lock) => {
            info!(
                avg_days = lock.avg_lock_days,
                avg_discount = lock.avg_discount_pct,
                valid = lock.valid_durations,
                "lock durations"
            );
            reports::write_json(&config.output_path(constants::AVG_LOCK_FILENAME), &lock)?;
        }
        None => warn!("no valid lock durations, keeping existing lock file"),
    }

    let volume = build_volume_report(&records, next.next_block, now);
    reports::write_json(&config.output_path(constants::EXERCISED_USD_FILENAME), &volume)?;

    info!(
        addresses = exercisers.total_addresses,
        exercises = exercisers.total_exercises,
        total_usdc = volume.total_usdc,
        unresolved = exercisers.unresolved,
        "exercises complete"
    );
    Ok(())
}
