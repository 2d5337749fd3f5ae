//! Centralized constants for the snapshot fetchers
//!
//! Deployment addresses, event topics and selectors are universal for the
//! Dolomite deployment on Berachain. Endpoints and tuning knobs can be
//! overridden from config.toml.

// =============================================================================
// API Endpoints
// =============================================================================

/// Etherscan V2 multichain API
pub const ETHERSCAN_V2_API: &str = "https://api.etherscan.io/v2/api";

/// Routescan's Etherscan-compatible API for Berachain (no key required)
pub const ROUTESCAN_API: &str = "https://api.routescan.io/v2/network/mainnet/evm/80094/etherscan/api";

/// Public Berachain JSON-RPC endpoints, tried in order
pub const DEFAULT_RPC_URLS: &[&str] = &[
    "https://berachain-rpc.publicnode.com/",
    "https://berachain.drpc.org/",
    "https://rpc.berachain.com/",
];

/// CoinGecko API base URL
pub const COINGECKO_API_BASE: &str = "https://api.coingecko.com/api/v3";

/// CoinGecko simple price endpoint with market data
pub const COINGECKO_SIMPLE_PRICE: &str = "/simple/price?ids=dolomite&vs_currencies=usd&include_market_cap=true&include_24hr_vol=true&include_24hr_change=true";

/// CoinGecko coin detail endpoint (supply figures)
pub const COINGECKO_COIN: &str =
    "/coins/dolomite?localization=false&tickers=false&community_data=false&developer_data=false";

/// DefiLlama protocol endpoint
pub const DEFILLAMA_PROTOCOL_URL: &str = "https://api.llama.fi/protocol/dolomite";

// =============================================================================
// Chains
// =============================================================================

pub const BERACHAIN_CHAIN_ID: u64 = 80094;
pub const ETHEREUM_CHAIN_ID: u64 = 1;

// =============================================================================
// Contracts
// =============================================================================

/// veDOLO voting escrow (ERC-721 lock positions)
pub const VEDOLO_CONTRACT: &str = "0xCB86B75EE6133d179a12D550b09FB3cdB1e141D4";

/// DOLO ERC-20 (same address on Ethereum and Berachain)
pub const DOLO_TOKEN: &str = "0x0F81001eF0A83ecCE5ccebf63EB302c70a39a654";

/// oDOLO option token
pub const ODOLO_TOKEN: &str = "0x02E513b5B54eE216Bf836ceb471507488fC89543";

/// oDOLO vester (exercise entry point, recoup fee recipient)
pub const ODOLO_VESTER: &str = "0x3E9b9A16743551DA49b5e136C716bBa7932d2cEc";

/// USDC.e on Berachain (exercise payment token)
pub const USDC_E_TOKEN: &str = "0x549943e04f40284185054145c6e4e9568c1d3241";

/// Secondary recoup fee recipient, only known by its prefix
pub const RECOUP_SECONDARY_PREFIX: &str = "0xcfc30d38";

// =============================================================================
// Event Topics and Selectors
// =============================================================================

/// Transfer(address,address,uint256)
pub const TRANSFER_TOPIC: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// veDOLO Withdraw(address indexed provider, uint256 tokenId, uint256 value, uint256 ts)
pub const WITHDRAW_TOPIC: &str = "0x02f25270a4d87bea75db541cdfe559334a275b4a233520ed6c0a2429667cca94";

/// closePositionAndBuyTokens(...) on the vester
pub const EXERCISE_SELECTOR: &str = "0xa88f8139";

/// locked(uint256) -> (int128 amount, uint256 end)
pub const LOCKED_SELECTOR: &str = "0xb45a3c0e";

/// balanceOfNFT(uint256) -> current vote weight
pub const BALANCE_OF_NFT_SELECTOR: &str = "0xe7e242d4";

pub const TOTAL_SUPPLY_SELECTOR: &str = "0x18160ddd";
pub const BALANCE_OF_SELECTOR: &str = "0x70a08231";
pub const DECIMALS_SELECTOR: &str = "0x313ce567";
pub const PROMISED_TOKENS_SELECTOR: &str = "0x5e17b694";
pub const PUSHED_TOKENS_SELECTOR: &str = "0x818c16e2";
pub const AVAILABLE_TOKENS_SELECTOR: &str = "0x69bb4dc2";

// =============================================================================
// Token Decimals
// =============================================================================

pub const DOLO_DECIMALS: u8 = 18;
pub const ODOLO_DECIMALS: u8 = 18;
pub const USDC_DECIMALS: u8 = 6;

// =============================================================================
// File Names
// =============================================================================

pub const CONFIG_FILENAME: &str = "config.toml";

pub const LOCKED_CACHE_FILENAME: &str = "locked_cache.json";
pub const EARLY_EXITS_CACHE_FILENAME: &str = "early_exits_cache.json";
pub const EXERCISES_CACHE_FILENAME: &str = "exercises_cache.json";
pub const EXERCISES_CURSOR_FILENAME: &str = "exercises_cursor.json";

pub const HOLDERS_JSON_FILENAME: &str = "vedolo_holders.json";
pub const HOLDERS_CSV_FILENAME: &str = "vedolo_holders.csv";
pub const EARLY_EXITS_FILENAME: &str = "early_exits.json";
pub const EARLY_EXITS_FULL_FILENAME: &str = "early_exits_full.json";
pub const EXERCISERS_FILENAME: &str = "exercisers_by_address.json";
pub const AVG_LOCK_FILENAME: &str = "avg_lock_data.json";
pub const EXERCISED_USD_FILENAME: &str = "exercised_usd.json";
pub const DOLO_HOLDERS_FILENAME: &str = "dolo_holders.json";
pub const ODOLO_CONTRACT_FILENAME: &str = "odolo_contract_data.json";
pub const DOLO_PRICE_FILENAME: &str = "dolo_price.json";
pub const DEFILLAMA_FILENAME: &str = "defillama_data.json";

// =============================================================================
// Pagination
// =============================================================================

/// Page size for page-number pagination (txlist)
pub const EXPLORER_PAGE_SIZE: usize = 100;

/// Page size for block-range pagination (token transfer lists)
pub const BLOCK_PAGE_SIZE: usize = 10_000;

/// Explorer limit on page * offset
pub const PAGE_CEILING: usize = 10_000;

/// Block window for eth_getLogs scans (free-tier RPC limit)
pub const LOG_WINDOW_BLOCKS: u64 = 10_000;

/// Open upper bound accepted by the explorer as "latest"
pub const OPEN_END_BLOCK: u64 = 99_999_999;

// =============================================================================
// Rate Limiting and Retries
// =============================================================================

/// Delay between consecutive list pages (ms)
pub const LIST_PAGE_DELAY_MS: u64 = 250;

/// Delay between resolver batches (ms)
pub const RESOLVER_BATCH_DELAY_MS: u64 = 50;

/// Attempts per request before the failure escalates
pub const MAX_ATTEMPTS: u32 = 4;

/// Base backoff for transient errors (ms), doubled per attempt
pub const RETRY_BASE_DELAY_MS: u64 = 500;

/// Base backoff after a rate-limit response (ms), doubled per attempt
pub const RATE_LIMIT_BASE_DELAY_MS: u64 = 2_000;

/// Per-request timeout (s)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Concurrent receipt lookups
pub const RECEIPT_WORKERS: usize = 8;

/// Concurrent batched eth_call requests
pub const CALL_WORKERS: usize = 4;

/// Upper bound on any worker pool
pub const MAX_WORKERS: usize = 8;

/// Token IDs per batched eth_call request
pub const CALLS_PER_BATCH: usize = 50;

/// Resolver units committed to the cache at a time
pub const RESOLVER_BATCH_SIZE: usize = 64;

// =============================================================================
// Thresholds
// =============================================================================

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Lock durations above this are treated as garbage input
pub const MAX_LOCK_SECONDS: i64 = 3 * 365 * SECONDS_PER_DAY;

pub const DAYS_PER_MONTH: f64 = 30.44;
pub const DAYS_PER_YEAR: f64 = 365.25;

/// Exercise discount curve: 5% at 7 days rising linearly to 50% at 730 days
pub const DISCOUNT_MIN_PCT: f64 = 5.0;
pub const DISCOUNT_MAX_PCT: f64 = 50.0;
pub const DISCOUNT_MIN_DAYS: f64 = 7.0;
pub const DISCOUNT_MAX_DAYS: f64 = 730.0;

/// Minimum DOLO balance for the holder list (filters dust)
pub const MIN_HOLDER_BALANCE: f64 = 1.0;

// =============================================================================
// Formatting
// =============================================================================

/// `last_updated` format for every output file
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub const DATE_FORMAT: &str = "%Y-%m-%d";
