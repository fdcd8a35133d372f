/// Shared constants for the provider ledger
///
/// This module centralizes the magic numbers of the ledger so the backend
/// and the sweeper service agree on retry budgets, TTLs and wire vocabulary.

/// Maximum attempts for a retryable operation before it is frozen as dead
///
/// Counts the immediate attempt made at enqueue time.
pub const MAX_OPERATION_ATTEMPTS: i32 = 5;

/// Base backoff delay in milliseconds for retry logic
pub const RETRY_BACKOFF_BASE_MS: i64 = 1_000;

/// Maximum backoff delay in milliseconds for retry logic
pub const RETRY_BACKOFF_MAX_MS: i64 = 30_000;

/// Jitter applied to every backoff delay, as a fraction of the delay (±10%)
pub const RETRY_JITTER_RATIO: f64 = 0.10;

/// How long a sweeper holds a claimed operation before another may take it
pub const OPERATION_LEASE_MS: i64 = 60_000;

/// Sweeper batch size (how many due operations to claim at once)
pub const SWEEP_BATCH_SIZE: i64 = 100;

/// Cashback earnings stop being claimable this many days after creation
pub const CASHBACK_TTL_DAYS: i64 = 30;

/// Upper bound of the global cashback rate override, in percent
pub const MAX_RATE_OVERRIDE_PERCENT: rust_decimal::Decimal = rust_decimal::Decimal::ONE_HUNDRED;

/// Decimal places kept for every stored money amount
pub const MONEY_SCALE: u32 = 8;

/// Aggregator API version echoed on every response
pub const PROVIDER_API_VERSION: &str = "1.2";

/// Most bets accepted in one batch wager request
pub const MAX_WAGER_BATCH_SIZE: usize = 100;

/// Operator key used as `game_type` for operator-level house-edge defaults
pub const DEFAULT_PROVIDER_OPERATOR: &str = "groovetech";

/// Default currency for balances created without an explicit one
pub const DEFAULT_CURRENCY: &str = "USD";

/// Redis pub/sub channel carrying fan-out events between services
pub const FANOUT_CHANNEL: &str = "ledger:events";

/// Redis key prefix mapping a session token to its user id
pub const SESSION_KEY_PREFIX: &str = "session:";

/// Outbound frames buffered per WebSocket connection before frames are dropped
pub const WS_OUTBOUND_BUFFER: usize = 64;

/// Events buffered for the Redis fan-out forwarder before publishes are dropped
pub const FANOUT_PUBLISH_BUFFER: usize = 1024;
