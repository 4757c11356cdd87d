/// Pending outbound payloads a delivery session holds before dropping new ones
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Maximum number of messages returned by one history query
pub const DEFAULT_HISTORY_LIMIT: u32 = 100;

/// SSE keep-alive interval in seconds
pub const DEFAULT_KEEPALIVE_SECS: u64 = 15;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Maximum accepted request body in bytes (64 KiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;
