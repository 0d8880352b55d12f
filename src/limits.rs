// Protocol and sizing constants for the signaling server.

/// Maximum size of a single UDP datagram carrying a SIP message
pub const MAX_DATAGRAM: usize = 1400;

/// Default SIP listen port
pub const DEFAULT_PORT: u16 = 5060;

/// Capacity of the inbound message queue
pub const QUEUE_CAPACITY: usize = 10;

/// Number of worker tasks draining the queue
pub const WORKER_COUNT: usize = 5;

/// Maximum number of concurrent calls the call map can hold
pub const MAX_CALLS: usize = 32;

/// Default Max-Forwards when the header is absent
pub const DEFAULT_MAX_FORWARDS: u32 = 70;

/// Registration lifetime advertised on REGISTER 200 OK (not enforced)
pub const REGISTER_EXPIRES: u32 = 7200;

/// User-Agent value stamped on every emitted message
pub const USER_AGENT: &str = "TinySIP";

/// Magic cookie prefix for Via branch parameters (RFC 3261)
pub const BRANCH_COOKIE: &str = "z9hG4bK";

/// Prefix overwriting the first bytes of the A-leg Call-ID to derive
/// the B-leg dialog identifier
pub const B_LEG_PREFIX: &str = "b-leg";
