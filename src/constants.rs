//! Protocol constants and configuration values

/// Default Asterisk Manager Interface port
pub const DEFAULT_AMI_PORT: u16 = 5038;

/// Socket buffer size for reading from TCP stream (64KB) - standard TCP receive window
pub const SOCKET_BUF_SIZE: usize = 65536;

/// Buffer allocation size (64KB) - used for both initial allocation and growth increments
pub const BUF_CHUNK: usize = 64 * 1024;

/// Maximum single frame size (1MB). AMI blocks are small; only `Response: Follows`
/// command output gets anywhere near this.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum total buffer size (8MB) - safety limit to prevent runaway memory
pub const MAX_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Protocol frame terminators
pub const FRAME_TERMINATOR: &str = "\r\n\r\n";
/// Tolerated terminator for servers (and tests) that send bare newlines.
pub const FRAME_TERMINATOR_LF: &str = "\n\n";
pub const LINE_TERMINATOR: &str = "\r\n";

/// Prefix of the greeting line sent by Asterisk right after TCP accept.
pub const BANNER_PREFIX: &str = "Asterisk Call Manager";

/// `Response:` header values
pub const RESPONSE_SUCCESS: &str = "Success";
pub const RESPONSE_ERROR: &str = "Error";

/// `EventList:` header values for multi-frame replies
pub const EVENT_LIST_START: &str = "start";
pub const EVENT_LIST_COMPLETE: &str = "Complete";

/// Event announcing that the PBX finished booting; triggers State Store initialization.
pub const EVENT_FULLY_BOOTED: &str = "FullyBooted";

/// ActionID prefix used for login, handled inside the transport.
pub const LOGIN_ACTION_PREFIX: &str = "login";
/// ActionID prefix used for keep-alive pings, handled inside the transport.
pub const KEEPALIVE_ACTION_PREFIX: &str = "keepalive";

/// Connection timeout in milliseconds (TCP connect + banner + login)
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Delay before a reconnect attempt in milliseconds
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;

/// Default command reply timeout in milliseconds
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 10_000;

/// Idle time after which a keep-alive `Ping` is written
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 30_000;

/// Silence after which the link is declared dead (three missed keep-alives)
pub const DEFAULT_LIVENESS_TIMEOUT_MS: u64 = 90_000;

/// Read poll interval of the supervisor loop, so idle sessions still run the
/// keep-alive and liveness checks.
pub const READ_POLL_MS: u64 = 2000;

/// How often queue details are re-read while the link is ready
pub const DEFAULT_QUEUE_REFRESH_MS: u64 = 60_000;

/// How often the dispatcher checks pending commands for expiry
pub const TIMEOUT_SWEEP_MS: u64 = 100;

/// Capacity of the ordered transport -> dispatcher channel
pub const MAX_FRAME_QUEUE_SIZE: usize = 1000;

/// Capacity of the derived event broadcast channel
pub const EVENT_STREAM_CAPACITY: usize = 1024;

/// Default queue recall window in seconds
pub const DEFAULT_RECALL_WINDOW_SECS: u64 = 3600;

/// Default dialplan context for redirects and originates
pub const DEFAULT_CONTEXT: &str = "from-internal";

/// Dialplan prefix reaching a mailbox (`vmu201`), also stored in `CF` for forward-to-voicemail
pub const VOICEMAIL_EXTEN_PREFIX: &str = "vmu";
