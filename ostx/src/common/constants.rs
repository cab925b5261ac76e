use std::time::Duration;

// event constants
pub const TRANSACTION_EVENT: &str = "ostx_transaction_event";

// config defaults
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_RETRIES: u32 = 8;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(1);
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_millis(64);

// encoding constants
pub const ENCODING_BLOCK_SIZE: usize = 4;
pub const ENCODING_PAD: u8 = b'=';
pub const ENCODING_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

// journal constants
pub const JOURNAL_FIELD_SEPARATOR: char = ' ';
pub const JOURNAL_EMPTY_PAYLOAD: &str = "-";

// Compile-time assertion for alphabet size
const _: () = {
    const _: [(); 1] = [(); (ENCODING_ALPHABET.len() == 64) as usize];
};
