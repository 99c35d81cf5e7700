//! # Wire Constants
//!
//! Bit assignments shared with the edge gateway (request hints) and the
//! processing core (response meta flags). These values are part of the wire
//! contract and must stay stable across both peers.

/// Edge hint: client exceeded the edge rate limit
pub const HINT_RATE_LIMITED: u32 = 0x1;
/// Edge hint: request matched a WAF rule
pub const HINT_WAF_BLOCKED: u32 = 0x2;
/// Edge hint: client is under an active challenge
pub const HINT_CHALLENGED: u32 = 0x4;

/// Response compressed with zstd
pub const META_COMP_ZSTD: u32 = 0x0000_0002;
/// Response compressed with brotli
pub const META_COMP_BROTLI: u32 = 0x0000_0004;

pub const META_CACHE_MISS: u32 = 0x0001_0000;
pub const META_CACHE_L1: u32 = 0x0002_0000;
pub const META_CACHE_L2: u32 = 0x0004_0000;
pub const META_CACHE_L3: u32 = 0x0008_0000;

/// Security checks passed
pub const META_SEC_OK: u32 = 0x0010_0000;
/// Response produced by a WAF block
pub const META_SEC_WAF: u32 = 0x0020_0000;
/// Response produced by a rate-limit block
pub const META_SEC_RATELIMIT: u32 = 0x0040_0000;

/// Width of a length prefix
pub const LEN_PREFIX_SIZE: usize = 4;

/// trace_id(8) + span_id(8) + edge_hints(4)
pub const REQUEST_TAIL_SIZE: usize = 8 + 8 + 4;

/// Smallest valid request: four empty length-prefixed fields plus the tail
pub const MIN_REQUEST_SIZE: usize = 4 * LEN_PREFIX_SIZE + REQUEST_TAIL_SIZE;

/// status(4) + two empty length-prefixed fields + meta_flags(4)
pub const MIN_RESPONSE_SIZE: usize = 4 + 2 * LEN_PREFIX_SIZE + 4;
