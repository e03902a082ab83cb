//! Tuning parameters for the exchange engine.
//!
//! These values are based on defaults from popular clients like qBittorrent,
//! Transmission, and libtorrent.

use std::time::Duration;

// ============================================================================
// Block and piece sizes
// ============================================================================

/// Standard block size (16KB)
pub const BLOCK_SIZE: u32 = 16384;

/// Maximum request length per BEP 3 (128KB). Requests larger than this are suspicious.
pub const MAX_REQUEST_LENGTH: u32 = 131072;

/// SHA-1 digest length of a piece hash
pub const PIECE_HASH_LEN: usize = 20;

// ============================================================================
// Request pipelining
// ============================================================================

/// Absolute ceiling on outstanding block requests per peer.
/// qBittorrent/libtorrent default: 500. Higher values improve throughput.
pub const MAX_REQUESTS_PER_PEER: usize = 500;

/// Initial pipeline depth for a fresh connection. The driver raises the
/// per-peer limit from here based on observed throughput.
pub const DEFAULT_REQUEST_LIMIT: usize = 16;

// ============================================================================
// Verification
// ============================================================================

/// Denominator of the corrupt-piece reset fraction: a failed hash check
/// returns ceil(blocks / 10) blocks to the needed pool instead of the
/// whole piece.
pub const CORRUPT_RESET_DENOMINATOR: usize = 10;

// ============================================================================
// Scheduling intervals
// ============================================================================

/// Interval between scheduling ticks
pub const TICK_INTERVAL: Duration = Duration::from_millis(500);
