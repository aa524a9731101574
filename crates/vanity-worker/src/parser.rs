//! Incremental result parser for compute process output.
//!
//! The miner prints exactly one line of the form
//! `SALT: 0x<64 hex> ADDRESS: 0x<40 hex>` when it succeeds. Output arrives
//! in arbitrary chunks, so the parser keeps a bounded window of unconsumed
//! bytes and rescans it on every chunk.

use regex::bytes::Regex;
use std::sync::LazyLock;
use vanity_core::MiningResult;

/// Matches as soon as the 40th address digit has arrived.
static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)SALT: (0x[0-9a-fA-F]{64}) ADDRESS: (0x[0-9a-fA-F]{40})").expect("valid regex")
});

/// Bytes kept between chunks; longer than any marker.
const WINDOW: usize = 256;

/// Scans a byte stream for the first result marker.
#[derive(Debug, Default)]
pub struct ResultParser {
    window: Vec<u8>,
    found: Option<MiningResult>,
}

impl ResultParser {
    /// Creates an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one output chunk.
    ///
    /// Returns the result the first time a complete marker is seen; later
    /// calls return `None`.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<MiningResult> {
        if self.found.is_some() {
            return None;
        }
        self.window.extend_from_slice(chunk);
        self.scan()
    }

    /// Signals end of stream and rescans what is left.
    pub fn finish(&mut self) -> Option<MiningResult> {
        if self.found.is_some() {
            return None;
        }
        self.scan()
    }

    /// The first result, if any.
    pub fn result(&self) -> Option<&MiningResult> {
        self.found.as_ref()
    }

    fn scan(&mut self) -> Option<MiningResult> {
        let Some(caps) = MARKER_RE.captures(&self.window) else {
            let start = self.window.len().saturating_sub(WINDOW);
            if start > 0 {
                self.window.drain(..start);
            }
            return None;
        };

        let result = MiningResult {
            salt: String::from_utf8_lossy(&caps[1]).into_owned(),
            vanity_address: String::from_utf8_lossy(&caps[2]).into_owned(),
        };
        self.found = Some(result.clone());
        self.window = Vec::new();
        Some(result)
    }
}
