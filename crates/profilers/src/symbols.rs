use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::disasm::Disassembler;

/// Classification given to instructions that cannot be disassembled
pub const UNKNOWN_MNEMONIC: &str = "unknown";

/// Memoizes instruction classification per `(binary, address)`.
///
/// Each key reaches the disassembler at most once per run; failed lookups
/// are cached as [`UNKNOWN_MNEMONIC`] too. The cache only grows.
pub struct SymbolResolutionCache {
    disassembler: Box<dyn Disassembler>,
    entries: HashMap<(PathBuf, u64), String>,
    hits: u64,
    misses: u64,
}

impl SymbolResolutionCache {
    pub fn new(disassembler: Box<dyn Disassembler>) -> Self {
        Self {
            disassembler,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Mnemonic of the instruction at `address` in `binary`.
    ///
    /// The disassembler is queried at `address - load_base` to undo the
    /// relocation of shared objects.
    pub fn resolve(&mut self, binary: &Path, address: u64, load_base: u64) -> String {
        let key = (binary.to_path_buf(), address);
        if let Some(mnemonic) = self.entries.get(&key) {
            self.hits += 1;
            return mnemonic.clone();
        }
        self.misses += 1;

        let mnemonic = match address.checked_sub(load_base) {
            Some(offset) => match self.disassembler.mnemonic_at(binary, offset) {
                Ok(Some(mnemonic)) => mnemonic,
                Ok(None) => UNKNOWN_MNEMONIC.to_string(),
                Err(e) => {
                    warn!(
                        "cannot disassemble {} at {:#x}: {}",
                        binary.display(),
                        offset,
                        e
                    );
                    UNKNOWN_MNEMONIC.to_string()
                }
            },
            None => {
                debug!(
                    "address {:#x} lies below load base {:#x} of {}",
                    address,
                    load_base,
                    binary.display()
                );
                UNKNOWN_MNEMONIC.to_string()
            }
        };

        self.entries.insert(key, mnemonic.clone());
        mnemonic
    }

    /// Number of distinct resolved keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache hits and misses so far
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
