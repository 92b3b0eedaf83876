//! Load addresses of binaries mapped into a profiled process, read from
//! `perf script --show-mmap-events`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

const MMAP_EVENT: &str = "PERF_RECORD_MMAP";

/// Binary path -> base address used to turn sampled instruction pointers
/// into file addresses.
#[derive(Debug, Default, Clone)]
pub struct BinaryMapping {
    bases: HashMap<PathBuf, u64>,
}

impl BinaryMapping {
    /// Collects the first mapping of every binary found in `text`.
    ///
    /// Lines look like
    /// `... PERF_RECORD_MMAP2 123/123: [0x7f2a3b428000(0x195000) @ 0x28000 ...]: r-xp /usr/lib/libc.so.6`.
    /// The base is the mapping start minus its file offset.
    pub fn parse(text: &str) -> Self {
        let mut bases = HashMap::new();
        for line in text.lines().filter(|line| line.contains(MMAP_EVENT)) {
            if let Some((binary, base)) = parse_mmap_line(line) {
                bases.entry(PathBuf::from(binary)).or_insert(base);
            }
        }
        Self { bases }
    }

    /// Base to subtract from addresses sampled in `binary`.
    ///
    /// Only shared objects and kernel modules are relocated; executables
    /// resolve at their link-time addresses.
    pub fn load_base(&self, binary: &Path) -> u64 {
        if !is_relocatable(binary) {
            return 0;
        }
        self.bases.get(binary).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }
}

fn is_relocatable(binary: &Path) -> bool {
    binary
        .file_name()
        .map(|name| {
            let name = name.to_string_lossy();
            name.contains(".so") || name.ends_with(".ko")
        })
        .unwrap_or(false)
}

fn parse_mmap_line(line: &str) -> Option<(&str, u64)> {
    let event = &line[line.find(MMAP_EVENT)?..];
    let binary = event.split_whitespace().last()?;

    let region = &event[event.find('[')? + 1..];
    let (start, rest) = region.split_once('(')?;
    let start = parse_hex(start)?;

    // "(0x195000) @ 0x28000 ..." carries the file offset of the mapping
    let offset = rest
        .split_once('@')
        .and_then(|(_, after)| after.split_whitespace().next())
        .and_then(|token| parse_hex(token.trim_end_matches(|c: char| c == ']' || c == ':')))
        .unwrap_or(0);

    Some((binary, start.saturating_sub(offset)))
}

fn parse_hex(token: &str) -> Option<u64> {
    let token = token.trim();
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u64::from_str_radix(digits, 16).ok()
}
