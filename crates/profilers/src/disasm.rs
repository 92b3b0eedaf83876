use std::path::Path;

use crate::runner::{stdout_of, ToolRunner};
use crate::ProfilerError;

/// Looks up single instructions inside a binary.
pub trait Disassembler {
    /// Mnemonic of the instruction starting at `offset` in `binary`, or
    /// `None` when the disassembly has no such instruction.
    fn mnemonic_at(&self, binary: &Path, offset: u64) -> Result<Option<String>, ProfilerError>;
}

/// [`Disassembler`] driving `objdump -d --prefix-addresses`
pub struct Objdump<R: ToolRunner> {
    runner: R,
}

impl<R: ToolRunner> Objdump<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: ToolRunner> Disassembler for Objdump<R> {
    fn mnemonic_at(&self, binary: &Path, offset: u64) -> Result<Option<String>, ProfilerError> {
        let args = vec![
            "-d".to_string(),
            "--prefix-addresses".to_string(),
            format!("--start-address={:#x}", offset),
            format!("--stop-address={:#x}", offset + 1),
            binary.display().to_string(),
        ];
        let stdout = stdout_of("objdump", self.runner.run("objdump", &args)?);

        Ok(stdout
            .lines()
            .filter_map(parse_disassembly_line)
            .find(|(address, _)| *address == offset)
            .map(|(_, mnemonic)| mnemonic.to_string()))
    }
}

/// Splits a `--prefix-addresses` line, `<hex address> <symbol+off> <mnemonic> ...`,
/// into its address and mnemonic.
pub fn parse_disassembly_line(line: &str) -> Option<(u64, &str)> {
    let line = line.trim_start();
    let (address, rest) = line.split_once(char::is_whitespace)?;
    let address = u64::from_str_radix(address, 16).ok()?;

    let rest = rest.trim_start();
    let rest = if rest.starts_with('<') {
        &rest[symbol_end(rest)?..]
    } else {
        rest
    };

    rest.split_whitespace()
        .next()
        .map(|mnemonic| (address, mnemonic))
}

/// Byte index just past the `<...>` symbol field. Demangled names may hold
/// `<`, `>` or `->`, so the field ends at the first `>` followed by
/// whitespace.
fn symbol_end(field: &str) -> Option<usize> {
    field
        .char_indices()
        .find(|&(index, c)| {
            c == '>'
                && field[index + 1..]
                    .chars()
                    .next()
                    .map_or(true, char::is_whitespace)
        })
        .map(|(index, _)| index + 1)
}
