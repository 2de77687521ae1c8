//! Transaction queue scanner
//!
//! A base name is pending when `<base>.rawtx` exists and `<base>.sigtx` does
//! not. The pending set is returned sorted so that a batch is always processed
//! in the same order.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::types::BaseName;
use crate::{RAW_TX_EXT, SIGNED_TX_EXT};

/// Base names in `tx_dir` that have an unsigned file but no signed file
pub fn scan(tx_dir: &Path) -> Result<Vec<BaseName>> {
    let entries = std::fs::read_dir(tx_dir)
        .map_err(|e| Error::TxDir(format!("cannot list {}: {}", tx_dir.display(), e)))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }

    let pending = pending_from_names(names.iter().map(String::as_str));
    debug!(
        "Scanned {:?}: {} entries, {} unsigned",
        tx_dir,
        names.len(),
        pending.len()
    );
    Ok(pending)
}

/// Set difference of unsigned and signed stems over a list of file names
pub fn pending_from_names<'a, I>(names: I) -> Vec<BaseName>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut raw = BTreeSet::new();
    let mut signed = BTreeSet::new();

    for name in names {
        if let Some(stem) = strip_ext(name, RAW_TX_EXT) {
            raw.insert(stem);
        } else if let Some(stem) = strip_ext(name, SIGNED_TX_EXT) {
            signed.insert(stem);
        }
    }

    raw.difference(&signed).map(|s| BaseName::new(*s)).collect()
}

fn strip_ext<'a>(name: &'a str, ext: &str) -> Option<&'a str> {
    name.strip_suffix(ext)?
        .strip_suffix('.')
        .filter(|stem| !stem.is_empty())
}
