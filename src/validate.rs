use crate::block::{Block, BlockHash};
use crate::chain::Blockchain;
use crate::error::Result;
use crate::store::KvStore;
use rayon::prelude::*;
use std::fmt;
use tracing::{info, warn};

/// Outcome of recomputing one block's hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCheck {
    pub height: u64,
    pub stored_hash: BlockHash,
    pub computed_hash: BlockHash,
}

impl BlockCheck {
    pub fn is_valid(&self) -> bool {
        self.stored_hash == self.computed_hash
    }
}

/// Result of a chain-wide validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainReport {
    /// Number of heights examined.
    pub blocks_checked: u64,
    /// Heights that failed validation, ascending. Includes entries that could
    /// not be read back as a block at all.
    pub invalid_heights: Vec<u64>,
    /// Hash mismatch details for the invalid heights that were readable.
    pub mismatches: Vec<BlockCheck>,
    /// Heights whose block does not link to its predecessor: a
    /// `previousBlockHash` differing from the previous block's hash, a
    /// non-empty one at genesis, or a `height` field differing from its key.
    pub broken_links: Vec<u64>,
}

impl ChainReport {
    pub fn is_valid(&self) -> bool {
        self.invalid_heights.is_empty() && self.broken_links.is_empty()
    }
}

impl fmt::Display for ChainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            return writeln!(f, "Blockchain valid ({} blocks)", self.blocks_checked);
        }
        if !self.invalid_heights.is_empty() {
            writeln!(f, "Number of block errors = {}", self.invalid_heights.len())?;
            writeln!(f, "Blocks with errors: {}", join(&self.invalid_heights))?;
            for m in &self.mismatches {
                writeln!(
                    f,
                    "  #{} invalid hash: {} <> {}",
                    m.height, m.stored_hash, m.computed_hash
                )?;
            }
        }
        if !self.broken_links.is_empty() {
            writeln!(f, "Broken links at: {}", join(&self.broken_links))?;
        }
        Ok(())
    }
}

fn join(heights: &[u64]) -> String {
    heights
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Per-height result gathered by `validate_chain`.
enum Inspection {
    Checked(Block, BlockCheck),
    Unreadable,
}

impl<S: KvStore> Blockchain<S> {
    /// Recompute the hash of the block at `height` and pair it with the
    /// stored one.
    pub fn check_block(&self, height: u64) -> Result<BlockCheck> {
        let block = self.get_block(height)?;
        Self::check(height, &block)
    }

    /// `true` if the block at `height` still hashes to its recorded hash.
    /// A mismatch is logged with both hashes, not returned as an error.
    pub fn validate_block(&self, height: u64) -> Result<bool> {
        let check = self.check_block(height)?;
        if !check.is_valid() {
            warn!(
                height,
                stored = %check.stored_hash,
                computed = %check.computed_hash,
                "invalid block hash"
            );
        }
        Ok(check.is_valid())
    }

    /// Validate every stored height and report all failures.
    ///
    /// Individual invalid or unreadable blocks end up in the report; only a
    /// failure of the store itself aborts the scan.
    pub fn validate_chain(&self) -> Result<ChainReport> {
        self.ensure_ready()?;
        let count = self.store().count()?;

        // Collecting joins every per-height check before the report is built.
        let inspections = (0..count)
            .into_par_iter()
            .map(|h| self.inspect(h))
            .collect::<Result<Vec<_>>>()?;

        let mut report = ChainReport {
            blocks_checked: count,
            ..ChainReport::default()
        };
        let mut prev_hash: Option<&str> = None;
        for (height, inspection) in (0u64..).zip(&inspections) {
            match inspection {
                Inspection::Checked(block, check) => {
                    if !check.is_valid() {
                        warn!(
                            height,
                            stored = %check.stored_hash,
                            computed = %check.computed_hash,
                            "invalid block hash"
                        );
                        report.invalid_heights.push(height);
                        report.mismatches.push(check.clone());
                    }
                    let expected_prev = if height == 0 { Some("") } else { prev_hash };
                    let linked = expected_prev
                        .map_or(true, |p| p == block.previous_block_hash);
                    if !linked || block.height != height {
                        warn!(height, "block does not link to its predecessor");
                        report.broken_links.push(height);
                    }
                    prev_hash = Some(&block.hash);
                }
                Inspection::Unreadable => {
                    report.invalid_heights.push(height);
                    prev_hash = None;
                }
            }
        }

        if report.is_valid() {
            info!(blocks = count, "blockchain valid");
        } else {
            warn!(
                blocks = count,
                invalid = report.invalid_heights.len(),
                broken_links = report.broken_links.len(),
                "blockchain has errors"
            );
        }
        Ok(report)
    }

    fn inspect(&self, height: u64) -> Result<Inspection> {
        match self.read_block(height) {
            Ok(block) => {
                let check = Self::check(height, &block)?;
                Ok(Inspection::Checked(block, check))
            }
            Err(e) if e.is_persistence() => Err(e),
            Err(e) => {
                warn!(height, error = %e, "unreadable block");
                Ok(Inspection::Unreadable)
            }
        }
    }

    fn check(height: u64, block: &Block) -> Result<BlockCheck> {
        Ok(BlockCheck {
            height,
            stored_hash: block.hash.clone(),
            computed_hash: block.compute_hash()?,
        })
    }
}
