use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// SHA-256 hash as lowercase hex string.
pub type BlockHash = String;

/// One ledger entry, stored under its height.
///
/// Field declaration order is the canonical serialization order
/// (`hash, height, body, time, previousBlockHash`) and must not change:
/// every stored hash was computed over bytes in this order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Block {
    pub hash: BlockHash,
    pub height: u64,
    pub body: Value,
    /// Seconds since the Unix epoch.
    pub time: i64,
    #[serde(rename = "previousBlockHash")]
    pub previous_block_hash: BlockHash,
}

impl Block {
    /// Create an unfinalized block carrying `body`. Every other field holds
    /// its "unset" value until the chain fills it in.
    pub fn new(body: impl Into<Value>) -> Self {
        Self {
            hash: String::new(),
            height: 0,
            body: body.into(),
            time: 0,
            previous_block_hash: String::new(),
        }
    }

    /// Canonical bytes of this block with `hash` cleared.
    pub fn canonical_bytes(&self) -> serde_json::Result<Vec<u8>> {
        let unhashed = Block {
            hash: String::new(),
            ..self.clone()
        };
        unhashed.to_bytes()
    }

    /// Canonical bytes of this block exactly as stored.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Parse a stored value back into a block.
    pub fn from_bytes(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }

    /// Recompute the digest this block should carry.
    pub fn compute_hash(&self) -> serde_json::Result<BlockHash> {
        Ok(compute_hash(&self.canonical_bytes()?))
    }

    /// Verify the block's self-hash.
    pub fn verify(&self) -> serde_json::Result<bool> {
        Ok(self.compute_hash()? == self.hash)
    }
}

/// Compute the SHA-256 hex digest of some data.
pub fn compute_hash(data: &[u8]) -> BlockHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
