// ============================================================
// Layer 3 — Core Traits
// ============================================================
// The seams between the pipeline and where its inputs live.
// The application layer only sees these traits, so a test can
// hand it a local directory instead of the hub, or an in-memory
// record list instead of a file.

use std::path::PathBuf;

use crate::domain::error::Result;
use crate::domain::record::InstructionRecord;

// ─── RecordSource ─────────────────────────────────────────────────────────────
/// Anything that yields the full list of training records.
///
/// Implementations:
///   - JsonlLoader → one record per line of a .jsonl file
pub trait RecordSource {
    fn load_all(&self) -> Result<Vec<InstructionRecord>>;
}

// ─── ModelFiles ───────────────────────────────────────────────────────────────
/// Local paths of everything needed to build a base model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub config:    PathBuf,
    pub tokenizer: PathBuf,
    /// One file, or every shard named in model.safetensors.index.json
    pub weights:   Vec<PathBuf>,
}

// ─── ModelSource ──────────────────────────────────────────────────────────────
/// Anything that can materialise a model's files on local disk.
///
/// Implementations:
///   - HubSource   → downloads (and caches) from the Hugging Face hub
///   - LocalSource → a directory that already holds the files
pub trait ModelSource {
    fn fetch(&self, model: &str) -> Result<ModelFiles>;
}
