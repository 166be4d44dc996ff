// ============================================================
// Layer 4 — JSON-lines Loader
// ============================================================
// Reads the training file one line at a time:
//
//   {"instruction": "...", "response": "..."}
//   {"instruction": "...", "response": "..."}
//
// Blank lines are skipped. Every other line must be a JSON
// object with both string fields, otherwise loading stops with a
// Format error naming the file and the 1-based line number.
// There is no "skip the bad line and keep going": a silently
// shorter dataset is worse than a failed run.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::PathBuf,
};

use crate::domain::error::{FinetuneError, Result};
use crate::domain::record::InstructionRecord;
use crate::domain::traits::RecordSource;

pub struct JsonlLoader {
    path: PathBuf,
}

impl JsonlLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RecordSource for JsonlLoader {
    fn load_all(&self) -> Result<Vec<InstructionRecord>> {
        let file   = File::open(&self.path).map_err(|e| FinetuneError::io(&self.path, e))?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| FinetuneError::io(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }

            let record: InstructionRecord = serde_json::from_str(&line).map_err(|e| {
                FinetuneError::format(format!("{}:{}", self.path.display(), idx + 1), e.to_string())
            })?;
            records.push(record);
        }

        tracing::info!("Loaded {} records from '{}'", records.len(), self.path.display());
        Ok(records)
    }
}
