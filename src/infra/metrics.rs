// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Appends one CSV row every `logging_steps` optimizer steps.
//
// Output file: {output_dir}/metrics.csv
//
//   step,epoch,loss,learning_rate
//   10,0.250000,2.314512,0.000200
//   20,0.500000,1.982004,0.000200
//   ...
//
// `loss` is the mean training loss over the steps since the
// previous row, `epoch` is fractional (step / steps_per_epoch).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

const HEADER: &str = "step,epoch,loss,learning_rate";

/// One logged point of the training curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    pub step:          usize,
    pub epoch:         f64,
    pub loss:          f64,
    pub learning_rate: f64,
}

impl StepMetrics {
    pub fn new(step: usize, epoch: f64, loss: f64, learning_rate: f64) -> Self {
        Self { step, epoch, loss, learning_rate }
    }
}

pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet, so
    /// repeated runs into the same directory append.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create metrics directory '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &StepMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot append to '{}'", self.csv_path.display()))?;

        writeln!(f, "{},{:.6},{:.6},{:.8}", m.step, m.epoch, m.loss, m.learning_rate)?;
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_append_under_single_header() {
        let dir = tempfile::tempdir().unwrap();

        let logger = MetricsLogger::new(dir.path()).unwrap();
        logger.log(&StepMetrics::new(10, 0.5, 2.25, 2e-4)).unwrap();

        // a second logger on the same directory keeps the header once
        let again = MetricsLogger::new(dir.path()).unwrap();
        again.log(&StepMetrics::new(20, 1.0, 1.75, 2e-4)).unwrap();

        let text  = fs::read_to_string(dir.path().join("metrics.csv")).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines, vec![
            HEADER,
            "10,0.500000,2.250000,0.00020000",
            "20,1.000000,1.750000,0.00020000",
        ]);
    }
}
