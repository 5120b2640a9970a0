// src/batch.rs

use crate::error::{Result, VqsweepError};
use crate::metrics::{QualityEvaluator, SequenceMeans};
use crate::yuv::YuvSequence;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Decoded candidate files are discovered by this suffix.
pub const DECODED_SUFFIX: &str = "_decoded.yuv";

/// Exact header line of the result table.
pub const RESULT_HEADER: &str = "File,Average PSNR,Average SSIM,Average LPIPS";

// --- Data Structures ---

/// One scored candidate file.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceScore {
    pub file: String,
    pub means: SequenceMeans,
}

/// What became of one candidate during a batch run.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateOutcome {
    Scored(SequenceScore),
    Skipped { file: String, reason: String },
}

/// The scored rows of a batch run, written as CSV in discovery order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ResultTable {
    rows: Vec<SequenceScore>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, score: SequenceScore) {
        self.rows.push(score);
    }

    pub fn rows(&self) -> &[SequenceScore] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Writes the table to `path`, replacing any previous file in one
    /// rename so readers never observe a half-written table.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut body = String::from(RESULT_HEADER);
        body.push('\n');
        for row in &self.rows {
            body.push_str(&format!(
                "{},{:.4},{:.4},{:.4}\n",
                row.file, row.means.psnr, row.means.ssim, row.means.lpips
            ));
        }

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, body)?;
        fs::rename(&tmp, path)?;
        info!("Wrote {} result rows to {}", self.rows.len(), path.display());
        Ok(())
    }

    /// Reads a table previously written by [`write_csv`], rejecting
    /// files whose header or row shape does not match.
    pub fn read_csv(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut lines = content.lines();

        let header = lines.next().ok_or_else(|| {
            VqsweepError::Parse(format!("Result table {} is empty", path.display()))
        })?;
        if header.trim_end() != RESULT_HEADER {
            return Err(VqsweepError::Parse(format!(
                "Result table {} has unexpected header: {header}",
                path.display()
            )));
        }

        let mut table = Self::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() != 4 {
                return Err(VqsweepError::Parse(format!(
                    "Result table row has {} fields, expected 4: {line}",
                    fields.len()
                )));
            }
            let parse = |field: &str, name: &str| -> Result<f64> {
                field.trim().parse::<f64>().map_err(|_| {
                    VqsweepError::Parse(format!("Invalid {name} value in result table: {field}"))
                })
            };
            table.push(SequenceScore {
                file: fields[0].to_string(),
                means: SequenceMeans {
                    psnr: parse(fields[1], "PSNR")?,
                    ssim: parse(fields[2], "SSIM")?,
                    lpips: parse(fields[3], "LPIPS")?,
                },
            });
        }
        Ok(table)
    }
}

// --- Core Functions ---

/// Scores every `*_decoded.yuv` in `search_dir` against the reference
/// and writes the result table. Candidates that cannot be parsed or do
/// not match the reference layout are skipped with a warning; any other
/// failure aborts the run.
pub fn run_batch(
    evaluator: &QualityEvaluator,
    reference_path: &Path,
    width: usize,
    height: usize,
    search_dir: &Path,
    csv_path: &Path,
) -> Result<ResultTable> {
    let reference = YuvSequence::read(reference_path, width, height)?;
    if reference.frame_count() == 0 {
        return Err(VqsweepError::Input(format!(
            "Reference {} holds no complete frames",
            reference_path.display()
        )));
    }
    info!("Reference: {}", reference.describe());

    let candidates = find_candidates(search_dir, reference_path)?;
    if candidates.is_empty() {
        warn!(
            "No *{DECODED_SUFFIX} candidates found in {}",
            search_dir.display()
        );
    }

    let mut table = ResultTable::new();
    let mut skipped = 0usize;
    for candidate in &candidates {
        match score_candidate(evaluator, &reference, candidate, width, height)? {
            CandidateOutcome::Scored(score) => table.push(score),
            CandidateOutcome::Skipped { file, reason } => {
                warn!("Skipping {file}: {reason}");
                skipped += 1;
            }
        }
    }

    table.write_csv(csv_path)?;
    info!(
        "Scored {} of {} candidates ({} skipped)",
        table.len(),
        candidates.len(),
        skipped
    );
    Ok(table)
}

fn score_candidate(
    evaluator: &QualityEvaluator,
    reference: &YuvSequence,
    path: &Path,
    width: usize,
    height: usize,
) -> Result<CandidateOutcome> {
    let file = file_name_string(path);
    let scored = YuvSequence::read(path, width, height)
        .and_then(|candidate| evaluator.compare_sequences(reference, &candidate));
    match scored {
        Ok(means) => {
            info!(
                "{file}: PSNR {:.4} dB, SSIM {:.4}, LPIPS {:.4}",
                means.psnr, means.ssim, means.lpips
            );
            Ok(CandidateOutcome::Scored(SequenceScore { file, means }))
        }
        Err(err @ (VqsweepError::Format { .. } | VqsweepError::SequenceMismatch { .. })) => {
            Ok(CandidateOutcome::Skipped {
                file,
                reason: err.to_string(),
            })
        }
        Err(other) => Err(other),
    }
}

/// Candidate files in `dir` with the decoded suffix, sorted by name so
/// the result table is stable across runs.
fn find_candidates(dir: &Path, reference: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if path != reference && name.ends_with(DECODED_SUFFIX) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

fn file_name_string(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
