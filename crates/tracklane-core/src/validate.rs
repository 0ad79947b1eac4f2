//! Preview–export equivalence checks.
//!
//! The validator holds at most one armed preview and one captured export.
//! When both are present and recent, it compares their peak and RMS levels
//! and logs the verdict. It never influences the export itself.

use std::{fs, path::Path, sync::Arc};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use crate::{buffer::DecodedBuffer, decode::decode_audio_bytes, export::ExportArtifact};

pub const DEFAULT_RECENCY_WINDOW_SECONDS: i64 = 60;
pub const DEFAULT_PEAK_TOLERANCE_DB: f64 = 0.1;
pub const DEFAULT_RMS_TOLERANCE_DB: f64 = 0.2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationPolicy {
    pub recency_window_seconds: i64,
    pub peak_tolerance_db: f64,
    pub rms_tolerance_db: f64,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            recency_window_seconds: DEFAULT_RECENCY_WINDOW_SECONDS,
            peak_tolerance_db: DEFAULT_PEAK_TOLERANCE_DB,
            rms_tolerance_db: DEFAULT_RMS_TOLERANCE_DB,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalMetrics {
    pub sample_rate: u32,
    pub frames: usize,
    pub duration_seconds: f64,
    pub channels: u16,
    pub peak: f64,
    pub peak_db: f64,
    pub rms: f64,
    pub rms_db: f64,
}

impl SignalMetrics {
    /// Peak is the largest absolute sample on any channel; RMS is the root of
    /// the mean of per-channel mean squares.
    #[must_use]
    pub fn measure(buffer: &DecodedBuffer) -> Self {
        let mut peak = 0.0_f64;
        let mut mean_square_sum = 0.0_f64;

        for channel in buffer.channels() {
            let mut sum_squares = 0.0_f64;
            for sample in channel {
                let value = f64::from(*sample);
                peak = peak.max(value.abs());
                sum_squares += value * value;
            }
            mean_square_sum += sum_squares / channel.len().max(1) as f64;
        }

        let channels = buffer.channel_count();
        let rms = (mean_square_sum / f64::from(channels.max(1))).sqrt();
        Self {
            sample_rate: buffer.sample_rate(),
            frames: buffer.frames(),
            duration_seconds: buffer.duration_seconds(),
            channels,
            peak,
            peak_db: amplitude_to_dbfs(peak),
            rms,
            rms_db: amplitude_to_dbfs(rms),
        }
    }
}

/// `20·log10(amplitude)`, with silence at negative infinity.
#[must_use]
pub fn amplitude_to_dbfs(amplitude: f64) -> f64 {
    if !(amplitude > 0.0) {
        return f64::NEG_INFINITY;
    }
    20.0 * amplitude.log10()
}

/// Absolute difference of two dBFS readings. Two silent readings are equal;
/// one silent reading is infinitely far from anything else.
#[must_use]
pub fn metric_diff_db(left: f64, right: f64) -> f64 {
    if left.is_finite() && right.is_finite() {
        return (left - right).abs();
    }
    if left == f64::NEG_INFINITY && right == f64::NEG_INFINITY {
        return 0.0;
    }
    f64::INFINITY
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub source_id: String,
    pub pass: bool,
    pub peak_diff_db: f64,
    pub rms_diff_db: f64,
    pub preview: SignalMetrics,
    pub export: SignalMetrics,
    pub export_sha256: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Compared(ValidationReport),
    /// The export could not be decoded, so equivalence cannot be shown.
    Inconclusive { source_id: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct ArmedPreview {
    pub source_id: String,
    pub buffer: Arc<DecodedBuffer>,
    pub armed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CapturedExport {
    pub bytes: Arc<[u8]>,
    pub captured_at: DateTime<Utc>,
}

/// Compares two buffers directly, outside the single-slot workflow.
#[must_use]
pub fn compare_buffers(
    source_id: &str,
    preview: &DecodedBuffer,
    export: &DecodedBuffer,
    export_bytes: &[u8],
    policy: &ValidationPolicy,
) -> ValidationReport {
    let preview = SignalMetrics::measure(preview);
    let export = SignalMetrics::measure(export);
    let peak_diff_db = metric_diff_db(preview.peak_db, export.peak_db);
    let rms_diff_db = metric_diff_db(preview.rms_db, export.rms_db);

    ValidationReport {
        source_id: source_id.to_string(),
        pass: peak_diff_db <= policy.peak_tolerance_db && rms_diff_db <= policy.rms_tolerance_db,
        peak_diff_db,
        rms_diff_db,
        preview,
        export,
        export_sha256: hash_hex(export_bytes),
    }
}

#[derive(Debug, Clone, Default)]
pub struct EquivalenceValidator {
    policy: ValidationPolicy,
    preview: Option<ArmedPreview>,
    export: Option<CapturedExport>,
}

impl EquivalenceValidator {
    #[must_use]
    pub fn new(policy: ValidationPolicy) -> Self {
        Self {
            policy,
            preview: None,
            export: None,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    #[must_use]
    pub fn armed_preview(&self) -> Option<&ArmedPreview> {
        self.preview.as_ref()
    }

    #[must_use]
    pub fn captured_export(&self) -> Option<&CapturedExport> {
        self.export.as_ref()
    }

    /// Records the buffer a user just paused or stopped, replacing any older
    /// one, then validates if an export is waiting.
    pub fn arm_preview(
        &mut self,
        source_id: impl Into<String>,
        buffer: Arc<DecodedBuffer>,
        now: DateTime<Utc>,
    ) -> Option<ValidationOutcome> {
        self.preview = Some(ArmedPreview {
            source_id: source_id.into(),
            buffer,
            armed_at: now,
        });
        self.try_validate(now)
    }

    /// Records a freshly produced export. Only WAV artifacts are considered.
    pub fn capture_export(
        &mut self,
        artifact: &ExportArtifact,
        now: DateTime<Utc>,
    ) -> Option<ValidationOutcome> {
        if !artifact.is_wav() {
            return None;
        }
        self.export = Some(CapturedExport {
            bytes: Arc::clone(&artifact.bytes),
            captured_at: now,
        });
        self.try_validate(now)
    }

    pub fn clear(&mut self) {
        self.preview = None;
        self.export = None;
    }

    /// Validates when both slots are filled and both are inside the recency
    /// window. Both slots are emptied after any attempt.
    #[instrument(skip(self))]
    pub fn try_validate(&mut self, now: DateTime<Utc>) -> Option<ValidationOutcome> {
        let window = Duration::seconds(self.policy.recency_window_seconds);
        let preview = self.preview.as_ref()?;
        let export = self.export.as_ref()?;
        if now - preview.armed_at > window || now - export.captured_at > window {
            return None;
        }

        let source_id = preview.source_id.clone();
        let outcome = match decode_audio_bytes(&export.bytes, Some("wav")) {
            Ok(decoded) => {
                let report = compare_buffers(
                    &source_id,
                    &preview.buffer,
                    &decoded,
                    &export.bytes,
                    &self.policy,
                );
                log_report(&report);
                ValidationOutcome::Compared(report)
            }
            Err(error) => {
                warn!(
                    source_id = %source_id,
                    %error,
                    "export could not be decoded, equivalence not proven"
                );
                ValidationOutcome::Inconclusive {
                    source_id,
                    reason: error.to_string(),
                }
            }
        };

        self.clear();
        Some(outcome)
    }
}

fn log_report(report: &ValidationReport) {
    if report.pass {
        info!(
            source_id = %report.source_id,
            peak_diff_db = report.peak_diff_db,
            rms_diff_db = report.rms_diff_db,
            preview_peak_db = report.preview.peak_db,
            export_peak_db = report.export.peak_db,
            preview_rms_db = report.preview.rms_db,
            export_rms_db = report.export.rms_db,
            "preview/export equivalence PASS"
        );
    } else {
        warn!(
            source_id = %report.source_id,
            peak_diff_db = report.peak_diff_db,
            rms_diff_db = report.rms_diff_db,
            preview_peak_db = report.preview.peak_db,
            export_peak_db = report.export.peak_db,
            preview_rms_db = report.preview.rms_db,
            export_rms_db = report.export.rms_db,
            "preview/export equivalence FAIL, export left as written"
        );
    }
}

pub fn write_validation_report(path: &Path, report: &ValidationReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!("failed to create report directory: {}", parent.display())
        })?;
    }

    let json =
        serde_json::to_vec_pretty(report).context("failed to encode validation report json")?;
    fs::write(path, json)
        .with_context(|| format!("failed to write validation report: {}", path.display()))?;
    Ok(())
}

pub(crate) fn hash_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}
