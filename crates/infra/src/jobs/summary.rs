//! Read-side aggregates over jobs and their results.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value as JsonValue;

use mediaproc_core::{JobId, OwnerId};

use super::types::{Job, JobKind, JobStatus, UnitResult};

/// Job counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<OwnerId>,
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobStats {
    /// Count `jobs`, restricted to `owner` when given.
    pub fn collect<'a>(jobs: impl IntoIterator<Item = &'a Job>, owner: Option<OwnerId>) -> Self {
        let mut stats = JobStats {
            owner_id: owner,
            ..Default::default()
        };
        for job in jobs {
            if owner.is_some_and(|o| o != job.owner_id) {
                continue;
            }
            stats.total += 1;
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

/// Overview of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub total_units: u64,
    pub processed_units: u64,
    pub progress_percent: f64,
    pub results: usize,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr: Option<OcrSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detections: Option<DetectionSummary>,
}

impl JobSummary {
    pub fn build(job: &Job, results: &[UnitResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.payload.is_success()).count();
        Self {
            job_id: job.id,
            kind: job.kind,
            status: job.status,
            total_units: job.total_units,
            processed_units: job.processed_units,
            progress_percent: job.progress_percent(),
            results: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            ocr: (job.kind == JobKind::OcrExtract).then(|| OcrSummary::from_results(results)),
            detections: (job.kind == JobKind::VideoDetect)
                .then(|| DetectionSummary::from_results(results)),
        }
    }
}

/// Text extraction totals over a job's page results.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OcrSummary {
    pub total_pages: usize,
    pub total_text_blocks: usize,
    pub total_characters: usize,
    /// Mean block confidence, 0 when nothing was kept.
    pub average_confidence: f64,
}

impl OcrSummary {
    pub fn from_results(results: &[UnitResult]) -> Self {
        let mut summary = OcrSummary::default();
        let mut confidence_sum = 0.0;

        for page in results.iter().filter_map(|r| r.payload.as_success()) {
            summary.total_pages += 1;
            summary.total_characters += page
                .get("full_text")
                .and_then(JsonValue::as_str)
                .map_or(0, |t| t.chars().count());
            for block in page
                .get("text_blocks")
                .and_then(JsonValue::as_array)
                .into_iter()
                .flatten()
            {
                summary.total_text_blocks += 1;
                confidence_sum += block
                    .get("confidence")
                    .and_then(JsonValue::as_f64)
                    .unwrap_or(0.0);
            }
        }

        if summary.total_text_blocks > 0 {
            summary.average_confidence = confidence_sum / summary.total_text_blocks as f64;
        }
        summary
    }
}

/// Detected objects over a job's frame results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetectionSummary {
    pub frames: usize,
    pub total_detections: usize,
    pub per_class: BTreeMap<String, usize>,
}

impl DetectionSummary {
    pub fn from_results(results: &[UnitResult]) -> Self {
        let mut summary = DetectionSummary::default();
        for frame in results.iter().filter_map(|r| r.payload.as_success()) {
            summary.frames += 1;
            for detection in frame
                .get("detections")
                .and_then(JsonValue::as_array)
                .into_iter()
                .flatten()
            {
                summary.total_detections += 1;
                let class = detection
                    .get("class")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("unknown");
                *summary.per_class.entry(class.to_string()).or_default() += 1;
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::envelope::ErrorEnvelope;
    use crate::jobs::types::{ResultPayload, Unit};
    use mediaproc_ai::{Backend, CapabilityError, MediaSource};
    use serde_json::json;

    fn result(job: &Job, ordinal: u64, payload: ResultPayload) -> UnitResult {
        let unit = Unit::new(job.id, ordinal, MediaSource::file("/x.png"));
        UnitResult::new(&unit, payload)
    }

    #[test]
    fn stats_count_per_status_and_owner() {
        let alice = OwnerId::new();
        let mut done = Job::new(alice, JobKind::ImageAnalyze, Backend::Workflow);
        done.mark_processing().unwrap();
        done.mark_completed().unwrap();
        let queued = Job::new(alice, JobKind::OcrExtract, Backend::Ocr);
        let other = Job::new(OwnerId::new(), JobKind::OcrExtract, Backend::Ocr);
        let jobs = [done, queued, other];

        let all = JobStats::collect(&jobs, None);
        assert_eq!((all.total, all.pending, all.completed), (3, 2, 1));

        let mine = JobStats::collect(&jobs, Some(alice));
        assert_eq!((mine.total, mine.pending, mine.completed), (2, 1, 1));
    }

    #[test]
    fn ocr_summary_totals_pages_and_confidence() {
        let job = Job::new(OwnerId::new(), JobKind::OcrExtract, Backend::Ocr);
        let results = vec![
            result(
                &job,
                1,
                ResultPayload::Success(json!({
                    "page_number": 1,
                    "text_blocks": [
                        {"text": "Total", "confidence": 0.9, "bbox": []},
                        {"text": "42", "confidence": 0.7, "bbox": []}
                    ],
                    "full_text": "Total 42"
                })),
            ),
            result(
                &job,
                2,
                ResultPayload::Failure(ErrorEnvelope::from_fault(Backend::Ocr, "boom", 1)),
            ),
        ];

        let summary = OcrSummary::from_results(&results);
        assert_eq!(summary.total_pages, 1);
        assert_eq!(summary.total_text_blocks, 2);
        assert_eq!(summary.total_characters, 8);
        assert!((summary.average_confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn detection_summary_counts_classes() {
        let job = Job::new(OwnerId::new(), JobKind::VideoDetect, Backend::Detection);
        let frame = |n: u64, classes: &[&str]| {
            let detections: Vec<_> = classes
                .iter()
                .map(|c| json!({"class": c, "confidence": 0.9, "bbox": [0, 0, 1, 1]}))
                .collect();
            result(
                &job,
                n,
                ResultPayload::Success(json!({"frame_number": n, "detections": detections})),
            )
        };
        let results = vec![frame(0, &["person", "car"]), frame(5, &["person"]), frame(10, &[])];

        let summary = DetectionSummary::from_results(&results);
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.total_detections, 3);
        assert_eq!(summary.per_class["person"], 2);
        assert_eq!(summary.per_class["car"], 1);
    }

    #[test]
    fn job_summary_splits_success_and_failure() {
        let mut job = Job::new(OwnerId::new(), JobKind::ImageAnalyze, Backend::Workflow)
            .with_total_units(2);
        job.mark_processing().unwrap();
        job.record_processed();
        let failure = ErrorEnvelope::from_final(
            Backend::Workflow,
            &crate::jobs::retry::FinalError::immediate(&CapabilityError::permanent("bad")),
        );
        let results = vec![result(&job, 1, ResultPayload::Failure(failure))];

        let summary = JobSummary::build(&job, &results);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.progress_percent, 50.0);
        assert!(summary.ocr.is_none());
    }
}
