//! The staged parsing pipeline.
//!
//! Stages run in a fixed order; every boundary reports progress and polls
//! the cancellation token. The percent attached to each stage is the value
//! reported when the stage *begins*.

use nutriparse_protocol::config::ParserConfig;
use nutriparse_protocol::{ErrorKind, JobError, ParsedResult, ParsingType};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::detect::{self, DocumentKind};
use crate::nutrition::ExtractionMetrics;
use crate::registry;
use crate::text::{ExtractError, ExtractedText, OcrEngine, OcrError, TextExtractor};

pub const STAGE_BASIC_INFO: &str = "extract_basic_info";
pub const STAGE_DETECT_TYPE: &str = "detect_type";
pub const STAGE_EXTRACT_TEXT: &str = "extract_text";
pub const STAGE_OCR_FALLBACK: &str = "ocr_fallback";
pub const STAGE_EXTRACT_STRUCTURED: &str = "extract_structured";
pub const STAGE_QUALITY_SCORE: &str = "quality_score";
pub const STAGE_COMMIT: &str = "commit";

const PCT_BASIC_INFO: u8 = 5;
const PCT_DETECT_TYPE: u8 = 10;
const PCT_EXTRACT_TEXT: u8 = 40;
const PCT_OCR_FALLBACK: u8 = 40;
const PCT_EXTRACT_STRUCTURED: u8 = 80;
const PCT_QUALITY_SCORE: u8 = 90;

/// Receives `(stage, percent)` notifications. The worker forwards them to
/// the job store with coalescing; the sync path ignores them.
pub trait ProgressSink: Send + Sync {
    fn report(&self, stage: &str, percent: u8);
}

/// Sink that drops everything.
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _stage: &str, _percent: u8) {}
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cancelled at {stage}")]
    Cancelled { stage: &'static str },
    #[error(transparent)]
    Failed(#[from] JobError),
}

impl PipelineError {
    /// The job error to persist; cancellation maps onto its own kind for
    /// the callers that record it.
    pub fn into_job_error(self) -> JobError {
        match self {
            PipelineError::Cancelled { stage } => {
                JobError::new(ErrorKind::Cancelled, "cancelled at stage boundary")
                    .at_stage(stage)
            }
            PipelineError::Failed(err) => err,
        }
    }
}

/// Everything a run needs besides the pipeline itself.
pub struct PipelineInput<'a> {
    pub bytes: &'a [u8],
    pub parsing_type: ParsingType,
    /// From the validator; used by the basic-info stage.
    pub page_count_hint: usize,
}

pub struct Pipeline {
    extractor: Arc<dyn TextExtractor>,
    ocr: Arc<dyn OcrEngine>,
    config: ParserConfig,
}

impl Pipeline {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        ocr: Arc<dyn OcrEngine>,
        config: ParserConfig,
    ) -> Self {
        Self {
            extractor,
            ocr,
            config,
        }
    }

    /// Run all stages. Returns the structured result; the caller performs
    /// the commit (stage 7) by writing it to the job store.
    pub fn run(
        &self,
        input: PipelineInput<'_>,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<ParsedResult, PipelineError> {
        // Stage 1: basic info.
        self.checkpoint(cancel, STAGE_BASIC_INFO)?;
        progress.report(STAGE_BASIC_INFO, PCT_BASIC_INFO);
        debug!(
            size = input.bytes.len(),
            pages = input.page_count_hint,
            "pipeline start"
        );

        // Stage 2: type detection. For `auto` this needs a text peek; the
        // extraction is cached and reused by stage 3.
        self.checkpoint(cancel, STAGE_DETECT_TYPE)?;
        progress.report(STAGE_DETECT_TYPE, PCT_DETECT_TYPE);
        let mut extracted: Option<ExtractedText> = None;
        let forced_kind = DocumentKind::from_parsing_type(input.parsing_type);
        let kind = match forced_kind {
            Some(kind) => kind,
            None => {
                let text = self.extract_text(input.bytes)?;
                let kind = detect::detect(&text.full_text());
                extracted = Some(text);
                kind
            }
        };
        debug!(?kind, "detected document kind");

        // Stage 3: text layer.
        self.checkpoint(cancel, STAGE_EXTRACT_TEXT)?;
        progress.report(STAGE_EXTRACT_TEXT, PCT_EXTRACT_TEXT);
        let extracted = match extracted {
            Some(text) => text,
            None => self.extract_text(input.bytes)?,
        };

        // Stage 4: OCR fallback when the text layer is too thin.
        let mut ocr_confidence: Option<f64> = None;
        let mut text = extracted.full_text();
        if extracted.avg_chars_per_page() < self.config.min_chars_per_page {
            self.checkpoint(cancel, STAGE_OCR_FALLBACK)?;
            progress.report(STAGE_OCR_FALLBACK, PCT_OCR_FALLBACK);
            match self.run_ocr(input.bytes, text.trim().is_empty())? {
                Some(output) => {
                    ocr_confidence = Some(output.confidence);
                    text = output.text;
                }
                None => {
                    // OCR unavailable but the direct text is usable enough.
                }
            }
        }

        if text.trim().is_empty() {
            return Err(PipelineError::Failed(
                JobError::new(
                    ErrorKind::Unparseable,
                    "document yielded no text layer and OCR produced nothing",
                )
                .at_stage(STAGE_EXTRACT_TEXT),
            ));
        }

        // When OCR replaced a thin text layer, the stage-2 classification
        // saw the thin text; re-detect on what will actually be parsed.
        let kind = if forced_kind.is_none() && ocr_confidence.is_some() {
            let refined = detect::detect(&text);
            debug!(?refined, "re-detected kind on OCR text");
            refined
        } else {
            kind
        };

        // Stage 5: structured extraction.
        self.checkpoint(cancel, STAGE_EXTRACT_STRUCTURED)?;
        progress.report(STAGE_EXTRACT_STRUCTURED, PCT_EXTRACT_STRUCTURED);
        let (mut result, metrics) = registry::extract(kind, &text);

        // Stage 6: quality score.
        self.checkpoint(cancel, STAGE_QUALITY_SCORE)?;
        progress.report(STAGE_QUALITY_SCORE, PCT_QUALITY_SCORE);
        let score = quality_score(&metrics, ocr_confidence);
        set_quality(&mut result, score);

        Ok(result)
    }

    fn checkpoint(
        &self,
        cancel: &CancellationToken,
        stage: &'static str,
    ) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { stage });
        }
        Ok(())
    }

    fn extract_text(&self, bytes: &[u8]) -> Result<ExtractedText, PipelineError> {
        self.extractor.extract(bytes).map_err(|err| {
            let job_error = match err {
                ExtractError::Unparseable(msg) => JobError::new(ErrorKind::Unparseable, msg),
                ExtractError::UnsupportedVariant(msg) => {
                    JobError::new(ErrorKind::UnsupportedPdfVariant, msg)
                }
            };
            PipelineError::Failed(job_error.at_stage(STAGE_EXTRACT_TEXT))
        })
    }

    /// OCR errors are fatal only when the direct text layer was empty;
    /// otherwise they demote to a warning and the thin text stands.
    fn run_ocr(
        &self,
        bytes: &[u8],
        text_is_empty: bool,
    ) -> Result<Option<crate::text::OcrOutput>, PipelineError> {
        if !self.config.ocr_enabled {
            return Ok(None);
        }
        match self.ocr.recognize(bytes, &self.config.languages) {
            Ok(output) => Ok(Some(output)),
            Err(OcrError::Disabled) => Ok(None),
            Err(err) if !text_is_empty => {
                warn!(error = %err, "ocr fallback failed, keeping direct text");
                Ok(None)
            }
            Err(OcrError::Transient(msg)) => Err(PipelineError::Failed(
                JobError::new(ErrorKind::OcrTransient, msg).at_stage(STAGE_OCR_FALLBACK),
            )),
            Err(err) => Err(PipelineError::Failed(
                JobError::new(ErrorKind::Unparseable, err.to_string())
                    .at_stage(STAGE_OCR_FALLBACK),
            )),
        }
    }
}

/// Deterministic 0..1 score: field coverage weighted with unit
/// normalization success; an OCR pass caps the ceiling at 0.7 scaled by
/// engine confidence.
pub fn quality_score(metrics: &ExtractionMetrics, ocr_confidence: Option<f64>) -> f64 {
    let base = 0.6 * metrics.coverage() + 0.4 * metrics.unit_success();
    let score = match ocr_confidence {
        Some(confidence) => (base * confidence.clamp(0.0, 1.0)).min(0.7),
        None => base,
    };
    (score * 100.0).round() / 100.0
}

fn set_quality(result: &mut ParsedResult, score: f64) {
    match result {
        ParsedResult::NutritionLabel { quality_score, .. }
        | ParsedResult::Recipe { quality_score, .. }
        | ParsedResult::DietGuide { quality_score, .. }
        | ParsedResult::Unknown { quality_score, .. } => *quality_score = score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::{DisabledOcr, OcrOutput, PlainTextExtractor};
    use std::sync::Mutex;

    fn pdf(lines: &[&str]) -> Vec<u8> {
        let mut bytes = b"%PDF-1.4\n/Type /Page\n".to_vec();
        for line in lines {
            bytes.extend_from_slice(b"(");
            bytes.extend_from_slice(line.as_bytes());
            bytes.extend_from_slice(b") Tj\n");
        }
        bytes.extend_from_slice(b"%%EOF\n");
        bytes
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(
            Arc::new(PlainTextExtractor::new()),
            Arc::new(DisabledOcr),
            ParserConfig::default(),
        )
    }

    struct RecordingSink {
        seen: Mutex<Vec<(String, u8)>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl ProgressSink for RecordingSink {
        fn report(&self, stage: &str, percent: u8) {
            self.seen
                .lock()
                .expect("sink lock")
                .push((stage.to_string(), percent));
        }
    }

    struct ScriptedOcr {
        output: OcrOutput,
    }

    impl crate::text::OcrEngine for ScriptedOcr {
        fn recognize(
            &self,
            _bytes: &[u8],
            _languages: &[String],
        ) -> Result<OcrOutput, crate::text::OcrError> {
            Ok(self.output.clone())
        }
    }

    #[test]
    fn auto_detects_and_parses_nutrition_label() {
        let bytes = pdf(&[
            "Nutrition Facts",
            "Serving size: 100g",
            "Calories: 250 kcal",
            "Protein: 12 g",
        ]);
        let sink = RecordingSink::new();
        let result = pipeline()
            .run(
                PipelineInput {
                    bytes: &bytes,
                    parsing_type: ParsingType::Auto,
                    page_count_hint: 1,
                },
                &CancellationToken::new(),
                &sink,
            )
            .expect("parse succeeds");

        assert_eq!(result.kind_str(), "nutrition_label");
        assert!(result.quality_score() > 0.0);

        let seen = sink.seen.lock().expect("sink lock");
        let stages: Vec<&str> = seen.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(
            stages,
            vec![
                STAGE_BASIC_INFO,
                STAGE_DETECT_TYPE,
                STAGE_EXTRACT_TEXT,
                STAGE_EXTRACT_STRUCTURED,
                STAGE_QUALITY_SCORE,
            ]
        );
        // Progress percents are non-decreasing along the stage order.
        let percents: Vec<u8> = seen.iter().map(|(_, p)| *p).collect();
        let mut sorted = percents.clone();
        sorted.sort_unstable();
        assert_eq!(percents, sorted);
    }

    #[test]
    fn forced_type_skips_detection_extraction() {
        let bytes = pdf(&["Calories: 100 kcal"]);
        let result = pipeline()
            .run(
                PipelineInput {
                    bytes: &bytes,
                    parsing_type: ParsingType::NutritionLabel,
                    page_count_hint: 1,
                },
                &CancellationToken::new(),
                &NullProgress,
            )
            .expect("parse succeeds");
        assert_eq!(result.kind_str(), "nutrition_label");
    }

    #[test]
    fn cancellation_is_observed_at_boundaries() {
        let bytes = pdf(&["Calories: 100 kcal"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pipeline()
            .run(
                PipelineInput {
                    bytes: &bytes,
                    parsing_type: ParsingType::Auto,
                    page_count_hint: 1,
                },
                &cancel,
                &NullProgress,
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { .. }));
    }

    #[test]
    fn thin_text_triggers_ocr_and_caps_quality() {
        // One short string on the page: below the 40 chars/page default.
        let bytes = pdf(&["scan"]);
        let ocr = ScriptedOcr {
            output: OcrOutput {
                text: "Nutrition Facts\nCalories: 200 kcal\nProtein: 10 g".to_string(),
                confidence: 0.9,
            },
        };
        let pipeline = Pipeline::new(
            Arc::new(PlainTextExtractor::new()),
            Arc::new(ocr),
            ParserConfig::default(),
        );
        let sink = RecordingSink::new();
        let result = pipeline
            .run(
                PipelineInput {
                    bytes: &bytes,
                    parsing_type: ParsingType::Auto,
                    page_count_hint: 1,
                },
                &CancellationToken::new(),
                &sink,
            )
            .expect("parse succeeds");

        let stages: Vec<String> = sink
            .seen
            .lock()
            .expect("sink lock")
            .iter()
            .map(|(s, _)| s.clone())
            .collect();
        assert!(stages.iter().any(|s| s == STAGE_OCR_FALLBACK));
        assert!(result.quality_score() <= 0.7);
        assert_eq!(result.kind_str(), "nutrition_label");
    }

    #[test]
    fn empty_document_fails_unparseable() {
        let bytes = pdf(&[]);
        let err = pipeline()
            .run(
                PipelineInput {
                    bytes: &bytes,
                    parsing_type: ParsingType::NutritionLabel,
                    page_count_hint: 1,
                },
                &CancellationToken::new(),
                &NullProgress,
            )
            .unwrap_err();
        let job_error = err.into_job_error();
        assert_eq!(job_error.kind, ErrorKind::Unparseable);
    }

    #[test]
    fn quality_score_is_deterministic() {
        let metrics = ExtractionMetrics {
            fields_expected: 10,
            fields_found: 5,
            units_total: 5,
            units_normalized: 5,
        };
        assert_eq!(quality_score(&metrics, None), 0.7);
        assert_eq!(quality_score(&metrics, None), 0.7);
        assert!(quality_score(&metrics, Some(0.5)) <= 0.7);
    }
}
