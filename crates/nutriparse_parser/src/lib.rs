//! Document parsing: type detection, text extraction seams, structured
//! extractors, and the staged pipeline that ties them together.

pub mod cancel;
pub mod detect;
pub mod guide;
pub mod nutrition;
pub mod pipeline;
pub mod recipe;
pub mod registry;
pub mod text;
pub mod units;

pub use cancel::CancellationToken;
pub use pipeline::{NullProgress, Pipeline, PipelineError, PipelineInput, ProgressSink};
pub use text::{
    ExtractError, ExtractedText, OcrEngine, OcrError, OcrOutput, PlainTextExtractor,
    TextExtractor,
};
