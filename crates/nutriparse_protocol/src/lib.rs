//! Canonical types shared across the nutriparse crates.
//!
//! Every enum here is the single source of truth for its concept. All of
//! them carry `as_str` / `Display` / `FromStr` triples so the store, the
//! HTTP layer, and the CLI render the same strings.

pub mod config;
pub mod error;
pub mod http_types;
pub mod job;
pub mod result;

pub use config::AppConfig;
pub use error::{ErrorKind, JobError};
pub use job::{Batch, JobFilter, JobRecord, JobState, ParsingType, Priority};
pub use result::{
    FoodInfo, GuideRecommendation, GuideSection, Ingredient, NutritionValue, Nutrient,
    ParsedResult, Unit,
};
