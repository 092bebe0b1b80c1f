//! Structured parse results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Fixed nutrient vocabulary. Extraction maps free-form label text onto
/// these keys; anything outside the vocabulary is dropped.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Nutrient {
    Calories,
    Protein,
    Fat,
    Carbohydrates,
    Fiber,
    Sugar,
    Sodium,
    Calcium,
    Iron,
    VitaminC,
    VitaminA,
    Cholesterol,
    Potassium,
}

impl Nutrient {
    pub fn as_str(&self) -> &'static str {
        match self {
            Nutrient::Calories => "calories",
            Nutrient::Protein => "protein",
            Nutrient::Fat => "fat",
            Nutrient::Carbohydrates => "carbohydrates",
            Nutrient::Fiber => "fiber",
            Nutrient::Sugar => "sugar",
            Nutrient::Sodium => "sodium",
            Nutrient::Calcium => "calcium",
            Nutrient::Iron => "iron",
            Nutrient::VitaminC => "vitamin_c",
            Nutrient::VitaminA => "vitamin_a",
            Nutrient::Cholesterol => "cholesterol",
            Nutrient::Potassium => "potassium",
        }
    }

    pub const ALL: [Nutrient; 13] = [
        Nutrient::Calories,
        Nutrient::Protein,
        Nutrient::Fat,
        Nutrient::Carbohydrates,
        Nutrient::Fiber,
        Nutrient::Sugar,
        Nutrient::Sodium,
        Nutrient::Calcium,
        Nutrient::Iron,
        Nutrient::VitaminC,
        Nutrient::VitaminA,
        Nutrient::Cholesterol,
        Nutrient::Potassium,
    ];

    /// The canonical unit this nutrient is reported in.
    pub fn canonical_unit(&self) -> Unit {
        match self {
            Nutrient::Calories => Unit::Kcal,
            Nutrient::Protein | Nutrient::Fat | Nutrient::Carbohydrates => Unit::Gram,
            Nutrient::Fiber | Nutrient::Sugar => Unit::Gram,
            Nutrient::Sodium
            | Nutrient::Calcium
            | Nutrient::Iron
            | Nutrient::VitaminC
            | Nutrient::Cholesterol
            | Nutrient::Potassium => Unit::Milligram,
            Nutrient::VitaminA => Unit::Microgram,
        }
    }
}

impl fmt::Display for Nutrient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical unit set for normalized nutrition values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "kcal")]
    Kcal,
    #[serde(rename = "g")]
    Gram,
    #[serde(rename = "mg")]
    Milligram,
    #[serde(rename = "µg")]
    Microgram,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Kcal => "kcal",
            Unit::Gram => "g",
            Unit::Milligram => "mg",
            Unit::Microgram => "µg",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kcal" => Ok(Unit::Kcal),
            "g" => Ok(Unit::Gram),
            "mg" => Ok(Unit::Milligram),
            "µg" | "ug" | "mcg" => Ok(Unit::Microgram),
            _ => Err(format!("Invalid canonical unit: '{}'", s)),
        }
    }
}

/// A single normalized nutrient reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NutritionValue {
    pub value: f64,
    pub unit: Unit,
}

/// Packaged-food identity fields lifted off the label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FoodInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_weight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serving_size: Option<String>,
}

/// One recipe ingredient, tokenized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preparation: Option<String>,
}

/// A heading-delimited section of a diet guide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuideSection {
    pub title: String,
    pub position: usize,
}

/// An actionable recommendation harvested from a guide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuideRecommendation {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

/// The result of a successful parse, tagged by document kind.
///
/// Adding a parser means adding a variant here plus its extractor; there is
/// no open registry of trait objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParsedResult {
    NutritionLabel {
        food_info: FoodInfo,
        /// Keyed by nutrient, values normalized to canonical units.
        nutrition: BTreeMap<Nutrient, NutritionValue>,
        raw_text: String,
        quality_score: f64,
    },
    Recipe {
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        ingredients: Vec<Ingredient>,
        instructions: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prep_time: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cook_time: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        servings: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        difficulty: Option<String>,
        quality_score: f64,
    },
    DietGuide {
        sections: Vec<GuideSection>,
        recommendations: Vec<GuideRecommendation>,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_group: Option<String>,
        raw_text: String,
        quality_score: f64,
    },
    Unknown {
        raw_text: String,
        quality_score: f64,
    },
}

impl ParsedResult {
    pub fn quality_score(&self) -> f64 {
        match self {
            ParsedResult::NutritionLabel { quality_score, .. }
            | ParsedResult::Recipe { quality_score, .. }
            | ParsedResult::DietGuide { quality_score, .. }
            | ParsedResult::Unknown { quality_score, .. } => *quality_score,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            ParsedResult::NutritionLabel { .. } => "nutrition_label",
            ParsedResult::Recipe { .. } => "recipe",
            ParsedResult::DietGuide { .. } => "diet_guide",
            ParsedResult::Unknown { .. } => "unknown",
        }
    }
}
