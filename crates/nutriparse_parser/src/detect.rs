//! Document kind detection for `parsing_type = auto`.

use nutriparse_protocol::ParsingType;
use regex::Regex;
use std::sync::OnceLock;

/// Detected document kind; the closed set the registry dispatches over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    NutritionLabel,
    Recipe,
    DietGuide,
    Unknown,
}

impl DocumentKind {
    /// A caller-forced parsing type short-circuits detection.
    pub fn from_parsing_type(parsing_type: ParsingType) -> Option<Self> {
        match parsing_type {
            ParsingType::Auto => None,
            ParsingType::NutritionLabel => Some(DocumentKind::NutritionLabel),
            ParsingType::Recipe => Some(DocumentKind::Recipe),
            ParsingType::DietGuide => Some(DocumentKind::DietGuide),
        }
    }
}

const NUTRITION_KEYWORDS: [&str; 6] = [
    "nutrition facts",
    "nutrition information",
    "营养成分",
    "营养成份",
    "每100克",
    "serving size",
];

const RECIPE_KEYWORDS: [&str; 6] = [
    "ingredients",
    "instructions",
    "directions",
    "配料",
    "材料",
    "做法",
];

fn numbered_step() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:\d+[.、)]\s|step\s+\d+|第\s*\d+\s*步)").expect("step regex")
    })
}

/// Classify extracted text by keyword heuristics. Nutrition markers win
/// over recipe markers; anything without either reads as a guide when it
/// has prose, unknown when it is nearly empty.
pub fn detect(text: &str) -> DocumentKind {
    let lowered = text.to_lowercase();

    if NUTRITION_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        return DocumentKind::NutritionLabel;
    }

    let has_recipe_header = RECIPE_KEYWORDS.iter().any(|kw| lowered.contains(kw));
    if has_recipe_header && numbered_step().is_match(&lowered) {
        return DocumentKind::Recipe;
    }

    if lowered.trim().chars().count() < 20 {
        return DocumentKind::Unknown;
    }
    DocumentKind::DietGuide
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nutrition_facts_wins() {
        assert_eq!(
            detect("Nutrition Facts\nCalories 250"),
            DocumentKind::NutritionLabel
        );
        assert_eq!(detect("营养成分表 每100克"), DocumentKind::NutritionLabel);
    }

    #[test]
    fn recipe_needs_header_and_numbered_steps() {
        let text = "Tomato Soup\nIngredients\n2 cups tomatoes\n1. Chop\n2. Simmer";
        assert_eq!(detect(text), DocumentKind::Recipe);
        // A header alone is not enough.
        assert_eq!(
            detect("Ingredients are listed on the back of the package somewhere"),
            DocumentKind::DietGuide
        );
    }

    #[test]
    fn chinese_recipe_detected() {
        let text = "番茄炒蛋\n配料\n鸡蛋 2个\n第1步 打散鸡蛋\n第2步 翻炒";
        assert_eq!(detect(text), DocumentKind::Recipe);
    }

    #[test]
    fn prose_falls_back_to_guide() {
        let text = "Dietary guidance for adults: eat a variety of foods every day.";
        assert_eq!(detect(text), DocumentKind::DietGuide);
    }

    #[test]
    fn near_empty_text_is_unknown() {
        assert_eq!(detect("   \n  x"), DocumentKind::Unknown);
    }
}
