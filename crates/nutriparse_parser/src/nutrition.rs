//! Nutrition label extraction: per-nutrient regex table plus label
//! identity fields.

use nutriparse_protocol::{FoodInfo, Nutrient, NutritionValue, ParsedResult};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::units::{self, RawUnit};

/// How well extraction went; feeds the quality score.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExtractionMetrics {
    /// Fields the extractor looked for.
    pub fields_expected: usize,
    /// Fields it found in-vocabulary and in-range.
    pub fields_found: usize,
    /// Readings that had a recognizable unit.
    pub units_total: usize,
    /// Readings whose unit normalized cleanly.
    pub units_normalized: usize,
}

impl ExtractionMetrics {
    pub fn coverage(&self) -> f64 {
        if self.fields_expected == 0 {
            return 0.0;
        }
        self.fields_found as f64 / self.fields_expected as f64
    }

    pub fn unit_success(&self) -> f64 {
        if self.units_total == 0 {
            // No unit-bearing fields found; neutral rather than punitive.
            return 1.0;
        }
        self.units_normalized as f64 / self.units_total as f64
    }
}

struct NutrientPattern {
    nutrient: Nutrient,
    regex: Regex,
    /// Assumed when the label omits the unit token.
    default_unit: RawUnit,
}

fn patterns() -> &'static Vec<NutrientPattern> {
    static PATTERNS: OnceLock<Vec<NutrientPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table: [(Nutrient, &str, RawUnit); 13] = [
            (
                Nutrient::Calories,
                r"(?i)(?:calories|energy|热量|能量)[：:\s]*(\d+(?:\.\d+)?)\s*(kcal|kj|千卡|大卡|千焦)?",
                RawUnit::Kcal,
            ),
            (
                Nutrient::Protein,
                r"(?i)(?:protein|蛋白质)[：:\s]*(\d+(?:\.\d+)?)\s*(g|mg|克|毫克)?",
                RawUnit::Gram,
            ),
            (
                Nutrient::Fat,
                r"(?i)(?:total\s+fat|fat|脂肪)[：:\s]*(\d+(?:\.\d+)?)\s*(g|mg|克|毫克)?",
                RawUnit::Gram,
            ),
            (
                Nutrient::Carbohydrates,
                r"(?i)(?:total\s+carbohydrates?|carbohydrates?|碳水化合物)[：:\s]*(\d+(?:\.\d+)?)\s*(g|mg|克|毫克)?",
                RawUnit::Gram,
            ),
            (
                Nutrient::Fiber,
                r"(?i)(?:dietary\s+fiber|fiber|膳食纤维)[：:\s]*(\d+(?:\.\d+)?)\s*(g|mg|克|毫克)?",
                RawUnit::Gram,
            ),
            (
                Nutrient::Sugar,
                r"(?i)(?:sugars?|糖)[：:\s]*(\d+(?:\.\d+)?)\s*(g|mg|克|毫克)?",
                RawUnit::Gram,
            ),
            (
                Nutrient::Sodium,
                r"(?i)(?:sodium|钠)[：:\s]*(\d+(?:\.\d+)?)\s*(g|mg|克|毫克)?",
                RawUnit::Milligram,
            ),
            (
                Nutrient::Calcium,
                r"(?i)(?:calcium|钙)[：:\s]*(\d+(?:\.\d+)?)\s*(g|mg|克|毫克)?",
                RawUnit::Milligram,
            ),
            (
                Nutrient::Iron,
                r"(?i)(?:iron|铁)[：:\s]*(\d+(?:\.\d+)?)\s*(g|mg|克|毫克)?",
                RawUnit::Milligram,
            ),
            (
                Nutrient::VitaminC,
                r"(?i)(?:vitamin\s*c|维生素C)[：:\s]*(\d+(?:\.\d+)?)\s*(g|mg|µg|ug|mcg|克|毫克|微克)?",
                RawUnit::Milligram,
            ),
            (
                Nutrient::VitaminA,
                r"(?i)(?:vitamin\s*a|维生素A)[：:\s]*(\d+(?:\.\d+)?)\s*(g|mg|µg|ug|mcg|克|毫克|微克)?",
                RawUnit::Microgram,
            ),
            (
                Nutrient::Cholesterol,
                r"(?i)(?:cholesterol|胆固醇)[：:\s]*(\d+(?:\.\d+)?)\s*(g|mg|克|毫克)?",
                RawUnit::Milligram,
            ),
            (
                Nutrient::Potassium,
                r"(?i)(?:potassium|钾)[：:\s]*(\d+(?:\.\d+)?)\s*(g|mg|克|毫克)?",
                RawUnit::Milligram,
            ),
        ];
        table
            .into_iter()
            .map(|(nutrient, pattern, default_unit)| NutrientPattern {
                nutrient,
                regex: Regex::new(pattern).expect("nutrient pattern"),
                default_unit,
            })
            .collect()
    })
}

fn food_info_patterns() -> &'static [(Regex, usize); 5] {
    static PATTERNS: OnceLock<[(Regex, usize); 5]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let make = |p: &str| Regex::new(p).expect("food info pattern");
        [
            (make(r"(?im)^(?:product\s+name|品名|产品名称|食品名称)[：:\s]+(.+)$"), 0),
            (make(r"(?im)^(?:brand|品牌)[：:\s]+(.+)$"), 1),
            (make(r"(?im)^(?:category|类别|食品类别)[：:\s]+(.+)$"), 2),
            (
                make(r"(?im)^(?:net\s+(?:weight|content)|净含量)[：:\s]+(.+)$"),
                3,
            ),
            (
                make(r"(?im)^(?:serving\s+size|每份|每份用量)[：:\s]+(.+)$"),
                4,
            ),
        ]
    })
}

fn extract_food_info(text: &str) -> FoodInfo {
    let mut info = FoodInfo::default();
    for (regex, slot) in food_info_patterns() {
        if let Some(caps) = regex.captures(text) {
            let value = caps[1].trim().to_string();
            if value.is_empty() {
                continue;
            }
            match slot {
                0 => info.name = Some(value),
                1 => info.brand = Some(value),
                2 => info.category = Some(value),
                3 => info.net_weight = Some(value),
                _ => info.serving_size = Some(value),
            }
        }
    }
    info
}

/// Run the nutrient table over the text. Returns the structured result
/// (with a zero quality score, filled in by the quality stage) plus the
/// metrics the score is computed from.
pub fn extract(text: &str) -> (ParsedResult, ExtractionMetrics) {
    let mut nutrition: BTreeMap<Nutrient, NutritionValue> = BTreeMap::new();
    let mut metrics = ExtractionMetrics {
        fields_expected: patterns().len(),
        ..ExtractionMetrics::default()
    };

    for pattern in patterns() {
        let Some(caps) = pattern.regex.captures(text) else {
            continue;
        };
        let Ok(value) = caps[1].parse::<f64>() else {
            continue;
        };
        metrics.units_total += 1;
        let unit = caps
            .get(2)
            .and_then(|m| units::parse_unit(m.as_str()))
            .unwrap_or(pattern.default_unit);
        if let Some(normalized) = units::normalize(pattern.nutrient, value, unit) {
            metrics.units_normalized += 1;
            metrics.fields_found += 1;
            nutrition.insert(pattern.nutrient, normalized);
        }
    }

    let result = ParsedResult::NutritionLabel {
        food_info: extract_food_info(text),
        nutrition,
        raw_text: text.to_string(),
        quality_score: 0.0,
    };
    (result, metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nutriparse_protocol::Unit;

    #[test]
    fn extracts_english_label() {
        let text = "Nutrition Facts\nServing size: 100g\nCalories: 250 kcal\n\
                    Protein: 12.5 g\nTotal Fat: 8 g\nSodium: 480 mg";
        let (result, metrics) = extract(text);
        let ParsedResult::NutritionLabel { nutrition, .. } = &result else {
            panic!("wrong variant");
        };
        assert_eq!(
            nutrition.get(&Nutrient::Calories),
            Some(&NutritionValue {
                value: 250.0,
                unit: Unit::Kcal
            })
        );
        assert_eq!(
            nutrition.get(&Nutrient::Protein),
            Some(&NutritionValue {
                value: 12.5,
                unit: Unit::Gram
            })
        );
        assert_eq!(
            nutrition.get(&Nutrient::Sodium),
            Some(&NutritionValue {
                value: 480.0,
                unit: Unit::Milligram
            })
        );
        assert_eq!(metrics.fields_found, 4);
        assert_eq!(metrics.units_normalized, metrics.units_total);
    }

    #[test]
    fn extracts_chinese_label_with_kj() {
        let text = "营养成分表\n能量：1000 千焦\n蛋白质：6.2 克\n钠：120 毫克";
        let (result, _) = extract(text);
        let ParsedResult::NutritionLabel { nutrition, .. } = &result else {
            panic!("wrong variant");
        };
        let calories = nutrition.get(&Nutrient::Calories).expect("energy row");
        assert_eq!(calories.unit, Unit::Kcal);
        assert!((calories.value - 239.0).abs() < 0.01);
        assert!(nutrition.contains_key(&Nutrient::Protein));
    }

    #[test]
    fn sodium_in_grams_normalizes_to_mg() {
        let text = "Sodium: 1.2 g";
        let (result, _) = extract(text);
        let ParsedResult::NutritionLabel { nutrition, .. } = &result else {
            panic!("wrong variant");
        };
        assert_eq!(
            nutrition.get(&Nutrient::Sodium),
            Some(&NutritionValue {
                value: 1200.0,
                unit: Unit::Milligram
            })
        );
    }

    #[test]
    fn outliers_are_dropped() {
        let text = "Calories: 25000 kcal\nProtein: 10 g";
        let (result, metrics) = extract(text);
        let ParsedResult::NutritionLabel { nutrition, .. } = &result else {
            panic!("wrong variant");
        };
        assert!(!nutrition.contains_key(&Nutrient::Calories));
        assert!(nutrition.contains_key(&Nutrient::Protein));
        assert_eq!(metrics.units_total, 2);
        assert_eq!(metrics.units_normalized, 1);
    }

    #[test]
    fn food_info_fields_are_lifted() {
        let text = "品名：纯牛奶\n品牌：光明\n净含量：250ml\nServing size: 100ml\n蛋白质：3.2 克";
        let (result, _) = extract(text);
        let ParsedResult::NutritionLabel { food_info, .. } = &result else {
            panic!("wrong variant");
        };
        assert_eq!(food_info.name.as_deref(), Some("纯牛奶"));
        assert_eq!(food_info.brand.as_deref(), Some("光明"));
        assert_eq!(food_info.net_weight.as_deref(), Some("250ml"));
        assert_eq!(food_info.serving_size.as_deref(), Some("100ml"));
    }
}
