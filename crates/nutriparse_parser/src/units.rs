//! Unit parsing, normalization, and plausibility clamps.

use nutriparse_protocol::{Nutrient, NutritionValue, Unit};

/// Units as they appear on labels, before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawUnit {
    Kcal,
    KiloJoule,
    Gram,
    Milligram,
    Microgram,
}

const KJ_TO_KCAL: f64 = 0.239;

/// Map a label token to a raw unit. Covers the EN/zh spellings seen on
/// packaging.
pub fn parse_unit(token: &str) -> Option<RawUnit> {
    let token = token.trim();
    match token.to_lowercase().as_str() {
        "kcal" | "cal" | "千卡" | "大卡" => Some(RawUnit::Kcal),
        "kj" | "千焦" => Some(RawUnit::KiloJoule),
        "g" | "克" => Some(RawUnit::Gram),
        "mg" | "毫克" => Some(RawUnit::Milligram),
        "µg" | "ug" | "mcg" | "微克" => Some(RawUnit::Microgram),
        _ => None,
    }
}

/// Convert a reading to the target canonical unit. Returns `None` for
/// dimension mismatches (energy vs mass).
pub fn convert(value: f64, from: RawUnit, to: Unit) -> Option<f64> {
    // Everything is routed through a base quantity: kcal for energy,
    // micrograms for mass. Two hops keep the table small and make
    // normalization trivially idempotent.
    let in_base = match from {
        RawUnit::Kcal => Base::Energy(value),
        RawUnit::KiloJoule => Base::Energy(value * KJ_TO_KCAL),
        RawUnit::Gram => Base::Mass(value * 1_000_000.0),
        RawUnit::Milligram => Base::Mass(value * 1_000.0),
        RawUnit::Microgram => Base::Mass(value),
    };
    match (in_base, to) {
        (Base::Energy(kcal), Unit::Kcal) => Some(kcal),
        (Base::Mass(ug), Unit::Gram) => Some(ug / 1_000_000.0),
        (Base::Mass(ug), Unit::Milligram) => Some(ug / 1_000.0),
        (Base::Mass(ug), Unit::Microgram) => Some(ug),
        _ => None,
    }
}

enum Base {
    Energy(f64),
    Mass(f64),
}

/// Plausible range per 100 g serving, in the nutrient's canonical unit.
/// Values outside the range are treated as extraction noise and dropped.
pub fn plausible_range(nutrient: Nutrient) -> (f64, f64) {
    match nutrient {
        Nutrient::Calories => (0.0, 900.0),
        Nutrient::Protein => (0.0, 100.0),
        Nutrient::Fat => (0.0, 100.0),
        Nutrient::Carbohydrates => (0.0, 100.0),
        Nutrient::Fiber => (0.0, 60.0),
        Nutrient::Sugar => (0.0, 100.0),
        Nutrient::Sodium => (0.0, 40_000.0),
        Nutrient::Calcium => (0.0, 3_000.0),
        Nutrient::Iron => (0.0, 100.0),
        Nutrient::VitaminC => (0.0, 2_000.0),
        Nutrient::VitaminA => (0.0, 10_000.0),
        Nutrient::Cholesterol => (0.0, 3_000.0),
        Nutrient::Potassium => (0.0, 20_000.0),
    }
}

/// Normalize one reading to the nutrient's canonical unit, rejecting
/// dimension mismatches and implausible magnitudes.
pub fn normalize(nutrient: Nutrient, value: f64, unit: RawUnit) -> Option<NutritionValue> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let target = nutrient.canonical_unit();
    let converted = convert(value, unit, target)?;
    let (lo, hi) = plausible_range(nutrient);
    if converted < lo || converted > hi {
        return None;
    }
    Some(NutritionValue {
        value: round2(converted),
        unit: target,
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// The canonical unit corresponding to a raw unit, for re-normalization.
pub fn raw_from_canonical(unit: Unit) -> RawUnit {
    match unit {
        Unit::Kcal => RawUnit::Kcal,
        Unit::Gram => RawUnit::Gram,
        Unit::Milligram => RawUnit::Milligram,
        Unit::Microgram => RawUnit::Microgram,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kj_converts_to_kcal() {
        let v = normalize(Nutrient::Calories, 1000.0, RawUnit::KiloJoule).expect("in range");
        assert_eq!(v.unit, Unit::Kcal);
        assert!((v.value - 239.0).abs() < 0.01);
    }

    #[test]
    fn mass_ladder_converts_both_ways() {
        assert_eq!(convert(1.0, RawUnit::Gram, Unit::Milligram), Some(1000.0));
        assert_eq!(convert(500.0, RawUnit::Milligram, Unit::Gram), Some(0.5));
        assert_eq!(convert(2.0, RawUnit::Milligram, Unit::Microgram), Some(2000.0));
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        assert_eq!(convert(1.0, RawUnit::KiloJoule, Unit::Gram), None);
        assert_eq!(convert(1.0, RawUnit::Gram, Unit::Kcal), None);
    }

    #[test]
    fn implausible_values_are_dropped() {
        assert!(normalize(Nutrient::Calories, 1200.0, RawUnit::Kcal).is_none());
        assert!(normalize(Nutrient::Protein, 150.0, RawUnit::Gram).is_none());
        assert!(normalize(Nutrient::Calories, -5.0, RawUnit::Kcal).is_none());
    }

    #[test]
    fn normalization_is_idempotent() {
        for (nutrient, value, unit) in [
            (Nutrient::Calories, 250.0, RawUnit::Kcal),
            (Nutrient::Sodium, 1.2, RawUnit::Gram),
            (Nutrient::VitaminA, 800.0, RawUnit::Microgram),
        ] {
            let once = normalize(nutrient, value, unit).expect("first pass");
            let twice =
                normalize(nutrient, once.value, raw_from_canonical(once.unit)).expect("second");
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn label_tokens_parse_bilingually() {
        assert_eq!(parse_unit("kcal"), Some(RawUnit::Kcal));
        assert_eq!(parse_unit("千焦"), Some(RawUnit::KiloJoule));
        assert_eq!(parse_unit("克"), Some(RawUnit::Gram));
        assert_eq!(parse_unit("毫克"), Some(RawUnit::Milligram));
        assert_eq!(parse_unit("oz"), None);
    }
}
