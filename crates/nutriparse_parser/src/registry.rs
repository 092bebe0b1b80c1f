//! Extractor dispatch: one closed set of document kinds, one match.
//! Adding a parser means adding a `DocumentKind` case and its module.

use nutriparse_protocol::ParsedResult;

use crate::detect::DocumentKind;
use crate::nutrition::{self, ExtractionMetrics};
use crate::{guide, recipe};

/// Whether the registry has an extractor for the kind. Trivially true for
/// the closed set, kept as the seam the pipeline asks.
pub fn can_handle(kind: DocumentKind) -> bool {
    matches!(
        kind,
        DocumentKind::NutritionLabel
            | DocumentKind::Recipe
            | DocumentKind::DietGuide
            | DocumentKind::Unknown
    )
}

/// Run the structured extractor for a detected kind.
pub fn extract(kind: DocumentKind, text: &str) -> (ParsedResult, ExtractionMetrics) {
    match kind {
        DocumentKind::NutritionLabel => nutrition::extract(text),
        DocumentKind::Recipe => recipe::extract(text),
        DocumentKind::DietGuide => guide::extract(text),
        DocumentKind::Unknown => (
            ParsedResult::Unknown {
                raw_text: text.to_string(),
                quality_score: 0.0,
            },
            ExtractionMetrics {
                fields_expected: 1,
                fields_found: usize::from(!text.trim().is_empty()),
                units_total: 0,
                units_normalized: 0,
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_is_handled() {
        for kind in [
            DocumentKind::NutritionLabel,
            DocumentKind::Recipe,
            DocumentKind::DietGuide,
            DocumentKind::Unknown,
        ] {
            assert!(can_handle(kind));
        }
    }

    #[test]
    fn dispatch_matches_kind() {
        let (result, _) = extract(DocumentKind::NutritionLabel, "Calories: 100 kcal");
        assert_eq!(result.kind_str(), "nutrition_label");
        let (result, _) = extract(DocumentKind::Unknown, "whatever");
        assert_eq!(result.kind_str(), "unknown");
    }
}
