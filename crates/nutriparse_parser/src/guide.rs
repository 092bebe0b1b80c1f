//! Diet guide extraction: sectionize by headings, harvest
//! recommendations, keep the raw text.

use nutriparse_protocol::{GuideRecommendation, GuideSection, ParsedResult};
use regex::Regex;
use std::sync::OnceLock;

use crate::nutrition::ExtractionMetrics;

fn heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Numbered or chapter-style headings, or short title-case lines
        // with no terminal punctuation.
        Regex::new(
            r"(?m)^\s*(?:第[一二三四五六七八九十\d]+[章节部分][^。！？.!?]{0,58}|\d+[.、]\s+[^。！？.!?]{1,58}|[A-Z][^.!?。！？]{2,58})\s*$",
        )
        .expect("heading regex")
    })
}

fn recommendation_markers() -> &'static [&'static str] {
    &[
        "should",
        "recommend",
        "limit",
        "avoid",
        "at least",
        "每天",
        "每日",
        "建议",
        "应当",
        "应该",
        "不超过",
        "适量",
    ]
}

fn target_group() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^\s*(?:target\s+group|适用人群|目标人群)[：:\s]+(.+)$")
            .expect("target regex")
    })
}

pub fn extract(text: &str) -> (ParsedResult, ExtractionMetrics) {
    let mut sections = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if heading().is_match(trimmed) {
            sections.push(GuideSection {
                title: trimmed.to_string(),
                position: sections.len(),
            });
        }
    }

    let recommendations: Vec<GuideRecommendation> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let lowered = line.to_lowercase();
            recommendation_markers()
                .iter()
                .any(|marker| lowered.contains(marker))
        })
        .map(|line| GuideRecommendation {
            kind: "recommendation".to_string(),
            content: line.to_string(),
        })
        .collect();

    let target = target_group()
        .captures(text)
        .map(|caps| caps[1].trim().to_string());

    let mut fields_found = 0;
    if !sections.is_empty() {
        fields_found += 1;
    }
    if !recommendations.is_empty() {
        fields_found += 1;
    }
    if target.is_some() {
        fields_found += 1;
    }

    let metrics = ExtractionMetrics {
        fields_expected: 3,
        fields_found,
        units_total: 0,
        units_normalized: 0,
    };

    let result = ParsedResult::DietGuide {
        sections,
        recommendations,
        target_group: target,
        raw_text: text.to_string(),
        quality_score: 0.0,
    };
    (result, metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUIDE: &str = "\
Dietary Guidelines
第一章 合理膳食
建议每天饮用300ml牛奶。
Adults should eat a variety of vegetables daily.
第二章 适量运动
目标人群：一般人群";

    #[test]
    fn sections_and_recommendations_are_found() {
        let (result, metrics) = extract(GUIDE);
        let ParsedResult::DietGuide {
            sections,
            recommendations,
            target_group,
            ..
        } = &result
        else {
            panic!("wrong variant");
        };
        assert!(sections.iter().any(|s| s.title.contains("第一章")));
        assert!(sections.iter().any(|s| s.title.contains("第二章")));
        assert!(recommendations.iter().any(|r| r.content.contains("300ml")));
        assert!(recommendations
            .iter()
            .any(|r| r.content.contains("variety of vegetables")));
        assert_eq!(target_group.as_deref(), Some("一般人群"));
        assert_eq!(metrics.fields_found, 3);
    }

    #[test]
    fn positions_follow_document_order() {
        let (result, _) = extract(GUIDE);
        let ParsedResult::DietGuide { sections, .. } = &result else {
            panic!("wrong variant");
        };
        let positions: Vec<usize> = sections.iter().map(|s| s.position).collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn raw_text_is_preserved() {
        let (result, _) = extract("plain prose only, nothing structured here.");
        let ParsedResult::DietGuide { raw_text, .. } = &result else {
            panic!("wrong variant");
        };
        assert!(raw_text.contains("plain prose"));
    }
}
