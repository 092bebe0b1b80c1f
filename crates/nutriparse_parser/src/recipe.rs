//! Recipe extraction: section split, ingredient tokenizer, numbered
//! instruction parsing.

use nutriparse_protocol::{Ingredient, ParsedResult};
use regex::Regex;
use std::sync::OnceLock;

use crate::nutrition::ExtractionMetrics;

fn ingredient_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^\s*(?:ingredients?|配料|材料|用料)\s*[：:]?\s*$").expect("header regex")
    })
}

fn instruction_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^\s*(?:instructions?|directions?|method|steps?|做法|步骤)\s*[：:]?\s*$")
            .expect("header regex")
    })
}

fn numbered_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // A dot directly followed by a digit is a decimal quantity
        // ("0.5 tsp"), not a step number.
        Regex::new(r"(?m)^\s*(?:\d+[.、)]\s+|step\s+\d+[:.]?\s*|第\s*\d+\s*步[：:]?\s*)(.+)$")
            .expect("numbered regex")
    })
}

fn ingredient_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // quantity, optional unit, name, optional ", preparation"
        Regex::new(
            r"(?ix)^\s*
              (?P<qty>\d+(?:\.\d+)?(?:\s*/\s*\d+)?)?\s*
              (?P<unit>cups?|tablespoons?|tbsp|teaspoons?|tsp|grams?|g|kg|ml|l|oz|pieces?|cloves?|个|克|杯|勺|片|瓣|只)?\s*
              (?P<name>[^,，]+?)
              (?:[,，]\s*(?P<prep>.+))?\s*$",
        )
        .expect("ingredient regex")
    })
}

fn meta_pattern(key: &'static str) -> Regex {
    Regex::new(&format!(r"(?im)^\s*(?:{key})[：:\s]+(.+)$")).expect("meta regex")
}

fn meta_patterns() -> &'static [(Regex, usize); 4] {
    static PATTERNS: OnceLock<[(Regex, usize); 4]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (meta_pattern(r"prep\s+time|preparation\s+time|准备时间"), 0),
            (meta_pattern(r"cook(?:ing)?\s+time|烹饪时间|烹调时间"), 1),
            (meta_pattern(r"servings?|serves|份数|人份"), 2),
            (meta_pattern(r"difficulty|难度"), 3),
        ]
    })
}

/// Parse one ingredient line into its parts. A line with no recognizable
/// quantity still yields a name-only ingredient.
pub fn parse_ingredient(line: &str) -> Option<Ingredient> {
    let line = line.trim().trim_start_matches(['-', '*', '•']).trim();
    if line.is_empty() {
        return None;
    }
    let caps = ingredient_line().captures(line)?;
    let name = caps.name("name")?.as_str().trim().to_string();
    if name.is_empty() {
        return None;
    }
    let quantity = caps
        .name("qty")
        .and_then(|m| parse_quantity(m.as_str()));
    Some(Ingredient {
        name,
        quantity,
        unit: caps.name("unit").map(|m| m.as_str().trim().to_string()),
        preparation: caps.name("prep").map(|m| m.as_str().trim().to_string()),
    })
}

fn parse_quantity(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if let Some((num, den)) = raw.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den == 0.0 {
            return None;
        }
        return Some(num / den);
    }
    raw.parse().ok()
}

/// Section boundaries: the text between the ingredients header and the
/// next header (or a numbered run) is the ingredient list.
fn section_lines<'a>(text: &'a str, header: &Regex) -> Vec<&'a str> {
    let Some(found) = header.find(text) else {
        return Vec::new();
    };
    let rest = &text[found.end()..];
    let mut lines = Vec::new();
    for line in rest.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if ingredient_header().is_match(trimmed) || instruction_header().is_match(trimmed) {
            break;
        }
        lines.push(trimmed);
    }
    lines
}

pub fn extract(text: &str) -> (ParsedResult, ExtractionMetrics) {
    let title = text
        .lines()
        .map(str::trim)
        .find(|line| {
            !line.is_empty()
                && !ingredient_header().is_match(line)
                && !instruction_header().is_match(line)
        })
        .map(|line| line.to_string());

    let ingredients: Vec<Ingredient> = section_lines(text, ingredient_header())
        .into_iter()
        .take_while(|line| !numbered_line().is_match(line))
        .filter_map(parse_ingredient)
        .collect();

    // Numbered lines anywhere after the instructions header; fall back to
    // numbered lines anywhere in the document.
    let instruction_region = instruction_header()
        .find(text)
        .map(|m| &text[m.end()..])
        .unwrap_or(text);
    let instructions: Vec<String> = numbered_line()
        .captures_iter(instruction_region)
        .map(|caps| caps[1].trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let mut meta: [Option<String>; 4] = [None, None, None, None];
    for (regex, slot) in meta_patterns() {
        if let Some(caps) = regex.captures(text) {
            meta[*slot] = Some(caps[1].trim().to_string());
        }
    }
    let [prep_time, cook_time, servings, difficulty] = meta;

    let mut fields_found = 0;
    if title.is_some() {
        fields_found += 1;
    }
    if !ingredients.is_empty() {
        fields_found += 1;
    }
    if !instructions.is_empty() {
        fields_found += 1;
    }
    fields_found += [&prep_time, &cook_time, &servings]
        .iter()
        .filter(|v| v.is_some())
        .count();

    let metrics = ExtractionMetrics {
        fields_expected: 6,
        fields_found,
        units_total: ingredients.len(),
        units_normalized: ingredients
            .iter()
            .filter(|i| i.quantity.is_some())
            .count(),
    };

    let result = ParsedResult::Recipe {
        title,
        ingredients,
        instructions,
        prep_time,
        cook_time,
        servings,
        difficulty,
        quality_score: 0.0,
    };
    (result, metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECIPE: &str = "\
Tomato Egg Stir-fry
Prep time: 10 minutes
Cook time: 5 minutes
Servings: 2

Ingredients
2 eggs, beaten
1 tomato, diced
0.5 tsp salt

Instructions
1. Whisk the eggs until foamy.
2. Stir-fry the tomato.
3. Combine and season.";

    #[test]
    fn extracts_full_recipe() {
        let (result, metrics) = extract(RECIPE);
        let ParsedResult::Recipe {
            title,
            ingredients,
            instructions,
            prep_time,
            cook_time,
            servings,
            ..
        } = &result
        else {
            panic!("wrong variant");
        };
        assert_eq!(title.as_deref(), Some("Tomato Egg Stir-fry"));
        assert_eq!(ingredients.len(), 3);
        assert_eq!(instructions.len(), 3);
        assert_eq!(prep_time.as_deref(), Some("10 minutes"));
        assert_eq!(cook_time.as_deref(), Some("5 minutes"));
        assert_eq!(servings.as_deref(), Some("2"));
        assert_eq!(metrics.fields_found, 6);
    }

    #[test]
    fn tokenizes_ingredients() {
        let ing = parse_ingredient("2 cups flour, sifted").expect("parses");
        assert_eq!(ing.quantity, Some(2.0));
        assert_eq!(ing.unit.as_deref(), Some("cups"));
        assert_eq!(ing.name, "flour");
        assert_eq!(ing.preparation.as_deref(), Some("sifted"));
    }

    #[test]
    fn fractional_quantities_parse() {
        let ing = parse_ingredient("1/2 tsp salt").expect("parses");
        assert_eq!(ing.quantity, Some(0.5));
        assert_eq!(ing.unit.as_deref(), Some("tsp"));
        assert_eq!(ing.name, "salt");
    }

    #[test]
    fn name_only_lines_still_count() {
        let ing = parse_ingredient("- a pinch of pepper").expect("parses");
        assert_eq!(ing.quantity, None);
        assert!(ing.name.contains("pepper"));
    }

    #[test]
    fn chinese_steps_are_numbered() {
        let text = "番茄炒蛋\n做法\n第1步：打散鸡蛋\n第2步：下锅翻炒";
        let (result, _) = extract(text);
        let ParsedResult::Recipe { instructions, .. } = &result else {
            panic!("wrong variant");
        };
        assert_eq!(instructions.len(), 2);
        assert_eq!(instructions[0], "打散鸡蛋");
    }
}
