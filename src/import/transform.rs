//! Mapping of raw recipe records into [`RecipeDraft`]s.

use super::lookup::MealRecord;
use crate::content_store::{Ingredient, RecipeDraft};

/// Ingredient and measure slots are numbered 1 through this value.
pub const INGREDIENT_SLOTS: usize = 20;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("recipe record has no title")]
    MissingTitle,
}

/// Trimmed, non-empty string value of `key`. Nulls, blanks and non-string
/// values all count as absent.
fn text_field(record: &MealRecord, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn ingredients(record: &MealRecord) -> Vec<Ingredient> {
    (1..=INGREDIENT_SLOTS)
        .filter_map(|slot| {
            let name = text_field(record, &format!("strIngredient{}", slot))?;
            let measure = text_field(record, &format!("strMeasure{}", slot));
            Some(Ingredient { name, measure })
        })
        .collect()
}

/// Strips a leading "STEP n" label. Returns the remainder, which is empty
/// when the line held only the label.
fn strip_step_label(line: &str) -> &str {
    let Some(prefix) = line.get(..4) else {
        return line;
    };
    if !prefix.eq_ignore_ascii_case("step") {
        return line;
    }
    let rest = line[4..].trim_start();
    let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return line;
    }
    rest[digits..]
        .trim_start()
        .trim_start_matches(|c: char| c == '.' || c == ':' || c == ')' || c == '-')
        .trim()
}

fn split_steps(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| strip_step_label(line.trim()))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn split_tags(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn transform_meal(record: &MealRecord) -> Result<RecipeDraft, TransformError> {
    let title = text_field(record, "strMeal").ok_or(TransformError::MissingTitle)?;

    Ok(RecipeDraft {
        title,
        category: text_field(record, "strCategory"),
        area: text_field(record, "strArea"),
        instructions: text_field(record, "strInstructions")
            .map(|text| split_steps(&text))
            .unwrap_or_default(),
        ingredients: ingredients(record),
        tags: text_field(record, "strTags")
            .map(|text| split_tags(&text))
            .unwrap_or_default(),
        thumbnail_url: text_field(record, "strMealThumb"),
        source_url: text_field(record, "strSource"),
        video_url: text_field(record, "strYoutube"),
    })
}
