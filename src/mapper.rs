//! Mapping from raw material labels to disposal categories.
//!
//! `map` is total: any label yields a result. Labels outside the known
//! material table land in `Trash` with the generic recommendations.

use crate::types::{Category, ClassificationResult};

const RECYCLABLE_MATERIALS: [&str; 5] = ["battery", "glass", "metal", "paper", "plastic"];

const COMPOSTABLE_MATERIAL: &str = "organic";

const BATTERY_TIPS: [&str; 4] = [
    "Never put batteries in household trash or curbside recycling",
    "Tape the terminals of lithium batteries before drop-off",
    "Take batteries to a designated collection point or retailer take-back bin",
    "Store used batteries in a cool, dry container until drop-off",
];

const GLASS_TIPS: [&str; 4] = [
    "Rinse the container to remove food or liquid residue",
    "Remove metal lids and corks and recycle them separately",
    "Do not include broken window glass, mirrors or ceramics",
    "Place in the glass recycling bin or bottle bank",
];

const METAL_TIPS: [&str; 4] = [
    "Rinse cans to remove food residue",
    "Crush aluminum cans to save space if your program allows it",
    "Keep aerosol cans separate unless they are completely empty",
    "Place in the metal or mixed recycling bin",
];

const PAPER_TIPS: [&str; 4] = [
    "Keep paper clean and dry",
    "Remove plastic windows, tape and staples where possible",
    "Flatten cardboard boxes before recycling",
    "Do not recycle greasy or food-soiled paper",
];

const PLASTIC_TIPS: [&str; 4] = [
    "Clean the item before recycling",
    "Remove any labels or caps",
    "Check the resin code against local recycling guidelines",
    "Place in the appropriate recycling bin",
];

const GENERIC_TIPS: [&str; 4] = [
    "Dispose in general waste bin",
    "Consider if item can be repaired first",
    "Look for specialized disposal programs",
    "Minimize similar purchases in future",
];

/// Map a raw `(label, confidence)` pair onto the canonical result.
///
/// Lookup is case-insensitive; the displayed material keeps a capitalized
/// form of the label (`"GLASS"` and `"glass"` both display as `"Glass"`).
pub fn map(label: &str, confidence: f32) -> ClassificationResult {
    let trimmed = label.trim();
    let normalized = trimmed.to_lowercase();

    ClassificationResult {
        category: category_for(&normalized),
        confidence,
        material: display_name(trimmed),
        recommendations: recommendations_for(&normalized)
            .iter()
            .map(|tip| tip.to_string())
            .collect(),
    }
}

/// Category for an already-lowercased label.
pub fn category_for(normalized: &str) -> Category {
    if RECYCLABLE_MATERIALS.contains(&normalized) {
        Category::Recyclable
    } else if normalized == COMPOSTABLE_MATERIAL {
        Category::Compostable
    } else {
        Category::Trash
    }
}

fn recommendations_for(normalized: &str) -> &'static [&'static str; 4] {
    match normalized {
        "battery" => &BATTERY_TIPS,
        "glass" => &GLASS_TIPS,
        "metal" => &METAL_TIPS,
        "paper" => &PAPER_TIPS,
        "plastic" => &PLASTIC_TIPS,
        _ => &GENERIC_TIPS,
    }
}

fn display_name(label: &str) -> Option<String> {
    let mut chars = label.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect())
}
