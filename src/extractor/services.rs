//! Keyword taxonomy for cleaning service categories.

use std::collections::BTreeSet;

/// Category name and the lowercase stems that indicate it.
pub const SERVICE_TAXONOMY: &[(&str, &[&str])] = &[
    (
        "office cleaning",
        &["biur", "biuro", "biura", "office", "powierzchnie biurowe"],
    ),
    ("home cleaning", &["dom", "domy", "mieszkani", "apartament"]),
    (
        "post-renovation cleaning",
        &["remont", "budow", "poremontow"],
    ),
    ("window washing", &["okn", "okien", "okna", "witryn"]),
    (
        "upholstery cleaning",
        &["prani", "tapicerk", "mebl", "dywany", "wykładzin"],
    ),
    (
        "industrial cleaning",
        &["przemysłow", "hal", "magazyn", "fabryk"],
    ),
    ("disinfection", &["dezynfekc", "odkażani", "sterylizacj"]),
];

/// Every category with at least one keyword occurring in `text`.
pub fn classify_services(text: &str) -> BTreeSet<String> {
    let text = text.to_lowercase();
    SERVICE_TAXONOMY
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(category, _)| category.to_string())
        .collect()
}
