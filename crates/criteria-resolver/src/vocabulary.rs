/// Controlled vocabulary mapping prompt keywords to SNI classification
/// code prefixes. Matching is substring-based over the lowercased prompt;
/// the table order is the match order, so output stays deterministic.
pub struct IndustryEntry {
    pub keyword: &'static str,
    pub codes: &'static [&'static str],
}

pub static INDUSTRY_VOCABULARY: &[IndustryEntry] = &[
    IndustryEntry { keyword: "saas", codes: &["62010"] },
    IndustryEntry { keyword: "software", codes: &["62010", "62020"] },
    IndustryEntry { keyword: "it consulting", codes: &["62020", "62030"] },
    IndustryEntry { keyword: "it services", codes: &["62020", "62090"] },
    IndustryEntry { keyword: "manufacturing", codes: &["25", "27", "28"] },
    IndustryEntry { keyword: "industrial", codes: &["25", "28"] },
    IndustryEntry { keyword: "construction", codes: &["41", "42", "43"] },
    IndustryEntry { keyword: "logistics", codes: &["49", "52"] },
    IndustryEntry { keyword: "transport", codes: &["49"] },
    IndustryEntry { keyword: "wholesale", codes: &["46"] },
    IndustryEntry { keyword: "retail", codes: &["47"] },
    IndustryEntry { keyword: "e-commerce", codes: &["47910"] },
    IndustryEntry { keyword: "healthcare", codes: &["86"] },
    IndustryEntry { keyword: "food", codes: &["10"] },
    IndustryEntry { keyword: "automotive", codes: &["29", "45"] },
    IndustryEntry { keyword: "energy", codes: &["35"] },
    IndustryEntry { keyword: "real estate", codes: &["68"] },
    IndustryEntry { keyword: "engineering", codes: &["71120"] },
    IndustryEntry { keyword: "consulting", codes: &["70220"] },
    IndustryEntry { keyword: "security", codes: &["80"] },
    IndustryEntry { keyword: "education", codes: &["85"] },
];

/// All vocabulary entries whose keyword occurs in `text` (lowercased by the
/// caller).
pub fn match_industries(text: &str) -> Vec<&'static IndustryEntry> {
    INDUSTRY_VOCABULARY
        .iter()
        .filter(|entry| text.contains(entry.keyword))
        .collect()
}
