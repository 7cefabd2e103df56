//! Sheet classification from title-block heuristics.
//!
//! Architectural plan sets label each sheet in a title block: a drawing
//! number ("Z-001", "A-101") and a drawing title ("ZONING ANALYSIS",
//! "3RD FLOOR PLAN"). We score each page type by weighted keyword and
//! pattern hits over the page text, capped at 1.0. Absence of signal
//! defaults to `Unknown` with low confidence.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{PageType, SheetIndexEntry, SheetIndexMethod};

use super::text_layer::PageText;

/// Drawing-number pattern: discipline letter(s), separator, sheet number.
static DRAWING_NO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*([A-Z]{1,3})[-. ]?(\d{1,3}(?:\.\d{1,2})?)\s*$").unwrap()
});

/// Weighted keyword evidence per page type. Scores accumulate and are
/// capped at 1.0.
static KEYWORD_WEIGHTS: LazyLock<Vec<(PageType, Regex, f64)>> = LazyLock::new(|| {
    vec![
        (
            PageType::ZoningSchedule,
            Regex::new(r"(?i)ZONING\s+(COMPLIANCE|ANALYSIS|SCHEDULE|CALCULATIONS?)").unwrap(),
            0.6,
        ),
        (
            PageType::ZoningSchedule,
            Regex::new(r"(?i)\b(FLOOR\s+AREA\s+RATIO|F\.?A\.?R\.?)\b").unwrap(),
            0.25,
        ),
        (
            PageType::UnitSchedule,
            Regex::new(r"(?i)(DWELLING\s+)?UNIT\s+(SCHEDULE|MIX|COUNT)").unwrap(),
            0.6,
        ),
        (
            PageType::UnitSchedule,
            Regex::new(r"(?i)\bBEDROOM\s+(TYPE|COUNT)\b").unwrap(),
            0.25,
        ),
        (
            PageType::FloorPlan,
            Regex::new(r"(?i)\b(FLOOR|CELLAR|ROOF)\s+PLAN\b").unwrap(),
            0.5,
        ),
        (
            PageType::CoverSheet,
            Regex::new(r"(?i)\b(COVER|TITLE)\s+SHEET\b").unwrap(),
            0.6,
        ),
        (
            PageType::CoverSheet,
            Regex::new(r"(?i)\bDRAWING\s+(LIST|INDEX)\b").unwrap(),
            0.3,
        ),
    ]
});

/// Drawing-number discipline prefixes that corroborate a page type.
fn discipline_bonus(prefix: &str, page_type: PageType) -> f64 {
    match (prefix, page_type) {
        ("Z" | "ZD", PageType::ZoningSchedule) => 0.3,
        ("A", PageType::FloorPlan) => 0.15,
        ("G" | "T", PageType::CoverSheet) => 0.2,
        _ => 0.0,
    }
}

/// Classify every page of the document.
pub fn classify_pages(pages: &[PageText]) -> Vec<SheetIndexEntry> {
    pages.iter().map(classify_page).collect()
}

/// The title block sits in the lower-right corner of a sheet; without
/// geometry for OCR'd text we approximate it as the trailing lines, but
/// score keywords over the whole page so schedules embedded mid-sheet
/// still register.
fn classify_page(page: &PageText) -> SheetIndexEntry {
    let text = &page.text;

    let (drawing_no, drawing_title) = title_block_fields(text);

    let mut best_type = PageType::Unknown;
    let mut best_score = 0.0f64;

    for candidate in [
        PageType::ZoningSchedule,
        PageType::UnitSchedule,
        PageType::FloorPlan,
        PageType::CoverSheet,
    ] {
        let mut score = 0.0;
        for (page_type, pattern, weight) in KEYWORD_WEIGHTS.iter() {
            if *page_type == candidate && pattern.is_match(text) {
                score += weight;
            }
        }
        if let Some(no) = &drawing_no {
            let prefix: String = no.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
            score += discipline_bonus(&prefix, candidate);
        }
        if score > best_score {
            best_score = score;
            best_type = candidate;
        }
    }

    // First page with no other signal is usually the cover.
    if best_type == PageType::Unknown && page.page_number == 1 && page.char_yield() > 0 {
        best_type = PageType::CoverSheet;
        best_score = 0.2;
    }

    SheetIndexEntry {
        page_number: page.page_number,
        drawing_no,
        drawing_title,
        page_type: best_type,
        confidence: best_score.min(1.0),
        method: SheetIndexMethod::PdfText,
    }
}

/// Pull a drawing number and the line following it (usually the title)
/// from the trailing region of the page text.
fn title_block_fields(text: &str) -> (Option<String>, Option<String>) {
    let lines: Vec<&str> = text.lines().collect();
    let tail_start = lines.len().saturating_sub(12);
    let tail = &lines[tail_start..];

    let mut drawing_no = None;
    let mut drawing_title = None;

    for (i, line) in tail.iter().enumerate() {
        if let Some(caps) = DRAWING_NO.captures(line) {
            drawing_no = Some(format!(
                "{}-{}",
                caps.get(1).map(|m| m.as_str()).unwrap_or(""),
                caps.get(2).map(|m| m.as_str()).unwrap_or("")
            ));
            // Title usually sits adjacent to the number in the block.
            drawing_title = tail
                .iter()
                .take(i)
                .rev()
                .map(|l| l.trim())
                .find(|l| l.len() > 4 && l.chars().filter(|c| c.is_ascii_uppercase()).count() > 3)
                .map(String::from);
        }
    }

    (drawing_no, drawing_title)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(number: u32, text: &str) -> PageText {
        PageText {
            page_number: number,
            text: text.to_string(),
            items: Vec::new(),
            page_height: 792.0,
        }
    }

    #[test]
    fn test_zoning_schedule_detected() {
        let p = page(
            2,
            "ZONING ANALYSIS\nLOT AREA: 10,000 SF\nFLOOR AREA RATIO (FAR): 3.44\n\nZ-001",
        );
        let entry = classify_page(&p);
        assert_eq!(entry.page_type, PageType::ZoningSchedule);
        assert!(entry.confidence >= 0.6, "confidence {}", entry.confidence);
        assert!(entry.is_recognizable());
        assert_eq!(entry.drawing_no.as_deref(), Some("Z-001"));
    }

    #[test]
    fn test_unit_schedule_detected() {
        let p = page(5, "DWELLING UNIT SCHEDULE\nUNIT  BEDROOM TYPE  AREA\nA-501");
        let entry = classify_page(&p);
        assert_eq!(entry.page_type, PageType::UnitSchedule);
        assert!(entry.confidence >= 0.6);
    }

    #[test]
    fn test_floor_plan_with_discipline_prefix() {
        let p = page(7, "3RD FLOOR PLAN\nSCALE: 1/8\" = 1'-0\"\nA-103");
        let entry = classify_page(&p);
        assert_eq!(entry.page_type, PageType::FloorPlan);
        assert!(entry.confidence >= 0.5);
    }

    #[test]
    fn test_empty_page_unknown() {
        let p = page(9, "");
        let entry = classify_page(&p);
        assert_eq!(entry.page_type, PageType::Unknown);
        assert!(entry.confidence < 0.3);
        assert!(!entry.is_recognizable());
    }

    #[test]
    fn test_first_page_defaults_to_cover() {
        let p = page(1, "123 MAIN STREET\nNEW BUILDING\nBROOKLYN NY");
        let entry = classify_page(&p);
        assert_eq!(entry.page_type, PageType::CoverSheet);
        // Weak default signal stays below the recipe threshold.
        assert!(entry.confidence < 0.3);
    }

    #[test]
    fn test_confidence_capped_at_one() {
        let p = page(
            3,
            "ZONING COMPLIANCE\nZONING ANALYSIS\nZONING SCHEDULE\nFAR: 3.44\nZONING CALCULATIONS\nZ-100",
        );
        let entry = classify_page(&p);
        assert!(entry.confidence <= 1.0);
    }
}
