//! Row parsing: reconstructed table rows and raw text lines into unit
//! records and zoning figures.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{Allocation, BedroomType, ExtractionMethod, UnitRecord, UnitSource};

use super::tables::{ColumnField, ReconstructedTable};

/// Tolerance when cross-checking a totals row against parsed row count.
pub const TOTALS_ROW_TOLERANCE: usize = 2;

static BEDROOM_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(STUDIO|STU|0\s*BR|([1-9])\s*-?\s*(?:BR|BED(?:ROOM)?S?))\b").unwrap()
});

static AREA_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b([\d,]{2,8}(?:\.\d+)?)\s*(?:SF|S\.F\.|SQ\.?\s*FT\.?)\b").unwrap());

static AMI_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{2,3})\s*%\s*(?:AMI)?\b").unwrap());

static UNIT_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:UNIT|APT\.?)\s*#?\s*([A-Z]?\d{1,4}[A-Z]?)\b").unwrap());

static TOTALS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*TOTAL(S)?\b").unwrap());

static NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d,]+(?:\.\d+)?)").unwrap());

/// Zoning figure patterns over raw page text. Label first, number after.
static LOT_AREA_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)LOT\s+AREA\s*[:=]?\s*([\d,]+(?:\.\d+)?)\s*(?:SF|S\.F\.)?").unwrap()
});
static FAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:RESIDENTIAL\s+)?(?:F\.?A\.?R\.?|FLOOR\s+AREA\s+RATIO)\s*[:=]?\s*(\d{1,2}(?:\.\d{1,3})?)").unwrap()
});
static ZFA_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)ZONING\s+FLOOR\s+AREA\s*[:=]?\s*([\d,]+(?:\.\d+)?)\s*(?:SF|S\.F\.)?").unwrap()
});

/// Labels whose SF figures describe the parcel or the building, never a
/// dwelling unit. Lines carrying one are excluded from the line fallback.
static FIGURE_LABEL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(LOT\s+AREA|ZONING\s+FLOOR\s+AREA|(?:GROSS\s+)?BUILDING\s+AREA|FLOOR\s+AREA\s+RATIO)\b")
        .unwrap()
});

fn parse_number(s: &str) -> Option<f64> {
    s.replace(',', "").trim().parse().ok()
}

fn parse_bedroom(s: &str) -> Option<BedroomType> {
    let caps = BEDROOM_PATTERN.captures(s)?;
    let whole = caps.get(1)?.as_str().to_uppercase();
    if whole.starts_with("STU") || whole.starts_with('0') {
        return Some(BedroomType::Studio);
    }
    match caps.get(2).and_then(|m| m.as_str().parse::<u8>().ok()) {
        Some(1) => Some(BedroomType::OneBr),
        Some(2) => Some(BedroomType::TwoBr),
        Some(3) => Some(BedroomType::ThreeBr),
        Some(n) if n >= 4 => Some(BedroomType::FourBrPlus),
        _ => None,
    }
}

fn parse_allocation(s: &str) -> Allocation {
    let upper = s.to_uppercase();
    if upper.contains("MIH") {
        Allocation::MihRestricted
    } else if upper.contains("AFFORD") || upper.contains("AMI") {
        Allocation::Affordable
    } else if upper.contains("MARKET") || upper.contains("MKT") {
        Allocation::Market
    } else {
        Allocation::Unknown
    }
}

/// Result of parsing one table (or one page of raw lines).
#[derive(Debug, Default)]
pub struct RowParseOutcome {
    pub records: Vec<UnitRecord>,
    /// Unit count declared by a totals row, if one was present.
    pub declared_total: Option<usize>,
    /// Rows that matched no mapped column and were dropped.
    pub dropped_rows: usize,
    pub warnings: Vec<String>,
}

impl RowParseOutcome {
    /// Whether the declared totals row disagrees with the parsed count
    /// beyond tolerance. Lowers page confidence, never discards rows.
    pub fn totals_conflict(&self) -> bool {
        match self.declared_total {
            Some(declared) => declared.abs_diff(self.records.len()) > TOTALS_ROW_TOLERANCE,
            None => false,
        }
    }
}

/// Parse unit records out of a reconstructed table.
///
/// A row yields a record only if the column mapping produced at least a
/// bedroom-type or area signal; other rows are dropped with a warning.
pub fn parse_table_rows(table: &ReconstructedTable) -> RowParseOutcome {
    let mut outcome = RowParseOutcome::default();
    let map = &table.column_map;

    for row in &table.rows {
        let raw = row.raw();

        if TOTALS_PATTERN.is_match(&raw) {
            // Prefer a count cell aligned to the unit-id column, else the
            // first integer in the row.
            outcome.declared_total = row
                .cells
                .iter()
                .filter_map(|c| NUMBER_PATTERN.captures(&c.text))
                .filter_map(|caps| parse_number(caps.get(1)?.as_str()))
                .map(|n| n as usize)
                .next();
            continue;
        }

        let mut unit_id = None;
        let mut floor = None;
        let mut bedroom_type = None;
        let mut allocation = Allocation::Unknown;
        let mut area_sf = None;
        let mut ami_band = None;

        for cell in &row.cells {
            match map.field_for(cell.x) {
                Some(ColumnField::UnitId) => unit_id = Some(cell.text.clone()),
                Some(ColumnField::Floor) => floor = Some(cell.text.clone()),
                Some(ColumnField::BedroomType) => {
                    bedroom_type = parse_bedroom(&cell.text).or(bedroom_type)
                }
                Some(ColumnField::AreaSf) => area_sf = parse_number(&cell.text).or(area_sf),
                Some(ColumnField::Allocation) => allocation = parse_allocation(&cell.text),
                Some(ColumnField::AmiBand) => {
                    ami_band = AMI_PATTERN
                        .captures(&cell.text)
                        .and_then(|c| c.get(1))
                        .and_then(|m| m.as_str().parse().ok())
                        .or_else(|| cell.text.trim_end_matches('%').trim().parse().ok())
                }
                None => {}
            }
        }

        if ami_band.is_some() && allocation == Allocation::Unknown {
            allocation = Allocation::Affordable;
        }

        if bedroom_type.is_none() && area_sf.is_none() {
            outcome.dropped_rows += 1;
            continue;
        }

        outcome.records.push(UnitRecord {
            unit_id,
            floor,
            bedroom_type: bedroom_type.unwrap_or(BedroomType::Unknown),
            allocation,
            area_sf,
            ami_band,
            source: UnitSource {
                page: table.page_number,
                method: ExtractionMethod::TextTable,
                evidence: raw,
            },
        });
    }

    if outcome.dropped_rows > 0 {
        outcome.warnings.push(format!(
            "page {}: dropped {} rows matching no mapped column",
            table.page_number, outcome.dropped_rows
        ));
    }
    if outcome.totals_conflict() {
        outcome.warnings.push(format!(
            "page {}: totals row declares {} units but {} rows parsed",
            table.page_number,
            outcome.declared_total.unwrap_or(0),
            outcome.records.len()
        ));
    }

    outcome
}

/// Line-level regex fallback over raw text, for pages with no table
/// structure (including OCR output). Lower-trust method.
pub fn parse_lines_with_regex(
    page_number: u32,
    text: &str,
    method: ExtractionMethod,
) -> RowParseOutcome {
    let mut outcome = RowParseOutcome::default();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if TOTALS_PATTERN.is_match(line) {
            if let Some(n) = NUMBER_PATTERN
                .captures(line)
                .and_then(|c| c.get(1).map(|m| m.as_str().to_string()))
                .and_then(|s| parse_number(&s))
            {
                outcome.declared_total = Some(n as usize);
            }
            continue;
        }

        // Zoning-figure lines carry SF numbers that are not unit areas.
        if FIGURE_LABEL_PATTERN.is_match(line) {
            continue;
        }

        let bedroom_type = parse_bedroom(line);
        let area_sf = AREA_PATTERN
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| parse_number(m.as_str()));

        // A line must carry a bedroom or area signal to count as a unit.
        if bedroom_type.is_none() && area_sf.is_none() {
            continue;
        }

        let unit_id = UNIT_ID_PATTERN
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        let ami_band = AMI_PATTERN
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());
        let mut allocation = parse_allocation(line);
        if ami_band.is_some() && allocation == Allocation::Unknown {
            allocation = Allocation::Affordable;
        }

        outcome.records.push(UnitRecord {
            unit_id,
            floor: None,
            bedroom_type: bedroom_type.unwrap_or(BedroomType::Unknown),
            allocation,
            area_sf,
            ami_band,
            source: UnitSource {
                page: page_number,
                method,
                evidence: line.to_string(),
            },
        });
    }

    outcome
}

/// Zoning figures parsed out of raw page text: (lot area, residential FAR,
/// zoning floor area).
pub fn zoning_figures_from_text(text: &str) -> (Option<f64>, Option<f64>, Option<f64>) {
    let lot_area = LOT_AREA_PATTERN
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_number(m.as_str()));
    let far = FAR_PATTERN
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_number(m.as_str()))
        .filter(|v| *v > 0.0 && *v < 20.0);
    let zfa = ZFA_PATTERN
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_number(m.as_str()));
    (lot_area, far, zfa)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::text_layer::{PageText, TextItem};
    use crate::pdf::tables::reconstruct_tables;

    fn item(text: &str, x: f32, y: f32) -> TextItem {
        TextItem {
            text: text.to_string(),
            x,
            y,
        }
    }

    fn schedule_table() -> ReconstructedTable {
        let items = vec![
            item("UNIT", 50.0, 700.0),
            item("BR", 150.0, 700.0),
            item("AREA", 250.0, 700.0),
            item("AMI", 350.0, 700.0),
            item("2A", 50.0, 685.0),
            item("1BR", 150.0, 685.0),
            item("650", 250.0, 685.0),
            item("60%", 350.0, 685.0),
            item("2B", 50.0, 670.0),
            item("STUDIO", 150.0, 670.0),
            item("480", 250.0, 670.0),
            item("TOTAL", 50.0, 655.0),
            item("2", 150.0, 655.0),
        ];
        let page = PageText {
            page_number: 5,
            text: String::new(),
            items,
            page_height: 792.0,
        };
        reconstruct_tables(&page).remove(0)
    }

    #[test]
    fn test_parse_table_rows() {
        let outcome = parse_table_rows(&schedule_table());
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.declared_total, Some(2));
        assert!(!outcome.totals_conflict());

        let first = &outcome.records[0];
        assert_eq!(first.unit_id.as_deref(), Some("2A"));
        assert_eq!(first.bedroom_type, BedroomType::OneBr);
        assert_eq!(first.area_sf, Some(650.0));
        assert_eq!(first.ami_band, Some(60));
        assert_eq!(first.allocation, Allocation::Affordable);
        assert_eq!(first.source.method, ExtractionMethod::TextTable);

        assert_eq!(outcome.records[1].bedroom_type, BedroomType::Studio);
    }

    #[test]
    fn test_totals_conflict_beyond_tolerance() {
        let outcome = RowParseOutcome {
            records: Vec::new(),
            declared_total: Some(5),
            dropped_rows: 0,
            warnings: Vec::new(),
        };
        assert!(outcome.totals_conflict());

        let outcome = RowParseOutcome {
            declared_total: Some(2),
            ..Default::default()
        };
        // abs diff 2 is within tolerance.
        assert!(!outcome.totals_conflict());
    }

    #[test]
    fn test_parse_lines_with_regex() {
        let text = "UNIT 3A  2BR  850 SF  MARKET\nUNIT 3B  STUDIO  475 SF  60% AMI\nGENERAL NOTE: SEE A-101\nTOTAL: 2 UNITS";
        let outcome = parse_lines_with_regex(7, text, ExtractionMethod::TextRegex);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.declared_total, Some(2));

        let a = &outcome.records[0];
        assert_eq!(a.unit_id.as_deref(), Some("3A"));
        assert_eq!(a.bedroom_type, BedroomType::TwoBr);
        assert_eq!(a.allocation, Allocation::Market);

        let b = &outcome.records[1];
        assert_eq!(b.bedroom_type, BedroomType::Studio);
        assert_eq!(b.ami_band, Some(60));
        assert_eq!(b.allocation, Allocation::Affordable);
    }

    #[test]
    fn test_zoning_figure_lines_are_not_units() {
        let text = "ZONING ANALYSIS\nLOT AREA: 10,000 SF\nRESIDENTIAL FAR: 3.44\nZONING FLOOR AREA: 34,400 SF";
        let outcome = parse_lines_with_regex(2, text, ExtractionMethod::TextRegex);
        assert!(outcome.records.is_empty(), "records: {:?}", outcome.records);
    }

    #[test]
    fn test_figure_lines_skipped_among_unit_lines() {
        let text = "LOT AREA: 10,000 SF AS PER SURVEY\nUNIT 2A  1BR  645 SF\nUNIT 2B  2BR  910 SF\nGROSS BUILDING AREA: 36,500 SF";
        let outcome = parse_lines_with_regex(2, text, ExtractionMethod::TextRegex);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].unit_id.as_deref(), Some("2A"));
        assert_eq!(outcome.records[1].unit_id.as_deref(), Some("2B"));
    }

    #[test]
    fn test_line_without_signal_skipped() {
        let outcome =
            parse_lines_with_regex(1, "SCALE: 1/8\" = 1'-0\"", ExtractionMethod::TextRegex);
        assert!(outcome.records.is_empty());
    }

    #[test]
    fn test_zoning_figures() {
        let text = "ZONING ANALYSIS\nLOT AREA: 10,000 SF\nRESIDENTIAL FAR: 3.44\nZONING FLOOR AREA: 34,400 SF";
        let (lot, far, zfa) = zoning_figures_from_text(text);
        assert_eq!(lot, Some(10_000.0));
        assert_eq!(far, Some(3.44));
        assert_eq!(zfa, Some(34_400.0));
    }

    #[test]
    fn test_bedroom_variants() {
        assert_eq!(parse_bedroom("STUDIO"), Some(BedroomType::Studio));
        assert_eq!(parse_bedroom("1 BR"), Some(BedroomType::OneBr));
        assert_eq!(parse_bedroom("3-BEDROOM"), Some(BedroomType::ThreeBr));
        assert_eq!(parse_bedroom("4 BR"), Some(BedroomType::FourBrPlus));
        assert_eq!(parse_bedroom("LIVING ROOM"), None);
    }
}
