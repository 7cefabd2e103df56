//! PDF text-layer extraction, sheet classification, and table parsing.

mod rows;
mod sheet_index;
mod tables;
mod text_layer;

pub use rows::{parse_lines_with_regex, parse_table_rows, zoning_figures_from_text, RowParseOutcome};
pub use sheet_index::classify_pages;
pub use tables::{reconstruct_tables, ColumnField, ColumnMap, ReconstructedTable};
pub use text_layer::{extract_text_layer, PageText, TextItem, TextLayer, TextLayerError};
