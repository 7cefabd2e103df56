//! Data models for plan-set extraction.

mod extraction;
mod gates;
mod parcel;
mod sheet;

pub use extraction::{
    AiGuess, Allocation, BedroomType, ExtractedField, ExtractionMethod, ExtractionStatus,
    PdfExtraction, UnitRecord, UnitSource, UnitTotals, ZoningFields,
};
pub use gates::{Evidence, ExpectedRange, GateStatus, ValidationGate};
pub use parcel::{CrossCheckReport, ParcelContext};
pub use sheet::{ClassifiedTable, PageType, SheetIndexEntry, SheetIndexMethod, TableType};
