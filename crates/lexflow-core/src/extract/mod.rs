//! Map - anchor-text field extraction

mod extractor;

pub use extractor::{ExtractionResult, FieldExtractor};
