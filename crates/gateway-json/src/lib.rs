mod extractor;
mod pointer;

pub use extractor::{ExtractError, Extracted, Extractor};
pub use pointer::{Pointer, Token};
