pub mod escape;
pub mod reader;
pub mod sniff;

pub use escape::TextEscape;
pub use reader::{ImportOptions, IngestError};
