//! PDF content cleaning module

pub mod clean;
pub mod document;
pub mod inspect;
pub mod interpret;
pub mod objects;
pub mod page;
pub mod processor;

// Re-export commonly used items
pub use clean::{
    clean_page_contents, clean_stream_object, clean_type3, CleanStats, Cleaner, PostProcess, DEFAULT_MAX_DEPTH,
};
pub use document::{clean_document, clean_pdf, CleanOptions, CleanReport};
pub use inspect::{find_inherited_lookups, summarize_page, InheritedLookup, NestedKind, PageSummary};
pub use page::{Page, PageContents};
pub use processor::{new_pipeline, BufferProcessor, FilterProcessor, Processor};
