//! Document model: paragraphs, settings and the versioned store.

pub mod paragraph;
pub mod settings;
pub mod store;

pub use paragraph::{expand_macros, DocParagraph};
pub use settings::DocSettings;
pub use store::{ChangelogEntry, Document, DocumentStore, Operation, ParRef, Version};

/// Folder under which preamble documents are looked up, relative to each
/// ancestor folder of a document.
pub const PREAMBLE_FOLDER: &str = "templates/preambles";
