//! # WastePro Retrieval
//!
//! The ingest half of the system: file persistence, the page-extraction
//! seam, LLM-driven fact/concept extraction, and the page-by-page document
//! ingest agent that feeds the knowledge graph.

pub mod error;
pub mod extractor;
pub mod file_service;
pub mod pages;
pub mod pdf_retriever;

pub use error::{RetrievalError, RetrievalResult};
pub use extractor::{assemble_triplets, FactConceptExtractor, ORPHAN_CONCEPT};
pub use file_service::{FileService, TOPIC_FILE_UPLOAD};
pub use pages::{FixedPages, PageExtractor, TextPages};
pub use pdf_retriever::{
    locate_sections, PdfRetriever, TocNode, TOPIC_FILE_UPLOAD as TOPIC_PDF_FILE_UPLOAD,
    TOPIC_RETRIEVED,
};
