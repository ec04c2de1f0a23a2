//! Retrieval helpers driven by model calls.

pub mod sort_classifier;

pub use sort_classifier::{parse_sort_type, CompletionSortClassifier, SortClassifier};
