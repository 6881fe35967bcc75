//! Source rewriting: markup normalization and code-behind coercion.
//!
//! Markup and script files produced by a model rarely match the shape the
//! rest of the pipeline expects. [`markup`] forces the markup onto a
//! `ContentView` root and collects its named elements; [`code`] coerces the
//! script onto the fixed `DynamicView` module shape; [`safety`] decides which
//! constructor statements must wait for the visual tree.

pub mod code;
pub mod markup;
pub mod safety;

pub use code::{rewrite_code_behind, rewrite_standalone};
pub use markup::{collect_named_elements, rewrite_markup, NamedElement};
pub use safety::{DefaultClassifier, Safety, StatementClassifier};
