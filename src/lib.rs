//! Dynamic UI compilation pipeline.
//!
//! Takes the raw text of a model-generated UI response, extracts the markup
//! and script files inside it, normalizes both onto fixed shapes, compiles
//! the script on a sandboxed Luau state, and materializes a live element tree
//! with its named elements wired back into the script environment. When only
//! the script is broken, the markup still renders statically.
//!
//! ```ignore
//! use uiflow::UiCompiler;
//!
//! let mut compiler = UiCompiler::new()?;
//! let result = compiler.compile_response(&model_output).await;
//! if let Some(root) = &result.root {
//!     println!("{}", serde_json::to_string_pretty(&root.snapshot())?);
//! }
//! ```

pub mod compiler;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod lua_api;
pub mod materialize;
pub mod parser;
pub mod pipeline;
pub mod provider;
pub mod rewrite;
pub mod view;

pub use compiler::{LoadedUnit, ScriptCompiler};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{classify, CompileResult, PipelineMode, UiCompiler};
pub use view::{Element, ElementHandle};

/// One-shot convenience: compiles a raw model response on a fresh compiler.
pub async fn compile_response(response: &str) -> PipelineResult<CompileResult> {
    let mut compiler = UiCompiler::new()?;
    Ok(compiler.compile_response(response).await)
}
