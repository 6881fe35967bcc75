//! Pipeline orchestration.
//!
//! [`UiCompiler`] ties the stages together: classify the input, rewrite
//! markup and script, compile, materialize, and fall back to a static render
//! when only the script is broken. The entry points are async because callers
//! sit on an async runtime; the work itself is synchronous.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::compiler::{LoadedUnit, ScriptCompiler};
use crate::error::{PipelineError, PipelineResult};
use crate::extract::{extract_files, CODE_BEHIND_FILE_KEY, MARKUP_FILE_KEY, SCRIPT_FILE_KEY};
use crate::fallback::render_markup_only;
use crate::materialize::instantiate;
use crate::rewrite::{
    collect_named_elements, rewrite_code_behind, rewrite_markup, rewrite_standalone,
};
use crate::view::ElementHandle;

/// How a pair of inputs will be compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// Markup plus a code-behind script.
    MarkupWithCode,
    /// A standalone script that builds its content programmatically.
    CodeOnly,
    /// Neither shape recognized.
    Invalid,
}

/// Outcome of one compilation run.
///
/// `success` with a populated `error_message` means the markup-only fallback
/// rendered: the view is visible but inert, and the message says why.
pub struct CompileResult {
    pub success: bool,
    pub error_message: Option<String>,
    pub root: Option<ElementHandle>,
    pub unit: Option<LoadedUnit>,
    /// The live module table, when the script materialized.
    pub module: Option<mlua::Table>,
    pub named_elements: HashMap<String, ElementHandle>,
}

impl CompileResult {
    fn succeeded(
        root: ElementHandle,
        unit: LoadedUnit,
        module: mlua::Table,
        named_elements: HashMap<String, ElementHandle>,
    ) -> Self {
        CompileResult {
            success: true,
            error_message: None,
            root: Some(root),
            unit: Some(unit),
            module: Some(module),
            named_elements,
        }
    }

    fn fallback(root: ElementHandle, message: String) -> Self {
        CompileResult {
            success: true,
            error_message: Some(message),
            root: Some(root),
            unit: None,
            module: None,
            named_elements: HashMap::new(),
        }
    }

    fn failed(error: PipelineError) -> Self {
        CompileResult {
            success: false,
            error_message: Some(error.to_string()),
            root: None,
            unit: None,
            module: None,
            named_elements: HashMap::new(),
        }
    }

    /// True when the view rendered without its script.
    pub fn is_fallback(&self) -> bool {
        self.success && self.error_message.is_some()
    }

    /// Invokes a handler on the module table by name, the way a host reacts
    /// to an interaction event.
    pub fn call_handler(&self, name: &str) -> PipelineResult<()> {
        let module = self.module.as_ref().ok_or_else(|| {
            PipelineError::Materialization("no live module to dispatch handlers on".to_string())
        })?;
        let handler: mlua::Function = module.get(name).map_err(|_| {
            PipelineError::Materialization(format!("no handler named '{name}' on the module"))
        })?;
        handler
            .call::<()>(())
            .map_err(|e| PipelineError::Materialization(format!("handler '{name}' failed: {e}")))
    }
}

/// Classifies the primary source plus an optional code-behind.
pub fn classify(primary: &str, code_behind: Option<&str>) -> PipelineMode {
    let primary = primary.trim();
    if primary.is_empty() {
        return PipelineMode::Invalid;
    }

    let looks_like_markup = primary.starts_with('<')
        || primary.contains("ContentView")
        || primary.contains("ContentPage");
    let looks_like_code = !primary.starts_with('<')
        && (primary.contains("function") || primary.contains("local") || primary.contains("require"));

    let has_code_behind = code_behind.is_some_and(|c| !c.trim().is_empty());
    if looks_like_markup && has_code_behind {
        PipelineMode::MarkupWithCode
    } else if looks_like_code && !has_code_behind {
        PipelineMode::CodeOnly
    } else {
        PipelineMode::Invalid
    }
}

pub struct UiCompiler {
    compiler: ScriptCompiler,
}

impl UiCompiler {
    pub fn new() -> PipelineResult<Self> {
        Ok(UiCompiler {
            compiler: ScriptCompiler::new()?,
        })
    }

    pub fn loaded_units(&self) -> usize {
        self.compiler.loaded_units()
    }

    /// Compiles one input pair, dispatching on its classified mode.
    pub async fn compile(&mut self, primary: &str, code_behind: Option<&str>) -> CompileResult {
        match classify(primary, code_behind) {
            PipelineMode::MarkupWithCode => {
                // classify guarantees code_behind is present and non-empty
                let code = code_behind.unwrap_or_default();
                self.compile_markup_with_code(primary, code).await
            }
            PipelineMode::CodeOnly => self.compile_code_only(primary).await,
            PipelineMode::Invalid => CompileResult::failed(PipelineError::InvalidInput),
        }
    }

    /// Extracts files from a raw model response and compiles them.
    pub async fn compile_response(&mut self, response: &str) -> CompileResult {
        let files = extract_files(response);

        if let Some(markup) = files.get(MARKUP_FILE_KEY) {
            let code = files
                .get(CODE_BEHIND_FILE_KEY)
                .or_else(|| files.get(SCRIPT_FILE_KEY));
            return self
                .compile(markup, code.map(String::as_str))
                .await;
        }
        if let Some(script) = files.get(SCRIPT_FILE_KEY) {
            return self.compile(script, None).await;
        }
        CompileResult::failed(PipelineError::InvalidInput)
    }

    /// The full pipeline for a markup/code pair. A bad script degrades to a
    /// markup-only render; bad markup is fatal.
    pub async fn compile_markup_with_code(&mut self, markup: &str, code: &str) -> CompileResult {
        let rewritten_markup = match rewrite_markup(markup) {
            Ok(m) => m,
            Err(e) => return CompileResult::failed(e),
        };
        let named = collect_named_elements(&rewritten_markup);

        let outcome = rewrite_code_behind(code, &named).and_then(|script| {
            let unit = self.compiler.compile(&script)?;
            let materialized = instantiate(self.compiler.lua(), &unit, Some(&rewritten_markup), &named)?;
            Ok((unit, materialized))
        });

        match outcome {
            Ok((unit, materialized)) => {
                info!(
                    unit = unit.name(),
                    wired = materialized.named_elements.len(),
                    "compiled markup with code-behind"
                );
                CompileResult::succeeded(
                    materialized.root,
                    unit,
                    materialized.module,
                    materialized.named_elements,
                )
            }
            Err(compile_err) => {
                warn!("code-behind failed, attempting markup-only fallback: {compile_err}");
                match render_markup_only(&rewritten_markup) {
                    Ok(root) => CompileResult::fallback(
                        root,
                        format!(
                            "Code-behind compilation failed: {compile_err}. \
                             Rendered markup-only (no interactivity)."
                        ),
                    ),
                    Err(fallback_err) => {
                        CompileResult::failed(PipelineError::CompilationAndFallback {
                            compile: compile_err.to_string(),
                            fallback: fallback_err.to_string(),
                        })
                    }
                }
            }
        }
    }

    /// Compiles a standalone script. There is no markup to fall back to, so
    /// every error is fatal.
    pub async fn compile_code_only(&mut self, code: &str) -> CompileResult {
        let outcome = rewrite_standalone(code).and_then(|script| {
            let unit = self.compiler.compile(&script)?;
            let materialized = instantiate(self.compiler.lua(), &unit, None, &[])?;
            Ok((unit, materialized))
        });

        match outcome {
            Ok((unit, materialized)) => {
                info!(unit = unit.name(), "compiled standalone script");
                CompileResult::succeeded(
                    materialized.root,
                    unit,
                    materialized.module,
                    materialized.named_elements,
                )
            }
            Err(e) => CompileResult::failed(PipelineError::Engine(format!(
                "Standalone script compilation error: {e}"
            ))),
        }
    }
}
