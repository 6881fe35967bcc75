use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Invalid input: provide markup with a code-behind script, or a standalone script")]
    InvalidInput,

    #[error("Markup must contain a ContentPage or ContentView root element")]
    MissingRootElement,

    #[error("Markup parse error: {0}")]
    MarkupParse(String),

    #[error("Script structure error: {0}")]
    InvalidScriptStructure(String),

    #[error("Compilation failed: {diagnostics}")]
    Compilation { diagnostics: String },

    #[error("Materialization failed: {0}")]
    Materialization(String),

    #[error("Markup-only fallback failed: {0}")]
    FallbackFailed(String),

    #[error("Code-behind compilation failed: {compile}. Markup-only fallback also failed: {fallback}")]
    CompilationAndFallback { compile: String, fallback: String },

    #[error("Script engine error: {0}")]
    Engine(String),
}

impl From<roxmltree::Error> for PipelineError {
    fn from(err: roxmltree::Error) -> Self {
        PipelineError::MarkupParse(err.to_string())
    }
}

impl From<mlua::Error> for PipelineError {
    fn from(err: mlua::Error) -> Self {
        PipelineError::Engine(err.to_string())
    }
}
