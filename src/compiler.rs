//! Script compilation on a sandboxed Luau state.
//!
//! One [`ScriptCompiler`] owns one Lua state for its whole lifetime. Every
//! rewritten script compiles into a fresh, uniquely named [`LoadedUnit`]
//! (chunks are never reloaded in place, so stale state from a previous
//! iteration cannot leak into the next one). Units accumulate in a registry
//! that only grows; a preview session recompiles dozens of times and each
//! compile must stay independent.

use mlua::{Function, Lua, Value, Variadic};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::lua_api;

/// Hard allocation ceiling for one script state.
pub const LUA_MEMORY_LIMIT_BYTES: usize = 1024 * 1024;

/// Globals removed from script reach. `os` stays because `os.time`/`os.clock`
/// are part of the allowed surface.
const BLOCKED_GLOBALS: &[&str] = &["io", "require", "loadfile", "dofile", "debug"];

/// A compiled script chunk, ready to evaluate.
#[derive(Clone, Debug)]
pub struct LoadedUnit {
    name: String,
    function: Function,
}

impl LoadedUnit {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the chunk and returns whatever it returns, normally the module table.
    pub fn evaluate(&self) -> PipelineResult<Value> {
        self.function
            .call(())
            .map_err(|e| PipelineError::Materialization(format!("script evaluation failed: {e}")))
    }
}

pub struct ScriptCompiler {
    lua: Lua,
    loaded: Vec<LoadedUnit>,
}

impl ScriptCompiler {
    pub fn new() -> PipelineResult<Self> {
        Ok(ScriptCompiler {
            lua: create_script_state()?,
            loaded: Vec::new(),
        })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Number of units compiled on this state so far.
    pub fn loaded_units(&self) -> usize {
        self.loaded.len()
    }

    /// Compiles a rewritten script into a new uniquely named unit. Syntax
    /// errors surface as compilation diagnostics instead of engine errors.
    pub fn compile(&mut self, source: &str) -> PipelineResult<LoadedUnit> {
        let name = format!("DynamicView_{}", Uuid::new_v4().simple());
        let function = self
            .lua
            .load(source)
            .set_name(&name)
            .into_function()
            .map_err(|e| PipelineError::Compilation {
                diagnostics: diagnostics(&e),
            })?;
        debug!(unit = %name, bytes = source.len(), "compiled script unit");

        let unit = LoadedUnit { name, function };
        self.loaded.push(unit.clone());
        Ok(unit)
    }
}

fn diagnostics(err: &mlua::Error) -> String {
    match err {
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Builds the sandboxed state scripts run on: Luau sandbox mode, a memory
/// ceiling, dangerous globals blocked, `print` routed to the log, and the
/// built-in `json`/`view` APIs installed.
pub fn create_script_state() -> PipelineResult<Lua> {
    let lua = Lua::new();

    if let Err(e) = lua.sandbox(true) {
        warn!("could not enable Luau sandbox mode: {e}");
    }
    lua.set_memory_limit(LUA_MEMORY_LIMIT_BYTES)?;

    for name in BLOCKED_GLOBALS {
        let global = *name;
        let blocker = lua.create_function(move |_, _: Variadic<Value>| -> mlua::Result<()> {
            Err(mlua::Error::runtime(format!(
                "'{global}' is not available to dynamic scripts"
            )))
        })?;
        lua.globals().set(global, blocker)?;
    }

    let print = lua.create_function(|lua, args: Variadic<Value>| {
        let parts: Vec<String> = args
            .iter()
            .map(|v| {
                lua.coerce_string(v.clone())
                    .ok()
                    .flatten()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| v.type_name().to_string())
            })
            .collect();
        debug!(target: "script", "{}", parts.join("\t"));
        Ok(())
    })?;
    lua.globals().set("print", print)?;

    lua_api::register_all(&lua)?;
    Ok(lua)
}
