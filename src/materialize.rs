//! Object materialization.
//!
//! Evaluating a compiled unit yields the `DynamicView` module table; this
//! module turns that table into a live element tree. The order matters:
//! the shell root and the `View` global exist before `init` runs, markup is
//! grafted after `init` returns, named elements are wired next, and only then
//! does `post_init` run, so relocated constructor statements finally see the
//! elements they reference.

use std::collections::HashMap;

use mlua::{Function, Lua, Table, Value};
use tracing::{debug, warn};

use crate::compiler::LoadedUnit;
use crate::error::{PipelineError, PipelineResult};
use crate::parser::parse_markup;
use crate::rewrite::markup::{NamedElement, FORCED_ROOT_TAG};
use crate::view::{Element, ElementHandle};

/// A materialized view instance.
#[derive(Debug)]
pub struct Materialized {
    pub root: ElementHandle,
    /// The evaluated module table, holding the script's handlers.
    pub module: Table,
    /// Named elements wired into the module, by markup name.
    pub named_elements: HashMap<String, ElementHandle>,
}

/// Materializes a compiled unit. With markup, the full sequence runs:
/// construct, graft markup, wire named elements, `post_init`. Without markup
/// the script is standalone and `init` alone builds the content.
pub fn instantiate(
    lua: &Lua,
    unit: &LoadedUnit,
    markup: Option<&str>,
    named: &[NamedElement],
) -> PipelineResult<Materialized> {
    let module = match unit.evaluate()? {
        Value::Table(table) => table,
        _ => {
            return Err(PipelineError::Materialization(
                "No ContentView module found in compiled script".to_string(),
            ))
        }
    };
    let base: Option<String> = module.get("base").ok();
    if base.as_deref() != Some(FORCED_ROOT_TAG) {
        return Err(PipelineError::Materialization(
            "No ContentView module found in compiled script".to_string(),
        ));
    }

    let root = ElementHandle::new(Element::new(FORCED_ROOT_TAG));
    lua.globals().set("View", root.clone()).map_err(|e| {
        PipelineError::Materialization(format!("could not expose the root view: {e}"))
    })?;

    run_init(&module)?;

    if let Some(markup) = markup {
        let parsed = parse_markup(markup)
            .map_err(|e| PipelineError::Materialization(format!("Markup loading error: {e}")))?;
        root.apply(&parsed);

        let named_elements = wire_named_elements(lua, &module, &root, named)?;
        run_post_init(&module, unit.name());
        return Ok(Materialized {
            root,
            module,
            named_elements,
        });
    }

    Ok(Materialized {
        root,
        module,
        named_elements: HashMap::new(),
    })
}

fn run_init(module: &Table) -> PipelineResult<()> {
    let init: Function = module.get("init").map_err(|_| {
        PipelineError::Materialization(
            "Constructor error: no init function on the module table".to_string(),
        )
    })?;
    init.call::<()>(())
        .map_err(|e| PipelineError::Materialization(format!("Constructor execution failed: {e}")))
}

/// Binds each declared named element both onto the module table and as a
/// global, so handlers reach them either way. Elements the markup no longer
/// contains are skipped, not fatal.
fn wire_named_elements(
    lua: &Lua,
    module: &Table,
    root: &ElementHandle,
    named: &[NamedElement],
) -> PipelineResult<HashMap<String, ElementHandle>> {
    let fields: Option<Table> = module.get("fields").ok();
    let mut wired = HashMap::new();

    for element in named {
        if let Some(fields) = &fields {
            let declared: Value = fields.get(element.name.as_str()).unwrap_or(Value::Nil);
            if declared.is_nil() {
                debug!(name = %element.name, "named element not declared as a field, skipping");
                continue;
            }
        }

        let found = root.find_shallow(&element.name).or_else(|| {
            root.content()
                .and_then(|content| content.find_by_name(&element.name))
        });
        let Some(handle) = found else {
            debug!(name = %element.name, "named element missing from the rendered tree");
            continue;
        };

        module
            .set(element.name.as_str(), handle.clone())
            .map_err(|e| {
                PipelineError::Materialization(format!(
                    "could not wire element '{}': {e}",
                    element.name
                ))
            })?;
        lua.globals()
            .set(element.name.as_str(), handle.clone())
            .map_err(|e| {
                PipelineError::Materialization(format!(
                    "could not expose element '{}': {e}",
                    element.name
                ))
            })?;
        wired.insert(element.name.clone(), handle);
    }

    Ok(wired)
}

/// Deferred constructor statements run last. A failure here leaves a usable
/// static view behind, so it is logged and swallowed.
fn run_post_init(module: &Table, unit_name: &str) {
    let post_init: Option<Function> = module.get("post_init").ok();
    if let Some(post_init) = post_init {
        if let Err(e) = post_init.call::<()>(()) {
            warn!(unit = unit_name, "post_init failed: {e}");
        }
    }
}
