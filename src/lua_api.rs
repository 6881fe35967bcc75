//! Built-in script APIs.
//!
//! Scripts get two globals beyond the Luau standard tables:
//!
//! - `json.encode(value)` / `json.decode(text)` for data interchange
//! - `view.create(tag, props?)` to build elements programmatically
//!
//! The rewriter's consolidated-import prelude binds these globals to locals,
//! so they must be installed before any unit runs.

use mlua::{Lua, LuaSerdeExt, Result as LuaResult, Table, Value};

use crate::view::{Element, ElementHandle};

pub fn register_all(lua: &Lua) -> LuaResult<()> {
    register_json(lua)?;
    register_view(lua)?;
    Ok(())
}

fn register_json(lua: &Lua) -> LuaResult<()> {
    let json = lua.create_table()?;

    json.set(
        "encode",
        lua.create_function(|lua, value: Value| {
            let data: serde_json::Value = lua.from_value(value)?;
            serde_json::to_string(&data).map_err(mlua::Error::external)
        })?,
    )?;

    json.set(
        "decode",
        lua.create_function(|lua, text: String| {
            let data: serde_json::Value =
                serde_json::from_str(&text).map_err(mlua::Error::external)?;
            lua.to_value(&data)
        })?,
    )?;

    lua.globals().set("json", json)
}

fn register_view(lua: &Lua) -> LuaResult<()> {
    let view = lua.create_table()?;

    view.set(
        "create",
        lua.create_function(|_, (tag, props): (String, Option<Table>)| {
            let handle = ElementHandle::new(Element::new(tag));
            if let Some(props) = props {
                for pair in props.pairs::<String, Value>() {
                    let (key, value) = pair?;
                    apply_prop(&handle, &key, value)?;
                }
            }
            Ok(handle)
        })?,
    )?;

    lua.globals().set("view", view)
}

fn apply_prop(handle: &ElementHandle, key: &str, value: Value) -> LuaResult<()> {
    match value {
        Value::String(s) if key == "Name" => handle.set_name(s.to_str()?.to_string()),
        Value::String(s) => handle.set(key, s.to_str()?.to_string()),
        Value::Integer(n) => handle.set(key, n.to_string()),
        Value::Number(n) => handle.set(key, n.to_string()),
        Value::Boolean(b) => handle.set(key, b.to_string()),
        Value::Nil => {}
        other => {
            return Err(mlua::Error::runtime(format!(
                "unsupported value for property '{}': {}",
                key,
                other.type_name()
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_lua() -> Lua {
        let lua = Lua::new();
        register_all(&lua).unwrap();
        lua
    }

    #[test]
    fn test_json_round_trip() {
        let lua = fresh_lua();
        let encoded: String = lua
            .load(r#"return json.encode({ count = 3 })"#)
            .eval()
            .unwrap();
        assert_eq!(encoded, r#"{"count":3}"#);

        let count: i64 = lua
            .load(r#"return json.decode('{"count": 3}').count"#)
            .eval()
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_view_create_builds_an_element() {
        let lua = fresh_lua();
        let handle: ElementHandle = lua
            .load(r#"return view.create("Label", { Name = "Title", Text = "hi", FontSize = 24 })"#)
            .eval()
            .unwrap();
        assert_eq!(handle.tag(), "Label");
        assert_eq!(handle.name().as_deref(), Some("Title"));
        assert_eq!(handle.get("Text").as_deref(), Some("hi"));
        assert_eq!(handle.get("FontSize").as_deref(), Some("24"));
    }

    #[test]
    fn test_created_elements_nest() {
        let lua = fresh_lua();
        let root: ElementHandle = lua
            .load(
                r#"
                local root = view.create("VerticalStackLayout")
                root:add(view.create("Label", { Name = "A" }))
                root:add(view.create("Label", { Name = "B" }))
                return root
                "#,
            )
            .eval()
            .unwrap();
        assert_eq!(root.child_count(), 2);
        assert!(root.find_by_name("B").is_some());
    }
}
