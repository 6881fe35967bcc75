//! Mutable visual element tree.
//!
//! The pipeline does not own a layout engine; it produces a generic object
//! graph the host presentation layer renders. Elements are shared through
//! [`ElementHandle`] (reference-counted, interior-mutable) so the same node can
//! be held by the host, the materialized result, and the Lua script
//! environment at once. Handles are exposed to Lua as userdata: property reads
//! and writes go through `__index`/`__newindex`, tree edits through
//! `add`/`remove`/`clear`, lookup through `find_by_name`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use mlua::{FromLua, Lua, MetaMethod, UserData, UserDataMethods, Value};

/// A single node of the visual tree.
#[derive(Debug, Clone, Default)]
pub struct Element {
    pub tag: String,
    /// Stable identifier from the markup `name` attribute, if any.
    pub name: Option<String>,
    pub attributes: BTreeMap<String, String>,
    /// Inline text content from the markup, if any.
    pub text: Option<String>,
    pub children: Vec<ElementHandle>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Element {
            tag: tag.into(),
            ..Element::default()
        }
    }
}

/// Shared handle to a live element.
#[derive(Clone)]
pub struct ElementHandle(Rc<RefCell<Element>>);

impl ElementHandle {
    pub fn new(element: Element) -> Self {
        ElementHandle(Rc::new(RefCell::new(element)))
    }

    pub fn tag(&self) -> String {
        self.0.borrow().tag.clone()
    }

    pub fn name(&self) -> Option<String> {
        self.0.borrow().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.0.borrow_mut().name = Some(name.into());
    }

    pub fn text(&self) -> Option<String> {
        self.0.borrow().text.clone()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.0.borrow().attributes.get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.0
            .borrow_mut()
            .attributes
            .insert(key.into(), value.into());
    }

    pub fn remove_attribute(&self, key: &str) -> Option<String> {
        self.0.borrow_mut().attributes.remove(key)
    }

    pub fn add_child(&self, child: ElementHandle) {
        self.0.borrow_mut().children.push(child);
    }

    /// Removes the first child with the given name. Returns true if one was removed.
    pub fn remove_child_by_name(&self, name: &str) -> bool {
        let mut el = self.0.borrow_mut();
        if let Some(idx) = el
            .children
            .iter()
            .position(|c| c.name().as_deref() == Some(name))
        {
            el.children.remove(idx);
            return true;
        }
        false
    }

    /// Removes a specific child by identity. Returns true if it was present.
    pub fn remove_child(&self, child: &ElementHandle) -> bool {
        let mut el = self.0.borrow_mut();
        if let Some(idx) = el.children.iter().position(|c| Rc::ptr_eq(&c.0, &child.0)) {
            el.children.remove(idx);
            return true;
        }
        false
    }

    pub fn clear_children(&self) {
        self.0.borrow_mut().children.clear();
    }

    pub fn children(&self) -> Vec<ElementHandle> {
        self.0.borrow().children.clone()
    }

    pub fn child_count(&self) -> usize {
        self.0.borrow().children.len()
    }

    /// The primary content slot: the first child, when present.
    pub fn content(&self) -> Option<ElementHandle> {
        self.0.borrow().children.first().cloned()
    }

    /// Name lookup at the root level only: this element or a direct child.
    pub fn find_shallow(&self, name: &str) -> Option<ElementHandle> {
        if self.name().as_deref() == Some(name) {
            return Some(self.clone());
        }
        self.0
            .borrow()
            .children
            .iter()
            .find(|c| c.name().as_deref() == Some(name))
            .cloned()
    }

    /// Recursive name lookup over the whole subtree, depth-first.
    pub fn find_by_name(&self, name: &str) -> Option<ElementHandle> {
        if self.name().as_deref() == Some(name) {
            return Some(self.clone());
        }
        for child in self.0.borrow().children.iter() {
            if let Some(found) = child.find_by_name(name) {
                return Some(found);
            }
        }
        None
    }

    /// Grafts another element onto this one in place: tag, name, attributes,
    /// text, and children are all taken from `other`. Used when markup is
    /// applied to an already-constructed instance.
    pub fn apply(&self, other: &ElementHandle) {
        let src = other.0.borrow().clone();
        *self.0.borrow_mut() = src;
    }

    /// Deep JSON snapshot of the subtree, for logs and the CLI.
    pub fn snapshot(&self) -> serde_json::Value {
        let el = self.0.borrow();
        serde_json::json!({
            "tag": el.tag,
            "name": el.name,
            "attributes": el.attributes,
            "text": el.text,
            "children": el.children.iter().map(|c| c.snapshot()).collect::<Vec<_>>(),
        })
    }
}

impl fmt::Debug for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.borrow().fmt(f)
    }
}

impl FromLua for ElementHandle {
    fn from_lua(value: Value, _lua: &Lua) -> mlua::Result<Self> {
        match value {
            Value::UserData(ud) => Ok(ud.borrow::<ElementHandle>()?.clone()),
            other => Err(mlua::Error::FromLuaConversionError {
                from: other.type_name(),
                to: "ElementHandle".to_string(),
                message: Some("expected an element handle".to_string()),
            }),
        }
    }
}

impl UserData for ElementHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("add", |_, this, child: ElementHandle| {
            this.add_child(child);
            Ok(())
        });

        // remove(handle) or remove("name")
        methods.add_method("remove", |_, this, target: Value| match target {
            Value::UserData(ud) => {
                let child = ud.borrow::<ElementHandle>()?.clone();
                Ok(this.remove_child(&child))
            }
            Value::String(s) => Ok(this.remove_child_by_name(&s.to_str()?)),
            other => Err(mlua::Error::runtime(format!(
                "remove expects an element or a name, got {}",
                other.type_name()
            ))),
        });

        methods.add_method("clear", |_, this, ()| {
            this.clear_children();
            Ok(())
        });

        methods.add_method("find_by_name", |_, this, name: String| {
            Ok(this.find_by_name(&name))
        });

        methods.add_method("children", |_, this, ()| Ok(this.children()));

        methods.add_method("child_count", |_, this, ()| Ok(this.child_count()));

        methods.add_meta_method(MetaMethod::Index, |_, this, key: String| {
            let value = match key.as_str() {
                "Tag" => Some(this.tag()),
                "Name" => this.name(),
                _ => this.get(&key).or_else(|| {
                    if key == "Text" {
                        this.text()
                    } else {
                        None
                    }
                }),
            };
            Ok(value)
        });

        methods.add_meta_method(MetaMethod::NewIndex, |_, this, (key, value): (String, Value)| {
            match value {
                Value::Nil => {
                    this.remove_attribute(&key);
                }
                Value::String(s) if key == "Name" => this.set_name(s.to_str()?.to_string()),
                Value::String(s) => this.set(key, s.to_str()?.to_string()),
                Value::Integer(n) => this.set(key, n.to_string()),
                Value::Number(n) => this.set(key, n.to_string()),
                Value::Boolean(b) => this.set(key, b.to_string()),
                other => {
                    return Err(mlua::Error::runtime(format!(
                        "cannot assign a {} to element property '{}'",
                        other.type_name(),
                        key
                    )))
                }
            }
            Ok(())
        });
    }
}

/// Maps a markup tag to the element kind a named field is declared with.
/// Unknown tags fall back to the generic `View`.
pub fn infer_element_kind(tag: &str) -> &'static str {
    let local = tag.rsplit(':').next().unwrap_or(tag);
    match local {
        "Label" => "Label",
        "Button" => "Button",
        "Entry" => "Entry",
        "Editor" => "Editor",
        "Image" => "Image",
        "StackLayout" => "StackLayout",
        "VerticalStackLayout" => "VerticalStackLayout",
        "HorizontalStackLayout" => "HorizontalStackLayout",
        "Grid" => "Grid",
        "AbsoluteLayout" => "AbsoluteLayout",
        "FlexLayout" => "FlexLayout",
        "ContentView" | "ContentPage" => "ContentView",
        "ScrollView" => "ScrollView",
        "Frame" => "Frame",
        "Border" => "Border",
        "Slider" => "Slider",
        "Switch" => "Switch",
        "Picker" => "Picker",
        "DatePicker" => "DatePicker",
        "TimePicker" => "TimePicker",
        "CheckBox" => "CheckBox",
        "RadioButton" => "RadioButton",
        "Stepper" => "Stepper",
        "SearchBar" => "SearchBar",
        "ProgressBar" => "ProgressBar",
        "ActivityIndicator" => "ActivityIndicator",
        "WebView" => "WebView",
        "CollectionView" => "CollectionView",
        "ListView" => "ListView",
        "TableView" => "TableView",
        "CarouselView" => "CarouselView",
        _ => "View",
    }
}
