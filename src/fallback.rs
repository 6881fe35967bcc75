//! Markup-only fallback rendering.
//!
//! When the code-behind fails to compile, the markup can usually still be
//! shown. Event handler attributes would dangle without their script, so the
//! known interaction attributes are stripped before parsing.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::parser::parse_markup;
use crate::rewrite::markup::FORCED_ROOT_TAG;
use crate::view::{Element, ElementHandle};

/// Interaction attributes a static view cannot honor.
const EVENT_ATTRIBUTES: &[&str] = &[
    "Clicked",
    "Pressed",
    "Released",
    "TextChanged",
    "Completed",
    "Focused",
    "Unfocused",
    "Tapped",
    "DoubleTapped",
    "Holding",
    "CurrentItemChanged",
    "SelectionChanged",
    "DateSelected",
    "TimeSelected",
    "CheckedChanged",
    "ValueChanged",
    "ScrollChanged",
    "ItemTapped",
    "PositionChanged",
    "Navigated",
    "Navigating",
    "ReloadRequested",
    "SizeChanged",
    "BindingContextChanged",
];

static EVENT_ATTRIBUTE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    EVENT_ATTRIBUTES
        .iter()
        .map(|attr| Regex::new(&format!(r#"\s+{attr}\s*=\s*"[^"]*""#)).unwrap())
        .collect()
});

/// Removes all known event handler attributes from the markup.
pub fn strip_event_handlers(markup: &str) -> String {
    let mut stripped = markup.to_string();
    for re in EVENT_ATTRIBUTE_RES.iter() {
        stripped = re.replace_all(&stripped, "").into_owned();
    }
    stripped
}

/// Renders the markup without any script: event attributes are stripped and
/// the result is grafted onto a fresh shell root.
pub fn render_markup_only(markup: &str) -> PipelineResult<ElementHandle> {
    let stripped = strip_event_handlers(markup);
    debug!(
        removed = markup.len() - stripped.len(),
        "stripped event handler attributes for fallback render"
    );

    let parsed = parse_markup(&stripped)
        .map_err(|e| PipelineError::FallbackFailed(e.to_string()))?;

    let root = ElementHandle::new(Element::new(FORCED_ROOT_TAG));
    root.apply(&parsed);
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_attributes_are_stripped() {
        let markup = r#"<Button name="B" Text="Go" Clicked="on_click" />"#;
        let stripped = strip_event_handlers(markup);
        assert!(!stripped.contains("Clicked"));
        assert!(stripped.contains(r#"Text="Go""#));
    }

    #[test]
    fn test_fallback_renders_a_static_tree() {
        let markup = r#"
            <ContentView>
                <VerticalStackLayout>
                    <Label name="Title" Text="Hello" />
                    <Button name="Go" Text="Go" Clicked="on_go" />
                </VerticalStackLayout>
            </ContentView>
        "#;
        let root = render_markup_only(markup).unwrap();
        assert_eq!(root.tag(), "ContentView");
        let button = root.find_by_name("Go").unwrap();
        assert!(button.get("Clicked").is_none());
        assert_eq!(button.get("Text").as_deref(), Some("Go"));
    }

    #[test]
    fn test_broken_markup_fails_the_fallback() {
        let err = render_markup_only("<ContentView><Label></ContentView>").unwrap_err();
        assert!(matches!(err, PipelineError::FallbackFailed(_)));
    }
}
