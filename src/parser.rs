//! Markup text to element tree.
//!
//! The markup dialect is plain XML: one root element, `name` attributes for
//! stable identifiers, inline text for content. Parsing is strict (roxmltree);
//! anything structurally broken surfaces as a [`PipelineError::MarkupParse`].

use roxmltree::Node;

use crate::error::PipelineResult;
use crate::view::{Element, ElementHandle};

/// Parse a markup document into a live element tree.
pub fn parse_markup(xml: &str) -> PipelineResult<ElementHandle> {
    let doc = roxmltree::Document::parse(xml.trim())?;
    Ok(build_element(doc.root_element()))
}

fn build_element(node: Node) -> ElementHandle {
    let mut element = Element::new(node.tag_name().name());

    for attr in node.attributes() {
        if attr.name() == "name" {
            element.name = Some(attr.value().to_string());
        }
        element
            .attributes
            .insert(attr.name().to_string(), attr.value().to_string());
    }

    let text: String = node
        .children()
        .filter(|c| c.is_text())
        .filter_map(|c| c.text())
        .collect();
    let text = text.trim();
    if !text.is_empty() {
        element.text = Some(text.to_string());
    }

    let handle = ElementHandle::new(element);
    for child in node.children().filter(|c| c.is_element()) {
        handle.add_child(build_element(child));
    }
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_simple_tree() {
        let xml = r#"
            <ContentView module="DynamicView">
                <VerticalStackLayout>
                    <Label name="CounterLabel" Text="0" />
                    <Button name="AddButton" Text="Add" />
                </VerticalStackLayout>
            </ContentView>
        "#;
        let root = parse_markup(xml).unwrap();
        assert_eq!(root.tag(), "ContentView");
        assert_eq!(root.get("module").as_deref(), Some("DynamicView"));
        assert_eq!(root.child_count(), 1);
        let label = root.find_by_name("CounterLabel").unwrap();
        assert_eq!(label.get("Text").as_deref(), Some("0"));
    }

    #[test]
    fn test_parse_captures_inline_text() {
        let root = parse_markup("<Label name=\"Title\">Hello</Label>").unwrap();
        assert_eq!(root.text().as_deref(), Some("Hello"));
    }

    #[test]
    fn test_parse_rejects_broken_markup() {
        assert!(parse_markup("<ContentView><Label></ContentView>").is_err());
    }
}
