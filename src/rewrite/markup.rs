//! Markup normalization.
//!
//! Generated documents arrive as full pages; the preview hosts them as an
//! embedded view. The root tag (and its `.Resources` sub-element) is rewritten
//! to the forced container tag, the unsupported `Title` attribute is dropped,
//! and the root's `module` attribute is forced to the generated module name so
//! markup and code-behind always agree on their pairing.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{PipelineError, PipelineResult};
use crate::view::infer_element_kind;

/// Container tag every root element is rewritten to.
pub const FORCED_ROOT_TAG: &str = "ContentView";
/// Module name the code-behind is coerced to return.
pub const FORCED_MODULE_NAME: &str = "DynamicView";

/// A named markup element paired with its inferred kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedElement {
    pub name: String,
    pub kind: &'static str,
}

static ROOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<Content(Page|View)\b[^>]*>").unwrap());

static OPEN_PAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<ContentPage\b([^>]*)>").unwrap());

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\s+Title\s*=\s*"[^"]*""#).unwrap());

static MODULE_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)module\s*=\s*"[^"]*""#).unwrap());

static OPEN_VIEW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<ContentView\b").unwrap());

static NAMED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<([A-Za-z][\w.:]*)[^>]*?\sname\s*=\s*"([^"]+)""#).unwrap()
});

/// Rewrites a markup document into the embeddable shape. Fails fast when no
/// recognized root element is present.
pub fn rewrite_markup(markup: &str) -> PipelineResult<String> {
    if !ROOT_RE.is_match(markup) {
        return Err(PipelineError::MissingRootElement);
    }

    let mut markup = OPEN_PAGE_RE
        .replace_all(markup, "<ContentView$1>")
        .into_owned();
    markup = markup
        .replace("</ContentPage>", "</ContentView>")
        .replace("<ContentPage.Resources>", "<ContentView.Resources>")
        .replace("</ContentPage.Resources>", "</ContentView.Resources>");

    // ContentView has no title bar.
    markup = TITLE_RE.replace_all(&markup, "").into_owned();

    // Force the defining module so the materializer binds to the rewritten
    // code-behind regardless of what the generator invented.
    let forced = format!(r#"module="{FORCED_MODULE_NAME}""#);
    if MODULE_ATTR_RE.is_match(&markup) {
        markup = MODULE_ATTR_RE.replace_all(&markup, forced.as_str()).into_owned();
    } else {
        markup = OPEN_VIEW_RE
            .replace(&markup, format!("<ContentView {forced}").as_str())
            .into_owned();
    }

    Ok(markup)
}

/// Collects `name` attributes in document order, first occurrence winning on
/// duplicates, each paired with the kind inferred from its tag.
pub fn collect_named_elements(markup: &str) -> Vec<NamedElement> {
    let mut elements: Vec<NamedElement> = Vec::new();
    for caps in NAMED_RE.captures_iter(markup) {
        let name = caps[2].to_string();
        if elements.iter().any(|e| e.name == name) {
            continue;
        }
        let kind = infer_element_kind(&caps[1]);
        elements.push(NamedElement { name, kind });
    }
    elements
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rewrite_replaces_page_with_view() {
        let markup = r#"<ContentPage Title="Counter">
  <ContentPage.Resources>
  </ContentPage.Resources>
  <Label name="CounterLabel" Text="0" />
</ContentPage>"#;
        let rewritten = rewrite_markup(markup).unwrap();
        assert!(rewritten.starts_with(r#"<ContentView module="DynamicView""#));
        assert!(rewritten.contains("<ContentView.Resources>"));
        assert!(rewritten.ends_with("</ContentView>"));
        assert!(!rewritten.contains("Title="));
        assert!(!rewritten.contains("ContentPage"));
    }

    #[test]
    fn test_rewrite_overrides_existing_module_attribute() {
        let markup = r#"<ContentView module="Whatever"><Label Text="x" /></ContentView>"#;
        let rewritten = rewrite_markup(markup).unwrap();
        assert!(rewritten.contains(r#"module="DynamicView""#));
        assert!(!rewritten.contains("Whatever"));
    }

    #[test]
    fn test_rewrite_requires_recognized_root() {
        let err = rewrite_markup("<Grid><Label Text=\"x\" /></Grid>").unwrap_err();
        assert!(matches!(err, PipelineError::MissingRootElement));
    }

    #[test]
    fn test_collect_named_elements_in_order_with_kinds() {
        let markup = r#"<ContentView>
  <Button name="AddButton" Text="Add" />
  <Label name="CounterLabel" Text="0" />
  <Widget name="Mystery" />
  <Label name="CounterLabel" Text="dup" />
</ContentView>"#;
        let elements = collect_named_elements(markup);
        let pairs: Vec<(&str, &str)> = elements
            .iter()
            .map(|e| (e.name.as_str(), e.kind))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("AddButton", "Button"),
                ("CounterLabel", "Label"),
                ("Mystery", "View"),
            ]
        );
    }
}
