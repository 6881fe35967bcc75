//! Constructor-statement safety classification.
//!
//! Generated constructors regularly poke at elements that only exist after the
//! markup has been applied. Each statement is classified so the rewriter can
//! leave UI-independent work in `init` and defer the rest to `post_init`.
//! This is a heuristic, not a sound analysis: the classifier is a trait so a
//! stricter implementation can be swapped in, and anything it cannot vouch for
//! comes back `Unknown`, which the rewriter treats the same as `Unsafe`.

use std::sync::LazyLock;

use regex::Regex;

use super::markup::NamedElement;

/// Tagged classification of a single statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Safety {
    /// Provably UI-independent; stays in the constructor.
    Safe,
    /// Touches the visual tree; must run after wiring.
    Unsafe,
    /// Cannot be vouched for; deferred like `Unsafe`.
    Unknown,
}

pub trait StatementClassifier {
    fn classify(&self, statement: &str, named_elements: &[NamedElement]) -> Safety;
}

/// UI-mutation call patterns that must not run before the tree exists.
static UNSAFE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\.Text\s*=",
        r"\.Content\s*=",
        r"\.IsVisible\s*=",
        r"\.BackgroundColor\s*=",
        r"\.Source\s*=",
        r"\.ItemsSource\s*=",
        r":add\s*\(",
        r":remove\s*\(",
        r":clear\s*\(",
        r":find_by_name\s*\(",
        r"\bfind_by_name\s*\(",
        r"\bBindingContext\s*=",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Calls that are known to be UI-free.
static SAFE_CALL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bmath\.",
        r"\bstring\.",
        r"\btable\.",
        r"\bos\.time\b",
        r"\bos\.clock\b",
        r"\btostring\s*\(",
        r"\btonumber\s*\(",
        r"\bprint\s*\(",
        r"\bpairs\s*\(",
        r"\bipairs\s*\(",
        r"\bjson\.",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static LOCAL_DECL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^local\s+[\w,\s]+(=.*)?$").unwrap());

#[derive(Debug, Default)]
pub struct DefaultClassifier;

impl StatementClassifier for DefaultClassifier {
    fn classify(&self, statement: &str, named_elements: &[NamedElement]) -> Safety {
        let trimmed = statement.trim();

        if trimmed.is_empty() || trimmed.starts_with("--") {
            return Safety::Safe;
        }

        // Whole-word reference to any named element is always deferred.
        for element in named_elements {
            let word = Regex::new(&format!(r"\b{}\b", regex::escape(&element.name))).unwrap();
            if word.is_match(trimmed) {
                return Safety::Unsafe;
            }
        }

        if UNSAFE_PATTERNS.iter().any(|p| p.is_match(trimmed)) {
            return Safety::Unsafe;
        }

        if LOCAL_DECL_RE.is_match(trimmed) && !trimmed.contains('(') {
            return Safety::Safe;
        }

        // A call we cannot place on the allow-list may reach the tree
        // indirectly, so it is only ever Unknown.
        if trimmed.contains('(') && trimmed.contains(')') {
            if SAFE_CALL_PATTERNS.iter().any(|p| p.is_match(trimmed)) {
                return Safety::Safe;
            }
            return Safety::Unknown;
        }

        Safety::Safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::infer_element_kind;

    fn named(names: &[&str]) -> Vec<NamedElement> {
        names
            .iter()
            .map(|n| NamedElement {
                name: n.to_string(),
                kind: infer_element_kind("Label"),
            })
            .collect()
    }

    fn classify(statement: &str, names: &[&str]) -> Safety {
        DefaultClassifier.classify(statement, &named(names))
    }

    #[test]
    fn test_comments_and_blanks_are_safe() {
        assert_eq!(classify("", &[]), Safety::Safe);
        assert_eq!(classify("-- setup", &[]), Safety::Safe);
    }

    #[test]
    fn test_named_element_reference_is_unsafe() {
        assert_eq!(
            classify("CounterLabel.Text = \"0\"", &["CounterLabel"]),
            Safety::Unsafe
        );
        // Not a whole word: no match.
        assert_eq!(
            classify("myCounterLabelCopy = 1", &["CounterLabel"]),
            Safety::Safe
        );
    }

    #[test]
    fn test_ui_mutation_patterns_are_unsafe() {
        assert_eq!(classify("frame.IsVisible = false", &[]), Safety::Unsafe);
        assert_eq!(classify("View:add(row)", &[]), Safety::Unsafe);
        assert_eq!(classify("panel:clear()", &[]), Safety::Unsafe);
    }

    #[test]
    fn test_plain_declarations_are_safe() {
        assert_eq!(classify("local count = 0", &[]), Safety::Safe);
        assert_eq!(classify("total = total + 1", &[]), Safety::Safe);
    }

    #[test]
    fn test_allow_listed_calls_are_safe() {
        assert_eq!(classify("local n = math.floor(3.7)", &[]), Safety::Safe);
        assert_eq!(classify("print(\"ready\")", &[]), Safety::Safe);
        assert_eq!(classify("local s = tostring(42)", &[]), Safety::Safe);
    }

    #[test]
    fn test_unrecognized_calls_are_unknown() {
        assert_eq!(classify("refresh_everything()", &[]), Safety::Unknown);
        assert_eq!(classify("local d = load_data(url)", &[]), Safety::Unknown);
    }
}
