//! File extraction from raw completion-provider output.
//!
//! The provider returns free-form text: usually markdown with `###` headers
//! naming files and fenced code blocks, but nothing is guaranteed. Extraction
//! is a heuristic cascade (headers, then bold filenames, then plain
//! filenames, then treating the whole response as a single script) and never
//! fails: an empty map means nothing usable was found.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

/// Logical key for the markup document.
pub const MARKUP_FILE_KEY: &str = "MainPage.xml";
/// Logical key for the markup's paired code-behind script.
pub const CODE_BEHIND_FILE_KEY: &str = "MainPage.xml.lua";
/// Logical key for a standalone script with no markup.
pub const SCRIPT_FILE_KEY: &str = "MainPage.lua";

const EXTENSIONS: &str = "xml|lua|txt|json|yaml|toml";

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?im)^###\s+([^\s/\\:]+?\.(?:{EXTENSIONS}))\s*$"
    ))
    .unwrap()
});

static BOLD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\*\*([^*\n]+?\.(?:{EXTENSIONS}))\*\*")).unwrap()
});

static PLAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?im)^([^\s/\\:]+?\.(?:{EXTENSIONS}))[^\n]*$")).unwrap()
});

static TERMINATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(?:---|####)").unwrap());

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```(?:xml|lua|luau|json)?[ \t]*\r?\n?(.*?)\r?\n?```").unwrap()
});

static CODE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?m)^\s*local\s+\w+",
        r"\bfunction\s+[\w.:]+\s*\(",
        r"=\s*function\s*\(",
        r"\brequire\s*\(",
        r"\bif\b.+\bthen\b",
        r"\bfor\b.+\bdo\b",
        r"\bwhile\b.+\bdo\b",
        r"(?m)^\s*return\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Extracts a `{filename -> content}` mapping from a raw response blob.
pub fn extract_files(content: &str) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();

    collect_header_sections(content, &mut files);

    if files.is_empty() {
        collect_marked_filenames(content, &mut files);
    }

    if files.is_empty() {
        if let Some(code) = extract_single_code(content) {
            files.insert(SCRIPT_FILE_KEY.to_string(), code);
        }
    }

    files
}

fn collect_header_sections(content: &str, files: &mut BTreeMap<String, String>) {
    collect_by_positions(content, &HEADER_RE, files, false);
}

fn collect_marked_filenames(content: &str, files: &mut BTreeMap<String, String>) {
    collect_by_positions(content, &BOLD_RE, files, true);
    if files.is_empty() {
        collect_by_positions(content, &PLAIN_RE, files, true);
    }
}

/// Shared section walk: each filename match opens a section running to the
/// next match of the same pattern, cut short at the first terminator line.
/// `skip_rest_of_line` starts the section on the following line (bold/plain
/// headers may carry trailing prose on the filename line).
fn collect_by_positions(
    content: &str,
    pattern: &Regex,
    files: &mut BTreeMap<String, String>,
    skip_rest_of_line: bool,
) {
    let matches: Vec<(String, usize, usize)> = pattern
        .captures_iter(content)
        .map(|caps| {
            let whole = caps.get(0).unwrap();
            (caps[1].trim().to_string(), whole.start(), whole.end())
        })
        .collect();

    for (i, (name, _, end)) in matches.iter().enumerate() {
        let stop = matches
            .get(i + 1)
            .map(|m| m.1)
            .unwrap_or_else(|| content.len());
        let mut start = *end;
        if skip_rest_of_line {
            start = match content[start..stop].find('\n') {
                Some(offset) => start + offset + 1,
                None => stop,
            };
        }
        let section = truncate_at_terminator(&content[start..stop]);
        let body = strip_code_fences(section);
        if is_valid_file_name(name) && !body.trim().is_empty() {
            files.insert(name.clone(), body);
        }
    }
}

fn truncate_at_terminator(section: &str) -> &str {
    match TERMINATOR_RE.find(section) {
        Some(m) => &section[..m.start()],
        None => section,
    }
}

/// Strips a markdown code fence, returning the inner content; text without a
/// fence comes back trimmed as-is.
fn strip_code_fences(content: &str) -> String {
    match FENCE_RE.captures(content) {
        Some(caps) => caps[1].trim().to_string(),
        None => content.trim().to_string(),
    }
}

fn extract_single_code(content: &str) -> Option<String> {
    let stripped = strip_code_fences(content);
    if stripped == content.trim() {
        looks_like_script(content).then(|| content.trim().to_string())
    } else {
        looks_like_script(&stripped).then_some(stripped)
    }
}

/// True when the text is plausibly a whole Lua script: at least one code
/// pattern, not markup, some structure, and block keywords that balance.
fn looks_like_script(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.is_empty() || trimmed.starts_with('<') {
        return false;
    }
    let has_pattern = CODE_PATTERNS.iter().any(|p| p.is_match(trimmed));
    let has_structure = trimmed.contains("end") || trimmed.contains('=');
    has_pattern && has_structure && crate::rewrite::code::blocks_balanced(trimmed)
}

fn is_valid_file_name(file_name: &str) -> bool {
    if file_name.trim().is_empty() || file_name.len() > 255 {
        return false;
    }
    if !file_name.contains('.') {
        return false;
    }
    if file_name
        .chars()
        .any(|c| matches!(c, '<' | '>' | '|' | '"' | '?' | '*'))
    {
        return false;
    }
    let parts: Vec<&str> = file_name.split('.').collect();
    parts.len() >= 2
        && !parts.first().unwrap_or(&"").is_empty()
        && !parts.last().unwrap_or(&"").is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extracts_header_sections_with_fences() {
        let response = r#"Here is your app:

### MainPage.xml
```xml
<ContentPage Title="Counter">
  <Label name="CounterLabel" Text="0" />
</ContentPage>
```

### MainPage.xml.lua
```lua
local MainPage = {}
function MainPage.init()
end
return MainPage
```

Enjoy!"#;
        let files = extract_files(response);
        assert_eq!(files.len(), 2);
        assert!(files[MARKUP_FILE_KEY].starts_with("<ContentPage"));
        assert!(files[MARKUP_FILE_KEY].ends_with("</ContentPage>"));
        assert!(files[CODE_BEHIND_FILE_KEY].starts_with("local MainPage"));
        assert!(files[CODE_BEHIND_FILE_KEY].ends_with("return MainPage"));
    }

    #[test]
    fn test_header_section_stops_at_divider() {
        let response = "### MainPage.lua\nlocal x = 1\n---\nnotes about the file";
        let files = extract_files(response);
        assert_eq!(files[SCRIPT_FILE_KEY], "local x = 1");
    }

    #[test]
    fn test_bold_filename_fallback() {
        let response = "**MainPage.xml** (the layout)\n```xml\n<ContentView />\n```\n";
        let files = extract_files(response);
        assert_eq!(files[MARKUP_FILE_KEY], "<ContentView />");
    }

    #[test]
    fn test_plain_filenames_skipped_when_bold_matched() {
        // the section body mentions another filename at line start; only the
        // bold entry may be produced
        let response = "**MainPage.lua**\n```lua\nlocal x = 1\n```\nconfig.json is read at startup\n";
        let files = extract_files(response);
        assert_eq!(files.len(), 1);
        assert!(files.contains_key(SCRIPT_FILE_KEY));
    }

    #[test]
    fn test_plain_filename_fallback_still_works() {
        let response = "MainPage.lua\nlocal x = 1\n";
        let files = extract_files(response);
        assert_eq!(files[SCRIPT_FILE_KEY], "local x = 1");
    }

    #[test]
    fn test_whole_response_as_single_script() {
        let response = "local count = 0\nfunction increment()\n  count = count + 1\nend\n";
        let files = extract_files(response);
        assert_eq!(files.len(), 1);
        assert!(files[SCRIPT_FILE_KEY].starts_with("local count"));
    }

    #[test]
    fn test_prose_yields_empty_map() {
        let files = extract_files("Sorry, I cannot help with that request.");
        assert!(files.is_empty());
    }

    #[test]
    fn test_markup_without_header_is_not_a_script() {
        let files = extract_files("<ContentPage>\n  <Label Text=\"hi\" />\n</ContentPage>");
        assert!(files.is_empty());
    }

    #[test]
    fn test_file_name_validity() {
        assert!(is_valid_file_name("MainPage.xml"));
        assert!(is_valid_file_name("MainPage.xml.lua"));
        assert!(!is_valid_file_name("noextension"));
        assert!(!is_valid_file_name(".lua"));
        assert!(!is_valid_file_name("bad*name.lua"));
        assert!(!is_valid_file_name(&"x".repeat(300)));
    }
}
