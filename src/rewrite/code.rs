//! Code-behind coercion.
//!
//! Generated scripts arrive in every shape: a proper module table, a pile of
//! loose functions, sometimes with a constructor that mutates elements that do
//! not exist yet. This module coerces any of it into the one fixed shape the
//! materializer knows how to drive:
//!
//! ```lua
//! local DynamicView = {}
//! DynamicView.base = "ContentView"
//! DynamicView.fields = { CounterLabel = "Label" }
//!
//! function DynamicView.init()        -- UI-independent statements only
//! end
//!
//! function DynamicView.post_init()   -- deferred UI-dependent statements
//! end
//!
//! return DynamicView
//! ```
//!
//! All rewriting is line/block structured rather than raw substitution: Lua
//! blocks are tracked with a keyword counter so multi-line statements are
//! never split apart.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::markup::{NamedElement, FORCED_MODULE_NAME, FORCED_ROOT_TAG};
use super::safety::{DefaultClassifier, Safety, StatementClassifier};
use crate::error::{PipelineError, PipelineResult};

pub(crate) const PRELUDE_HEADER: &str = "-- consolidated imports";

static MODULE_DECL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*local\s+(\w+)\s*=\s*\{\s*\}\s*$").unwrap());

static MODULE_RETURN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*return\s+(\w+)\s*$").unwrap());

static CTOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"function\s+{FORCED_MODULE_NAME}\s*[.:]\s*(?:new|ctor|constructor|setup)\s*\("
    ))
    .unwrap()
});

static BASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?m)^\s*{FORCED_MODULE_NAME}\.base\s*=.*$")).unwrap()
});

static FIELDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?m)^\s*{FORCED_MODULE_NAME}\.fields\s*=\s*\{{[^}}]*\}}\s*$"
    ))
    .unwrap()
});

static REQUIRE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^(?:local\s+\w+\s*=\s*)?require\s*[\("']"#).unwrap());

static MODAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:display_|show_)?(?:alert|prompt|confirm)\s*\(").unwrap()
});

static PRELUDE_LOCAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^local\s+(\w+)\s*=\s*(\w+)\s*$").unwrap());

static FUNC_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:local\s+)?function\s+([\w.:]+)\s*\((.*)$").unwrap()
});

static ASSIGNED_FUNC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*local\s+(\w+)\s*=\s*function\s*\((.*)$").unwrap());

/// Rewrites a code-behind unit paired with markup.
pub fn rewrite_code_behind(code: &str, named: &[NamedElement]) -> PipelineResult<String> {
    rewrite(code, named, false)
}

/// Rewrites a standalone script (no markup, no named elements). The script
/// builds its content programmatically inside `init`, so no statements are
/// relocated and no fields are injected.
pub fn rewrite_standalone(code: &str) -> PipelineResult<String> {
    rewrite(code, &[], true)
}

fn rewrite(code: &str, named: &[NamedElement], standalone: bool) -> PipelineResult<String> {
    let code = strip_prelude(code);
    let code = strip_requires(&code);

    let mut code = match detect_module(&code) {
        Some(ident) => adjust_module(&code, &ident, named, standalone),
        None => wrap_loose(&code, named, standalone),
    };

    if !standalone {
        code = relocate_unsafe_statements(&code, named, &DefaultClassifier);
    }

    let code = sanitize(&code);
    let code = format!("{}\n{}", prelude(), code.trim_start_matches('\n'));
    validate_structure(&code)?;
    Ok(code)
}

/// The fixed consolidated import block. User `require` lines are stripped and
/// replaced by these upvalue bindings; the corresponding globals are installed
/// on the script state by the compiler.
fn prelude() -> String {
    format!(
        "{PRELUDE_HEADER}\n\
         local json = json\n\
         local view = view\n\
         local string = string\n\
         local table = table\n\
         local math = math\n\
         local os = os\n"
    )
}

/// Removes a previously-prepended prelude so repeated rewriting consolidates
/// imports instead of stacking them.
fn strip_prelude(code: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut in_prelude = false;
    for line in code.lines() {
        let trimmed = line.trim();
        if trimmed == PRELUDE_HEADER {
            in_prelude = true;
            continue;
        }
        if in_prelude {
            if let Some(caps) = PRELUDE_LOCAL_RE.captures(trimmed) {
                if caps[1] == caps[2] {
                    continue;
                }
            }
            in_prelude = false;
            if trimmed.is_empty() {
                continue;
            }
        }
        kept.push(line);
    }
    kept.join("\n")
}

fn strip_requires(code: &str) -> String {
    code.lines()
        .filter(|line| !REQUIRE_RE.is_match(line.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Removes any statement invoking modal alert/prompt affordances, which the
/// embedded preview cannot host.
fn sanitize(code: &str) -> String {
    code.lines()
        .filter(|line| !MODAL_RE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Detects an already-module-shaped script: `local X = {}` plus `return X`.
fn detect_module(code: &str) -> Option<String> {
    let decl = MODULE_DECL_RE.captures(code)?;
    let ret = MODULE_RETURN_RE
        .captures_iter(code)
        .last()?;
    (decl[1] == ret[1]).then(|| decl[1].to_string())
}

/// Adjusts a module-shaped script in place: rename, constructor
/// normalization, forced base, injected fields, guaranteed init/post_init.
fn adjust_module(code: &str, ident: &str, named: &[NamedElement], standalone: bool) -> String {
    let mut code = if ident == FORCED_MODULE_NAME {
        code.to_string()
    } else {
        let word = Regex::new(&format!(r"\b{}\b", regex::escape(ident))).unwrap();
        word.replace_all(code, FORCED_MODULE_NAME).into_owned()
    };

    code = CTOR_RE
        .replace_all(&code, format!("function {FORCED_MODULE_NAME}.init("))
        .into_owned();

    let base_line = format!("{FORCED_MODULE_NAME}.base = \"{FORCED_ROOT_TAG}\"");
    if BASE_RE.is_match(&code) {
        code = BASE_RE.replace(&code, base_line.as_str()).into_owned();
    } else {
        code = insert_after_module_decl(&code, &base_line);
    }

    if !standalone {
        let fields = fields_line(named);
        if FIELDS_RE.is_match(&code) {
            code = FIELDS_RE.replace(&code, fields.as_str()).into_owned();
        } else {
            code = insert_after_line(&code, &base_line, &fields);
        }
    }

    code = ensure_function(&code, "init");
    if !standalone {
        code = ensure_function(&code, "post_init");
    }
    code
}

/// Wraps loose functions and top-level locals in the module skeleton.
/// Top-level statements that are neither are dropped.
fn wrap_loose(code: &str, named: &[NamedElement], standalone: bool) -> String {
    let lines: Vec<&str> = code.lines().collect();
    let mut locals: Vec<String> = Vec::new();
    let mut functions: Vec<String> = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if let Some(header) = rename_loose_header(line) {
            let mut block = vec![header];
            let mut depth = block_delta(line);
            let mut j = i + 1;
            while j < lines.len() && depth > 0 {
                block.push(lines[j].to_string());
                depth += block_delta(lines[j]);
                j += 1;
            }
            functions.push(block.join("\n"));
            i = j;
        } else if line.trim_start().starts_with("local ") {
            locals.push(line.trim_end().to_string());
            i += 1;
        } else {
            if !line.trim().is_empty() {
                debug!(statement = line.trim(), "dropping loose top-level statement");
            }
            i += 1;
        }
    }

    let mut out = String::new();
    if !locals.is_empty() {
        out.push_str(&locals.join("\n"));
        out.push_str("\n\n");
    }
    out.push_str(&format!("local {FORCED_MODULE_NAME} = {{}}\n"));
    out.push_str(&format!(
        "{FORCED_MODULE_NAME}.base = \"{FORCED_ROOT_TAG}\"\n"
    ));
    if !standalone {
        out.push_str(&fields_line(named));
        out.push('\n');
    }
    out.push('\n');
    for function in &functions {
        out.push_str(function);
        out.push_str("\n\n");
    }
    out.push_str(&format!("return {FORCED_MODULE_NAME}\n"));

    let out = ensure_function(&out, "init");
    if standalone {
        out
    } else {
        ensure_function(&out, "post_init")
    }
}

/// Rewrites a loose function header onto the module table, keeping the
/// parameter list. Returns None when the line opens no function.
fn rename_loose_header(line: &str) -> Option<String> {
    if let Some(caps) = ASSIGNED_FUNC_RE.captures(line) {
        return Some(format!(
            "function {FORCED_MODULE_NAME}.{}({}",
            &caps[1], &caps[2]
        ));
    }
    let caps = FUNC_HEADER_RE.captures(line)?;
    let name = caps[1]
        .rsplit(|c| c == '.' || c == ':')
        .next()
        .unwrap_or(&caps[1])
        .to_string();
    Some(format!("function {FORCED_MODULE_NAME}.{}({}", name, &caps[2]))
}

fn fields_line(named: &[NamedElement]) -> String {
    if named.is_empty() {
        return format!("{FORCED_MODULE_NAME}.fields = {{}}");
    }
    let entries = named
        .iter()
        .map(|e| format!("{} = \"{}\"", e.name, e.kind))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{FORCED_MODULE_NAME}.fields = {{ {entries} }}")
}

fn insert_after_module_decl(code: &str, line: &str) -> String {
    match MODULE_DECL_RE.find(code) {
        Some(m) => {
            let mut out = String::with_capacity(code.len() + line.len() + 1);
            out.push_str(&code[..m.end()]);
            out.push('\n');
            out.push_str(line);
            out.push_str(&code[m.end()..]);
            out
        }
        None => format!("{line}\n{code}"),
    }
}

fn insert_after_line(code: &str, anchor: &str, line: &str) -> String {
    match code.find(anchor) {
        Some(pos) => {
            let end = pos + anchor.len();
            let mut out = String::with_capacity(code.len() + line.len() + 1);
            out.push_str(&code[..end]);
            out.push('\n');
            out.push_str(line);
            out.push_str(&code[end..]);
            out
        }
        None => format!("{line}\n{code}"),
    }
}

/// Guarantees `function DynamicView.<name>() ... end` exists, inserting an
/// empty one before the module return when missing.
fn ensure_function(code: &str, name: &str) -> String {
    // dot and colon definitions both count
    let header = Regex::new(&format!(
        r"function\s+{FORCED_MODULE_NAME}\s*[.:]\s*{name}\s*\("
    ))
    .unwrap();
    if header.is_match(code) {
        return code.to_string();
    }
    let stub = format!("function {FORCED_MODULE_NAME}.{name}()\nend\n\n");
    match final_return_position(code) {
        Some(pos) => {
            let mut out = String::with_capacity(code.len() + stub.len());
            out.push_str(&code[..pos]);
            out.push_str(&stub);
            out.push_str(&code[pos..]);
            out
        }
        None => format!("{code}\n{stub}"),
    }
}

fn final_return_position(code: &str) -> Option<usize> {
    let re = Regex::new(&format!(r"(?m)^\s*return\s+{FORCED_MODULE_NAME}\s*$")).unwrap();
    re.find_iter(code).last().map(|m| m.start())
}

/// Moves constructor statements that touch the visual tree into `post_init`.
/// Statements are grouped by block depth so an `if ... end` moves as a unit;
/// a group moves when any of its lines classifies `Unsafe` or `Unknown`.
fn relocate_unsafe_statements(
    code: &str,
    named: &[NamedElement],
    classifier: &dyn StatementClassifier,
) -> String {
    let lines: Vec<String> = code.lines().map(str::to_string).collect();

    let init = Regex::new(&format!(
        r"^\s*function\s+{FORCED_MODULE_NAME}\s*[.:]\s*init\s*\("
    ))
    .unwrap();
    let Some((header, closing)) = find_function_region(&lines, &init) else {
        return code.to_string();
    };

    let body = &lines[header + 1..closing];
    let groups = group_statements(body);

    let mut safe: Vec<String> = Vec::new();
    let mut moved: Vec<String> = Vec::new();
    for group in groups {
        let is_unsafe = group.iter().any(|line| {
            matches!(
                classifier.classify(line, named),
                Safety::Unsafe | Safety::Unknown
            )
        });
        if is_unsafe {
            moved.extend(group);
        } else {
            safe.extend(group);
        }
    }

    if moved.is_empty() {
        return code.to_string();
    }
    debug!(count = moved.len(), "relocating constructor statements to post_init");

    let mut out: Vec<String> = Vec::new();
    out.extend(lines[..=header].iter().cloned());
    out.extend(safe);
    out.extend(lines[closing..].iter().cloned());

    let post_init = Regex::new(&format!(
        r"^\s*function\s+{FORCED_MODULE_NAME}\s*[.:]\s*post_init\s*\("
    ))
    .unwrap();
    if let Some((_, post_closing)) = find_function_region(&out, &post_init) {
        let tail = out.split_off(post_closing);
        out.extend(moved);
        out.extend(tail);
    }

    out.join("\n")
}

/// Finds (header line index, closing `end` line index) for the first function
/// whose header matches.
fn find_function_region(lines: &[String], header: &Regex) -> Option<(usize, usize)> {
    let start = lines.iter().position(|l| header.is_match(l))?;
    let mut depth = block_delta(&lines[start]);
    if depth <= 0 {
        // single-line function, nothing to scan
        return Some((start, start));
    }
    for (offset, line) in lines[start + 1..].iter().enumerate() {
        depth += block_delta(line);
        if depth <= 0 {
            return Some((start, start + 1 + offset));
        }
    }
    None
}

/// Groups body lines into whole statements: a new group starts at block depth
/// zero with no bracket left open, so an `if ... end` moves as a unit and a
/// call continued across lines stays with its opening line. Blank lines
/// between groups are dropped.
fn group_statements(body: &[String]) -> Vec<Vec<String>> {
    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut depth = 0i32;
    let mut brackets = 0i32;
    for line in body {
        if depth == 0 && brackets <= 0 {
            if line.trim().is_empty() {
                continue;
            }
            groups.push(Vec::new());
            brackets = 0;
        }
        if let Some(group) = groups.last_mut() {
            group.push(line.clone());
        }
        depth += block_delta(line);
        brackets += bracket_delta(line);
    }
    groups
}

/// Net bracket-depth change of one line, string literals and comments ignored.
fn bracket_delta(line: &str) -> i32 {
    strip_strings_and_comments(line)
        .chars()
        .map(|c| match c {
            '(' | '{' | '[' => 1,
            ')' | '}' | ']' => -1,
            _ => 0,
        })
        .sum()
}

/// Net block-depth change of one line: `function`/`if`/`do`/`repeat` open,
/// `end`/`until` close. String literals and comments are ignored first.
pub(crate) fn block_delta(line: &str) -> i32 {
    let cleaned = strip_strings_and_comments(line);
    let mut delta = 0;
    for word in cleaned
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
    {
        match word {
            "function" | "if" | "do" | "repeat" => delta += 1,
            "end" | "until" => delta -= 1,
            _ => {}
        }
    }
    delta
}

/// True when the block keywords of a whole source balance out.
pub(crate) fn blocks_balanced(src: &str) -> bool {
    let mut depth = 0i32;
    for line in src.lines() {
        depth += block_delta(line);
        if depth < 0 {
            return false;
        }
    }
    depth == 0
}

fn strip_strings_and_comments(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    let mut quote: Option<char> = None;
    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == '\\' {
                    chars.next();
                } else if c == q {
                    quote = None;
                }
            }
            None => {
                if c == '"' || c == '\'' {
                    quote = Some(c);
                } else if c == '-' && chars.peek() == Some(&'-') {
                    break;
                } else {
                    out.push(c);
                }
            }
        }
    }
    out
}

fn validate_structure(code: &str) -> PipelineResult<()> {
    let trimmed = code.trim_start();
    let shaped = (trimmed.starts_with("--") || trimmed.starts_with("local"))
        && code.contains(&format!("return {FORCED_MODULE_NAME}"));
    if !shaped {
        return Err(PipelineError::InvalidScriptStructure(
            "rewritten script is missing the module skeleton".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::infer_element_kind;
    use pretty_assertions::assert_eq;

    fn label(name: &str) -> NamedElement {
        NamedElement {
            name: name.to_string(),
            kind: infer_element_kind("Label"),
        }
    }

    #[test]
    fn test_module_shaped_script_is_adjusted_in_place() {
        let code = "local MainPage = {}\n\nfunction MainPage.new()\n    count = 0\nend\n\nreturn MainPage\n";
        let out = rewrite_code_behind(code, &[label("CounterLabel")]).unwrap();
        assert!(out.starts_with(PRELUDE_HEADER));
        assert!(out.contains("local DynamicView = {}"));
        assert!(out.contains("DynamicView.base = \"ContentView\""));
        assert!(out.contains("DynamicView.fields = { CounterLabel = \"Label\" }"));
        assert!(out.contains("function DynamicView.init("));
        assert!(out.contains("function DynamicView.post_init("));
        assert!(out.contains("return DynamicView"));
        assert!(!out.contains("MainPage"));
    }

    #[test]
    fn test_loose_functions_are_wrapped() {
        let code = "local count = 0\n\nfunction increment()\n    count = count + 1\nend\n\nprint(\"top level\")\n";
        let out = rewrite_standalone(code).unwrap();
        assert!(out.contains("local count = 0"));
        assert!(out.contains("function DynamicView.increment()"));
        assert!(out.contains("function DynamicView.init()"));
        // loose top-level statement is dropped
        assert!(!out.contains("top level"));
        assert!(out.contains("return DynamicView"));
    }

    #[test]
    fn test_requires_are_replaced_by_the_prelude() {
        let code = "local json = require(\"json\")\nlocal M = {}\nfunction M.init()\nend\nreturn M\n";
        let out = rewrite_code_behind(code, &[]).unwrap();
        assert!(!out.contains("require"));
        assert!(out.contains("local json = json"));
    }

    #[test]
    fn test_modal_statements_are_removed() {
        let code = "local M = {}\nfunction M.init()\n    alert(\"Title\", \"hello\")\n    count = 1\nend\nreturn M\n";
        let out = rewrite_code_behind(code, &[]).unwrap();
        assert!(!out.contains("alert"));
        assert!(out.contains("count = 1"));
    }

    #[test]
    fn test_unsafe_constructor_statement_moves_to_post_init() {
        let code = "local M = {}\n\nfunction M.init()\n    count = 0\n    CounterLabel.Text = \"0\"\n    total = 10\nend\n\nreturn M\n";
        let out = rewrite_code_behind(code, &[label("CounterLabel")]).unwrap();

        let init_body = function_body(&out, "init");
        let post_body = function_body(&out, "post_init");
        assert_eq!(
            init_body
                .iter()
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>(),
            vec!["count = 0", "total = 10"]
        );
        assert_eq!(
            post_body.iter().map(|l| l.trim()).collect::<Vec<_>>(),
            vec!["CounterLabel.Text = \"0\""]
        );
    }

    #[test]
    fn test_block_statements_move_whole() {
        let code = "local M = {}\n\nfunction M.init()\n    if ready then\n        CounterLabel.Text = \"0\"\n    end\n    count = 0\nend\n\nreturn M\n";
        let out = rewrite_code_behind(code, &[label("CounterLabel")]).unwrap();
        let init_body = function_body(&out, "init");
        let post_body = function_body(&out, "post_init");
        assert_eq!(
            init_body.iter().map(|l| l.trim()).collect::<Vec<_>>(),
            vec!["count = 0"]
        );
        assert_eq!(
            post_body.iter().map(|l| l.trim()).collect::<Vec<_>>(),
            vec!["if ready then", "CounterLabel.Text = \"0\"", "end"]
        );
    }

    #[test]
    fn test_colon_method_constructor_is_preserved() {
        let code = "local MainPage = {}\n\nfunction MainPage:init()\n    count = 0\n    CounterLabel.Text = \"0\"\nend\n\nreturn MainPage\n";
        let out = rewrite_code_behind(code, &[label("CounterLabel")]).unwrap();

        // exactly one init definition: no empty stub shadowing the real one
        let headers = Regex::new(r"function\s+DynamicView\s*[.:]\s*init\s*\(")
            .unwrap()
            .find_iter(&out)
            .count();
        assert_eq!(headers, 1);

        let init_body = function_body(&out, "init");
        assert!(init_body.iter().any(|l| l.trim() == "count = 0"));
        let post_body = function_body(&out, "post_init");
        assert!(post_body.iter().any(|l| l.contains("CounterLabel.Text")));
    }

    #[test]
    fn test_multiline_call_moves_whole() {
        let code = "local M = {}\n\nfunction M.init()\n    CounterLabel.Text = string.format(\n        \"%d\", 0)\n    count = 0\nend\n\nreturn M\n";
        let out = rewrite_code_behind(code, &[label("CounterLabel")]).unwrap();

        let init_body = function_body(&out, "init");
        assert_eq!(
            init_body.iter().map(|l| l.trim()).collect::<Vec<_>>(),
            vec!["count = 0"]
        );
        let post_body = function_body(&out, "post_init");
        assert_eq!(
            post_body.iter().map(|l| l.trim()).collect::<Vec<_>>(),
            vec!["CounterLabel.Text = string.format(", "\"%d\", 0)"]
        );
    }

    #[test]
    fn test_standalone_skips_relocation() {
        let code = "local M = {}\nfunction M.init()\n    View:add(view.create(\"Label\", { Text = \"hi\" }))\nend\nreturn M\n";
        let out = rewrite_standalone(code).unwrap();
        let init_body = function_body(&out, "init");
        assert!(init_body.iter().any(|l| l.contains("View:add")));
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let code = "local M = {}\n\nfunction M.init()\n    count = 0\n    CounterLabel.Text = \"0\"\nend\n\nreturn M\n";
        let named = [label("CounterLabel")];
        let once = rewrite_code_behind(code, &named).unwrap();
        let twice = rewrite_code_behind(&once, &named).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_blocks_balanced() {
        assert!(blocks_balanced("function f()\n  if x then\n  end\nend"));
        assert!(!blocks_balanced("function f()\n  if x then\nend"));
        assert!(blocks_balanced("-- just a comment with end in it"));
        assert!(blocks_balanced("local s = \"function\""));
    }

    /// Extracts the body lines of `function DynamicView.<name>` from rewritten code.
    fn function_body(code: &str, name: &str) -> Vec<String> {
        let lines: Vec<String> = code.lines().map(str::to_string).collect();
        let header = Regex::new(&format!(
            r"^\s*function\s+DynamicView\s*[.:]\s*{name}\s*\("
        ))
        .unwrap();
        let (start, end) = find_function_region(&lines, &header).unwrap();
        lines[start + 1..end].to_vec()
    }
}
