//! Lossy compaction of generated C++ headers.
//!
//! Keeps the declarative surface of a header (directives, comments,
//! prototypes, type scopes) and drops function bodies, so a generated parser
//! can be handed back to the driver without blowing its context budget.
//!
//! Braces are counted textually: a `{` or `}` inside a string or character
//! literal on a function-body line skews the balance.

use thiserror::Error;

/// Prefixes that open a scope whose body must be kept.
const TYPE_SCOPE_KEYWORDS: [&str; 5] = ["namespace", "class", "struct", "enum", "union"];

/// Generated source could not be compacted.
#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("generated source is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Keep,
    BodyHead,
}

/// Compact `source`, splitting and re-joining on `'\n'`.
pub fn compact(source: &str) -> String {
    compact_lines(source.split('\n')).join("\n")
}

/// Decode `bytes` as UTF-8, then [`compact`] it.
pub fn compact_bytes(bytes: Vec<u8>) -> Result<String, CompactionError> {
    let source = String::from_utf8(bytes)?;
    Ok(compact(&source))
}

/// Single forward scan over `lines`, dropping every function-body block.
///
/// A body head is dropped together with the following lines until the running
/// brace balance (started from the head's own balance) falls to zero.
pub fn compact_lines<'a, I>(lines: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut kept = Vec::new();
    let mut lines = lines.into_iter();

    while let Some(line) = lines.next() {
        match classify(line) {
            LineKind::Keep => kept.push(line),
            LineKind::BodyHead => {
                let mut balance = brace_balance(line);
                while balance > 0 {
                    match lines.next() {
                        Some(next) => balance += brace_balance(next),
                        None => break,
                    }
                }
            }
        }
    }

    kept
}

fn classify(line: &str) -> LineKind {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return LineKind::Keep;
    }
    if trimmed.starts_with("//") || trimmed.starts_with("/*") {
        return LineKind::Keep;
    }
    if !line.contains('{') {
        return LineKind::Keep;
    }
    if trimmed == "{" || is_type_scope(trimmed) {
        LineKind::Keep
    } else {
        LineKind::BodyHead
    }
}

fn is_type_scope(trimmed: &str) -> bool {
    TYPE_SCOPE_KEYWORDS
        .iter()
        .any(|keyword| trimmed.starts_with(keyword))
}

fn brace_balance(line: &str) -> i64 {
    line.chars().fold(0, |acc, c| match c {
        '{' => acc + 1,
        '}' => acc - 1,
        _ => acc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO_INPUT: &str = "#pragma once
// A comment
int add(int a, int b);

int add(int a, int b) {
    return a + b;
}

namespace NS {
    int x;
}";

    const SCENARIO_OUTPUT: &str = "#pragma once
// A comment
int add(int a, int b);


namespace NS {
    int x;
}";

    const GENERATED_HEADER: &str = r#"#ifndef CHISEL_HPP
#define CHISEL_HPP
#include <istream>

/* generated by chisel */
namespace chisel {

class Parser {
public:
    struct Node {
        int kind;
    };
    static Node construct_PROGRAM(std::istream &reader);
    static bool accept(std::istream &reader, char c);
};

enum class Kind { Program, Stmt };

Parser::Node Parser::construct_PROGRAM(std::istream &reader) {
    Node node{0};
    if (!accept(reader, 'x')) {
        return node;
    }
    return node;
}

bool Parser::accept(std::istream &reader, char c) {
    return reader.peek() == c;
}

union Value { int i; double d; };

}
#endif"#;

    fn lines_starting_with_type_scope(text: &str) -> usize {
        text.split('\n')
            .filter(|line| is_type_scope(line.trim()))
            .count()
    }

    #[test]
    fn scenario_drops_definition_and_keeps_namespace() {
        assert_eq!(compact(SCENARIO_INPUT), SCENARIO_OUTPUT);
    }

    #[test]
    fn generated_header_keeps_declarations_only() {
        let out = compact(GENERATED_HEADER);
        assert!(out.contains("    static Node construct_PROGRAM(std::istream &reader);"));
        assert!(out.contains("enum class Kind { Program, Stmt };"));
        assert!(out.contains("union Value { int i; double d; };"));
        assert!(!out.contains("Parser::Node Parser::construct_PROGRAM"));
        assert!(!out.contains("return reader.peek() == c;"));
        assert!(!out.contains("if (!accept(reader, 'x'))"));
        assert!(out.ends_with("}\n#endif"));
    }

    #[test]
    fn compaction_is_idempotent() {
        for input in [SCENARIO_INPUT, SCENARIO_OUTPUT, GENERATED_HEADER, "", "f() {"] {
            let once = compact(input);
            assert_eq!(compact(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn compaction_never_grows_line_count() {
        for input in [SCENARIO_INPUT, GENERATED_HEADER, "a\nb {\n}\nc", "\n\n"] {
            let out = compact(input);
            assert!(out.split('\n').count() <= input.split('\n').count());
        }
    }

    #[test]
    fn blank_directive_and_comment_lines_survive_in_order() {
        let input = "#include <a>\nvoid f() {\n\n  // inner\n}\n\n// outer\n#define X 1";
        let out = compact(input);
        assert_eq!(out, "#include <a>\n\n// outer\n#define X 1");

        let preserved: Vec<&str> = GENERATED_HEADER
            .split('\n')
            .filter(|line| {
                let t = line.trim();
                t.is_empty() || t.starts_with('#') || t.starts_with("//") || t.starts_with("/*")
            })
            .collect();
        let compacted = compact(GENERATED_HEADER);
        let survived: Vec<&str> = compacted
            .split('\n')
            .filter(|line| {
                let t = line.trim();
                t.is_empty() || t.starts_with('#') || t.starts_with("//") || t.starts_with("/*")
            })
            .collect();
        assert_eq!(preserved, survived);
    }

    #[test]
    fn type_scope_line_count_is_retained() {
        for input in [SCENARIO_INPUT, GENERATED_HEADER] {
            assert_eq!(
                lines_starting_with_type_scope(input),
                lines_starting_with_type_scope(&compact(input))
            );
        }
    }

    #[test]
    fn one_line_body_drops_only_itself() {
        let out = compact("int one() { return 1; }\nint two();");
        assert_eq!(out, "int two();");
    }

    #[test]
    fn unterminated_body_runs_to_end_of_input() {
        let out = compact("int keep;\nvoid f() {\n  if (x) {\n}");
        assert_eq!(out, "int keep;");
    }

    #[test]
    fn bare_brace_line_is_kept() {
        let out = compact("struct S\n{\n  int a;\n};");
        assert_eq!(out, "struct S\n{\n  int a;\n};");
    }

    #[test]
    fn brace_in_literal_skews_balance() {
        // The literal `}` closes the body early, so the real closing brace leaks through.
        let out = compact("void f() {\n  puts(\"}\");\n}\nint after;");
        assert_eq!(out, "}\nint after;");
    }

    #[test]
    fn keyword_match_is_a_plain_prefix() {
        let out = compact("classify(x) {\n  y;\n}");
        assert_eq!(out, "classify(x) {\n  y;\n}");
    }

    #[test]
    fn compact_bytes_rejects_invalid_utf8() {
        let err = compact_bytes(vec![0xff, 0xfe]).unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }
}
