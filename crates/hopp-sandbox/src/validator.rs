//! Pre-execution checks for script text.
//!
//! Size and nesting are checked before anything is parsed; the parse itself
//! catches syntax errors before a V8 isolate is spent on the script. Scripts
//! may use top-level `await`, so they are parsed inside the same async
//! function body the executor runs them in.

use oxc_allocator::Allocator;
use oxc_parser::Parser;
use oxc_span::SourceType;

use crate::error::SandboxError;

/// Maximum script size in bytes (256 KB).
pub const DEFAULT_MAX_SCRIPT_SIZE: usize = 256 * 1024;

/// Maximum bracket nesting before we refuse to parse.
/// Prevents parser stack overflow on deeply nested input.
pub const MAX_NESTING_DEPTH: usize = 256;

/// Check nesting depth of brackets/braces/parens before parsing.
pub fn check_nesting_depth(script: &str) -> Result<(), SandboxError> {
    let mut depth: usize = 0;
    let mut max_depth: usize = 0;
    for ch in script.chars() {
        match ch {
            '{' | '[' | '(' => {
                depth += 1;
                max_depth = max_depth.max(depth);
            }
            '}' | ']' | ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    if max_depth > MAX_NESTING_DEPTH {
        return Err(SandboxError::NestingTooDeep {
            max: MAX_NESTING_DEPTH,
            actual: max_depth,
        });
    }
    Ok(())
}

/// Validate a script before execution. Empty scripts are valid.
pub fn validate_script(script: &str, max_size: Option<usize>) -> Result<(), SandboxError> {
    let max = max_size.unwrap_or(DEFAULT_MAX_SCRIPT_SIZE);
    if script.len() > max {
        return Err(SandboxError::CodeTooLarge {
            max,
            actual: script.len(),
        });
    }

    check_nesting_depth(script)?;

    let wrapped = format!("(async () => {{\n{script}\n}});");
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, &wrapped, SourceType::cjs()).parse();

    if ret.panicked {
        return Err(SandboxError::Syntax {
            message: "parser panicked on malformed input".into(),
        });
    }
    if let Some(first) = ret.errors.first() {
        return Err(SandboxError::Syntax {
            message: first.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_top_level_await() {
        let script = r#"
            const res = await fetch("https://echo.hoppscotch.io");
            pw.env.set("status", String(res.status));
        "#;
        assert!(validate_script(script, None).is_ok());
    }

    #[test]
    fn accepts_empty_script() {
        assert!(validate_script("", None).is_ok());
        assert!(validate_script("  // nothing to do\n", None).is_ok());
    }

    #[test]
    fn rejects_syntax_errors() {
        let err = validate_script("pw.test('x', () => {", None).unwrap_err();
        assert!(matches!(err, SandboxError::Syntax { .. }));
    }

    #[test]
    fn rejects_oversized_script() {
        let big = "x".repeat(300_000);
        let err = validate_script(&big, None).unwrap_err();
        assert!(matches!(err, SandboxError::CodeTooLarge { .. }));
    }

    #[test]
    fn rejects_deep_nesting() {
        let deep = format!("{}1{}", "(".repeat(300), ")".repeat(300));
        let err = validate_script(&deep, None).unwrap_err();
        assert!(matches!(
            err,
            SandboxError::NestingTooDeep { max: 256, actual: 300 }
        ));
    }
}
