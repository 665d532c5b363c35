//! # Command lines
//!
//! Windows passes a process its arguments as one flat string, which the C
//! runtime of the child splits back into `argv`. [`make_command_line`] builds
//! that string so the child's tokenizer recovers exactly the arguments we were
//! given; [`split_command_line`] is the tokenizer itself.
//!
//! ```rust
//! use kestrel_core::cmdline::{make_command_line, split_command_line};
//!
//! let line = make_command_line(&["prog", "a b", "c\"d"]);
//! assert_eq!(line, r#"prog "a b" c\"d"#);
//! assert_eq!(split_command_line(&line), vec!["prog", "a b", "c\"d"]);
//! ```

/// Escape one argument for a Windows command line
///
/// - an empty argument becomes `""`
/// - backslashes directly before a quote are doubled and the quote is escaped
/// - an argument containing a space or tab is wrapped in quotes, with any
///   trailing backslashes doubled before the closing quote
/// - anything else is returned unchanged
pub fn escape_arg(arg: &str) -> String
{
    if arg.is_empty() {
        return "\"\"".to_string();
    }

    let needs_quotes = arg.contains([' ', '\t']);
    if !needs_quotes && !arg.contains(['"', '\\']) {
        return arg.to_string();
    }

    let mut out = String::with_capacity(arg.len() + 2);
    if needs_quotes {
        out.push('"');
    }

    let mut slashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => slashes += 1,
            '"' => {
                out.extend(std::iter::repeat('\\').take(slashes + 1));
                slashes = 0;
            }
            _ => slashes = 0,
        }
        out.push(c);
    }

    if needs_quotes {
        out.extend(std::iter::repeat('\\').take(slashes));
        out.push('"');
    }
    out
}

/// Escape every argument and join them with single spaces
pub fn make_command_line<S: AsRef<str>>(args: &[S]) -> String
{
    args.iter()
        .map(|arg| escape_arg(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a Windows command line into arguments
///
/// Follows the `CommandLineToArgvW` rules: `2n` backslashes before a quote
/// yield `n` backslashes and a quote toggle, `2n + 1` yield `n` backslashes and
/// a literal quote, other backslashes are literal. Inside a quoted section
/// `""` is a literal quote that also ends the section.
pub fn split_command_line(line: &str) -> Vec<String>
{
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(' ' | '\t')) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut arg = String::new();
        let mut in_quotes = false;
        let mut slashes = 0_usize;

        while let Some(c) = chars.next() {
            match c {
                ' ' | '\t' if !in_quotes => break,
                '\\' => {
                    slashes += 1;
                    continue;
                }
                '"' => {
                    push_slashes(&mut arg, slashes / 2);
                    if slashes % 2 == 1 {
                        arg.push('"');
                    } else {
                        if in_quotes && chars.peek() == Some(&'"') {
                            chars.next();
                            arg.push('"');
                        }
                        in_quotes = !in_quotes;
                    }
                    slashes = 0;
                    continue;
                }
                _ => {}
            }
            push_slashes(&mut arg, slashes);
            slashes = 0;
            arg.push(c);
        }

        push_slashes(&mut arg, slashes);
        args.push(arg);
    }

    args
}

fn push_slashes(out: &mut String, count: usize)
{
    out.extend(std::iter::repeat('\\').take(count));
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn plain_arguments_are_untouched()
    {
        assert_eq!(escape_arg("prog"), "prog");
        assert_eq!(escape_arg(r"C:\dir\prog.exe"), r"C:\dir\prog.exe");
    }

    #[test]
    fn empty_argument_is_quoted()
    {
        assert_eq!(escape_arg(""), "\"\"");
        assert_eq!(split_command_line("prog \"\" x"), vec!["prog", "", "x"]);
    }

    #[test]
    fn quotes_and_preceding_backslashes_are_escaped()
    {
        assert_eq!(escape_arg("c\"d"), r#"c\"d"#);
        assert_eq!(escape_arg(r#"a\"b"#), r#"a\\\"b"#);
    }

    #[test]
    fn spaces_wrap_in_quotes_and_double_trailing_backslashes()
    {
        assert_eq!(escape_arg("a b"), "\"a b\"");
        assert_eq!(escape_arg("a\tb"), "\"a\tb\"");
        assert_eq!(escape_arg(r"C:\Program Files\"), r#""C:\Program Files\\""#);
    }

    #[test]
    fn command_line_round_trips()
    {
        let cases: &[&[&str]] = &[
            &["prog", "a b", "c\"d"],
            &["prog", "", "  ", r"trailing\", r#"both \ and "" here\\"#],
            &[r"C:\Program Files\app.exe", r#"\\server\"share""#, "\t"],
        ];
        for args in cases {
            let line = make_command_line(args);
            assert_eq!(split_command_line(&line), *args, "line was {line}");
        }
    }

    #[test]
    fn doubled_quote_inside_quotes_is_literal()
    {
        assert_eq!(split_command_line(r#""a""b c"#), vec!["a\"b", "c"]);
    }

    #[test]
    fn surrounding_whitespace_is_ignored()
    {
        assert_eq!(split_command_line("  a \t b  "), vec!["a", "b"]);
        assert!(split_command_line("   ").is_empty());
    }
}
