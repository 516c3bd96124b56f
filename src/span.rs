//! Span templating between utterances and target code.
//!
//! A quoted literal in the target code (`" foo bar "`) is located in the
//! utterance, those utterance tokens become wildcards, and the code tokens
//! become back-references `\<i>` to the utterance position they came from.
//! At lookup time each back-reference is replaced by whatever word the query
//! has at that position.

use crate::{Error, Result, Token};

/// Token delimiting a quoted span in target code.
pub const QUOTE: &str = "\"";

/// Trailing token dropped from utterances before indexing.
pub const TRAILING_PERIOD: &str = ".";

/// Replaces quoted spans with wildcards and back-references.
///
/// Returns the wildcarded key and the rewritten code tokens. Spans are
/// matched left to right against the first run of identical words still
/// present in the key, so a literal quoted twice binds to two different
/// occurrences. A trailing `.` is removed from the key afterwards.
///
/// # Errors
///
/// [`Error::SpanNotFound`] when a quoted span does not occur in the
/// utterance, and [`Error::UnterminatedSpan`] when a quote is never closed.
pub fn normalize_example<U, C>(utterance: &[U], code: &[C]) -> Result<(Vec<Token>, Vec<String>)>
where
    U: AsRef<str>,
    C: AsRef<str>,
{
    let mut key: Vec<Token> = utterance.iter().map(|w| Token::word(w.as_ref())).collect();
    let mut code: Vec<String> = code.iter().map(|t| t.as_ref().to_string()).collect();

    let mut open: Option<usize> = None;
    for i in 0..code.len() {
        if code[i] != QUOTE {
            continue;
        }
        let Some(begin) = open.take() else {
            open = Some(i + 1);
            continue;
        };

        let span: Vec<&str> = code[begin..i].iter().map(String::as_str).collect();
        if span.is_empty() {
            continue;
        }
        let Some(position) = find_span(&key, &span) else {
            return Err(Error::SpanNotFound {
                span: span.join(" "),
            });
        };

        for token in key.iter_mut().skip(position).take(span.len()) {
            *token = Token::Wildcard;
        }
        for (offset, token) in code[begin..i].iter_mut().enumerate() {
            *token = backref(position + offset);
        }
    }
    if open.is_some() {
        return Err(Error::UnterminatedSpan);
    }

    strip_trailing_period(&mut key, |t| t.as_word() == Some(TRAILING_PERIOD));
    Ok((key, code))
}

/// Drops the last token if `is_period` says it is a trailing period.
pub fn strip_trailing_period<T>(tokens: &mut Vec<T>, is_period: impl Fn(&T) -> bool) {
    if tokens.last().is_some_and(is_period) {
        tokens.pop();
    }
}

/// Substitutes every back-reference in `code` with the query word at that index.
///
/// References past the end of the query are left untouched.
pub fn resolve_backrefs<S: AsRef<str>>(code: &str, utterance: &[S]) -> Vec<String> {
    code.split_whitespace()
        .map(|token| match parse_backref(token) {
            Some(index) if index < utterance.len() => utterance[index].as_ref().to_string(),
            _ => token.to_string(),
        })
        .collect()
}

fn backref(index: usize) -> String {
    format!("\\{index}")
}

/// Parses `\<digits>` into the referenced position.
pub fn parse_backref(token: &str) -> Option<usize> {
    let digits = token.strip_prefix('\\')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Wildcards never match, so positions already taken by a span are skipped.
fn find_span(key: &[Token], span: &[&str]) -> Option<usize> {
    if span.len() > key.len() {
        return None;
    }
    key.windows(span.len()).position(|window| {
        window
            .iter()
            .zip(span)
            .all(|(token, word)| token.as_word() == Some(*word))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{display_key, tokenize};

    fn normalize(utterance: &str, code: &str) -> Result<(String, String)> {
        let (key, code) = normalize_example(&tokenize(utterance), &tokenize(code))?;
        Ok((display_key(&key), code.join(" ")))
    }

    #[test]
    fn test_no_spans() {
        assert_eq!(
            normalize("get xkcd", "now => @com.xkcd.get => notify").unwrap(),
            (
                "get xkcd".to_string(),
                "now => @com.xkcd.get => notify".to_string()
            )
        );
    }

    #[test]
    fn test_single_span() {
        assert_eq!(
            normalize("search for pizza", "filter text =~ \" pizza \"").unwrap(),
            (
                "search for *".to_string(),
                "filter text =~ \" \\2 \"".to_string()
            )
        );
    }

    #[test]
    fn test_multi_token_and_multiple_spans() {
        assert_eq!(
            normalize(
                "send hello world to bob",
                "@send param:to = \" bob \" param:msg = \" hello world \""
            )
            .unwrap(),
            (
                "send * * to *".to_string(),
                "@send param:to = \" \\4 \" param:msg = \" \\1 \\2 \"".to_string()
            )
        );
    }

    #[test]
    fn test_repeated_literal_binds_next_occurrence() {
        assert_eq!(
            normalize("say foo then foo", "@say \" foo \" \" foo \"").unwrap(),
            (
                "say * then *".to_string(),
                "@say \" \\1 \" \" \\3 \"".to_string()
            )
        );
        // first occurrence wins for a single span
        assert_eq!(
            normalize("say foo then foo", "@say \" foo \"").unwrap(),
            (
                "say * then foo".to_string(),
                "@say \" \\1 \"".to_string()
            )
        );
        // a literal quoted more often than it occurs is rejected
        assert!(matches!(
            normalize("say foo", "@say \" foo \" \" foo \""),
            Err(Error::SpanNotFound { span }) if span == "foo"
        ));
    }

    #[test]
    fn test_trailing_period() {
        assert_eq!(
            normalize("turn off the lights .", "@lights.off").unwrap().0,
            "turn off the lights"
        );
        // only one trailing period goes
        assert_eq!(normalize(". .", "x").unwrap().0, ".");
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(
            normalize("post on twitter", "@post \" hello \""),
            Err(Error::SpanNotFound { span }) if span == "hello"
        ));
        assert!(matches!(
            normalize("post hello", "@post \" hello"),
            Err(Error::UnterminatedSpan)
        ));
        // empty spans are harmless
        assert_eq!(
            normalize("post", "@post \" \"").unwrap(),
            ("post".to_string(), "@post \" \"".to_string())
        );
    }

    #[test]
    fn test_resolve_backrefs() {
        let query = ["search", "for", "sushi"];
        assert_eq!(
            resolve_backrefs("filter text =~ \" \\2 \"", &query),
            vec!["filter", "text", "=~", "\"", "sushi", "\""]
        );
        assert_eq!(resolve_backrefs("x \\9 \\ \\a1", &query), vec!["x", "\\9", "\\", "\\a1"]);
    }

    #[test]
    fn test_parse_backref() {
        assert_eq!(parse_backref("\\0"), Some(0));
        assert_eq!(parse_backref("\\12"), Some(12));
        assert_eq!(parse_backref("\\"), None);
        assert_eq!(parse_backref("12"), None);
        assert_eq!(parse_backref("\\1a"), None);
        assert_eq!(parse_backref("\\+1"), None);
    }
}
