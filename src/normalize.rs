//! Statement fingerprinting
//!
//! Reduces statement text to its *normalized shape*: literal values (numbers,
//! strings, dollar-quoted strings, booleans) and bind placeholders become `?`,
//! comments disappear, whitespace collapses and unquoted text is lower-cased. Two executions of the same query with
//! different literal values share a shape, which is what lets the aggregator
//! group them and the detector spot N+1 loops.
//!
//! The transformation is idempotent: `normalize_statement(&normalize_statement(s))`
//! equals `normalize_statement(s)` for every input.

use regex::Regex;
use std::iter::Peekable;
use std::str::Chars;
use std::sync::OnceLock;

/// Keywords after which a `-`/`+` introduces a signed literal rather than an
/// arithmetic operator
const SIGN_KEYWORDS: [&str; 16] = [
    "and", "or", "not", "between", "in", "is", "like", "select", "values", "when", "then",
    "else", "by", "limit", "offset", "return",
];

fn placeholder_tuple() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\(\s*\?(?:\s*,\s*\?)*\s*\)").expect("placeholder tuple regex is valid")
    })
}

fn placeholder_rows() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\(\?\)(?:\s*,\s*\(\?\))+").expect("placeholder rows regex is valid")
    })
}

/// Normalize a statement to its shape
///
/// # Example
/// ```
/// use querylens::normalize::normalize_statement;
///
/// assert_eq!(
///     normalize_statement("SELECT * FROM users WHERE id = 42"),
///     normalize_statement("select *  from users where id = 7;"),
/// );
/// assert_eq!(
///     normalize_statement("SELECT name FROM t1 WHERE id IN (1, 2, 3)"),
///     "select name from t1 where id in (?)"
/// );
/// ```
pub fn normalize_statement(statement: &str) -> String {
    let mut out = String::with_capacity(statement.len());
    let mut chars = statement.chars().peekable();
    let mut pending_space = false;

    while let Some(ch) = chars.next() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }

        // Comments behave like whitespace
        if ch == '-' && chars.peek() == Some(&'-') {
            skip_line_comment(&mut chars);
            pending_space = true;
            continue;
        }
        if ch == '/' && chars.peek() == Some(&'*') {
            chars.next();
            skip_block_comment(&mut chars);
            pending_space = true;
            continue;
        }

        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;

        match ch {
            '\'' => {
                skip_string_literal(&mut chars);
                out.push('?');
            }
            '"' | '`' => copy_quoted_identifier(ch, &mut chars, &mut out),
            '$' if next_is(&mut chars, |c| c.is_ascii_digit()) => {
                skip_while(&mut chars, |c| c.is_ascii_digit());
                out.push('?');
            }
            '$' if !follows_identifier(&out) && dollar_quote_tag(&chars).is_some() => {
                skip_dollar_quoted(&mut chars);
                out.push('?');
            }
            '?' => {
                skip_while(&mut chars, |c| c.is_ascii_digit());
                out.push('?');
            }
            ':' if !out.ends_with(':') && next_is(&mut chars, is_identifier_start) => {
                skip_while(&mut chars, is_identifier_char);
                out.push('?');
            }
            '@' if !out.ends_with('@') && next_is(&mut chars, is_identifier_char) => {
                skip_while(&mut chars, is_identifier_char);
                out.push('?');
            }
            '-' | '+' if starts_number(&chars) && sign_position(&out) => {
                skip_number(&mut chars);
                out.push('?');
            }
            '.' if next_is(&mut chars, |c| c.is_ascii_digit()) && !follows_identifier(&out) => {
                // `.5` is the same literal as `0.5`
                skip_number(&mut chars);
                out.push('?');
            }
            c if is_boolean_literal(c, &chars, &out) => {
                skip_while(&mut chars, is_identifier_char);
                out.push('?');
            }
            c if c.is_ascii_digit() => {
                if follows_identifier(&out) {
                    // Digit inside an identifier such as `t1` or `col_2`
                    out.push(c);
                } else {
                    skip_number(&mut chars);
                    out.push('?');
                }
            }
            c => out.extend(c.to_lowercase()),
        }
    }

    let trimmed = out.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if !trimmed.contains("(?") && !trimmed.contains("( ") {
        return trimmed.to_string();
    }

    let collapsed = placeholder_tuple().replace_all(trimmed, "(?)");
    placeholder_rows().replace_all(&collapsed, "(?)").into_owned()
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn follows_identifier(out: &str) -> bool {
    out.chars().last().is_some_and(is_identifier_char)
}

/// Whether the next characters are a number, with or without a leading dot
fn starts_number(chars: &Peekable<Chars<'_>>) -> bool {
    let mut ahead = chars.clone();
    match ahead.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('.') => ahead.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

/// Whether `first` starts a standalone `true`/`false` word
///
/// Qualified names such as `flags.true` are column references and stay.
fn is_boolean_literal(first: char, chars: &Peekable<Chars<'_>>, out: &str) -> bool {
    if !matches!(first, 't' | 'T' | 'f' | 'F') || follows_identifier(out) || out.ends_with('.') {
        return false;
    }
    let mut word = String::with_capacity(5);
    word.push(first);
    word.extend(chars.clone().take_while(|&c| is_identifier_char(c)).take(5));
    word.eq_ignore_ascii_case("true") || word.eq_ignore_ascii_case("false")
}

/// Tag of a dollar-quote opening (`$$` or `$tag$`) whose first `$` was just consumed
fn dollar_quote_tag(chars: &Peekable<Chars<'_>>) -> Option<String> {
    let mut ahead = chars.clone();
    let mut tag = String::new();
    loop {
        match ahead.next()? {
            '$' => return Some(tag),
            c if is_identifier_start(c) || (!tag.is_empty() && is_identifier_char(c)) => {
                tag.push(c)
            }
            _ => return None,
        }
    }
}

/// Consume a dollar-quoted body through its closing delimiter
fn skip_dollar_quoted(chars: &mut Peekable<Chars<'_>>) {
    let Some(tag) = dollar_quote_tag(chars) else {
        return;
    };
    let delimiter = format!("${}$", tag);
    for _ in 0..tag.chars().count() + 1 {
        chars.next();
    }

    let mut body = String::new();
    for c in chars.by_ref() {
        body.push(c);
        if body.ends_with(&delimiter) {
            break;
        }
    }
}

fn next_is(chars: &mut Peekable<Chars<'_>>, pred: impl Fn(char) -> bool) -> bool {
    chars.peek().is_some_and(|&c| pred(c))
}

fn skip_while(chars: &mut Peekable<Chars<'_>>, pred: impl Fn(char) -> bool) {
    while chars.next_if(|&c| pred(c)).is_some() {}
}

/// Consume the remainder of a numeric literal (the first digit may already be consumed)
fn skip_number(chars: &mut Peekable<Chars<'_>>) {
    while let Some(c) = chars.next_if(|&c| c.is_alphanumeric() || c == '.') {
        if matches!(c, 'e' | 'E') {
            chars.next_if(|&c| c == '+' || c == '-');
        }
    }
}

fn skip_line_comment(chars: &mut Peekable<Chars<'_>>) {
    for c in chars.by_ref() {
        if c == '\n' {
            break;
        }
    }
}

fn skip_block_comment(chars: &mut Peekable<Chars<'_>>) {
    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'/') {
            chars.next();
            break;
        }
    }
}

fn skip_string_literal(chars: &mut Peekable<Chars<'_>>) {
    while let Some(c) = chars.next() {
        if c == '\'' {
            // '' is an escaped quote inside the literal
            if chars.next_if(|&c| c == '\'').is_none() {
                break;
            }
        }
    }
}

fn copy_quoted_identifier(quote: char, chars: &mut Peekable<Chars<'_>>, out: &mut String) {
    out.push(quote);
    while let Some(c) = chars.next() {
        out.push(c);
        if c == quote {
            match chars.next_if(|&c| c == quote) {
                Some(escaped) => out.push(escaped),
                None => break,
            }
        }
    }
}

/// Whether a `-`/`+` at the end of `out` would be a sign rather than an operator
fn sign_position(out: &str) -> bool {
    let trimmed = out.trim_end();
    let Some(last) = trimmed.chars().last() else {
        return true;
    };
    if "=<>(,+-*/%|[:".contains(last) {
        return true;
    }
    if !is_identifier_char(last) {
        return false;
    }
    let word_start = trimmed
        .char_indices()
        .rev()
        .find(|&(_, c)| !is_identifier_char(c))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    SIGN_KEYWORDS.contains(&&trimmed[word_start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals_replaced() {
        assert_eq!(
            normalize_statement("SELECT * FROM users WHERE id = 42 AND name = 'bob'"),
            "select * from users where id = ? and name = ?"
        );
    }

    #[test]
    fn test_same_shape_for_different_literals() {
        let a = normalize_statement("SELECT * FROM orders WHERE user_id = 1 AND total > 9.99");
        let b = normalize_statement("SELECT * FROM orders WHERE user_id = 1234 AND total > 0.5");
        assert_eq!(a, b);
    }

    #[test]
    fn test_whitespace_and_trailing_semicolon() {
        assert_eq!(
            normalize_statement("  SELECT   id\n\tFROM users ;  "),
            "select id from users"
        );
    }

    #[test]
    fn test_comments_removed() {
        assert_eq!(
            normalize_statement("SELECT id -- pick ids\nFROM /* hot */ users"),
            "select id from users"
        );
    }

    #[test]
    fn test_escaped_quotes_in_string() {
        assert_eq!(
            normalize_statement("SELECT * FROM t WHERE name = 'O''Brien' AND x = 1"),
            "select * from t where name = ? and x = ?"
        );
    }

    #[test]
    fn test_digits_in_identifiers_kept() {
        assert_eq!(
            normalize_statement("SELECT t1.col_2 FROM table1 t1 WHERE t1.id = 3"),
            "select t1.col_2 from table1 t1 where t1.id = ?"
        );
    }

    #[test]
    fn test_quoted_identifiers_preserved() {
        assert_eq!(
            normalize_statement(r#"SELECT "UserName" FROM `Orders` WHERE "Id" = 5"#),
            r#"select "UserName" from `Orders` where "Id" = ?"#
        );
    }

    #[test]
    fn test_bind_placeholders_unified() {
        let expected = "select * from users where id = ? and org = ?";
        assert_eq!(
            normalize_statement("SELECT * FROM users WHERE id = $1 AND org = $2"),
            expected
        );
        assert_eq!(
            normalize_statement("SELECT * FROM users WHERE id = :id AND org = :org"),
            expected
        );
        assert_eq!(
            normalize_statement("SELECT * FROM users WHERE id = @p1 AND org = @p2"),
            expected
        );
        assert_eq!(
            normalize_statement("SELECT * FROM users WHERE id = ?1 AND org = ?2"),
            expected
        );
    }

    #[test]
    fn test_postgres_cast_not_a_placeholder() {
        assert_eq!(
            normalize_statement("SELECT id::text FROM users WHERE id = $1"),
            "select id::text from users where id = ?"
        );
    }

    #[test]
    fn test_signed_numbers() {
        assert_eq!(
            normalize_statement("SELECT * FROM t WHERE x = -5"),
            normalize_statement("SELECT * FROM t WHERE x = 5")
        );
        assert_eq!(
            normalize_statement("SELECT * FROM t WHERE x BETWEEN -5 AND +7"),
            "select * from t where x between ? and ?"
        );
        // Binary minus stays an operator
        assert_eq!(
            normalize_statement("SELECT a-5 FROM t"),
            "select a-? from t"
        );
    }

    #[test]
    fn test_signed_array_and_slice_elements() {
        assert_eq!(
            normalize_statement("SELECT * FROM t WHERE x = ANY(ARRAY[-1, 2])"),
            normalize_statement("SELECT * FROM t WHERE x = ANY(ARRAY[1, 2])")
        );
        assert_eq!(
            normalize_statement("SELECT tags[-2:-1] FROM t"),
            "select tags[?:?] from t"
        );
    }

    #[test]
    fn test_leading_dot_decimals() {
        assert_eq!(
            normalize_statement("SELECT * FROM t WHERE x > .5"),
            "select * from t where x > ?"
        );
        assert_eq!(
            normalize_statement("SELECT * FROM t WHERE x > -.25"),
            normalize_statement("SELECT * FROM t WHERE x > 1.5")
        );
        // Qualified column references keep their dot
        assert_eq!(normalize_statement("SELECT t.col FROM t"), "select t.col from t");
    }

    #[test]
    fn test_boolean_literals() {
        assert_eq!(
            normalize_statement("SELECT * FROM users WHERE active = TRUE"),
            "select * from users where active = ?"
        );
        assert_eq!(
            normalize_statement("SELECT * FROM users WHERE active = false"),
            normalize_statement("SELECT * FROM users WHERE active = true")
        );
        assert_eq!(
            normalize_statement("SELECT truex, is_false, flags.true FROM t"),
            "select truex, is_false, flags.true from t"
        );
    }

    #[test]
    fn test_dollar_quoted_strings() {
        assert_eq!(
            normalize_statement("SELECT * FROM t WHERE b = $$abc$$"),
            "select * from t where b = ?"
        );
        assert_eq!(
            normalize_statement("SELECT * FROM t WHERE b = $body$it's $$ here$body$ AND c = 1"),
            "select * from t where b = ? and c = ?"
        );
        assert_eq!(
            normalize_statement("SELECT * FROM t WHERE b = $$xyz$$"),
            normalize_statement("SELECT * FROM t WHERE b = 'abc'")
        );
        // `$` inside identifiers and positional binds are unaffected
        assert_eq!(normalize_statement("SELECT a$b FROM t WHERE x = $2"), "select a$b from t where x = ?");
        assert_eq!(normalize_statement("SELECT $$unterminated"), "select ?");
    }

    #[test]
    fn test_numeric_forms() {
        assert_eq!(
            normalize_statement("SELECT 1.5e-3, 0xFF, 10 FROM dual"),
            "select ?, ?, ? from dual"
        );
    }

    #[test]
    fn test_in_list_collapsed() {
        let a = normalize_statement("SELECT * FROM posts WHERE author_id IN (1, 2, 3)");
        let b = normalize_statement("SELECT * FROM posts WHERE author_id IN (7,8)");
        assert_eq!(a, "select * from posts where author_id in (?)");
        assert_eq!(a, b);
    }

    #[test]
    fn test_multi_row_values_collapsed() {
        assert_eq!(
            normalize_statement("INSERT INTO t (a, b) VALUES (1, 'x'), (2, 'y'), (3, 'z')"),
            "insert into t (a, b) values (?)"
        );
    }

    #[test]
    fn test_idempotent_on_examples() {
        let samples = [
            "SELECT * FROM users WHERE id = 42",
            "INSERT INTO t (a, b) VALUES (1, 'x'), (2, 'y')",
            "SELECT id::text FROM \"Users\" WHERE x BETWEEN -1 AND 2 -- c",
            "UPDATE t SET v = v + 1 WHERE k IN ( $1 , $2 )",
            "select ? from t where a in (?)",
            "SELECT $tag$ x $tag$, .5, TRUE FROM t WHERE a[-1] = $1",
        ];
        for sample in samples {
            let once = normalize_statement(sample);
            assert_eq!(normalize_statement(&once), once, "not idempotent for {sample}");
        }
    }

    #[test]
    fn test_empty_statement() {
        assert_eq!(normalize_statement(""), "");
        assert_eq!(normalize_statement("   ;  "), "");
    }

    #[test]
    fn test_unterminated_literal_does_not_panic() {
        assert_eq!(normalize_statement("SELECT 'abc"), "select ?");
        assert_eq!(normalize_statement("SELECT /* open"), "select");
    }
}
