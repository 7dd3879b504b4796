//! Lexical scan of statement text
//!
//! Walks the SQL once and sorts its bytes into code, comments and quoted
//! text (string literals, quoted identifiers, dollar-quoted bodies), while
//! tracking parenthesis depth. Row-cap decisions look at top-level code
//! only, so a `LIMIT` inside a comment, a literal or a subquery does not
//! count as bounding the outer result.

/// What a scanned span of text is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    Code,
    Quoted,
    Comment,
}

/// Result of scanning one statement
#[derive(Debug, Clone)]
pub struct ScannedSql {
    /// Comments and quoted text blanked to spaces
    code: String,
    /// Like `code`, with parenthesized text blanked too
    top_level: String,
    /// Byte offset just past the last significant character
    body_end: usize,
    /// A `;` at depth 0 is followed by more code
    multiple_statements: bool,
}

struct Scanner<'a> {
    bytes: &'a [u8],
    code: Vec<u8>,
    top_level: Vec<u8>,
    depth: usize,
    body_end: usize,
    saw_separator: bool,
    multiple_statements: bool,
}

impl Scanner<'_> {
    fn mark(&mut self, from: usize, to: usize, span: Span) {
        let to = to.min(self.bytes.len());
        if span != Span::Code {
            self.code[from..to].fill(b' ');
        }
        if span != Span::Code || self.depth > 0 {
            self.top_level[from..to].fill(b' ');
        }
        if span == Span::Comment {
            return;
        }
        if self.bytes[from..to].iter().all(u8::is_ascii_whitespace) {
            return;
        }
        if self.saw_separator {
            self.multiple_statements = true;
        }
        self.body_end = to;
    }
}

impl ScannedSql {
    pub fn scan(sql: &str) -> Self {
        let bytes = sql.as_bytes();
        let mut s = Scanner {
            bytes,
            code: bytes.to_vec(),
            top_level: bytes.to_vec(),
            depth: 0,
            body_end: 0,
            saw_separator: false,
            multiple_statements: false,
        };

        let mut i = 0;
        while i < bytes.len() {
            let next = bytes.get(i + 1).copied();
            match bytes[i] {
                b'-' if next == Some(b'-') => {
                    let end = find_from(bytes, i + 2, b"\n").map_or(bytes.len(), |n| n + 1);
                    s.mark(i, end, Span::Comment);
                    i = end;
                }
                b'/' if next == Some(b'*') => {
                    let end = block_comment_end(bytes, i);
                    s.mark(i, end, Span::Comment);
                    i = end;
                }
                b'\'' => {
                    let backslash_escapes = i > 0
                        && matches!(bytes[i - 1], b'e' | b'E')
                        && !(i > 1 && is_word_byte(bytes[i - 2]));
                    let end = quoted_end(bytes, i, b'\'', backslash_escapes);
                    s.mark(i, end, Span::Quoted);
                    i = end;
                }
                b'"' => {
                    let end = quoted_end(bytes, i, b'"', false);
                    s.mark(i, end, Span::Quoted);
                    i = end;
                }
                b'$' if !(i > 0 && is_word_byte(bytes[i - 1])) => match dollar_tag(bytes, i) {
                    Some(tag_len) => {
                        let tag = &bytes[i..i + tag_len];
                        let end = find_from(bytes, i + tag_len, tag).map_or(bytes.len(), |n| n + tag_len);
                        s.mark(i, end, Span::Quoted);
                        i = end;
                    }
                    None => {
                        s.mark(i, i + 1, Span::Code);
                        i += 1;
                    }
                },
                b'(' => {
                    s.depth += 1;
                    s.mark(i, i + 1, Span::Code);
                    i += 1;
                }
                b')' => {
                    s.mark(i, i + 1, Span::Code);
                    s.depth = s.depth.saturating_sub(1);
                    i += 1;
                }
                b';' if s.depth == 0 => {
                    s.saw_separator = true;
                    i += 1;
                }
                _ => {
                    s.mark(i, i + 1, Span::Code);
                    i += 1;
                }
            }
        }

        ScannedSql {
            code: String::from_utf8_lossy(&s.code).into_owned(),
            top_level: String::from_utf8_lossy(&s.top_level).into_owned(),
            body_end: s.body_end,
            multiple_statements: s.multiple_statements,
        }
    }

    /// First keyword of the statement, lowercased, skipping comments and
    /// opening parentheses
    pub fn first_keyword(&self) -> String {
        words(&self.code)
            .next()
            .map(|w| w.to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// Whether the outermost query carries `LIMIT` or `FETCH FIRST/NEXT`
    pub fn has_top_level_limit(&self) -> bool {
        let mut tokens = words(&self.top_level).map(|w| w.to_ascii_lowercase());
        while let Some(word) = tokens.next() {
            match word.as_str() {
                "limit" => return true,
                "fetch" => {
                    if matches!(tokens.next().as_deref(), Some("first" | "next")) {
                        return true;
                    }
                }
                _ => {}
            }
        }
        false
    }

    /// The statement without trailing whitespace, comments and semicolons
    pub fn body<'a>(&self, sql: &'a str) -> &'a str {
        &sql[..self.body_end]
    }

    pub fn has_multiple_statements(&self) -> bool {
        self.multiple_statements
    }
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

fn find_from(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|n| n + from)
}

/// End of a `/* ... */` comment starting at `start`; these nest in PostgreSQL
fn block_comment_end(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'/', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

/// End of a quoted run opened at `start`; a doubled quote is an escape
fn quoted_end(bytes: &[u8], start: usize, quote: u8, backslash_escapes: bool) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash_escapes && b == b'\\' {
            i += 2;
        } else if b == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
            } else {
                return i + 1;
            }
        } else {
            i += 1;
        }
    }
    bytes.len()
}

/// Length of the `$tag$` or `$$` opening at `start`. `$1` is a parameter.
fn dollar_tag(bytes: &[u8], start: usize) -> Option<usize> {
    for (n, b) in bytes[start + 1..].iter().enumerate() {
        match *b {
            b'$' => return Some(n + 2),
            b'0'..=b'9' if n == 0 => return None,
            b if is_word_byte(b) => {}
            _ => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_in_comment_is_not_top_level() {
        assert!(!ScannedSql::scan("SELECT * FROM t -- limit 1").has_top_level_limit());
        assert!(!ScannedSql::scan("SELECT * FROM t /* LIMIT 1 */").has_top_level_limit());
        assert!(!ScannedSql::scan("SELECT /* /* limit 1 */ */ * FROM t").has_top_level_limit());
    }

    #[test]
    fn test_limit_in_literal_is_not_top_level() {
        assert!(!ScannedSql::scan("SELECT 'limit 1' AS x FROM t").has_top_level_limit());
        assert!(!ScannedSql::scan("SELECT 'it''s limit 1' FROM t").has_top_level_limit());
        assert!(!ScannedSql::scan(r"SELECT E'\' limit 1' FROM t").has_top_level_limit());
        assert!(!ScannedSql::scan(r#"SELECT "limit" FROM t"#).has_top_level_limit());
        assert!(!ScannedSql::scan("SELECT $body$ limit 1 $body$ FROM t").has_top_level_limit());
        assert!(!ScannedSql::scan("SELECT $$ fetch first $$ FROM t").has_top_level_limit());
    }

    #[test]
    fn test_limit_in_subquery_is_not_top_level() {
        let scanned = ScannedSql::scan("SELECT *, (SELECT 1 LIMIT 1) FROM t");
        assert!(!scanned.has_top_level_limit());
        let scanned = ScannedSql::scan("SELECT * FROM (SELECT * FROM t LIMIT 5) s");
        assert!(!scanned.has_top_level_limit());
        let scanned = ScannedSql::scan("(SELECT * FROM a) UNION (SELECT * FROM b) LIMIT 3");
        assert!(scanned.has_top_level_limit());
    }

    #[test]
    fn test_top_level_limit_forms() {
        assert!(ScannedSql::scan("select * from t limit $1").has_top_level_limit());
        assert!(ScannedSql::scan("select * from t\nLIMIT\n10").has_top_level_limit());
        assert!(ScannedSql::scan("SELECT * FROM t OFFSET 2 FETCH NEXT 3 ROWS ONLY").has_top_level_limit());
        assert!(!ScannedSql::scan("select speed_limit from cars").has_top_level_limit());
        assert!(!ScannedSql::scan("select fetch from t").has_top_level_limit());
    }

    #[test]
    fn test_body_drops_trailing_comments_and_semicolons() {
        let sql = "SELECT 1; -- x";
        assert_eq!(ScannedSql::scan(sql).body(sql), "SELECT 1");
        let sql = "select 'a;b' /* tail */ ;\n";
        assert_eq!(ScannedSql::scan(sql).body(sql), "select 'a;b'");
        assert!(!ScannedSql::scan(sql).has_multiple_statements());
    }

    #[test]
    fn test_multiple_statements_detected() {
        assert!(ScannedSql::scan("SELECT 1; SELECT 2").has_multiple_statements());
        assert!(!ScannedSql::scan("SELECT ';' FROM t;").has_multiple_statements());
    }

    #[test]
    fn test_first_keyword_skips_comments_and_parens() {
        assert_eq!(ScannedSql::scan("/* hi */ -- x\n  Select 1").first_keyword(), "select");
        assert_eq!(ScannedSql::scan("((SELECT 1))").first_keyword(), "select");
        assert_eq!(ScannedSql::scan("").first_keyword(), "");
    }
}
