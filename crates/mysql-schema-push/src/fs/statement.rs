//! Splitting `.sql` files into statements.
//!
//! The splitter understands quoting and comments well enough to find statement
//! boundaries. It is not a SQL parser.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

/// What a statement does, as far as this tool cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    /// `CREATE TABLE`, with the optional schema qualifier and the table name.
    CreateTable {
        schema: Option<String>,
        table: String,
    },
    /// Anything else.
    Other,
}

/// One statement from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// Statement text without the trailing delimiter.
    pub text: String,
    pub file: PathBuf,
    /// 1-based line where the statement starts.
    pub line: usize,
    pub kind: StatementKind,
}

impl Statement {
    pub fn new(text: impl Into<String>, file: impl Into<PathBuf>, line: usize) -> Self {
        let text = text.into();
        let kind = classify(&text);
        Self {
            text,
            file: file.into(),
            line,
            kind,
        }
    }

    /// `path:line` for error messages.
    pub fn location(&self) -> String {
        format!("{}:{}", self.file.display(), self.line)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    Quote(char),
    LineComment,
    BlockComment,
}

/// Split SQL text into statements on `;` outside quotes and comments.
///
/// Comments before a statement are dropped; comments inside it are kept.
pub fn split_statements(sql: &str, file: &Path) -> Vec<Statement> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut start_line = 1;
    let mut line = 1;
    let mut state = State::Normal;
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let keep = !current.is_empty();

        match state {
            State::Normal => match c {
                ';' => {
                    let text = current.trim_end().to_string();
                    if !text.is_empty() {
                        statements.push(Statement::new(text, file, start_line));
                    }
                    current.clear();
                }
                '\'' | '"' | '`' => {
                    if current.is_empty() {
                        start_line = line;
                    }
                    state = State::Quote(c);
                    current.push(c);
                }
                '#' => {
                    state = State::LineComment;
                    if keep {
                        current.push(c);
                    }
                }
                '-' if next == Some('-') && chars.get(i + 2).map_or(true, |n| n.is_whitespace()) => {
                    state = State::LineComment;
                    if keep {
                        current.push_str("--");
                    }
                    i += 1;
                }
                '/' if next == Some('*') => {
                    state = State::BlockComment;
                    if keep {
                        current.push_str("/*");
                    }
                    i += 1;
                }
                c if c.is_whitespace() && current.is_empty() => {}
                c => {
                    if current.is_empty() {
                        start_line = line;
                    }
                    current.push(c);
                }
            },
            State::Quote(q) => {
                current.push(c);
                if c == '\\' && q != '`' {
                    if let Some(n) = next {
                        current.push(n);
                        if n == '\n' {
                            line += 1;
                        }
                        i += 1;
                    }
                } else if c == q {
                    if next == Some(q) {
                        current.push(q);
                        i += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Normal;
                }
                if keep {
                    current.push(c);
                }
            }
            State::BlockComment => {
                if keep {
                    current.push(c);
                }
                if c == '*' && next == Some('/') {
                    if keep {
                        current.push('/');
                    }
                    i += 1;
                    state = State::Normal;
                }
            }
        }

        if c == '\n' {
            line += 1;
        }
        i += 1;
    }

    let text = current.trim_end().to_string();
    if !text.is_empty() {
        statements.push(Statement::new(text, file, start_line));
    }
    statements
}

fn classify(text: &str) -> StatementKind {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"(?is)^CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?(?:(`(?:[^`]|``)+`|[\w$]+)\s*\.\s*)?(`(?:[^`]|``)+`|[\w$]+)",
        )
        .expect("valid regex")
    });
    match re.captures(text) {
        Some(caps) => StatementKind::CreateTable {
            schema: caps.get(1).map(|m| unquote(m.as_str())),
            table: caps.get(2).map(|m| unquote(m.as_str())).unwrap_or_default(),
        },
        None => StatementKind::Other,
    }
}

fn unquote(ident: &str) -> String {
    match ident.strip_prefix('`').and_then(|s| s.strip_suffix('`')) {
        Some(inner) => inner.replace("``", "`"),
        None => ident.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(sql: &str) -> Vec<Statement> {
        split_statements(sql, Path::new("orders.sql"))
    }

    #[test]
    fn test_split_tracks_lines_and_drops_leading_comments() {
        let sql = "-- orders\nCREATE TABLE orders (\n  id int\n);\n\n/* customers */\nCREATE TABLE `customers` (id int);\n";
        let stmts = split(sql);
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0].text, "CREATE TABLE orders (\n  id int\n)");
        assert_eq!(stmts[0].line, 2);
        assert_eq!(
            stmts[0].kind,
            StatementKind::CreateTable {
                schema: None,
                table: "orders".into()
            }
        );
        assert_eq!(stmts[1].line, 7);
        assert_eq!(stmts[1].location(), "orders.sql:7");
    }

    #[test]
    fn test_semicolons_inside_quotes_and_comments() {
        let sql = "CREATE TABLE t (c varchar(10) DEFAULT 'a;b' COMMENT \"x;y\" /* z; */) -- trailing; comment\n;";
        let stmts = split(sql);
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].text.contains("'a;b'"));
        assert!(stmts[0].text.contains("/* z; */"));
    }

    #[test]
    fn test_escaped_quotes() {
        let stmts = split("CREATE TABLE t (c char(1) DEFAULT 'it''s' COMMENT 'a\\'b;');");
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn test_classify_qualified_and_quoted_names() {
        let stmts = split("CREATE TABLE IF NOT EXISTS `shop`.`odd``name` (id int);\nINSERT INTO t VALUES (1);");
        assert_eq!(
            stmts[0].kind,
            StatementKind::CreateTable {
                schema: Some("shop".into()),
                table: "odd`name".into()
            }
        );
        assert_eq!(stmts[1].kind, StatementKind::Other);
    }
}
