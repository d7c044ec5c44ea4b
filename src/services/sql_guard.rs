use crate::config::SecurityConfig;
use crate::models::query::{RejectionReason, SafetyVerdict};

/// Keywords that make a statement data-definition or data-modification.
/// Matched as whole words anywhere in the normalized statement, so stacked
/// clauses (`WITH x AS (...) DELETE ...`) are caught too.
const DDL_KEYWORDS: &[&str] = &[
    "create", "alter", "drop", "truncate", "insert", "update", "delete", "grant", "revoke",
];

/// Functions that execute code, touch the filesystem, reach other servers
/// or alter session/server state. Extended via `SecurityConfig`.
const BLOCKED_FUNCTIONS: &[&str] = &[
    "pg_sleep",
    "pg_read_file",
    "pg_read_binary_file",
    "pg_write_file",
    "pg_ls_dir",
    "pg_stat_file",
    "lo_import",
    "lo_export",
    "dblink",
    "dblink_exec",
    "pg_terminate_backend",
    "pg_cancel_backend",
    "pg_reload_conf",
    "set_config",
];

/// Credential-bearing catalog relations. Extended via `SecurityConfig`.
const BLOCKED_TABLES: &[&str] = &["pg_authid", "pg_shadow", "pg_user_mappings", "pg_auth_members"];

/// Lexical SQL safety classification: normalize, then match the policy
/// against tokens. Deliberately not a parser; the deny-lists and the
/// statement-boundary checks are the whole contract.
pub struct SqlGuard {
    blocked_functions: Vec<String>,
    blocked_tables: Vec<String>,
}

impl SqlGuard {
    pub fn new(security: &SecurityConfig) -> Self {
        let mut blocked_functions: Vec<String> =
            BLOCKED_FUNCTIONS.iter().map(|f| f.to_string()).collect();
        blocked_functions.extend(security.blocked_functions.iter().map(|f| f.to_lowercase()));

        let mut blocked_tables: Vec<String> =
            BLOCKED_TABLES.iter().map(|t| t.to_string()).collect();
        blocked_tables.extend(security.blocked_tables.iter().map(|t| t.to_lowercase()));

        Self {
            blocked_functions,
            blocked_tables,
        }
    }

    /// Classify one SQL string. Pure and synchronous.
    pub fn validate(&self, sql: &str) -> SafetyVerdict {
        let normalized = normalize(sql);
        let trimmed = normalized.trim();
        if trimmed.is_empty() {
            return SafetyVerdict::reject(RejectionReason::DdlDetected);
        }

        if has_multiple_statements(trimmed) {
            return SafetyVerdict::reject(RejectionReason::MultipleStatements);
        }
        let stmt = trimmed.trim_end_matches(';').trim();

        let tokens: Vec<&str> = words(stmt).collect();
        match tokens.first() {
            Some(&"select") | Some(&"with") => {}
            _ => return SafetyVerdict::reject(RejectionReason::DdlDetected),
        }
        if tokens
            .iter()
            .any(|&t| DDL_KEYWORDS.contains(&t.rsplit('.').next().unwrap_or(t)))
        {
            return SafetyVerdict::reject(RejectionReason::DdlDetected);
        }

        for func in &self.blocked_functions {
            if invokes_function(stmt, func) {
                return SafetyVerdict::reject(RejectionReason::BlockedFunction);
            }
        }

        for table in &self.blocked_tables {
            if references_table(&tokens, table) {
                return SafetyVerdict::reject(RejectionReason::BlockedTable);
            }
        }

        SafetyVerdict::accept()
    }
}

/// Lowercase the statement, strip `--` and `/* */` comments, blank out
/// single-quoted literal bodies and collapse whitespace. Keywords or
/// terminators hidden in comments and literals cannot influence
/// classification after this pass.
///
/// Double-quoted identifiers are unwrapped and lowercased so a quoted
/// deny-listed name cannot hide. That over-rejects exotic quoted names
/// that only collide case-insensitively, which is the right failure mode
/// for a deny-list.
fn normalize(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '-' if chars.peek() == Some(&'-') => {
                for n in chars.by_ref() {
                    if n == '\n' {
                        break;
                    }
                }
                push_space(&mut out);
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
                push_space(&mut out);
            }
            '\'' => {
                // Keep an empty literal so token boundaries survive;
                // '' inside a literal is an escaped quote, not the end.
                out.push('\'');
                while let Some(n) = chars.next() {
                    if n == '\'' {
                        if chars.peek() == Some(&'\'') {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
                out.push('\'');
            }
            '"' => {
                // "" inside a quoted identifier is an escaped quote.
                while let Some(n) = chars.next() {
                    if n == '"' {
                        if chars.peek() == Some(&'"') {
                            chars.next();
                        } else {
                            break;
                        }
                    } else if n.is_whitespace() {
                        push_space(&mut out);
                    } else {
                        out.extend(n.to_lowercase());
                    }
                }
            }
            c if c.is_whitespace() => push_space(&mut out),
            c => out.extend(c.to_lowercase()),
        }
    }
    out.trim().to_string()
}

fn push_space(out: &mut String) {
    if !out.ends_with(' ') {
        out.push(' ');
    }
}

/// True when a terminator is followed by more statement text.
fn has_multiple_statements(normalized: &str) -> bool {
    match normalized.find(';') {
        Some(idx) => !normalized[idx + 1..].trim_matches([' ', ';']).is_empty(),
        None => false,
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.'
}

/// Identifier-ish tokens, keeping `schema.table` qualifications intact.
fn words(stmt: &str) -> impl Iterator<Item = &str> {
    stmt.split(|c: char| !is_word_char(c))
        .filter(|t| !t.is_empty())
}

/// `name (` with a word boundary before the name; whitespace between the
/// name and the parenthesis is tolerated. A `.` on the left is a boundary
/// too, so schema-qualified calls (`pg_catalog.pg_sleep(...)`) match the
/// bare deny-listed name.
fn invokes_function(stmt: &str, func: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = stmt[start..].find(func) {
        let at = start + pos;
        let bounded_left = match stmt[..at].chars().next_back() {
            None => true,
            Some('.') => true,
            Some(c) => !is_word_char(c),
        };
        let rest = &stmt[at + func.len()..];
        let bounded_right = !rest.chars().next().is_some_and(is_word_char);
        if bounded_left && bounded_right && rest.trim_start().starts_with('(') {
            return true;
        }
        start = at + func.len();
    }
    false
}

/// Token equality against the bare name, the full qualified form, or the
/// table part of any `schema.table` token.
fn references_table(tokens: &[&str], table: &str) -> bool {
    tokens.iter().any(|t| {
        *t == table || t.rsplit('.').next() == Some(table) || t.ends_with(&format!(".{table}"))
    })
}
