//! Lightweight SQL statement classification.
//!
//! The dispatcher only needs the operation kind and the primary table name
//! to pick a recovery path; full parsing stays inside the analytical
//! engine.

use serde::Serialize;
use std::fmt;

/// Kind of statement as seen by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Operation {
    /// `CREATE TABLE ...`
    CreateTable,
    /// `INSERT INTO ...`
    Insert,
    /// `SELECT ...`
    Select,
    /// `VACUUM <table>`
    Vacuum,
    /// Anything else; executed verbatim without log interaction.
    Other,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::CreateTable => "CREATE_TABLE",
            Operation::Insert => "INSERT",
            Operation::Select => "SELECT",
            Operation::Vacuum => "VACUUM",
            Operation::Other => "OTHER",
        };
        f.write_str(name)
    }
}

/// Strips leading whitespace and `--` line comments.
fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    while rest.starts_with("--") {
        rest = match rest.find('\n') {
            Some(pos) => rest[pos + 1..].trim_start(),
            None => "",
        };
    }
    rest
}

/// Splits a statement into bare word tokens. Parentheses and commas are
/// separators so `t(id INT)` tokenises as `t`, `id`, `INT`.
fn tokens(sql: &str) -> impl Iterator<Item = &str> {
    sql.split(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | ',' | ';'))
        .filter(|t| !t.is_empty())
}

fn clean_ident(token: &str) -> Option<String> {
    let ident = token.trim_matches(|c| matches!(c, '"' | '\'' | '`'));
    if ident.is_empty() {
        return None;
    }
    // Reject anything that cannot be a plain table reference.
    if !ident
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.'))
    {
        return None;
    }
    Some(ident.to_string())
}

/// First table referenced by a `SELECT`, or `None` when no plain table
/// name follows `FROM` (expressions, subqueries, table functions).
fn select_target(sql: &str) -> Option<String> {
    // Split on whitespace only so a subquery keeps its leading paren.
    let mut words = sql.split_whitespace();
    words.find(|w| w.eq_ignore_ascii_case("from"))?;
    let target = words.next()?;
    if target.starts_with('(') {
        return None;
    }
    clean_ident(target.trim_end_matches(|c| matches!(c, ';' | ',')))
}

/// Classifies one statement into an operation kind and an optional target
/// table name.
pub fn classify(sql: &str) -> (Operation, Option<String>) {
    let sql = strip_leading_comments(sql);
    let mut words = tokens(sql);

    let first = match words.next() {
        Some(word) => word.to_ascii_uppercase(),
        None => return (Operation::Other, None),
    };

    match first.as_str() {
        "CREATE" => {
            if words.next().map(str::to_ascii_uppercase).as_deref() != Some("TABLE") {
                return (Operation::Other, None);
            }
            // Skip an optional IF NOT EXISTS.
            let mut next = words.next();
            if next.map(|w| w.eq_ignore_ascii_case("if")).unwrap_or(false) {
                words.next(); // NOT
                words.next(); // EXISTS
                next = words.next();
            }
            (Operation::CreateTable, next.and_then(clean_ident))
        }
        "INSERT" => {
            if words.next().map(str::to_ascii_uppercase).as_deref() != Some("INTO") {
                return (Operation::Other, None);
            }
            (Operation::Insert, words.next().and_then(clean_ident))
        }
        "VACUUM" => (Operation::Vacuum, words.next().and_then(clean_ident)),
        "SELECT" => (Operation::Select, select_target(sql)),
        _ => (Operation::Other, None),
    }
}
