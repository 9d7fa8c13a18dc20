//! Column definitions and their relaxed history form.

use crate::errors::{HistoryError, Result};

/// Shorthand column type for an auto-increment integer primary key.
pub const PK_TYPE: &str = "pk";

const PK_EXPANSION: &str = "INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL";

/// Words that end the type name in a column definition.
const CONSTRAINT_WORDS: &[&str] = &[
    "CONSTRAINT",
    "PRIMARY",
    "NOT",
    "NULL",
    "UNIQUE",
    "CHECK",
    "DEFAULT",
    "COLLATE",
    "REFERENCES",
    "GENERATED",
    "AS",
    "AUTOINCREMENT",
];

/// One entry of a `CREATE TABLE` body: a named column or, with an empty
/// name, a table-level constraint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name; empty for a table constraint.
    pub name: String,
    /// Type and constraints as SQL, or the whole constraint clause.
    pub definition: String,
}

impl ColumnSpec {
    /// A named column.
    pub fn new(name: &str, definition: &str) -> Self {
        Self {
            name: name.to_string(),
            definition: definition.to_string(),
        }
    }

    /// A table-level constraint such as `PRIMARY KEY (a, b)`.
    pub fn constraint(definition: &str) -> Self {
        Self {
            name: String::new(),
            definition: definition.to_string(),
        }
    }

    /// Whether this entry is a table-level constraint.
    pub fn is_constraint(&self) -> bool {
        self.name.is_empty()
    }
}

/// The definition to emit for the tracked table (`pk` expanded).
pub fn expand_definition(definition: &str) -> String {
    if definition.trim().eq_ignore_ascii_case(PK_TYPE) {
        PK_EXPANSION.to_string()
    } else {
        definition.to_string()
    }
}

/// Relaxed history form: the bare type, nullable, with every key, unique,
/// check, reference and default dropped. Temporal types come out as
/// `TIMESTAMP NULL` / `DATETIME NULL` so no write-time default carries over.
pub fn history_definition(definition: &str) -> String {
    if definition.trim().eq_ignore_ascii_case(PK_TYPE) {
        return "INTEGER NULL".to_string();
    }
    let base = base_type(definition);
    if base.is_empty() {
        "NULL".to_string()
    } else {
        format!("{base} NULL")
    }
}

/// Type name at the head of `definition`, up to the first constraint word.
pub fn base_type(definition: &str) -> String {
    tokens(definition)
        .into_iter()
        .take_while(|t| !CONSTRAINT_WORDS.contains(&t.to_ascii_uppercase().as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// How a [`ColumnSpec`] takes part in the primary key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyDeclaration {
    /// Not a key declaration.
    None,
    /// `PRIMARY KEY` on the column itself.
    Inline,
    /// Table-level `PRIMARY KEY (a, b, ...)`.
    Table(Vec<String>),
}

/// Classify `spec`'s part in the primary key.
pub fn key_declaration(table: &str, spec: &ColumnSpec) -> Result<KeyDeclaration> {
    if !spec.is_constraint() && spec.definition.trim().eq_ignore_ascii_case(PK_TYPE) {
        return Ok(KeyDeclaration::Inline);
    }
    let toks = tokens(&spec.definition);
    let Some(at) = toks.windows(2).position(|w| {
        w[0].eq_ignore_ascii_case("PRIMARY") && w[1].to_ascii_uppercase().starts_with("KEY")
    }) else {
        return Ok(KeyDeclaration::None);
    };
    if !spec.is_constraint() {
        return Ok(KeyDeclaration::Inline);
    }

    // `KEY(a, b)` may be a single token; rejoin what follows PRIMARY.
    let rest = toks[at + 1..].join(" ");
    let malformed = || {
        HistoryError::configuration(
            table,
            format!("malformed primary key constraint: {}", spec.definition),
        )
    };
    let open = rest.find('(').ok_or_else(malformed)?;
    let close = rest.rfind(')').filter(|c| *c > open).ok_or_else(malformed)?;
    let columns: Vec<String> = rest[open + 1..close]
        .split(',')
        .filter_map(|part| part.split_whitespace().next())
        .map(unquote)
        .collect();
    if columns.is_empty() || columns.iter().any(String::is_empty) {
        return Err(malformed());
    }
    Ok(KeyDeclaration::Table(columns))
}

fn unquote(name: &str) -> String {
    name.trim_matches(|c| matches!(c, '"' | '`' | '[' | ']'))
        .to_string()
}

/// Whitespace-separated words, keeping parenthesized groups and quoted
/// strings intact.
fn tokens(definition: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0_u32;
    let mut quote: Option<char> = None;
    for c in definition.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"' | '`') => {
                quote = Some(c);
                current.push(c);
            }
            (None, '(') => {
                depth += 1;
                current.push(c);
            }
            (None, ')') => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            (None, c) if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            (None, c) => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn pk_shorthand() {
        assert_eq!(expand_definition("pk"), PK_EXPANSION);
        assert_eq!(expand_definition("TEXT"), "TEXT");
        assert_eq!(history_definition("PK"), "INTEGER NULL");
    }

    #[test]
    fn history_form_is_relaxed() {
        assert_eq!(history_definition("INTEGER NOT NULL"), "INTEGER NULL");
        assert_eq!(history_definition("TEXT UNIQUE DEFAULT 'x'"), "TEXT NULL");
        assert_eq!(
            history_definition("INTEGER REFERENCES p_users(id) ON DELETE CASCADE"),
            "INTEGER NULL"
        );
        assert_eq!(history_definition("DECIMAL(10, 2) CHECK (amount > 0)"), "DECIMAL(10, 2) NULL");
        assert_eq!(history_definition("VARCHAR(20) COLLATE NOCASE"), "VARCHAR(20) NULL");
        assert_eq!(history_definition("INTEGER PRIMARY KEY AUTOINCREMENT"), "INTEGER NULL");
        assert_eq!(history_definition(""), "NULL");
    }

    #[test]
    fn temporal_types_lose_their_default() {
        assert_eq!(
            history_definition("TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP"),
            "TIMESTAMP NULL"
        );
        assert_eq!(history_definition("datetime DEFAULT (datetime('now'))"), "datetime NULL");
    }

    #[test]
    fn multi_word_types_survive() {
        assert_eq!(base_type("UNSIGNED BIG INT NOT NULL"), "UNSIGNED BIG INT");
        assert_eq!(base_type("DOUBLE PRECISION"), "DOUBLE PRECISION");
    }

    #[test]
    fn key_declarations() {
        assert_eq!(
            key_declaration("p_t", &ColumnSpec::new("id", "pk")).unwrap(),
            KeyDeclaration::Inline
        );
        assert_eq!(
            key_declaration("p_t", &ColumnSpec::new("id", "INTEGER PRIMARY KEY")).unwrap(),
            KeyDeclaration::Inline
        );
        assert_eq!(
            key_declaration("p_t", &ColumnSpec::new("x", "TEXT DEFAULT 'primary key'")).unwrap(),
            KeyDeclaration::None
        );
        assert_eq!(
            key_declaration("p_t", &ColumnSpec::constraint("PRIMARY KEY (\"a\", b DESC)")).unwrap(),
            KeyDeclaration::Table(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            key_declaration("p_t", &ColumnSpec::constraint("UNIQUE (a)")).unwrap(),
            KeyDeclaration::None
        );
    }

    #[test]
    fn malformed_table_key() {
        assert_matches!(
            key_declaration("p_t", &ColumnSpec::constraint("PRIMARY KEY a")),
            Err(HistoryError::Configuration { .. })
        );
        assert_matches!(
            key_declaration("p_t", &ColumnSpec::constraint("PRIMARY KEY ()")),
            Err(HistoryError::Configuration { .. })
        );
    }

    proptest! {
        #[test]
        fn history_form_is_always_nullable(
            ty in "(INTEGER|TEXT|REAL|BLOB|VARCHAR\\(32\\))",
            tail in "( NOT NULL| UNIQUE| DEFAULT 0| CHECK \\(x > 0\\)){0,3}",
        ) {
            let relaxed = history_definition(&format!("{ty}{tail}"));
            prop_assert_eq!(relaxed, format!("{ty} NULL"));
        }
    }
}
