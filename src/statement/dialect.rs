//! SQL dialect escape hatches.
//!
//! The canonical dialect is Oracle: `rownum`, `dual`, `RETURNING … INTO` with
//! out parameters and booleans stored as `'1'`/`'0'`. PostgreSQL is the only
//! other vendor with its own spelling of those constructs.

use serde::Deserialize;

/// How a RETURNING clause hands values back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturningStyle {
    /// Values come back through registered out parameters
    OutParameters,
    /// Values come back as an ordinary result set
    ResultRows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Oracle,
    #[serde(alias = "postgres")]
    PostgreSql,
}

impl Dialect {
    /// Row-number pseudo-column projected by every SELECT.
    pub fn row_number(&self, order: Option<&str>) -> String {
        match self {
            Dialect::Oracle => "rownum AS rownumber".to_string(),
            Dialect::PostgreSql => match order {
                Some(order) => format!("row_number() OVER (ORDER BY {order}) AS rownumber"),
                None => "row_number() OVER () AS rownumber".to_string(),
            },
        }
    }

    pub fn exists(&self, select: &str) -> String {
        match self {
            Dialect::Oracle => format!("SELECT 'x' AS x FROM dual WHERE EXISTS ({select})"),
            Dialect::PostgreSql => format!("SELECT 'x' AS x WHERE EXISTS ({select})"),
        }
    }

    pub fn paginate(&self, select: &str) -> String {
        match self {
            Dialect::Oracle => {
                format!("SELECT * FROM ({select}) WHERE rownumber BETWEEN ? AND ?")
            }
            Dialect::PostgreSql => {
                format!("SELECT * FROM ({select}) AS page WHERE rownumber BETWEEN ? AND ?")
            }
        }
    }

    pub fn returning(&self, columns: &[&str]) -> String {
        let names = columns.join(",");
        match self {
            Dialect::Oracle => {
                let placeholders = vec!["?"; columns.len()].join(",");
                format!(" RETURNING {names} INTO {placeholders}")
            }
            Dialect::PostgreSql => format!(" RETURNING {names}"),
        }
    }

    pub fn returning_style(&self) -> ReturningStyle {
        match self {
            Dialect::Oracle => ReturningStyle::OutParameters,
            Dialect::PostgreSql => ReturningStyle::ResultRows,
        }
    }

    /// Whether booleans bind as `'1'`/`'0'` text.
    pub fn boolean_as_char(&self) -> bool {
        matches!(self, Dialect::Oracle)
    }

    /// Rewrite `?` placeholders into the dialect's native form.
    ///
    /// Question marks inside single-quoted literals are left alone.
    pub fn placeholders(&self, sql: String) -> String {
        match self {
            Dialect::Oracle => sql,
            Dialect::PostgreSql => {
                let mut out = String::with_capacity(sql.len() + 8);
                let mut position = 0usize;
                let mut quoted = false;
                for ch in sql.chars() {
                    match ch {
                        '\'' => {
                            quoted = !quoted;
                            out.push(ch);
                        }
                        '?' if !quoted => {
                            position += 1;
                            out.push('$');
                            out.push_str(&position.to_string());
                        }
                        _ => out.push(ch),
                    }
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_keeps_question_marks() {
        let sql = "SELECT a FROM t WHERE (a = ?)".to_string();
        assert_eq!(Dialect::Oracle.placeholders(sql.clone()), sql);
    }

    #[test]
    fn test_postgres_numbers_placeholders_outside_literals() {
        let sql = "SELECT 'x?' AS x WHERE (a = ?) AND (b IN (?,?))".to_string();
        assert_eq!(
            Dialect::PostgreSql.placeholders(sql),
            "SELECT 'x?' AS x WHERE (a = $1) AND (b IN ($2,$3))"
        );
    }

    #[test]
    fn test_returning_clauses() {
        assert_eq!(
            Dialect::Oracle.returning(&["id", "created"]),
            " RETURNING id,created INTO ?,?"
        );
        assert_eq!(Dialect::PostgreSql.returning(&["id"]), " RETURNING id");
    }

    #[test]
    fn test_row_number_with_order() {
        assert_eq!(
            Dialect::PostgreSql.row_number(Some("name ASC")),
            "row_number() OVER (ORDER BY name ASC) AS rownumber"
        );
        assert_eq!(Dialect::Oracle.row_number(Some("name ASC")), "rownum AS rownumber");
    }
}
