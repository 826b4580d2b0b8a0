use crate::models::Dialect;

impl Dialect {
    /// Quote one identifier. `*` passes through unquoted.
    pub fn quote_identifier(&self, ident: &str) -> String {
        if ident == "*" {
            return ident.to_string();
        }
        match self {
            Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
            Dialect::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Quote a `table.column` reference (split on the first dot) or a bare column
    pub fn escape_column(&self, column: &str) -> String {
        match column.split_once('.') {
            Some((table, col)) => format!("{}.{}", self.quote_identifier(table), self.quote_identifier(col)),
            None => self.quote_identifier(column),
        }
    }

    /// Quote a result alias; aliases may contain spaces and dots
    pub fn quote_alias(&self, alias: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", alias.replace('`', "``")),
            Dialect::Postgres => format!("\"{}\"", alias.replace('"', "\"\"")),
        }
    }

    /// Placeholder for the `position`-th bound parameter (1-based)
    pub fn placeholder(&self, position: usize) -> String {
        match self {
            Dialect::MySql => "?".to_string(),
            Dialect::Postgres => format!("${}", position),
        }
    }

    /// Pattern match keyword; Postgres needs ILIKE to ignore case
    pub fn like_keyword(&self, negated: bool) -> &'static str {
        match (self, negated) {
            (Dialect::MySql, false) => "LIKE",
            (Dialect::MySql, true) => "NOT LIKE",
            (Dialect::Postgres, false) => "ILIKE",
            (Dialect::Postgres, true) => "NOT ILIKE",
        }
    }

    pub fn begin_read_only(&self) -> &'static str {
        match self {
            Dialect::MySql => "START TRANSACTION READ ONLY",
            Dialect::Postgres => "BEGIN READ ONLY",
        }
    }

    pub fn begin(&self) -> &'static str {
        match self {
            Dialect::MySql => "START TRANSACTION",
            Dialect::Postgres => "BEGIN",
        }
    }
}
