//! SQL dialects the run search compiles for.
//!
//! sea-query renders PostgreSQL, MySQL and SQLite directly. SQL Server is
//! rendered through the PostgreSQL builder and then rewritten: `$N`
//! placeholders become `@pN` and paging uses `OFFSET .. FETCH NEXT`.

use std::fmt;
use std::str::FromStr;

use sea_query::extension::postgres::PgExpr;
use sea_query::{
    Expr, Func, MysqlQueryBuilder, PostgresQueryBuilder, SelectStatement, SimpleExpr,
    SqliteQueryBuilder, Values,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[serde(alias = "postgresql")]
    Postgres,
    MySql,
    #[serde(alias = "mssql")]
    SqlServer,
    Sqlite,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::SqlServer => "sqlserver",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Case-insensitive pattern match of `column` against `pattern`.
    ///
    /// Only PostgreSQL has a native `ILIKE`; elsewhere this is `LOWER(column) LIKE ?` with the
    /// pattern lower-cased before it is bound. The pattern is folded the way
    /// the server's `LOWER()` folds the column: SQLite only folds ASCII.
    pub fn ilike(self, column: SimpleExpr, pattern: &str) -> SimpleExpr {
        match self {
            Dialect::Postgres => Expr::expr(column).ilike(pattern),
            Dialect::Sqlite => Expr::expr(Func::lower(column)).like(pattern.to_ascii_lowercase()),
            Dialect::MySql | Dialect::SqlServer => {
                Expr::expr(Func::lower(column)).like(pattern.to_lowercase())
            }
        }
    }

    /// The literal compared against boolean columns. SQLite stores booleans
    /// as integers and T-SQL has no boolean literal.
    pub fn bool_true_literal(self) -> &'static str {
        match self {
            Dialect::Sqlite | Dialect::SqlServer => "1",
            Dialect::Postgres | Dialect::MySql => "true",
        }
    }

    /// Renders `select` with paging applied.
    pub fn build_paged(
        self,
        select: &SelectStatement,
        limit: u64,
        offset: u64,
    ) -> (String, Values) {
        if self == Dialect::SqlServer {
            let (sql, values) = self.build(select);
            let sql = format!(
                "{} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                sql, offset, limit
            );
            return (sql, values);
        }

        let mut paged = select.clone();
        paged.limit(limit).offset(offset);
        self.build(&paged)
    }

    /// Renders `select` as SQL plus its bind values.
    pub fn build(self, select: &SelectStatement) -> (String, Values) {
        match self {
            Dialect::Postgres => select.build(PostgresQueryBuilder),
            Dialect::MySql => select.build(MysqlQueryBuilder),
            Dialect::Sqlite => select.build(SqliteQueryBuilder),
            Dialect::SqlServer => {
                let (sql, values) = select.build(PostgresQueryBuilder);
                (rewrite_placeholders(&sql), values)
            }
        }
    }
}

/// Rewrites `$N` placeholders to `@pN`, leaving quoted text alone.
fn rewrite_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    out.push(c);
                }
                '$' if chars.peek().is_some_and(|n| n.is_ascii_digit()) => out.push_str("@p"),
                _ => out.push(c),
            },
        }
    }
    out
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDialect(pub String);

impl fmt::Display for UnknownDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown dialect '{}', expected one of postgres, mysql, sqlserver, sqlite",
            self.0
        )
    }
}

impl std::error::Error for UnknownDialect {}

impl FromStr for Dialect {
    type Err = UnknownDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::MySql),
            "sqlserver" | "mssql" => Ok(Dialect::SqlServer),
            "sqlite" => Ok(Dialect::Sqlite),
            _ => Err(UnknownDialect(s.to_string())),
        }
    }
}
