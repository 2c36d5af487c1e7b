//! Filter ASTs: the untyped tree produced by the parser and the typed
//! comparisons produced by the validator.

use std::fmt;

/// The root of a parsed filter: comparisons joined by `AND`.
/// An empty filter yields an empty list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AndExpr {
    pub exprs: Vec<CompareExpr>,
}

/// `left op right`, for example `metrics.accuracy > 0.9`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompareExpr {
    pub left: Identifier,
    pub op: OperatorKind,
    pub right: Value,
}

/// `scope.key` as written; `scope` is `None` for a bare key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    pub scope: Option<String>,
    pub key: String,
}

impl Identifier {
    pub fn new(scope: Option<&str>, key: &str) -> Self {
        Self {
            scope: scope.map(str::to_string),
            key: key.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    Like,
    ILike,
    In,
    NotIn,
}

impl OperatorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperatorKind::Equals => "=",
            OperatorKind::NotEquals => "!=",
            OperatorKind::Less => "<",
            OperatorKind::LessEquals => "<=",
            OperatorKind::Greater => ">",
            OperatorKind::GreaterEquals => ">=",
            OperatorKind::Like => "LIKE",
            OperatorKind::ILike => "ILIKE",
            OperatorKind::In => "IN",
            OperatorKind::NotIn => "NOT IN",
        }
    }

    pub fn is_set_membership(self) -> bool {
        matches!(self, OperatorKind::In | OperatorKind::NotIn)
    }

    pub fn is_pattern(self) -> bool {
        matches!(self, OperatorKind::Like | OperatorKind::ILike)
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    String(String),
    StringList(Vec<String>),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::StringList(_) => "list of strings",
        }
    }
}

/// The resolved scope of an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Metric,
    Parameter,
    Tag,
    Attribute,
    Dataset,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Metric => "metric",
            Scope::Parameter => "parameter",
            Scope::Tag => "tag",
            Scope::Attribute => "attribute",
            Scope::Dataset => "dataset",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A comparison that passed validation. `key` is canonical: attribute
/// aliases are resolved (`run_id` is stored as `run_uuid`).
#[derive(Debug, Clone, PartialEq)]
pub struct ValidCompareExpr {
    pub scope: Scope,
    pub key: String,
    pub op: OperatorKind,
    pub value: Value,
}

// Printing. The output re-parses to an equivalent tree: keys are always
// back-ticked and strings use whichever quote they do not contain.

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    if s.contains('\'') {
        write!(f, "\"{}\"", s)
    } else {
        write!(f, "'{}'", s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write_quoted(f, s),
            Value::StringList(values) => {
                f.write_str("(")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_quoted(f, v)?;
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) if self.key.contains('`') => {
                write!(f, "{}.", scope)?;
                write_quoted(f, &self.key)
            }
            Some(scope) => write!(f, "{}.`{}`", scope, self.key),
            None => write!(f, "`{}`", self.key),
        }
    }
}

impl fmt::Display for CompareExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op, self.right)
    }
}

impl fmt::Display for AndExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, expr) in self.exprs.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            write!(f, "{}", expr)?;
        }
        Ok(())
    }
}

impl fmt::Display for ValidCompareExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `run_uuid` is only reachable through its `run_id` alias.
        let key = match (self.scope, self.key.as_str()) {
            (Scope::Attribute, "run_uuid") => "run_id",
            (_, key) => key,
        };
        let ident = Identifier::new(Some(self.scope.as_str()), key);
        write!(f, "{} {} {}", ident, self.op, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_compare() {
        let expr = CompareExpr {
            left: Identifier::new(Some("metrics"), "accuracy"),
            op: OperatorKind::Greater,
            right: Value::Number(0.72),
        };
        assert_eq!(expr.to_string(), "metrics.`accuracy` > 0.72");
    }

    #[test]
    fn test_display_picks_free_quote() {
        assert_eq!(Value::String("it's".into()).to_string(), "\"it's\"");
        assert_eq!(Value::String("plain".into()).to_string(), "'plain'");
        assert_eq!(
            Value::StringList(vec!["a".into(), "b".into()]).to_string(),
            "('a', 'b')"
        );
    }

    #[test]
    fn test_display_valid_run_uuid_uses_alias() {
        let expr = ValidCompareExpr {
            scope: Scope::Attribute,
            key: "run_uuid".into(),
            op: OperatorKind::NotIn,
            value: Value::StringList(vec!["abc".into()]),
        };
        assert_eq!(expr.to_string(), "attribute.`run_id` NOT IN ('abc')");
    }

    #[test]
    fn test_display_and_expr() {
        let and = AndExpr {
            exprs: vec![
                CompareExpr {
                    left: Identifier::new(None, "status"),
                    op: OperatorKind::Equals,
                    right: Value::String("FINISHED".into()),
                },
                CompareExpr {
                    left: Identifier::new(Some("params"), "lr"),
                    op: OperatorKind::ILike,
                    right: Value::String("0.%".into()),
                },
            ],
        };
        assert_eq!(
            and.to_string(),
            "`status` = 'FINISHED' AND params.`lr` ILIKE '0.%'"
        );
    }
}
