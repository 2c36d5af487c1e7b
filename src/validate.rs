//! Type-checks the untyped filter tree against the run search domain.
//!
//! Not every parsed tree is valid. The checks are, in order:
//! 1. the scope resolves through its aliases,
//! 2. the key is allowed for that scope (attribute aliases are resolved),
//! 3. the value kind fits the scope and key,
//! 4. the operator is admissible for the scope and key.

use tracing::debug;

use crate::ast::{CompareExpr, Identifier, OperatorKind, Scope, ValidCompareExpr, Value};
use crate::error::{Result, SearchError};
use crate::lexer;
use crate::parser::Parser;

pub const RUN_ID: &str = "run_id";
pub const RUN_NAME: &str = "run_name";
pub const START_TIME: &str = "start_time";

/// Attribute keys as they are written in filters.
pub const SEARCHABLE_RUN_ATTRIBUTES: [&str; 7] = [
    RUN_ID,
    RUN_NAME,
    "user_id",
    "status",
    START_TIME,
    "end_time",
    "artifact_uri",
];

pub const DATASET_ATTRIBUTES: [&str; 3] = ["name", "digest", "context"];

fn invalid(message: String) -> SearchError {
    SearchError::InvalidParameterValue(message)
}

/// Resolves a written scope. The match is exact; an absent scope is an
/// attribute.
pub fn parse_scope(scope: Option<&str>) -> Result<Scope> {
    match scope.unwrap_or("") {
        "metric" | "metrics" => Ok(Scope::Metric),
        "parameter" | "parameters" | "param" | "params" => Ok(Scope::Parameter),
        "tag" | "tags" => Ok(Scope::Tag),
        "" | "attribute" | "attributes" | "attr" | "run" => Ok(Scope::Attribute),
        "dataset" | "datasets" => Ok(Scope::Dataset),
        other => Err(invalid(format!("invalid identifier '{}'", other))),
    }
}

fn searchable_attributes_list() -> String {
    format!("[{}]", SEARCHABLE_RUN_ATTRIBUTES.join(" "))
}

/// Maps an attribute key to its column name.
pub fn parse_attribute_key(key: &str) -> Result<&'static str> {
    match key {
        RUN_ID => Ok("run_uuid"),
        "user_id" => Ok("user_id"),
        "status" => Ok("status"),
        START_TIME => Ok(START_TIME),
        "end_time" => Ok("end_time"),
        "artifact_uri" => Ok("artifact_uri"),
        "created" | "Created" => Ok(START_TIME),
        RUN_NAME | "run name" | "Run name" | "Run Name" => Ok(RUN_NAME),
        _ => Err(SearchError::BadRequest(format!(
            "Invalid attribute key '{{{}}}' specified. Valid keys are '{}'",
            key,
            searchable_attributes_list()
        ))),
    }
}

fn parse_key(scope: Scope, key: &str) -> Result<String> {
    if key.is_empty() {
        return Err(SearchError::BadRequest(format!(
            "Invalid empty key for {}",
            scope
        )));
    }

    match scope {
        Scope::Attribute => parse_attribute_key(key).map(str::to_string),
        Scope::Dataset => {
            if DATASET_ATTRIBUTES.contains(&key) {
                Ok(key.to_string())
            } else {
                // The valid-key list cited here is the run attribute list;
                // clients match on this text.
                Err(SearchError::BadRequest(format!(
                    "Invalid dataset key '{{{}}}' specified. Valid keys are '{}'",
                    key,
                    searchable_attributes_list()
                )))
            }
        }
        Scope::Metric | Scope::Parameter | Scope::Tag => Ok(key.to_string()),
    }
}

fn is_numeric_attribute(key: &str) -> bool {
    matches!(key, START_TIME | "end_time" | "created")
}

fn validate_value(scope: Scope, key: &str, value: &Value) -> Result<()> {
    match (scope, value) {
        (Scope::Metric, Value::Number(_)) => Ok(()),
        (Scope::Metric, other) => Err(invalid(format!(
            "expected numeric value type for metric. Found {}",
            other
        ))),
        (Scope::Parameter | Scope::Tag, Value::String(_)) => Ok(()),
        (Scope::Parameter | Scope::Tag, other) => Err(invalid(format!(
            "expected a quoted string value for {}. Found {}",
            scope, other
        ))),
        (Scope::Attribute, value) if is_numeric_attribute(key) => match value {
            Value::Number(_) => Ok(()),
            other => Err(invalid(format!(
                "expected numeric value type for numeric attribute: {}. Found {}",
                key, other
            ))),
        },
        (Scope::Attribute, Value::StringList(_)) if key != "run_uuid" => Err(invalid(
            "only the 'run_id' attribute supports comparison with a list of quoted string values"
                .to_string(),
        )),
        (Scope::Attribute, Value::Number(n)) => Err(invalid(format!(
            "expected a quoted string value for attribute: {}. Found {}",
            key, n
        ))),
        (Scope::Attribute, _) => Ok(()),
        (Scope::Dataset, Value::Number(_)) => Err(invalid(format!(
            "expected datasets.{} to be either a string or list of strings. Found {}",
            key, value
        ))),
        (Scope::Dataset, _) => Ok(()),
    }
}

fn validate_operator(scope: Scope, key: &str, op: OperatorKind, value: &Value) -> Result<()> {
    use OperatorKind::*;

    let admissible = match scope {
        Scope::Metric => matches!(op, Equals | NotEquals | Less | LessEquals | Greater | GreaterEquals),
        Scope::Attribute if is_numeric_attribute(key) => {
            matches!(op, Equals | NotEquals | Less | LessEquals | Greater | GreaterEquals)
        }
        Scope::Attribute if key == "run_uuid" => {
            matches!(op, Equals | NotEquals | Like | ILike | In | NotIn)
        }
        Scope::Parameter | Scope::Tag | Scope::Attribute => {
            matches!(op, Equals | NotEquals | Like | ILike)
        }
        Scope::Dataset => matches!(op, Equals | NotEquals | Like | ILike | In | NotIn),
    };
    if !admissible {
        return Err(SearchError::BadRequest(format!(
            "Invalid comparator '{}' not one of the allowed comparators for {} '{}'",
            op, scope, key
        )));
    }

    let is_list = matches!(value, Value::StringList(_));
    if is_list != op.is_set_membership() {
        return Err(SearchError::BadRequest(format!(
            "comparator '{}' cannot be used with a {} value",
            op,
            value.kind_name()
        )));
    }
    Ok(())
}

fn validated_identifier(identifier: &Identifier) -> Result<(Scope, String)> {
    let scope = parse_scope(identifier.scope.as_deref())?;
    let key = parse_key(scope, &identifier.key)?;
    Ok((scope, key))
}

/// Validates one comparison. Errors are either `BadRequest` (unknown key,
/// inadmissible operator) or `InvalidParameterValue` (unknown scope, value of
/// the wrong kind).
pub fn validate_expression(expr: &CompareExpr) -> Result<ValidCompareExpr> {
    let (scope, key) = validated_identifier(&expr.left)?;
    validate_value(scope, &key, &expr.right)?;
    validate_operator(scope, &key, expr.op, &expr.right)?;

    Ok(ValidCompareExpr {
        scope,
        key,
        op: expr.op,
        value: expr.right.clone(),
    })
}

/// Lexes, parses and validates a filter string. An empty filter yields no
/// clauses.
pub fn parse_filter(input: &str) -> Result<Vec<ValidCompareExpr>> {
    let tokens = lexer::tokenize(input)?;
    let tree = Parser::new(&tokens).parse()?;
    let clauses = tree
        .exprs
        .iter()
        .map(validate_expression)
        .collect::<Result<Vec<_>>>()?;
    debug!(filter = input, clauses = clauses.len(), "parsed filter conditions");
    Ok(clauses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn validate(input: &str) -> Result<ValidCompareExpr> {
        let tree = parse(input).unwrap();
        assert_eq!(tree.exprs.len(), 1);
        validate_expression(&tree.exprs[0])
    }

    fn error_message(input: &str) -> String {
        validate(input).unwrap_err().to_string()
    }

    #[test]
    fn test_scope_aliases() {
        for (written, scope) in [
            ("metric.a > 1", Scope::Metric),
            ("metrics.a > 1", Scope::Metric),
            ("param.a = 'x'", Scope::Parameter),
            ("params.a = 'x'", Scope::Parameter),
            ("parameter.a = 'x'", Scope::Parameter),
            ("parameters.a = 'x'", Scope::Parameter),
            ("tag.a = 'x'", Scope::Tag),
            ("tags.a = 'x'", Scope::Tag),
            ("status = 'x'", Scope::Attribute),
            ("attr.status = 'x'", Scope::Attribute),
            ("attribute.status = 'x'", Scope::Attribute),
            ("attributes.status = 'x'", Scope::Attribute),
            ("run.status = 'x'", Scope::Attribute),
            ("dataset.name = 'x'", Scope::Dataset),
            ("datasets.name = 'x'", Scope::Dataset),
        ] {
            assert_eq!(validate(written).unwrap().scope, scope, "{}", written);
        }
    }

    #[test]
    fn test_scope_match_is_case_sensitive() {
        let err = validate("Metrics.a > 1").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PARAMETER_VALUE");
        assert!(err.to_string().contains("invalid identifier 'Metrics'"));
        assert!(error_message("yow.foobar = 40").contains("invalid identifier"));
    }

    #[test]
    fn test_attribute_key_canonicalization() {
        assert_eq!(validate("run_id = 'a'").unwrap().key, "run_uuid");
        assert_eq!(validate("created > 5").unwrap().key, "start_time");
        assert_eq!(validate("Created > 5").unwrap().key, "start_time");
        assert_eq!(validate("`Run Name` = 'x'").unwrap().key, "run_name");
        assert_eq!(validate("attributes.`run name` = 'x'").unwrap().key, "run_name");
    }

    #[test]
    fn test_invalid_attribute_key() {
        let err = validate("attributes.foobar = 40").unwrap_err();
        assert_eq!(err.error_code(), "BAD_REQUEST");
        assert_eq!(
            err.to_string(),
            "Invalid attribute key '{foobar}' specified. Valid keys are \
             '[run_id run_name user_id status start_time end_time artifact_uri]'"
        );
    }

    #[test]
    fn test_invalid_dataset_key_cites_run_attributes() {
        let err = validate("datasets.foobar = 40").unwrap_err();
        assert_eq!(err.error_code(), "BAD_REQUEST");
        assert!(err.to_string().starts_with("Invalid dataset key '{foobar}'"));
        assert!(err.to_string().contains("run_id run_name"));
    }

    #[test]
    fn test_value_kinds() {
        assert!(error_message("metric.yow = 'z'").contains("expected numeric value type for metric."));
        assert!(error_message("parameter.tag = 2").contains("expected a quoted string value"));
        assert!(error_message("tags.t = 2").contains("for tag"));
        assert!(error_message("attributes.start_time = 'now'")
            .contains("expected numeric value type for numeric attribute"));
        assert!(error_message("attributes.run_name IN ('foo','bar')")
            .contains("only the 'run_id' attribute supports comparison with a list"));
        assert!(error_message("datasets.name = 40")
            .contains("expected datasets.name to be either a string or list of strings"));
        assert!(error_message("datasets.digest = 50")
            .contains("expected datasets.digest to be either a string or list of strings"));
        assert!(error_message("datasets.context = 60")
            .contains("expected datasets.context to be either a string or list of strings"));
    }

    #[test]
    fn test_value_errors_are_invalid_parameter_value() {
        let err = validate("metrics.a = 'x'").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PARAMETER_VALUE");
    }

    #[test]
    fn test_valid_samples() {
        for sample in [
            "metrics.foobar = 40",
            "tags.\"mlflow.source.name\" = \"scratch.py\"",
            "metrics.accuracy > 0.9",
            "params.\"random_state\" = \"8888\"",
            "params.`random_state` = \"8888\"",
            "params.solver ILIKE \"L%\"",
            "params.solver LIKE \"l%\"",
            "datasets.digest IN ('77a19fc0')",
            "datasets.context NOT IN ('train', 'eval')",
            "attributes.run_id IN ('meh')",
            "run_id NOT IN ('a', 'b')",
            "status != 'FAILED'",
            "end_time <= 1700000000000",
        ] {
            assert!(validate(sample).is_ok(), "{}", sample);
        }
    }

    #[test]
    fn test_operator_admissibility() {
        let err = validate("metrics.a LIKE 1").unwrap_err();
        assert_eq!(err.error_code(), "BAD_REQUEST");
        assert!(err.to_string().contains("Invalid comparator 'LIKE'"));

        assert!(validate("params.p > 'a'").is_err());
        assert!(validate("start_time ILIKE 5").is_err());
        assert!(validate("status < 'RUNNING'").is_err());
    }

    #[test]
    fn test_list_requires_in() {
        // A bare string with IN cannot be written, but a list with `=` can
        // arrive through a hand-built tree.
        let expr = CompareExpr {
            left: Identifier::new(Some("datasets"), "name"),
            op: OperatorKind::Equals,
            right: Value::StringList(vec!["a".into()]),
        };
        assert_eq!(
            validate_expression(&expr).unwrap_err().error_code(),
            "BAD_REQUEST"
        );

        let expr = CompareExpr {
            left: Identifier::new(Some("datasets"), "name"),
            op: OperatorKind::In,
            right: Value::String("a".into()),
        };
        assert!(validate_expression(&expr).is_err());
    }

    #[test]
    fn test_parse_filter_pipeline() {
        assert!(parse_filter("").unwrap().is_empty());
        assert!(parse_filter("   ").unwrap().is_empty());

        let clauses = parse_filter("metrics.acc > 0.9 AND run_id IN ('a') AND created < 5").unwrap();
        assert_eq!(clauses.len(), 3);
        assert_eq!(clauses[1].key, "run_uuid");
        assert_eq!(clauses[2].key, "start_time");

        let err = parse_filter("metrics.acc > ").unwrap_err();
        assert_eq!(err.error_code(), "BAD_REQUEST");
        let err = parse_filter("metrics.acc > 'x'").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PARAMETER_VALUE");

        let err = parse_filter("metrics.acc ! 1").unwrap_err();
        assert_eq!(err.error_code(), "BAD_REQUEST");
        assert!(err.to_string().starts_with("error while lexing filter:"), "{}", err);
    }

    #[test]
    fn test_printed_filters_reparse_to_same_clauses() {
        let original = parse_filter(
            "params.`it's` = \"a'b\" AND datasets.context IN ('train') AND Created >= 3",
        )
        .unwrap();
        let printed: Vec<String> = original.iter().map(|c| c.to_string()).collect();
        let reparsed = parse_filter(&printed.join(" AND ")).unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn test_empty_key() {
        let err = validate("tags.`` = 'x'").unwrap_err();
        assert_eq!(err.error_code(), "BAD_REQUEST");
    }

    mod round_trip {
        use crate::ast::{AndExpr, CompareExpr, Identifier, OperatorKind, Value};
        use crate::validate::parse_filter;
        use proptest::prelude::*;

        fn clause() -> impl Strategy<Value = CompareExpr> {
            use OperatorKind::*;

            let key = "[a-z][a-z0-9_.]{0,8}";
            let metric = (
                key,
                prop::sample::select(vec![Equals, NotEquals, Less, LessEquals, Greater, GreaterEquals]),
                -1.0e6f64..1.0e6,
            )
                .prop_map(|(key, op, n)| CompareExpr {
                    left: Identifier::new(Some("metrics"), &key),
                    op,
                    right: Value::Number(n),
                });
            let text = (
                prop::sample::select(vec!["params", "tags"]),
                key,
                prop::sample::select(vec![Equals, NotEquals, Like, ILike]),
                "[a-zA-Z0-9 %_'.-]{0,10}",
            )
                .prop_map(|(scope, key, op, s)| CompareExpr {
                    left: Identifier::new(Some(scope), &key),
                    op,
                    right: Value::String(s),
                });
            let run_ids = prop::collection::vec("[a-f0-9]{4}", 1..4).prop_map(|ids| CompareExpr {
                left: Identifier::new(Some("attributes"), "run_id"),
                op: In,
                right: Value::StringList(ids),
            });
            prop_oneof![metric, text, run_ids]
        }

        proptest! {
            #[test]
            fn prop_printed_clauses_reparse(exprs in prop::collection::vec(clause(), 1..5)) {
                let input = AndExpr { exprs }.to_string();
                let clauses = parse_filter(&input).unwrap();
                let printed: Vec<String> = clauses.iter().map(ToString::to_string).collect();
                prop_assert_eq!(parse_filter(&printed.join(" AND ")).unwrap(), clauses);
            }
        }
    }
}
