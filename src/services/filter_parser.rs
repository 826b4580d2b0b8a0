use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::api::middleware::AppError;
use crate::models::{
    is_numeric_type, is_string_type, Filter, FilterValue, OperatorKind, SqlValue, StringDefault,
};

/// Operator and values recovered from a textual filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedFilter {
    pub operator: OperatorKind,
    pub value: Vec<FilterValue>,
}

impl ParsedFilter {
    pub fn into_filter(self, column: impl Into<String>) -> Filter {
        Filter::new(column, self.operator, self.value)
    }
}

/// What a matcher expects after its operator keyword
#[derive(Debug, Clone, Copy)]
enum Operand {
    None,
    Scalar,
    Quoted,
    List,
}

struct Matcher {
    operator: OperatorKind,
    pattern: Regex,
    operand: Operand,
}

impl Matcher {
    fn new(operator: OperatorKind, pattern: &str, operand: Operand) -> Self {
        Self {
            operator,
            pattern: Regex::new(pattern).expect("valid filter operator regex"),
            operand,
        }
    }
}

/// Tried top to bottom, first match wins. Longer keywords sit above their
/// prefixes (`NOT LIKE` before `LIKE`, `>=` before `>`, `IS NOT NULL` before
/// `IS NULL`) so the shorter form never shadows them.
static MATCHERS: LazyLock<Vec<Matcher>> = LazyLock::new(|| {
    vec![
        Matcher::new(OperatorKind::NotLike, r#"(?is)^not\s+like\s*(["'].*)$"#, Operand::Quoted),
        Matcher::new(OperatorKind::Like, r#"(?is)^like\s*(["'].*)$"#, Operand::Quoted),
        Matcher::new(OperatorKind::NotContains, r#"(?is)^not\s+contains\s*(["'].*)$"#, Operand::Quoted),
        Matcher::new(OperatorKind::Contains, r#"(?is)^contains\s*(["'].*)$"#, Operand::Quoted),
        Matcher::new(OperatorKind::NotIn, r"(?is)^not\s+in\s*\((.*)\)$", Operand::List),
        Matcher::new(OperatorKind::In, r"(?is)^in\s*\((.*)\)$", Operand::List),
        Matcher::new(OperatorKind::IsNotNull, r"(?i)^is\s+not\s+null$", Operand::None),
        Matcher::new(OperatorKind::IsNull, r"(?i)^is\s+null$", Operand::None),
        Matcher::new(OperatorKind::Gte, r"(?s)^>=\s*(.*)$", Operand::Scalar),
        Matcher::new(OperatorKind::Lte, r"(?s)^<=\s*(.*)$", Operand::Scalar),
        Matcher::new(OperatorKind::NotEqAnsi, r"(?s)^<>\s*(.*)$", Operand::Scalar),
        Matcher::new(OperatorKind::NotEq, r"(?s)^!=\s*(.*)$", Operand::Scalar),
        Matcher::new(OperatorKind::Gt, r"(?s)^>\s*(.*)$", Operand::Scalar),
        Matcher::new(OperatorKind::Lt, r"(?s)^<\s*(.*)$", Operand::Scalar),
        Matcher::new(OperatorKind::Eq, r"(?s)^=\s*(.*)$", Operand::Scalar),
    ]
});

/// Parser and serializer for the compact filter language
/// (`> 5`, `LIKE "a%"`, `IN (1, 'x')`, `IS NULL`, ...)
pub struct FilterParser;

impl FilterParser {
    /// Parse filter text. `Ok(None)` means no operator was recognized.
    pub fn parse(text: &str) -> Result<Option<ParsedFilter>, AppError> {
        let trimmed = text.trim();

        for matcher in MATCHERS.iter() {
            let Some(captures) = matcher.pattern.captures(trimmed) else {
                continue;
            };
            let body = captures.get(1).map(|m| m.as_str()).unwrap_or("");

            let value = match matcher.operand {
                Operand::None => Vec::new(),
                Operand::Scalar => vec![FilterValue::literal(coerce_scalar(body)?)],
                Operand::Quoted => vec![FilterValue::literal(parse_quoted(body)?)],
                Operand::List => parse_list(body)?
                    .into_iter()
                    .map(FilterValue::literal)
                    .collect(),
            };

            return Ok(Some(ParsedFilter {
                operator: matcher.operator,
                value,
            }));
        }

        Ok(None)
    }

    /// Parse filter text for a column of the given declared type. Text without an
    /// operator falls back to the column's default operator with the whole text as
    /// its single value.
    pub fn parse_for_type(text: &str, column_type: Option<&str>) -> Result<ParsedFilter, AppError> {
        if let Some(parsed) = Self::parse(text)? {
            return Ok(parsed);
        }

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(AppError::Parse("Filter value is empty".to_string()));
        }

        let operator = OperatorKind::default_for_type(column_type, StringDefault::Contains);
        let value = if column_type.map(is_numeric_type).unwrap_or(false) {
            coerce_scalar(trimmed)?
        } else if is_quoted(trimmed) {
            parse_quoted(trimmed)?
        } else {
            SqlValue::Text(trimmed.to_string())
        };

        Ok(ParsedFilter {
            operator,
            value: vec![FilterValue::literal(value)],
        })
    }

    /// Render a filter back to text. Numeric `=` and string `CONTAINS` are written
    /// as the bare value since that is what the column's default operator reads.
    pub fn stringify(filter: &Filter, column_type: &str) -> String {
        let first = filter.value.first().map(|v| &v.value);

        match filter.operator {
            OperatorKind::IsNull | OperatorKind::IsNotNull => filter.operator.as_sql().to_string(),
            OperatorKind::In | OperatorKind::NotIn => {
                let items: Vec<String> = filter.value.iter().map(|v| render_literal(&v.value)).collect();
                format!("{} ({})", filter.operator, items.join(", "))
            }
            OperatorKind::Eq if is_numeric_type(column_type) => match first {
                Some(v) if v.is_number() => v.to_string(),
                Some(v) => render_literal(v),
                None => String::new(),
            },
            OperatorKind::Contains if is_string_type(column_type) => match first {
                Some(SqlValue::Text(s)) if is_bare_safe(s) => s.clone(),
                Some(v) => format!("CONTAINS {}", quote(&v.to_string())),
                None => String::new(),
            },
            OperatorKind::Like
            | OperatorKind::NotLike
            | OperatorKind::Contains
            | OperatorKind::NotContains => {
                let text = first.map(|v| v.to_string()).unwrap_or_default();
                format!("{} {}", filter.operator, quote(&text))
            }
            _ => match first {
                Some(v) => format!("{} {}", filter.operator, render_literal(v)),
                None => filter.operator.as_sql().to_string(),
            },
        }
    }
}

/// Bare text can stand for itself only when it would not be read as an operator
/// or a quoted literal
fn is_bare_safe(text: &str) -> bool {
    !text.is_empty()
        && text.trim() == text
        && !text.starts_with(['"', '\''])
        && matches!(FilterParser::parse(text), Ok(None))
}

fn is_quoted(text: &str) -> bool {
    text.len() >= 2
        && ((text.starts_with('"') && text.ends_with('"'))
            || (text.starts_with('\'') && text.ends_with('\'')))
}

fn render_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Text(s) => quote(s),
        other => other.to_string(),
    }
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

fn unescape(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn parse_number(token: &str) -> Option<SqlValue> {
    if let Ok(i) = token.parse::<i64>() {
        return Some(SqlValue::Int(i));
    }
    match token.parse::<f64>() {
        Ok(f) if f.is_finite() => Some(SqlValue::Float(f)),
        _ => None,
    }
}

fn parse_quoted(body: &str) -> Result<SqlValue, AppError> {
    let body = body.trim();
    let mut chars = body.chars();
    let quote = match chars.next() {
        Some(c @ ('"' | '\'')) => c,
        _ => return Err(AppError::Parse(format!("Expected a quoted value: {}", body))),
    };

    let mut out = String::new();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else if c == quote && chars.as_str().is_empty() {
            return Ok(SqlValue::Text(out));
        } else {
            out.push(c);
        }
    }

    Err(AppError::Parse("Unterminated string literal".to_string()))
}

fn coerce_scalar(body: &str) -> Result<SqlValue, AppError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(AppError::Parse("Missing value".to_string()));
    }
    if body.starts_with(['"', '\'']) {
        return parse_quoted(body);
    }
    Ok(parse_number(body).unwrap_or_else(|| SqlValue::Text(body.to_string())))
}

/// Split the inside of `IN (...)` on commas that are outside quotes
fn tokenize_list(input: &str) -> Result<Vec<String>, AppError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_single || in_double => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(c);
            }
            ',' if !in_single && !in_double => {
                tokens.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }

    if in_single || in_double {
        return Err(AppError::Parse("Unterminated string literal".to_string()));
    }

    if !current.trim().is_empty() || !tokens.is_empty() {
        tokens.push(current.trim().to_string());
    }

    Ok(tokens)
}

fn parse_list(body: &str) -> Result<Vec<SqlValue>, AppError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    tokenize_list(body)?
        .into_iter()
        .map(|token| {
            if is_quoted(&token) {
                Ok(SqlValue::Text(unescape(&token[1..token.len() - 1])))
            } else {
                parse_number(&token)
                    .ok_or_else(|| AppError::Parse(format!("Invalid literal: {}", token)))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ParsedFilter {
        FilterParser::parse(text).unwrap().unwrap()
    }

    fn values(parsed: &ParsedFilter) -> Vec<SqlValue> {
        parsed.value.iter().map(|v| v.value.clone()).collect()
    }

    #[test]
    fn test_not_like_wins_over_like() {
        let parsed = parse(r#"NOT LIKE "%x%""#);
        assert_eq!(parsed.operator, OperatorKind::NotLike);
        assert_eq!(values(&parsed), vec![SqlValue::from("%x%")]);
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(parse("is not null").operator, OperatorKind::IsNotNull);
        assert_eq!(parse("Is Null").operator, OperatorKind::IsNull);
        assert_eq!(parse("contains 'abc'").operator, OperatorKind::Contains);
        assert_eq!(parse("not  in (1)").operator, OperatorKind::NotIn);
    }

    #[test]
    fn test_comparison_prefix_order() {
        assert_eq!(parse(">= 3").operator, OperatorKind::Gte);
        assert_eq!(parse("<= 3").operator, OperatorKind::Lte);
        assert_eq!(parse("<> 3").operator, OperatorKind::NotEqAnsi);
        assert_eq!(parse("!= 3").operator, OperatorKind::NotEq);
        assert_eq!(parse("> 3").operator, OperatorKind::Gt);
        assert_eq!(parse("< 3").operator, OperatorKind::Lt);
        assert_eq!(parse("=3").operator, OperatorKind::Eq);
    }

    #[test]
    fn test_scalar_coercion() {
        assert_eq!(values(&parse("= 5")), vec![SqlValue::Int(5)]);
        assert_eq!(values(&parse("> 2.5")), vec![SqlValue::Float(2.5)]);
        assert_eq!(values(&parse("= '5'")), vec![SqlValue::from("5")]);
        assert_eq!(values(&parse("< 2024-01-01")), vec![SqlValue::from("2024-01-01")]);
    }

    #[test]
    fn test_in_list_respects_quotes_and_escapes() {
        let parsed = parse(r#"IN('a, b', "c\"d")"#);
        assert_eq!(parsed.operator, OperatorKind::In);
        assert_eq!(values(&parsed), vec![SqlValue::from("a, b"), SqlValue::from("c\"d")]);
    }

    #[test]
    fn test_in_list_mixed_literals() {
        let parsed = parse("IN (1, 'a', 2.5)");
        assert_eq!(
            values(&parsed),
            vec![SqlValue::Int(1), SqlValue::from("a"), SqlValue::Float(2.5)]
        );
        assert!(parse("IN ()").value.is_empty());
    }

    #[test]
    fn test_unterminated_literal_is_error() {
        let err = FilterParser::parse("IN('a)").unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
        assert!(FilterParser::parse("= \"abc").is_err());
    }

    #[test]
    fn test_unquoted_list_word_is_error() {
        let err = FilterParser::parse("IN (abc, 1)").unwrap_err();
        assert!(err.to_string().contains("Invalid literal: abc"));
    }

    #[test]
    fn test_like_requires_quotes() {
        assert!(FilterParser::parse("like abc").unwrap().is_none());
        assert!(FilterParser::parse("likely").unwrap().is_none());
        assert!(FilterParser::parse("india").unwrap().is_none());
    }

    #[test]
    fn test_bare_text_uses_column_default() {
        let parsed = FilterParser::parse_for_type("alice", Some("varchar")).unwrap();
        assert_eq!(parsed.operator, OperatorKind::Contains);
        assert_eq!(values(&parsed), vec![SqlValue::from("alice")]);

        let parsed = FilterParser::parse_for_type("42", Some("integer")).unwrap();
        assert_eq!(parsed.operator, OperatorKind::Eq);
        assert_eq!(values(&parsed), vec![SqlValue::Int(42)]);

        assert!(FilterParser::parse_for_type("   ", Some("integer")).is_err());
    }

    #[test]
    fn test_stringify_equals_depends_on_type() {
        let filter = parse("= 5").into_filter("t.c");
        assert_eq!(FilterParser::stringify(&filter, "integer"), "5");
        assert_eq!(FilterParser::stringify(&filter, "varchar"), "= 5");
    }

    #[test]
    fn test_stringify_contains_guards_ambiguous_text() {
        let plain = Filter::new("t.c", OperatorKind::Contains, vec![FilterValue::literal("bob")]);
        assert_eq!(FilterParser::stringify(&plain, "text"), "bob");

        let tricky = Filter::new("t.c", OperatorKind::Contains, vec![FilterValue::literal("> 3")]);
        assert_eq!(FilterParser::stringify(&tricky, "text"), r#"CONTAINS "> 3""#);
    }

    #[test]
    fn test_stringify_in_list() {
        let filter = Filter::new(
            "t.c",
            OperatorKind::In,
            vec![FilterValue::literal("a\"b"), FilterValue::literal(3i64)],
        );
        assert_eq!(FilterParser::stringify(&filter, "text"), r#"IN ("a\"b", 3)"#);
    }

    #[test]
    fn test_round_trip_every_operator() {
        let all = [
            OperatorKind::Eq,
            OperatorKind::NotEqAnsi,
            OperatorKind::NotEq,
            OperatorKind::Gt,
            OperatorKind::Gte,
            OperatorKind::Lt,
            OperatorKind::Lte,
            OperatorKind::Like,
            OperatorKind::NotLike,
            OperatorKind::Contains,
            OperatorKind::NotContains,
            OperatorKind::In,
            OperatorKind::NotIn,
            OperatorKind::IsNull,
            OperatorKind::IsNotNull,
        ];

        for column_type in ["integer", "varchar"] {
            for operator in all {
                let value = match operator {
                    OperatorKind::IsNull | OperatorKind::IsNotNull => vec![],
                    OperatorKind::In | OperatorKind::NotIn => {
                        vec![FilterValue::literal(1i64), FilterValue::literal("x, y")]
                    }
                    OperatorKind::Like
                    | OperatorKind::NotLike
                    | OperatorKind::Contains
                    | OperatorKind::NotContains => vec![FilterValue::literal("ab%")],
                    _ => vec![FilterValue::literal(7i64)],
                };
                let filter = Filter::new("t.c", operator, value);
                let text = FilterParser::stringify(&filter, column_type);
                let parsed = FilterParser::parse_for_type(&text, Some(column_type)).unwrap();
                assert_eq!(parsed.operator, operator, "{} on {} via {:?}", operator, column_type, text);
            }
        }
    }
}
