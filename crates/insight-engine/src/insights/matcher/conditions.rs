use crate::insights::catalog::{normalize_text, Condition, Literal, Operator};
use crate::insights::context::{ContextSnapshot, FieldValue};

/// Evaluates one condition. Absent values satisfy nothing except `absent`, and a type
/// mismatch between operator and value never holds.
pub(crate) fn condition_holds(condition: &Condition, context: &ContextSnapshot) -> bool {
    let value = context.lookup(&condition.field);

    match (&condition.operator, value) {
        (Operator::Absent, value) => value.is_none(),
        (_, None) => false,
        (Operator::Present, Some(_)) => true,
        (Operator::Lt(threshold), Some(FieldValue::Number(actual))) => actual < *threshold,
        (Operator::Lte(threshold), Some(FieldValue::Number(actual))) => actual <= *threshold,
        (Operator::Gt(threshold), Some(FieldValue::Number(actual))) => actual > *threshold,
        (Operator::Gte(threshold), Some(FieldValue::Number(actual))) => actual >= *threshold,
        (Operator::Eq(Literal::Bool(expected)), Some(FieldValue::Bool(actual))) => {
            actual == *expected
        }
        (Operator::Eq(Literal::Number(expected)), Some(FieldValue::Number(actual))) => {
            (actual - expected).abs() < f64::EPSILON
        }
        (Operator::Eq(Literal::Text(expected)), Some(FieldValue::Tags(tags))) => {
            let expected = normalize_text(expected);
            tags.iter().any(|tag| normalize_text(tag) == expected)
        }
        (Operator::Contains(needles), Some(FieldValue::Tags(tags))) => tags.iter().any(|tag| {
            let tag = normalize_text(tag);
            needles.iter().any(|needle| tag.contains(needle.as_str()))
        }),
        _ => false,
    }
}
