/*!
Row and partition predicates.

A [Predicate] is built programmatically over named columns and evaluated
either against partition tuples (after projection, see [project]) or
against file metrics (see [metrics]). Predicates are ordinary values; the
`and`/`or` constructors fold the constant variants away, so a delete
expression that starts as [Predicate::AlwaysFalse] and is extended by `or`
stays minimal.
*/
use std::fmt;

use crate::model::values::{StructValue, Value};

pub mod metrics;
pub mod project;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Operators over a single, possibly null, column value.
pub enum UnaryOperator {
    /// Matches rows where the column is null.
    IsNull,
    /// Matches rows where the column is not null.
    NotNull,
}

impl UnaryOperator {
    fn negate(&self) -> UnaryOperator {
        match self {
            UnaryOperator::IsNull => UnaryOperator::NotNull,
            UnaryOperator::NotNull => UnaryOperator::IsNull,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Comparison operators between a column and a literal.
pub enum BinaryOperator {
    /// Strictly less than
    Lt,
    /// Less than or equal
    LtEq,
    /// Strictly greater than
    Gt,
    /// Greater than or equal
    GtEq,
    /// Equal
    Eq,
    /// Not equal
    NotEq,
}

impl BinaryOperator {
    fn negate(&self) -> BinaryOperator {
        match self {
            BinaryOperator::Lt => BinaryOperator::GtEq,
            BinaryOperator::LtEq => BinaryOperator::Gt,
            BinaryOperator::Gt => BinaryOperator::LtEq,
            BinaryOperator::GtEq => BinaryOperator::Lt,
            BinaryOperator::Eq => BinaryOperator::NotEq,
            BinaryOperator::NotEq => BinaryOperator::Eq,
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOperator::Lt => write!(f, "<"),
            BinaryOperator::LtEq => write!(f, "<="),
            BinaryOperator::Gt => write!(f, ">"),
            BinaryOperator::GtEq => write!(f, ">="),
            BinaryOperator::Eq => write!(f, "="),
            BinaryOperator::NotEq => write!(f, "!="),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A null check on a named column.
pub struct UnaryExpression {
    /// The operator.
    pub op: UnaryOperator,
    /// The column the check applies to.
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A comparison between a named column and a literal.
pub struct BinaryExpression {
    /// The operator.
    pub op: BinaryOperator,
    /// The column the comparison applies to.
    pub column: String,
    /// The literal the column is compared against.
    pub literal: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A boolean predicate over named columns.
pub enum Predicate {
    /// Matches every row.
    AlwaysTrue,
    /// Matches no row.
    AlwaysFalse,
    /// Both operands match.
    And(Box<Predicate>, Box<Predicate>),
    /// At least one operand matches.
    Or(Box<Predicate>, Box<Predicate>),
    /// The operand does not match.
    Not(Box<Predicate>),
    /// A null check.
    Unary(UnaryExpression),
    /// A comparison against a literal.
    Binary(BinaryExpression),
}

impl Predicate {
    /// `column IS NULL`
    pub fn is_null(column: impl Into<String>) -> Predicate {
        Predicate::Unary(UnaryExpression {
            op: UnaryOperator::IsNull,
            column: column.into(),
        })
    }

    /// `column IS NOT NULL`
    pub fn not_null(column: impl Into<String>) -> Predicate {
        Predicate::Unary(UnaryExpression {
            op: UnaryOperator::NotNull,
            column: column.into(),
        })
    }

    /// `column < literal`
    pub fn less_than(column: impl Into<String>, literal: Value) -> Predicate {
        Predicate::binary(BinaryOperator::Lt, column, literal)
    }

    /// `column <= literal`
    pub fn less_than_or_equal(column: impl Into<String>, literal: Value) -> Predicate {
        Predicate::binary(BinaryOperator::LtEq, column, literal)
    }

    /// `column > literal`
    pub fn greater_than(column: impl Into<String>, literal: Value) -> Predicate {
        Predicate::binary(BinaryOperator::Gt, column, literal)
    }

    /// `column >= literal`
    pub fn greater_than_or_equal(column: impl Into<String>, literal: Value) -> Predicate {
        Predicate::binary(BinaryOperator::GtEq, column, literal)
    }

    /// `column = literal`
    pub fn equal(column: impl Into<String>, literal: Value) -> Predicate {
        Predicate::binary(BinaryOperator::Eq, column, literal)
    }

    /// `column != literal`
    pub fn not_equal(column: impl Into<String>, literal: Value) -> Predicate {
        Predicate::binary(BinaryOperator::NotEq, column, literal)
    }

    fn binary(op: BinaryOperator, column: impl Into<String>, literal: Value) -> Predicate {
        Predicate::Binary(BinaryExpression {
            op,
            column: column.into(),
            literal,
        })
    }

    /// Conjunction, folding the constant variants away.
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::AlwaysFalse, _) | (_, Predicate::AlwaysFalse) => Predicate::AlwaysFalse,
            (Predicate::AlwaysTrue, other) => other,
            (this, Predicate::AlwaysTrue) => this,
            (this, other) => Predicate::And(Box::new(this), Box::new(other)),
        }
    }

    /// Disjunction, folding the constant variants away.
    pub fn or(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::AlwaysTrue, _) | (_, Predicate::AlwaysTrue) => Predicate::AlwaysTrue,
            (Predicate::AlwaysFalse, other) => other,
            (this, Predicate::AlwaysFalse) => this,
            (this, other) => Predicate::Or(Box::new(this), Box::new(other)),
        }
    }

    /// The logical negation, pushed down to the leaves.
    pub fn negate(self) -> Predicate {
        match self {
            Predicate::AlwaysTrue => Predicate::AlwaysFalse,
            Predicate::AlwaysFalse => Predicate::AlwaysTrue,
            Predicate::And(left, right) => {
                Predicate::Or(Box::new(left.negate()), Box::new(right.negate()))
            }
            Predicate::Or(left, right) => {
                Predicate::And(Box::new(left.negate()), Box::new(right.negate()))
            }
            Predicate::Not(inner) => inner.rewrite_not(),
            Predicate::Unary(expression) => Predicate::Unary(UnaryExpression {
                op: expression.op.negate(),
                column: expression.column,
            }),
            Predicate::Binary(expression) => Predicate::Binary(BinaryExpression {
                op: expression.op.negate(),
                column: expression.column,
                literal: expression.literal,
            }),
        }
    }

    /// Rewrites the predicate into negation-normal form: `Not` nodes are
    /// eliminated by negating their operands. Projection and metrics
    /// evaluation both operate on the rewritten form.
    pub fn rewrite_not(self) -> Predicate {
        match self {
            Predicate::Not(inner) => inner.negate(),
            Predicate::And(left, right) => {
                Predicate::And(Box::new(left.rewrite_not()), Box::new(right.rewrite_not()))
            }
            Predicate::Or(left, right) => {
                Predicate::Or(Box::new(left.rewrite_not()), Box::new(right.rewrite_not()))
            }
            predicate => predicate,
        }
    }

    /// Evaluates the predicate against a partition tuple. Terms reference
    /// tuple fields by name; a missing field is treated as null, and
    /// comparisons against null or mistyped values do not match.
    pub fn evaluate(&self, tuple: &StructValue) -> bool {
        match self {
            Predicate::AlwaysTrue => true,
            Predicate::AlwaysFalse => false,
            Predicate::And(left, right) => left.evaluate(tuple) && right.evaluate(tuple),
            Predicate::Or(left, right) => left.evaluate(tuple) || right.evaluate(tuple),
            Predicate::Not(inner) => !inner.evaluate(tuple),
            Predicate::Unary(expression) => {
                let is_null = tuple
                    .get(&expression.column)
                    .map_or(true, |value| value.is_none());
                match expression.op {
                    UnaryOperator::IsNull => is_null,
                    UnaryOperator::NotNull => !is_null,
                }
            }
            Predicate::Binary(expression) => {
                let Some(Some(value)) = tuple.get(&expression.column) else {
                    return false;
                };
                let Some(ordering) = value.partial_cmp(&expression.literal) else {
                    return false;
                };
                match expression.op {
                    BinaryOperator::Lt => ordering.is_lt(),
                    BinaryOperator::LtEq => ordering.is_le(),
                    BinaryOperator::Gt => ordering.is_gt(),
                    BinaryOperator::GtEq => ordering.is_ge(),
                    BinaryOperator::Eq => ordering.is_eq(),
                    BinaryOperator::NotEq => ordering.is_ne(),
                }
            }
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::AlwaysTrue => write!(f, "true"),
            Predicate::AlwaysFalse => write!(f, "false"),
            Predicate::And(left, right) => write!(f, "({left} AND {right})"),
            Predicate::Or(left, right) => write!(f, "({left} OR {right})"),
            Predicate::Not(inner) => write!(f, "NOT ({inner})"),
            Predicate::Unary(expression) => match expression.op {
                UnaryOperator::IsNull => write!(f, "{} IS NULL", expression.column),
                UnaryOperator::NotNull => write!(f, "{} IS NOT NULL", expression.column),
            },
            Predicate::Binary(expression) => write!(
                f,
                "{} {} {}",
                expression.column, expression.op, expression.literal
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(value: Option<Value>) -> StructValue {
        StructValue::new(vec![("p".to_string(), value)])
    }

    #[test]
    fn test_or_folds_constants() {
        let expression = Predicate::AlwaysFalse
            .or(Predicate::less_than("x", Value::Long(10)))
            .or(Predicate::AlwaysFalse);
        assert_eq!(expression, Predicate::less_than("x", Value::Long(10)));
        assert_eq!(
            Predicate::AlwaysFalse.and(Predicate::is_null("x")),
            Predicate::AlwaysFalse
        );
    }

    #[test]
    fn test_rewrite_not() {
        let expression = Predicate::Not(Box::new(
            Predicate::less_than("x", Value::Long(10)).and(Predicate::is_null("y")),
        ));
        assert_eq!(
            expression.rewrite_not(),
            Predicate::greater_than_or_equal("x", Value::Long(10)).or(Predicate::not_null("y"))
        );
    }

    #[test]
    fn test_evaluate_comparisons() {
        let expression = Predicate::less_than("p", Value::Int(10));
        assert!(expression.evaluate(&tuple(Some(Value::Int(9)))));
        assert!(!expression.evaluate(&tuple(Some(Value::Int(10)))));
        assert!(!expression.evaluate(&tuple(None)));
        // mistyped values never match
        assert!(!expression.evaluate(&tuple(Some(Value::Long(9)))));
    }

    #[test]
    fn test_evaluate_null_checks() {
        assert!(Predicate::is_null("p").evaluate(&tuple(None)));
        assert!(!Predicate::is_null("p").evaluate(&tuple(Some(Value::Int(1)))));
        assert!(Predicate::not_null("p").evaluate(&tuple(Some(Value::Int(1)))));
        // fields missing from the tuple count as null
        assert!(Predicate::is_null("q").evaluate(&tuple(Some(Value::Int(1)))));
    }

    #[test]
    fn test_display() {
        let expression = Predicate::less_than("x", Value::Long(10)).or(Predicate::is_null("y"));
        assert_eq!(expression.to_string(), "(x < 10 OR y IS NULL)");
    }
}
