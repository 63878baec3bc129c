/*!
Projection of row predicates to partition predicates.

For a row predicate `P` and a partition spec `S`, the inclusive projection
is an over-approximation: it matches a partition tuple iff some row with
that tuple could satisfy `P`. The strict projection is an
under-approximation: it matches iff every row with that tuple must satisfy
`P`. `strict` implies `inclusive` by construction: whenever a transform
cannot be projected precisely, the inclusive side degrades towards
[Predicate::AlwaysTrue] and the strict side towards
[Predicate::AlwaysFalse].
*/
use chrono::{DateTime, Datelike, NaiveDate};

use crate::expr::{BinaryExpression, BinaryOperator, Predicate, UnaryExpression};
use crate::model::partition::{PartitionField, PartitionSpec, Transform};
use crate::model::schema::Schema;
use crate::model::values::{StructValue, Value};

const MS_PER_HOUR: i64 = 60 * 60 * 1000;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;
const UNIX_EPOCH_FROM_CE: i32 = 719_163;

/// The inclusive and strict partition predicates derived from one row
/// predicate for one partition spec. Projections are pure in `(P, S)`, so
/// instances are cached per spec id and shared across manifests.
#[derive(Debug, Clone)]
pub struct PartitionProjection {
    inclusive: Predicate,
    strict: Predicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Inclusive,
    Strict,
}

impl Mode {
    /// The projection of a term the mode knows nothing about.
    fn vacuous(&self) -> Predicate {
        match self {
            Mode::Inclusive => Predicate::AlwaysTrue,
            Mode::Strict => Predicate::AlwaysFalse,
        }
    }

    /// Combines projections of the same term through different partition
    /// fields: inclusive projections all have to hold, a single strict
    /// projection suffices.
    fn combine(&self, left: Predicate, right: Predicate) -> Predicate {
        match self {
            Mode::Inclusive => left.and(right),
            Mode::Strict => left.or(right),
        }
    }
}

impl PartitionProjection {
    /// Projects `expression` onto the partition fields of `spec`.
    pub fn new(expression: &Predicate, spec: &PartitionSpec, schema: &Schema) -> Self {
        let expression = expression.clone().rewrite_not();
        PartitionProjection {
            inclusive: project(&expression, spec, schema, Mode::Inclusive),
            strict: project(&expression, spec, schema, Mode::Strict),
        }
    }

    /// The over-approximating partition predicate.
    pub fn inclusive(&self) -> &Predicate {
        &self.inclusive
    }

    /// The under-approximating partition predicate.
    pub fn strict(&self) -> &Predicate {
        &self.strict
    }

    /// Whether some row with this partition tuple could match.
    pub fn matches_inclusive(&self, partition: &StructValue) -> bool {
        self.inclusive.evaluate(partition)
    }

    /// Whether every row with this partition tuple must match.
    pub fn matches_strict(&self, partition: &StructValue) -> bool {
        self.strict.evaluate(partition)
    }
}

fn project(expression: &Predicate, spec: &PartitionSpec, schema: &Schema, mode: Mode) -> Predicate {
    match expression {
        Predicate::AlwaysTrue => Predicate::AlwaysTrue,
        Predicate::AlwaysFalse => Predicate::AlwaysFalse,
        Predicate::And(left, right) => {
            project(left, spec, schema, mode).and(project(right, spec, schema, mode))
        }
        Predicate::Or(left, right) => {
            project(left, spec, schema, mode).or(project(right, spec, schema, mode))
        }
        Predicate::Not(inner) => project(&inner.clone().negate(), spec, schema, mode),
        Predicate::Unary(expression) => project_unary(expression, spec, schema, mode),
        Predicate::Binary(expression) => project_binary(expression, spec, schema, mode),
    }
}

fn partition_fields_for<'spec>(
    column: &str,
    spec: &'spec PartitionSpec,
    schema: &Schema,
) -> Vec<&'spec PartitionField> {
    schema
        .field_by_name(column)
        .map(|source| {
            spec.fields
                .iter()
                .filter(|field| field.source_id == source.id)
                .collect()
        })
        .unwrap_or_default()
}

fn project_unary(
    expression: &UnaryExpression,
    spec: &PartitionSpec,
    schema: &Schema,
    mode: Mode,
) -> Predicate {
    partition_fields_for(&expression.column, spec, schema)
        .into_iter()
        .fold(mode.vacuous(), |acc, field| {
            // Every transform except void maps null to null and non-null to
            // non-null, so null checks project exactly.
            if field.transform == Transform::Void {
                return acc;
            }
            let projected = Predicate::Unary(UnaryExpression {
                op: expression.op.clone(),
                column: field.name.clone(),
            });
            mode.combine(acc, projected)
        })
}

fn project_binary(
    expression: &BinaryExpression,
    spec: &PartitionSpec,
    schema: &Schema,
    mode: Mode,
) -> Predicate {
    partition_fields_for(&expression.column, spec, schema)
        .into_iter()
        .fold(mode.vacuous(), |acc, field| {
            match project_transform(field, expression, mode) {
                Some(projected) => mode.combine(acc, projected),
                None => acc,
            }
        })
}

/// Projects one comparison through one partition field, or `None` when the
/// transform carries too little information for the requested mode.
fn project_transform(
    field: &PartitionField,
    expression: &BinaryExpression,
    mode: Mode,
) -> Option<Predicate> {
    let op = expression.op;
    if field.transform == Transform::Identity {
        return Some(Predicate::Binary(BinaryExpression {
            op,
            column: field.name.clone(),
            literal: expression.literal.clone(),
        }));
    }
    let monotone = match field.transform {
        Transform::Year | Transform::Month | Transform::Day | Transform::Hour => true,
        Transform::Truncate(_) => !matches!(expression.literal, Value::String(_)),
        _ => false,
    };
    let transformed = apply_transform(&field.transform, &expression.literal)?;
    let projected_op = if monotone {
        match (mode, op) {
            (Mode::Inclusive, BinaryOperator::Lt | BinaryOperator::LtEq) => BinaryOperator::LtEq,
            (Mode::Inclusive, BinaryOperator::Gt | BinaryOperator::GtEq) => BinaryOperator::GtEq,
            (Mode::Inclusive, BinaryOperator::Eq) => BinaryOperator::Eq,
            (Mode::Inclusive, BinaryOperator::NotEq) => return None,
            (Mode::Strict, BinaryOperator::Lt | BinaryOperator::LtEq) => BinaryOperator::Lt,
            (Mode::Strict, BinaryOperator::Gt | BinaryOperator::GtEq) => BinaryOperator::Gt,
            (Mode::Strict, BinaryOperator::NotEq) => BinaryOperator::NotEq,
            (Mode::Strict, BinaryOperator::Eq) => return None,
        }
    } else {
        // Order-preserving information is lost; only inclusive equality
        // survives the projection.
        match (mode, op) {
            (Mode::Inclusive, BinaryOperator::Eq) => BinaryOperator::Eq,
            _ => return None,
        }
    };
    Some(Predicate::Binary(BinaryExpression {
        op: projected_op,
        column: field.name.clone(),
        literal: transformed,
    }))
}

fn months_from_epoch(date: NaiveDate) -> i32 {
    (date.year() - 1970) * 12 + date.month0() as i32
}

fn date_from_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_FROM_CE)?)
}

/// Applies a partition transform to a literal, or `None` when the transform
/// does not apply to the literal's type (bucket transforms are never
/// applied here, which makes their projections degrade safely).
fn apply_transform(transform: &Transform, literal: &Value) -> Option<Value> {
    match (transform, literal) {
        (Transform::Identity, literal) => Some(literal.clone()),
        (Transform::Day, Value::Date(days)) => Some(Value::Int(*days)),
        (Transform::Day, Value::Timestamp(ms)) => {
            Some(Value::Int(i32::try_from(ms.div_euclid(MS_PER_DAY)).ok()?))
        }
        (Transform::Hour, Value::Timestamp(ms)) => {
            Some(Value::Int(i32::try_from(ms.div_euclid(MS_PER_HOUR)).ok()?))
        }
        (Transform::Month, Value::Date(days)) => {
            Some(Value::Int(months_from_epoch(date_from_days(*days)?)))
        }
        (Transform::Month, Value::Timestamp(ms)) => Some(Value::Int(months_from_epoch(
            DateTime::from_timestamp_millis(*ms)?.date_naive(),
        ))),
        (Transform::Year, Value::Date(days)) => {
            Some(Value::Int(date_from_days(*days)?.year() - 1970))
        }
        (Transform::Year, Value::Timestamp(ms)) => Some(Value::Int(
            DateTime::from_timestamp_millis(*ms)?.date_naive().year() - 1970,
        )),
        (Transform::Truncate(width), Value::Int(value)) => {
            let width = i32::try_from(*width).ok()?;
            Some(Value::Int(value - value.rem_euclid(width)))
        }
        (Transform::Truncate(width), Value::Long(value)) => {
            let width = i64::from(*width);
            Some(Value::Long(value - value.rem_euclid(width)))
        }
        (Transform::Truncate(width), Value::String(value)) => Some(Value::String(
            value.chars().take(*width as usize).collect(),
        )),
        _ => None,
    }
}
