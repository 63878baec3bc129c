/*!
Strict evaluation of predicates against file metrics.

Used to authorize deleting a whole file when its partition tuple satisfies
only the inclusive projection of the delete expression: the delete is safe
iff the file's column statistics prove that every row matches.
*/
use crate::expr::{
    BinaryExpression, BinaryOperator, Predicate, UnaryExpression, UnaryOperator,
};
use crate::model::manifest::DataFile;
use crate::model::schema::Schema;
use crate::model::values::Value;

/// Evaluates whether file metrics prove that every row of a file matches a
/// predicate. Missing or partial statistics prove nothing.
#[derive(Debug)]
pub struct StrictMetricsEvaluator<'schema> {
    expression: Predicate,
    schema: &'schema Schema,
}

impl<'schema> StrictMetricsEvaluator<'schema> {
    /// Binds the evaluator to a table schema and a row predicate.
    pub fn new(expression: &Predicate, schema: &'schema Schema) -> Self {
        StrictMetricsEvaluator {
            expression: expression.clone().rewrite_not(),
            schema,
        }
    }

    /// Returns true iff every row in `file` must match the expression.
    pub fn eval(&self, file: &DataFile) -> bool {
        if file.record_count == 0 {
            return true;
        }
        self.rows_must_match(&self.expression, file)
    }

    fn rows_must_match(&self, expression: &Predicate, file: &DataFile) -> bool {
        match expression {
            Predicate::AlwaysTrue => true,
            Predicate::AlwaysFalse => false,
            Predicate::And(left, right) => {
                self.rows_must_match(left, file) && self.rows_must_match(right, file)
            }
            Predicate::Or(left, right) => {
                self.rows_must_match(left, file) || self.rows_must_match(right, file)
            }
            Predicate::Not(inner) => self.rows_must_match(&inner.clone().negate(), file),
            Predicate::Unary(expression) => self.unary_must_match(expression, file),
            Predicate::Binary(expression) => self.binary_must_match(expression, file),
        }
    }

    fn column_id(&self, column: &str) -> Option<i32> {
        self.schema.field_by_name(column).map(|field| field.id)
    }

    fn null_count(&self, column: &str, file: &DataFile) -> Option<i64> {
        let id = self.column_id(column)?;
        file.null_value_counts
            .as_ref()
            .and_then(|counts| counts.get(&id))
            .copied()
    }

    fn unary_must_match(&self, expression: &UnaryExpression, file: &DataFile) -> bool {
        let Some(nulls) = self.null_count(&expression.column, file) else {
            return false;
        };
        match expression.op {
            UnaryOperator::IsNull => nulls == file.record_count,
            UnaryOperator::NotNull => nulls == 0,
        }
    }

    fn binary_must_match(&self, expression: &BinaryExpression, file: &DataFile) -> bool {
        // Comparisons never match null rows, so nulls must be absent.
        if self.null_count(&expression.column, file) != Some(0) {
            return false;
        }
        let Some(id) = self.column_id(&expression.column) else {
            return false;
        };
        let bound = |bounds: &Option<std::collections::HashMap<i32, Value>>| {
            bounds.as_ref().and_then(|bounds| bounds.get(&id)).cloned()
        };
        let lower = bound(&file.lower_bounds);
        let upper = bound(&file.upper_bounds);
        let literal = &expression.literal;
        let cmp = |bound: Option<Value>, matches: fn(std::cmp::Ordering) -> bool| {
            bound
                .and_then(|bound| bound.partial_cmp(literal))
                .map_or(false, matches)
        };
        match expression.op {
            BinaryOperator::Lt => cmp(upper, std::cmp::Ordering::is_lt),
            BinaryOperator::LtEq => cmp(upper, std::cmp::Ordering::is_le),
            BinaryOperator::Gt => cmp(lower, std::cmp::Ordering::is_gt),
            BinaryOperator::GtEq => cmp(lower, std::cmp::Ordering::is_ge),
            BinaryOperator::Eq => {
                cmp(lower, std::cmp::Ordering::is_eq) && cmp(upper, std::cmp::Ordering::is_eq)
            }
            BinaryOperator::NotEq => {
                cmp(upper, std::cmp::Ordering::is_lt) || cmp(lower, std::cmp::Ordering::is_gt)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::model::schema::{PrimitiveType, StructField};
    use crate::model::values::StructValue;

    fn schema() -> Schema {
        Schema {
            schema_id: 0,
            fields: vec![StructField {
                id: 1,
                name: "x".to_string(),
                required: false,
                field_type: PrimitiveType::Long,
            }],
        }
    }

    fn file(nulls: i64, lower: i64, upper: i64) -> DataFile {
        DataFile {
            file_path: "data/f.parquet".to_string(),
            partition: StructValue::default(),
            record_count: 100,
            file_size_in_bytes: 1024,
            value_counts: Some(HashMap::from([(1, 100)])),
            null_value_counts: Some(HashMap::from([(1, nulls)])),
            lower_bounds: Some(HashMap::from([(1, Value::Long(lower))])),
            upper_bounds: Some(HashMap::from([(1, Value::Long(upper))])),
        }
    }

    #[test]
    fn test_upper_bound_proves_less_than() {
        let schema = schema();
        let evaluator = StrictMetricsEvaluator::new(&Predicate::less_than("x", Value::Long(10)), &schema);
        assert!(evaluator.eval(&file(0, 1, 9)));
        assert!(!evaluator.eval(&file(0, 1, 20)));
    }

    #[test]
    fn test_nulls_block_comparisons() {
        let schema = schema();
        let evaluator = StrictMetricsEvaluator::new(&Predicate::less_than("x", Value::Long(10)), &schema);
        assert!(!evaluator.eval(&file(1, 1, 9)));
    }

    #[test]
    fn test_missing_stats_prove_nothing() {
        let schema = schema();
        let evaluator = StrictMetricsEvaluator::new(&Predicate::less_than("x", Value::Long(10)), &schema);
        let mut incomplete = file(0, 1, 9);
        incomplete.upper_bounds = None;
        assert!(!evaluator.eval(&incomplete));
    }

    #[test]
    fn test_not_equal_outside_range() {
        let schema = schema();
        let evaluator = StrictMetricsEvaluator::new(&Predicate::not_equal("x", Value::Long(50)), &schema);
        assert!(evaluator.eval(&file(0, 1, 9)));
        assert!(!evaluator.eval(&file(0, 1, 60)));
    }

    #[test]
    fn test_null_checks() {
        let schema = schema();
        let all_null = StrictMetricsEvaluator::new(&Predicate::is_null("x"), &schema);
        assert!(all_null.eval(&file(100, 0, 0)));
        assert!(!all_null.eval(&file(99, 0, 0)));
        let no_null = StrictMetricsEvaluator::new(&Predicate::not_null("x"), &schema);
        assert!(no_null.eval(&file(0, 1, 9)));
    }

    #[test]
    fn test_empty_file_matches_vacuously() {
        let schema = schema();
        let evaluator = StrictMetricsEvaluator::new(&Predicate::less_than("x", Value::Long(10)), &schema);
        let mut empty = file(0, 50, 60);
        empty.record_count = 0;
        assert!(evaluator.eval(&empty));
    }
}
