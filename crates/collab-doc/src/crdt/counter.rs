//! Commutative counters.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::primitive::PrimitiveValue;
use crate::error::DocError;

/// Value of a `Counter` element. Increments wrap at the signed boundary of
/// the counter's own width, so replicas agree in any application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CounterValue {
    Integer(i32),
    Long(i64),
}

impl CounterValue {
    pub fn increase(&mut self, operand: &PrimitiveValue) -> Result<(), DocError> {
        let delta = operand.as_i64().ok_or_else(|| {
            DocError::Unimplemented(format!(
                "counter cannot be increased by a {} value",
                operand.type_name()
            ))
        })?;
        match self {
            CounterValue::Integer(v) => *v = v.wrapping_add(delta as i32),
            CounterValue::Long(v) => *v = v.wrapping_add(delta),
        }
        Ok(())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            CounterValue::Integer(_) => "integer",
            CounterValue::Long(_) => "long",
        }
    }

    pub fn to_json_value(&self) -> Value {
        match self {
            CounterValue::Integer(v) => Value::from(*v),
            CounterValue::Long(v) => Value::from(*v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_counter_wraps() {
        let mut c = CounterValue::Integer(i32::MAX);
        c.increase(&PrimitiveValue::Integer(1)).unwrap();
        assert_eq!(c, CounterValue::Integer(i32::MIN));
    }

    #[test]
    fn long_counter_accepts_any_numeric() {
        let mut c = CounterValue::Long(10);
        c.increase(&PrimitiveValue::Integer(-3)).unwrap();
        c.increase(&PrimitiveValue::Double(2.9)).unwrap();
        assert_eq!(c, CounterValue::Long(9));
    }

    #[test]
    fn rejects_non_numeric_operands() {
        let mut c = CounterValue::Integer(0);
        let err = c.increase(&PrimitiveValue::from("x")).unwrap_err();
        assert!(matches!(err, DocError::Unimplemented(_)));
        assert_eq!(c, CounterValue::Integer(0));
    }

    #[test]
    fn order_does_not_matter() {
        let ops = [5i64, -7, i64::MAX, 3];
        let mut a = CounterValue::Long(0);
        let mut b = CounterValue::Long(0);
        for v in ops {
            a.increase(&PrimitiveValue::Long(v)).unwrap();
        }
        for v in ops.iter().rev() {
            b.increase(&PrimitiveValue::Long(*v)).unwrap();
        }
        assert_eq!(a, b);
    }
}
