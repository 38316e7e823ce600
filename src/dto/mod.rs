pub mod staff_dto;
pub mod student_dto;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Scores travel as JSON numbers rather than decimal strings.
pub fn decimal_to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}
