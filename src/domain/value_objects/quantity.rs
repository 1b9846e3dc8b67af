#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Quantity(f64);

impl Quantity {
    /// A position or order size. Strictly positive: a zero-size order is
    /// never submittable, and an open position always has size > 0.
    pub fn new(value: f64) -> Result<Self, String> {
        if !value.is_finite() {
            return Err("Quantity must be finite".to_string());
        }
        if value <= 0.0 {
            return Err("Quantity must be positive".to_string());
        }
        Ok(Quantity(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}
