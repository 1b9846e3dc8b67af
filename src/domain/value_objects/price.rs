#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Price(f64);

impl Price {
    pub fn new(value: f64) -> Result<Self, String> {
        if !value.is_finite() {
            return Err("Price must be finite".to_string());
        }
        if value < 0.0 {
            return Err("Price must be non-negative".to_string());
        }
        Ok(Price(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn multiply(&self, factor: f64) -> Result<Price, String> {
        if !factor.is_finite() {
            return Err("Factor must be finite".to_string());
        }
        Price::new(self.0 * factor)
    }
}
