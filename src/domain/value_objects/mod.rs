pub mod price;
pub mod quantity;

pub use price::Price;
pub use quantity::Quantity;
