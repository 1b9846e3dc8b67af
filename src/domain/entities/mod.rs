pub mod decision;
pub mod position;
