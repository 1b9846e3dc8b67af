pub mod indicators;
pub mod risk;
