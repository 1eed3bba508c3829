pub mod contract;
pub mod expert;
pub mod recommendation;
pub mod stock;
