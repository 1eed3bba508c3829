pub mod candidates;
pub mod prices;
pub mod provider;
pub mod stocks;
pub mod types;
