pub mod entitlement;
pub mod models;
