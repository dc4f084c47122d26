pub mod reconcile;
pub mod signals;
pub mod tuner;
