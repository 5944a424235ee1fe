pub mod delete;
pub mod operations;
pub mod reconcile;
