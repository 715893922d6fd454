//! API handlers module

pub mod documents;
pub mod health;
pub mod me;
