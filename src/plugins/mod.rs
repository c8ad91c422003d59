//! Entity kinds and their administrative command surfaces.

pub mod baseline;
pub mod coordinator;
pub mod drone;
pub mod image;
pub mod worker;
