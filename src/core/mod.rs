//! Core primitives and the lifecycle engine.
//!
//! Leaves first: engine seam and image resolution, persistence, the entity model and its
//! registries, then the lifecycle state machine, dependency resolution and the hive that
//! wires them together.

pub mod broker;
pub mod config;
pub mod db;
pub mod dependency;
pub mod engine;
pub mod entity;
pub mod error;
pub mod hive;
pub mod image;
pub mod lifecycle;
pub mod locks;
pub mod logging;
pub mod output;
pub mod registry;
pub mod schemas;
pub mod store;
pub mod time;
