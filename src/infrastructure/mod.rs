//! Infrastructure layer - store backends, services and logging

pub mod cache;
pub mod entity;
pub mod logging;
