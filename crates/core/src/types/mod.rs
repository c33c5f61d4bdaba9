//! Core types and data structures for the Agent Runtime System

pub mod domain;
pub mod error;

pub use domain::*;
pub use error::*;
