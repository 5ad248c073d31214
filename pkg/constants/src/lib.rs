//! Centralized constants for the elastiq project.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod labels;
pub mod paths;
pub mod resources;
pub mod scheduler;
pub mod state;
