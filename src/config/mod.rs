//! # Configuration Management
//!
//! The authoritative Hatch configuration lives in a single YAML document on
//! disk. This module defines the typed model, whole-document validation,
//! the durable store (load / atomic save / merge), path resolution for the
//! Hatch root directory, and the filesystem watcher that feeds config
//! reloads back into the supervisor.

mod model;
mod paths;
mod store;
mod validate;
mod watcher;

pub use model::{Config, Project, ProjectDescriptor, Service, Settings};
pub use paths::Paths;
pub use store::{load_project_descriptor, merge_project, remove_project, ConfigStore};
pub use validate::validate;
pub use watcher::ConfigWatcher;
