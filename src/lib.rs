//! `vaultfs`: a single-file encrypted container that behaves like a
//! miniature filesystem — folders, files, symbolic links, and direct links
//! — with file contents stored as encrypted byte ranges in a payload file
//! and metadata kept in a co-located relational store.
//!
//! See [`Container`] for the entry point.

mod allocator;
mod cluster;
mod container;
mod error;
mod io_engine;
mod metadata;
mod observer;
mod payload;
mod resources;
mod time;
mod tree;

pub use cluster::{ClusterLevel, DataUsagePreferences, CLUSTER_SIZE_MIN};
pub use container::{Container, ContainerInfo};
pub use error::{ContainerError, Result};
pub use io_engine::SpaceUsageInfo;
pub use metadata::ElementType;
pub use observer::{ProgressObserver, Signal};
pub use tree::{DirectLink, Element, File, Folder, Properties, SymLink};
