//! Cluster access: the kubectl client and the data gatherer built on it.

pub mod client;
pub mod gatherer;

pub use client::{ClusterClient, CommandOutput, KubectlClient};
pub use gatherer::ClusterDataGatherer;
