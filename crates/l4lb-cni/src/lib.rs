//! # l4lb-cni
//!
//! A chained CNI plugin putting containers in reach of a layer 4 load
//! balancer.
//!
//! ADD runs the delegate plugin for the container's primary network, then
//! attaches the container to the shared anycast network through a
//! point-to-point veth, and finally registers the container's namespace in
//! the checkpoint directory the load balancer watches. The delegate's result
//! is what the runtime gets back.
//!
//! DEL undoes all of it, tolerating anything a failed or missing ADD left
//! behind.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod anycast;
pub mod checkpoint;
pub mod config;
pub mod delegate;
pub mod error;
pub mod exec;
pub mod ipam;
pub mod plugin;
pub mod request;
pub mod skel;

pub use checkpoint::CheckpointStore;
pub use config::NetworkConfig;
pub use delegate::{DelegateConfig, DelegateResult};
pub use error::{CniError, ErrorDocument, ErrorKind, Result, Stage};
pub use plugin::{DetachReport, Outcome, Plugin};
pub use request::{AttachRequest, Command, PluginEnv};
pub use skel::{plugin_main, report_error};
