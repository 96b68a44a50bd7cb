//! Core module - Status reconciliation, transition tracking, and pin policy

pub mod colima;
pub mod command;
pub mod container;
pub mod docker;
pub mod instance;
pub mod pins;
pub mod sampler;
pub mod scanner;
pub mod transition;

pub use colima::{ColimaService, FAST_POLL_INTERVAL, SLOW_POLL_INTERVAL};
pub use command::{CommandError, CommandOutput, CommandRunner, LogStream, ShellRunner};
pub use container::{Container, ContainerStatus};
pub use docker::{
    ContainerSnapshot, DaemonDiagnosis, DockerService, UnreachableReason, FAST_POLL_CEILING,
};
pub use instance::{VmInstance, VmStatus};
pub use pins::{PinSet, MAX_PINNED};
pub use transition::{TransitionTracker, INSTANCE_SETTLE_DWELL};
