//! Instance state machine — a pure transition function over
//! `InstanceStatus`, kept free of I/O so every legal and illegal edge in
//! §4.2's table is a single assertion away from being tested.

use crate::error::{Error, Result};
use crate::repo::compute::InstanceStatus;

/// Events the orchestrator or reconciler can raise against an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceEvent {
    ContainerStarted,
    Stop,
    ContainerStopped,
    Start,
    Delete,
    ContainerCreateFailed,
}

/// Applies `event` to `from`, returning the resulting state or an
/// `InvalidArgument` naming the illegal transition. Mirrors the table in
/// §4.2 exactly: every `(state, event)` pair not listed there falls through
/// to the error arm.
pub fn transition(from: InstanceStatus, event: InstanceEvent) -> Result<InstanceStatus> {
    use InstanceEvent::*;
    use InstanceStatus::*;

    match (from, event) {
        (_, Delete) => Ok(Terminated),
        (Provisioning, ContainerStarted) => Ok(Running),
        (Provisioning, ContainerCreateFailed) => Ok(Terminated),
        (Running, Stop) => Ok(Stopping),
        (Stopping, ContainerStopped) => Ok(Stopped),
        (Stopped, Start) => Ok(Running),
        (from, event) => Err(Error::InvalidArgument(format!(
            "illegal transition: {event:?} from state {from:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use InstanceEvent::*;
    use InstanceStatus::*;

    #[test]
    fn happy_path_provision_to_running() {
        assert_eq!(transition(Provisioning, ContainerStarted).unwrap(), Running);
    }

    #[test]
    fn stop_start_round_trip() {
        assert_eq!(transition(Running, Stop).unwrap(), Stopping);
        assert_eq!(transition(Stopping, ContainerStopped).unwrap(), Stopped);
        assert_eq!(transition(Stopped, Start).unwrap(), Running);
    }

    #[test]
    fn delete_is_a_sink_from_any_state() {
        for state in [Provisioning, Running, Stopping, Stopped, Terminated] {
            assert_eq!(transition(state, Delete).unwrap(), Terminated);
        }
    }

    #[test]
    fn provision_failure_terminates() {
        assert_eq!(transition(Provisioning, ContainerCreateFailed).unwrap(), Terminated);
    }

    #[test]
    fn starting_a_running_instance_is_illegal() {
        assert!(transition(Running, Start).is_err());
    }

    #[test]
    fn stopping_a_stopped_instance_is_illegal() {
        assert!(transition(Stopped, Stop).is_err());
    }

    #[test]
    fn container_stopped_event_only_valid_while_stopping() {
        assert!(transition(Running, ContainerStopped).is_err());
        assert!(transition(Stopped, ContainerStopped).is_err());
    }
}
