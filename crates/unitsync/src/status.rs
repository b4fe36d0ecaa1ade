//! Publishing pass results into a resource status.

use chrono::Utc;

use crate::error::TransportError;
use crate::executor::UnitOutcome;
use crate::resource::{Condition, ConditionStatus, SystemdResource, READY_CONDITION};

/// Reason set on `Ready=False` when the init system could not be reached.
pub const REASON_FAILED_TO_CONNECT: &str = "FailedToConnect";

/// Reason set on `Ready=False` when a pass was aborted mid-batch.
pub const REASON_FAILED_TO_HANDLE_UNIT: &str = "FailedToHandleUnit";

/// Replaces the unit statuses with `outcomes` and marks the resource ready.
pub fn publish_success(resource: &mut SystemdResource, outcomes: Vec<UnitOutcome>) {
    resource.status.units = outcomes.into_iter().map(Into::into).collect();
    set_condition(resource, ConditionStatus::True, None, None);
}

/// Marks the resource not ready. Unit statuses from the last successful
/// pass are left as they are.
pub fn publish_failure(resource: &mut SystemdResource, error: &TransportError) {
    let (reason, message) = match error {
        TransportError::Connect(_) => (REASON_FAILED_TO_CONNECT, "Failed to connect to systemd"),
        _ => (REASON_FAILED_TO_HANDLE_UNIT, "Failed to handle unit"),
    };
    set_condition(
        resource,
        ConditionStatus::False,
        Some(reason.to_string()),
        Some(format!("{}: {}", message, error)),
    );
}

/// Sets a condition of type `Ready`, keeping its transition time when the
/// status does not change.
fn set_condition(
    resource: &mut SystemdResource,
    status: ConditionStatus,
    reason: Option<String>,
    message: Option<String>,
) {
    let now = Utc::now();
    let conditions = &mut resource.status.conditions;

    match conditions
        .iter_mut()
        .find(|c| c.condition_type == READY_CONDITION)
    {
        Some(existing) => {
            if existing.status != status {
                existing.last_transition_time = now;
            }
            existing.status = status;
            existing.reason = reason;
            existing.message = message;
        }
        None => conditions.push(Condition {
            condition_type: READY_CONDITION.to_string(),
            status,
            reason,
            message,
            last_transition_time: now,
        }),
    }
}

/// Returns true if the resource's `Ready` condition is true.
pub fn is_ready(resource: &SystemdResource) -> bool {
    resource
        .status
        .condition(READY_CONDITION)
        .map(|c| c.status == ConditionStatus::True)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UnitError;
    use crate::resource::{DesiredStatus, UnitSpec};

    fn outcome(name: &str, error: Option<UnitError>) -> UnitOutcome {
        UnitOutcome {
            name: name.to_string(),
            observed_status: String::new(),
            desired_status: "started".to_string(),
            error,
        }
    }

    fn resource() -> SystemdResource {
        SystemdResource::new(
            "host",
            vec![UnitSpec::new("a.service", DesiredStatus::Started)],
        )
    }

    #[test]
    fn test_success_replaces_units_and_sets_ready() {
        let mut resource = resource();
        publish_success(
            &mut resource,
            vec![outcome(
                "a.service",
                Some(UnitError::JobNotDone("failed".to_string())),
            )],
        );

        assert!(is_ready(&resource));
        assert_eq!(resource.status.units.len(), 1);
        assert_eq!(
            resource.status.units[0].error,
            "job != done with status: failed"
        );
    }

    #[test]
    fn test_failure_keeps_previous_units() {
        let mut resource = resource();
        publish_success(&mut resource, vec![outcome("a.service", None)]);
        let previous = resource.status.units.clone();

        publish_failure(&mut resource, &TransportError::Connect("no bus".to_string()));

        assert!(!is_ready(&resource));
        assert_eq!(resource.status.units, previous);
        let ready = resource.status.condition(READY_CONDITION).unwrap();
        assert_eq!(ready.reason.as_deref(), Some(REASON_FAILED_TO_CONNECT));
        assert_eq!(resource.status.conditions.len(), 1);
    }

    #[test]
    fn test_mid_batch_failure_reason() {
        let mut resource = resource();
        publish_failure(
            &mut resource,
            &TransportError::ListJobs("reset".to_string()),
        );
        let ready = resource.status.condition(READY_CONDITION).unwrap();
        assert_eq!(ready.reason.as_deref(), Some(REASON_FAILED_TO_HANDLE_UNIT));
        assert!(ready.message.as_deref().unwrap().contains("reset"));
    }
}
