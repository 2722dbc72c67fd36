//! Values passed between provisioning steps through the scratchpad.

use serde::{Deserialize, Serialize};

/// Typed scratchpad of a provisioning workflow.
///
/// Each field is persisted under its own key in the workflow's scratchpad
/// record. Unset fields are not stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Handoff {
    /// ARN of the verified lease function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_arn: Option<String>,

    /// ARN of the lease expiry rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_arn: Option<String>,

    /// Target ID registered on the rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fleet_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfilled_capacity: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_ids: Vec<String>,

    /// Failure reports, `"<step>: <message>"`, in the order they happened.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

impl Handoff {
    /// Append a failure report for `step`.
    ///
    /// A step that aborts again after its abort failed to persist reports
    /// the same failure twice; the repeat is dropped.
    pub fn report_failure(&mut self, step: &str, message: impl AsRef<str>) {
        let report = format!("{step}: {}", message.as_ref());
        if self.failures.last() != Some(&report) {
            self.failures.push(report);
        }
    }

    /// All failure reports joined for a reply message.
    pub fn failure_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            None
        } else {
            Some(self.failures.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_summary() {
        let mut pad = Handoff::default();
        assert_eq!(pad.failure_summary(), None);

        pad.report_failure("FleetRequest", "quota exceeded");
        pad.report_failure("WaitForFleet", "fleet failed");
        assert_eq!(
            pad.failure_summary().as_deref(),
            Some("FleetRequest: quota exceeded; WaitForFleet: fleet failed")
        );
    }

    #[test]
    fn test_repeated_failure_is_reported_once() {
        let mut pad = Handoff::default();
        pad.report_failure("FleetRequest", "quota exceeded");
        pad.report_failure("FleetRequest", "quota exceeded");
        assert_eq!(pad.failures, vec!["FleetRequest: quota exceeded"]);

        // Only consecutive repeats are dropped.
        pad.report_failure("WaitForFleet", "fleet failed");
        pad.report_failure("FleetRequest", "quota exceeded");
        assert_eq!(pad.failures.len(), 3);
    }

    #[test]
    fn test_unset_fields_are_not_serialized() {
        let pad = Handoff {
            fleet_id: Some("sfr-1".to_string()),
            ..Handoff::default()
        };
        let json = serde_json::to_value(&pad).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert_eq!(obj["fleet_id"], "sfr-1");
    }
}
