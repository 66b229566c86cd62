//! OperationOutcome construction.

use serde_json::{Value, json};

/// Creates an OperationOutcome with a single issue.
pub fn operation_outcome(severity: &str, code: &str, diagnostics: &str) -> Value {
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": severity,
            "code": code,
            "diagnostics": diagnostics
        }]
    })
}

/// Creates the "all ok" outcome returned by successful deletes.
pub fn all_ok() -> Value {
    operation_outcome("information", "informational", "All OK")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_outcome_shape() {
        let outcome = operation_outcome("error", "not-found", "Patient/1 not found");
        assert_eq!(outcome["resourceType"], "OperationOutcome");
        assert_eq!(outcome["issue"][0]["severity"], "error");
        assert_eq!(outcome["issue"][0]["code"], "not-found");
        assert_eq!(outcome["issue"][0]["diagnostics"], "Patient/1 not found");
    }

    #[test]
    fn test_all_ok() {
        let outcome = all_ok();
        assert_eq!(outcome["issue"][0]["severity"], "information");
    }
}
