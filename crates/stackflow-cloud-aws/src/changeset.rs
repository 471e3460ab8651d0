//! Change set and stack status interpretation

use stackflow_cloud::ActionType;

/// Status reasons CloudFormation uses for a change set with nothing to do
const NO_CHANGE_REASONS: &[&str] = &[
    "didn't contain changes",
    "No updates are to be performed",
];

/// Map a change set entry (`Add` / `Modify` / `Remove`, Replacement flag) to an action
pub fn action_type(change_action: &str, replacement: Option<&str>) -> ActionType {
    match change_action {
        "Add" | "Import" => ActionType::Create,
        "Remove" => ActionType::Delete,
        "Modify" | "Dynamic" => match replacement {
            Some("True") => ActionType::Replace,
            _ => ActionType::Update,
        },
        _ => ActionType::NoOp,
    }
}

/// A failed change set whose reason only says there was nothing to change
pub fn is_empty_change_set(reason: &str) -> bool {
    NO_CHANGE_REASONS.iter().any(|r| reason.contains(r))
}

/// The error text CloudFormation returns for an unknown stack
pub fn is_missing_stack(message: &str) -> bool {
    message.contains("does not exist")
}

/// Stack status that will not change without another operation
pub fn is_settled(status: &str) -> bool {
    !status.ends_with("_IN_PROGRESS")
}

/// Settled status that means the last operation did not succeed
pub fn is_failed(status: &str) -> bool {
    status.ends_with("_FAILED")
        || status.ends_with("ROLLBACK_COMPLETE")
        || status == "UPDATE_ROLLBACK_COMPLETE"
}

/// A stack that exists only as a failed first creation and must be deleted before reuse
pub fn needs_recreate(status: &str) -> bool {
    status == "ROLLBACK_COMPLETE" || status == "REVIEW_IN_PROGRESS"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type() {
        assert_eq!(action_type("Add", None), ActionType::Create);
        assert_eq!(action_type("Modify", Some("False")), ActionType::Update);
        assert_eq!(action_type("Modify", Some("Conditional")), ActionType::Update);
        assert_eq!(action_type("Modify", Some("True")), ActionType::Replace);
        assert_eq!(action_type("Remove", None), ActionType::Delete);
        assert_eq!(action_type("Unknown", None), ActionType::NoOp);
    }

    #[test]
    fn test_empty_change_set_reason() {
        assert!(is_empty_change_set(
            "The submitted information didn't contain changes. Submit different information to create a change set."
        ));
        assert!(!is_empty_change_set("Template format error"));
    }

    #[test]
    fn test_status_classification() {
        assert!(is_settled("CREATE_COMPLETE"));
        assert!(!is_settled("UPDATE_COMPLETE_CLEANUP_IN_PROGRESS"));
        assert!(is_failed("CREATE_FAILED"));
        assert!(is_failed("ROLLBACK_COMPLETE"));
        assert!(is_failed("UPDATE_ROLLBACK_COMPLETE"));
        assert!(!is_failed("UPDATE_COMPLETE"));
        assert!(needs_recreate("ROLLBACK_COMPLETE"));
        assert!(is_missing_stack("Stack with id CdkStack does not exist"));
    }
}
