//! IAM policy evaluation
//!
//! An explicit `Deny` always wins, an `Allow` grants, anything else is an
//! implicit deny. Actions match case-insensitively, resources case-sensitively,
//! both with `*` and `?` wildcards.

use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    ExplicitDeny,
    ImplicitDeny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

/// One statement of an identity policy or a trust policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
    /// `Principal.AWS` and `Principal.Service` entries (trust policies only)
    pub principals: Vec<String>,
}

impl Statement {
    pub fn allow(actions: &[&str], resources: &[&str]) -> Self {
        Self {
            effect: Effect::Allow,
            actions: actions.iter().map(|a| a.to_string()).collect(),
            resources: resources.iter().map(|r| r.to_string()).collect(),
            principals: Vec::new(),
        }
    }

    fn matches(&self, action: &str, resource: &str) -> bool {
        self.actions
            .iter()
            .any(|pattern| wildcard_match(&pattern.to_lowercase(), &action.to_lowercase()))
            && (self.resources.is_empty()
                || self
                    .resources
                    .iter()
                    .any(|pattern| wildcard_match(pattern, resource)))
    }
}

/// Parse the `Statement` list of a resolved policy document
pub fn parse_document(document: &Value) -> Vec<Statement> {
    let statements = match document.get("Statement") {
        Some(Value::Array(items)) => items.clone(),
        Some(single @ Value::Object(_)) => vec![single.clone()],
        _ => Vec::new(),
    };

    statements
        .iter()
        .map(|s| Statement {
            effect: match s.get("Effect").and_then(Value::as_str) {
                Some("Deny") => Effect::Deny,
                _ => Effect::Allow,
            },
            actions: string_or_list(s.get("Action")),
            resources: string_or_list(s.get("Resource")),
            principals: match s.get("Principal") {
                Some(Value::String(any)) => vec![any.clone()],
                Some(Value::Object(map)) => map
                    .values()
                    .flat_map(|v| string_or_list(Some(v)))
                    .collect(),
                _ => Vec::new(),
            },
        })
        .collect()
}

fn string_or_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

/// Evaluate identity statements for one request
pub fn evaluate(statements: &[Statement], action: &str, resource: &str) -> Decision {
    let mut decision = Decision::ImplicitDeny;
    for statement in statements.iter().filter(|s| s.matches(action, resource)) {
        match statement.effect {
            Effect::Deny => return Decision::ExplicitDeny,
            Effect::Allow => decision = Decision::Allow,
        }
    }
    decision
}

/// Whether a trust policy lets `caller` (an assumed-role session ARN) assume the role
///
/// A principal may name the session ARN itself, the role the session belongs
/// to, or the root of the caller's account.
pub fn trust_admits(trust: &[Statement], caller_session_arn: &str, caller_role_arn: &str) -> bool {
    let account_root = caller_role_arn
        .split(':')
        .nth(4)
        .map(|account| format!("arn:aws:iam::{}:root", account));

    let mut admitted = false;
    for statement in trust {
        let action_matches = statement
            .actions
            .iter()
            .any(|a| wildcard_match(&a.to_lowercase(), "sts:assumerole"));
        let principal_matches = statement.principals.iter().any(|p| {
            p == "*"
                || wildcard_match(p, caller_session_arn)
                || p == caller_role_arn
                || account_root.as_deref() == Some(p.as_str())
        });
        if action_matches && principal_matches {
            match statement.effect {
                Effect::Deny => return false,
                Effect::Allow => admitted = true,
            }
        }
    }
    admitted
}

/// Statements granted by an AWS managed policy
///
/// Each bundle is modeled by the action prefixes it grants on every resource.
pub fn managed_policy_statements(policy_arn: &str) -> Vec<Statement> {
    let name = policy_arn.rsplit('/').next().unwrap_or(policy_arn);
    let actions: &[&str] = match name {
        "AdministratorAccess" => &["*"],
        "CloudWatchFullAccess" => &[
            "autoscaling:Describe*",
            "cloudwatch:*",
            "logs:*",
            "sns:*",
            "iam:GetPolicy",
            "iam:GetPolicyVersion",
            "iam:GetRole",
        ],
        "AmazonDynamoDBFullAccess" => &[
            "dynamodb:*",
            "dax:*",
            "kinesis:ListStreams",
            "kinesis:DescribeStream",
            "kinesis:DescribeStreamSummary",
        ],
        "AmazonS3FullAccess" => &["s3:*", "s3-object-lambda:*"],
        "IAMFullAccess" => &["iam:*", "organizations:Describe*", "organizations:List*"],
        "AmazonCognitoPowerUser" => &[
            "cognito-identity:*",
            "cognito-idp:*",
            "cognito-sync:*",
            "iam:ListRoles",
            "iam:ListOpenIdConnectProviders",
            "iam:ListSAMLProviders",
            "sns:ListPlatformApplications",
        ],
        "AWSLambdaBasicExecutionRole" => &[
            "logs:CreateLogGroup",
            "logs:CreateLogStream",
            "logs:PutLogEvents",
        ],
        "AWSLambdaKinesisExecutionRole" => &[
            "kinesis:DescribeStream",
            "kinesis:DescribeStreamSummary",
            "kinesis:GetRecords",
            "kinesis:GetShardIterator",
            "kinesis:ListShards",
            "kinesis:ListStreams",
            "kinesis:SubscribeToShard",
            "logs:CreateLogGroup",
            "logs:CreateLogStream",
            "logs:PutLogEvents",
        ],
        other => {
            debug!(policy = %other, "Managed policy is not modeled, granting nothing");
            &[]
        }
    };

    if actions.is_empty() {
        return Vec::new();
    }
    vec![Statement::allow(actions, &["*"])]
}

/// Glob match with `*` (any run) and `?` (any single character)
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let value: Vec<char> = value.chars().collect();
    let (mut p, mut v) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while v < value.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == value[v]) {
            p += 1;
            v += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, v));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            v = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wildcards() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("kinesis:Get*", "kinesis:GetRecords"));
        assert!(wildcard_match("arn:aws:s3:::bucket/?.txt", "arn:aws:s3:::bucket/a.txt"));
        assert!(!wildcard_match("arn:aws:s3:::bucket/?.txt", "arn:aws:s3:::bucket/ab.txt"));
        assert!(wildcard_match("a*b*c", "aXXbYYc"));
        assert!(!wildcard_match("a*b*c", "aXXbYY"));
    }

    #[test]
    fn test_explicit_deny_wins() {
        let statements = parse_document(&json!({
            "Statement": [
                { "Effect": "Allow", "Action": "dynamodb:*", "Resource": "*" },
                { "Effect": "Deny", "Action": "dynamodb:DeleteTable", "Resource": "*" },
            ]
        }));
        let table = "arn:aws:dynamodb:us-east-1:123456789012:table/customer-table";
        assert_eq!(evaluate(&statements, "dynamodb:PutItem", table), Decision::Allow);
        assert_eq!(
            evaluate(&statements, "dynamodb:DeleteTable", table),
            Decision::ExplicitDeny
        );
        assert_eq!(
            evaluate(&statements, "sns:Publish", table),
            Decision::ImplicitDeny
        );
    }

    #[test]
    fn test_actions_match_case_insensitively() {
        let statements = vec![Statement::allow(&["STS:AssumeRole"], &["*"])];
        assert!(evaluate(&statements, "sts:assumerole", "arn:aws:iam::1:role/x").is_allowed());
    }

    #[test]
    fn test_trust_admits_session_role_and_account_root() {
        let session = "arn:aws:sts::123456789012:assumed-role/createCustomerLambdaRole/create-fn";
        let role = "arn:aws:iam::123456789012:role/createCustomerLambdaRole";

        let by_session = parse_document(&json!({ "Statement": [
            { "Effect": "Allow", "Action": "sts:AssumeRole", "Principal": { "AWS": session } }
        ]}));
        assert!(trust_admits(&by_session, session, role));

        let other = parse_document(&json!({ "Statement": [
            { "Effect": "Allow", "Action": "sts:AssumeRole",
              "Principal": { "AWS": "arn:aws:sts::123456789012:assumed-role/createCustomerLambdaRole/other-fn" } }
        ]}));
        assert!(!trust_admits(&other, session, role));

        let by_root = parse_document(&json!({ "Statement": [
            { "Effect": "Allow", "Action": "sts:AssumeRole",
              "Principal": { "AWS": ["arn:aws:iam::123456789012:root"] } }
        ]}));
        assert!(trust_admits(&by_root, session, role));

        let service = parse_document(&json!({ "Statement": [
            { "Effect": "Allow", "Action": "sts:AssumeRole",
              "Principal": { "Service": "lambda.amazonaws.com" } }
        ]}));
        assert!(!trust_admits(&service, session, role));
    }

    #[test]
    fn test_managed_policies_by_prefix() {
        let power_user = managed_policy_statements(
            "arn:aws:iam::aws:policy/AmazonCognitoPowerUser",
        );
        assert!(evaluate(&power_user, "cognito-idp:AdminAddUserToGroup", "arn:x").is_allowed());
        assert!(!evaluate(&power_user, "dynamodb:PutItem", "arn:x").is_allowed());

        let watch = managed_policy_statements("arn:aws:iam::aws:policy/CloudWatchFullAccess");
        assert!(evaluate(&watch, "logs:PutLogEvents", "arn:x").is_allowed());

        assert!(managed_policy_statements("arn:aws:iam::aws:policy/SomethingElse").is_empty());
    }
}
