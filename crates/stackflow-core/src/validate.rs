//! ブループリントの意味検証
//!
//! パース後のブループリントを検査し、問題を全て集めて返します。
//! 最初のエラーで止まらないので、一度の実行で全ての問題を確認できます。

use crate::model::{
    Blueprint, BillingMode, Function, Policy, PolicyStatement, Principal, ResourceKind,
    ResourceRef, RestApi, Role, Table, Topic, UserPool, UserPoolClient,
};
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::LazyLock;

static ROLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w+=,.@-]{1,64}$").expect("valid regex"));
static TABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.-]{3,255}$").expect("valid regex"));
static TOPIC_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,256}$").expect("valid regex"));
static DOMAIN_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$").expect("valid regex"));
static CUSTOM_ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{1,20}$").expect("valid regex"));

/// 問題の重大度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// 検証で見つかった問題
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    /// 問題のあるリソースID（ネストは "UserPool/MyClient"）
    pub resource: String,
    pub message: String,
    pub severity: Severity,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {}: {}", level, self.resource, self.message)
    }
}

/// 検証結果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    fn error(&mut self, resource: impl Into<String>, message: impl Into<String>) {
        self.issues.push(Issue {
            resource: resource.into(),
            message: message.into(),
            severity: Severity::Error,
        });
    }

    fn warning(&mut self, resource: impl Into<String>, message: impl Into<String>) {
        self.issues.push(Issue {
            resource: resource.into(),
            message: message.into(),
            severity: Severity::Warning,
        });
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    pub fn is_valid(&self) -> bool {
        self.errors().next().is_none()
    }

    /// エラーがあれば `StackError::Invalid` に変換
    pub fn into_result(self) -> crate::Result<Self> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(crate::StackError::Invalid(self))
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for issue in &self.issues {
            writeln!(f, "  - {}", issue)?;
        }
        Ok(())
    }
}

/// ブループリントを検証
pub fn validate_blueprint(blueprint: &Blueprint) -> ValidationReport {
    let mut report = ValidationReport::default();

    if blueprint.resource_count() == 0 {
        report.warning(&blueprint.name, "stack declares no resources");
    }

    for (id, pool) in &blueprint.user_pools {
        check_user_pool(blueprint, id, pool, &mut report);
    }
    check_domain_prefixes(blueprint, &mut report);

    for (id, role) in &blueprint.roles {
        check_role(blueprint, id, role, &mut report);
    }
    for (id, policy) in &blueprint.policies {
        check_policy(blueprint, id, policy, &mut report);
    }
    for (id, function) in &blueprint.functions {
        check_function(blueprint, id, function, &mut report);
    }
    for (id, stream) in &blueprint.streams {
        if stream.shard_count == 0 {
            report.error(id, "shard-count must be at least 1");
        }
        if !(24..=8760).contains(&stream.retention_hours) {
            report.error(id, "retention-hours must be between 24 and 8760");
        }
    }
    for (id, api) in &blueprint.rest_apis {
        check_rest_api(blueprint, id, api, &mut report);
    }
    for (id, table) in &blueprint.tables {
        check_table(blueprint, id, table, &mut report);
    }
    for (id, topic) in &blueprint.topics {
        check_topic(blueprint, id, topic, &mut report);
    }

    check_physical_names(blueprint, &mut report);

    report
}

fn check_user_pool(blueprint: &Blueprint, id: &str, pool: &UserPool, report: &mut ValidationReport) {
    if let Some(name) = &pool.name
        && (name.is_empty() || name.len() > 128)
    {
        report.error(id, "name must be 1-128 characters");
    }

    let policy = &pool.password_policy;
    if !(6..=99).contains(&policy.min_length) {
        report.error(id, "password-policy min-length must be between 6 and 99");
    }
    if let Some(days) = policy.temp_password_validity_days
        && !(1..=365).contains(&days)
    {
        report.error(id, "temp-password-validity-days must be between 1 and 365");
    }

    for attr in &pool.standard_attributes {
        if !crate::model::STANDARD_ATTRIBUTES.contains(&attr.name.as_str()) {
            report.error(id, format!("unknown standard attribute '{}'", attr.name));
        }
    }
    let mut custom_names = HashSet::new();
    for attr in &pool.custom_attributes {
        if !CUSTOM_ATTRIBUTE.is_match(&attr.name) {
            report.error(
                id,
                format!("custom attribute '{}' must be 1-20 alphanumeric characters", attr.name),
            );
        }
        if !custom_names.insert(attr.name.as_str()) {
            report.error(id, format!("custom attribute '{}' declared twice", attr.name));
        }
    }

    for client in &pool.clients {
        check_client(id, client, report);
    }

    let mut group_names = HashSet::new();
    for group in &pool.groups {
        let path = format!("{}/{}", id, group.id);
        let name = group.name.as_deref().unwrap_or(&group.id);
        if !group_names.insert(name.to_string()) {
            report.error(&path, format!("group name '{}' is used twice in the pool", name));
        }
        if let Some(role) = &group.role {
            expect_kind(blueprint, &path, role, ResourceKind::Role, report);
        }
    }

    let nested: Vec<&str> = pool
        .clients
        .iter()
        .map(|c| c.id.as_str())
        .chain(pool.domains.iter().map(|d| d.id.as_str()))
        .chain(pool.groups.iter().map(|g| g.id.as_str()))
        .collect();
    let mut seen = HashSet::new();
    for child in nested {
        if !seen.insert(child) {
            report.error(id, format!("nested id '{}' is used twice", child));
        }
    }
}

fn check_client(pool_id: &str, client: &UserPoolClient, report: &mut ValidationReport) {
    let path = format!("{}/{}", pool_id, client.id);

    if client.auth_flows.is_empty() && client.oauth.is_none() {
        report.warning(&path, "client enables no auth flows");
    }

    let Some(oauth) = &client.oauth else {
        return;
    };
    let flows = &oauth.flows;
    if flows.client_credentials && (flows.authorization_code || flows.implicit) {
        report.error(
            &path,
            "client-credentials cannot be combined with authorization-code or implicit flows",
        );
    }
    if flows.client_credentials && !client.generate_secret {
        report.error(&path, "client-credentials flow requires generate-secret");
    }
    if flows.allowed_flows().is_empty() {
        report.error(&path, "oauth block enables no flows");
    }
    if oauth.scopes.is_empty() {
        report.error(&path, "oauth requires at least one scope");
    }
    if (flows.authorization_code || flows.implicit) && oauth.callback_urls.is_empty() {
        report.error(&path, "oauth code/implicit flows require a callback-url");
    }
    for url in oauth.callback_urls.iter().chain(&oauth.logout_urls) {
        let local = url.starts_with("http://localhost");
        if !(url.starts_with("https://") || local) {
            report.error(&path, format!("'{}' must use https (or http://localhost)", url));
        }
    }
}

fn check_domain_prefixes(blueprint: &Blueprint, report: &mut ValidationReport) {
    let mut seen: HashMap<&str, String> = HashMap::new();
    for (pool_id, pool) in &blueprint.user_pools {
        for domain in &pool.domains {
            let path = format!("{}/{}", pool_id, domain.id);
            let prefix = domain.prefix.as_str();
            if !DOMAIN_PREFIX.is_match(prefix) {
                report.error(
                    &path,
                    format!(
                        "domain prefix '{}' must be 1-63 lowercase letters, digits or hyphens",
                        prefix
                    ),
                );
            }
            if ["aws", "amazon", "cognito"]
                .iter()
                .any(|reserved| prefix.contains(reserved))
            {
                report.error(
                    &path,
                    format!("domain prefix '{}' contains a reserved word", prefix),
                );
            }
            if let Some(first) = seen.insert(prefix, path.clone()) {
                report.error(
                    &path,
                    format!("domain prefix '{}' is already used by {}", prefix, first),
                );
            }
        }
    }
}

fn check_role(blueprint: &Blueprint, id: &str, role: &Role, report: &mut ValidationReport) {
    if role.assumed_by.is_empty() {
        report.error(id, "role requires at least one assumed-by principal");
    }
    for principal in &role.assumed_by {
        if let Principal::FunctionRole(function_id) = principal {
            if !expect_kind(blueprint, id, function_id, ResourceKind::Function, report) {
                continue;
            }
            match blueprint.role_of_function(function_id) {
                Some(own) if own == id => report.error(
                    id,
                    format!(
                        "role cannot trust the session of '{}', which runs under this same role",
                        function_id
                    ),
                ),
                None => report.error(
                    id,
                    format!("trusted function '{}' has no execution role", function_id),
                ),
                _ => {}
            }
        }
    }
    for managed in &role.managed_policies {
        if managed.ends_with("FullAccess") || managed.ends_with("PowerUser") {
            report.warning(
                id,
                format!("managed policy '{}' grants broad access", managed),
            );
        }
    }
    for statement in &role.statements {
        check_statement(blueprint, id, statement, report);
    }
}

fn check_policy(blueprint: &Blueprint, id: &str, policy: &Policy, report: &mut ValidationReport) {
    if policy.attach_to.is_empty() {
        report.error(id, "policy must be attached to at least one role");
    }
    for role in &policy.attach_to {
        expect_kind(blueprint, id, role, ResourceKind::Role, report);
    }
    if policy.statements.is_empty() {
        report.error(id, "policy has no statements");
    }
    for statement in &policy.statements {
        check_statement(blueprint, id, statement, report);
    }
}

fn check_statement(
    blueprint: &Blueprint,
    owner: &str,
    statement: &PolicyStatement,
    report: &mut ValidationReport,
) {
    for action in &statement.actions {
        if action != "*" && !action.contains(':') {
            report.error(owner, format!("action '{}' must be service:Action", action));
        }
    }
    for resource in &statement.resources {
        match resource {
            ResourceRef::Literal(arn) if arn == "*" => {
                report.warning(
                    owner,
                    format!(
                        "statement allows {} on every resource",
                        statement.actions.join(", ")
                    ),
                );
            }
            ResourceRef::Literal(arn) => {
                if !arn.starts_with("arn:") {
                    report.error(owner, format!("resource '{}' is not an ARN", arn));
                }
            }
            ResourceRef::ArnOf(target) => match blueprint.kind_of(target) {
                None => report.error(owner, format!("unknown resource '{}'", target)),
                Some(ResourceKind::Policy) | Some(ResourceKind::RestApi) => report.error(
                    owner,
                    format!("resource '{}' has no ARN to reference", target),
                ),
                Some(_) => {}
            },
        }
    }
}

fn check_function(
    blueprint: &Blueprint,
    id: &str,
    function: &Function,
    report: &mut ValidationReport,
) {
    match &function.role {
        Some(role) => {
            expect_kind(blueprint, id, role, ResourceKind::Role, report);
        }
        None => report.error(id, "function requires an execution role"),
    }
    if function.code.as_os_str().is_empty() {
        report.error(id, "function requires a code directory");
    }
    if function.handler.is_empty() {
        report.error(id, "function requires a handler");
    }
    if !(128..=10240).contains(&function.memory_mb) {
        report.error(id, "memory must be between 128 and 10240 MB");
    }
    if !(1..=900).contains(&function.timeout_secs) {
        report.error(id, "timeout must be between 1 and 900 seconds");
    }
    for source in &function.event_sources {
        expect_kind(blueprint, id, &source.stream, ResourceKind::Stream, report);
        if !(1..=10000).contains(&source.batch_size) {
            report.error(id, "event-source batch-size must be between 1 and 10000");
        }
    }
}

fn check_rest_api(blueprint: &Blueprint, id: &str, api: &RestApi, report: &mut ValidationReport) {
    if api.methods.is_empty() {
        report.warning(id, "rest-api declares no methods");
    }
    for authorizer in &api.authorizers {
        let path = format!("{}/{}", id, authorizer.id);
        if authorizer.user_pools.is_empty() {
            report.error(&path, "authorizer requires at least one user-pool");
        }
        for pool in &authorizer.user_pools {
            expect_kind(blueprint, &path, pool, ResourceKind::UserPool, report);
        }
        if !authorizer.identity_source.starts_with("method.request.") {
            report.error(&path, "identity-source must be a method.request.* expression");
        }
    }

    let mut routes = HashSet::new();
    for method in &api.methods {
        let path = format!("{}/{} {}", id, method.http_method, method.path);
        if !routes.insert((method.http_method.as_str(), method.path.as_str())) {
            report.error(&path, "method declared twice");
        }
        expect_kind(blueprint, &path, &method.function, ResourceKind::Function, report);
        if let Some(authorizer) = &method.authorizer
            && api.authorizer(authorizer).is_none()
        {
            report.error(&path, format!("unknown authorizer '{}'", authorizer));
        }
        if method.authorizer.is_none() {
            report.warning(&path, "method is open to unauthenticated callers");
        }
    }
}

fn check_table(blueprint: &Blueprint, id: &str, table: &Table, report: &mut ValidationReport) {
    match &table.partition_key {
        Some(key) if key.name.is_empty() => report.error(id, "partition-key name is empty"),
        Some(_) => {}
        None => report.error(id, "table requires a partition-key"),
    }
    if let (Some(pk), Some(sk)) = (&table.partition_key, &table.sort_key)
        && pk.name == sk.name
    {
        report.error(id, "sort-key must differ from partition-key");
    }
    if let BillingMode::Provisioned { read, write } = table.billing_mode
        && (read == 0 || write == 0)
    {
        report.error(id, "provisioned capacity must be at least 1");
    }
    if let Some(stream) = &table.kinesis_stream {
        expect_kind(blueprint, id, stream, ResourceKind::Stream, report);
    }
}

fn check_topic(blueprint: &Blueprint, id: &str, topic: &Topic, report: &mut ValidationReport) {
    let mut seen = HashSet::new();
    for subscription in &topic.subscriptions {
        expect_kind(blueprint, id, &subscription.function, ResourceKind::Function, report);
        if !seen.insert(subscription.function.as_str()) {
            report.error(
                id,
                format!("function '{}' subscribed twice", subscription.function),
            );
        }
    }
}

/// プロバイダー上の名前の形式と重複
fn check_physical_names(blueprint: &Blueprint, report: &mut ValidationReport) {
    let mut role_names: HashMap<&str, &str> = HashMap::new();
    for (id, role) in &blueprint.roles {
        if let Some(name) = &role.name {
            if !ROLE_NAME.is_match(name) {
                report.error(id, format!("invalid role name '{}'", name));
            }
            if let Some(other) = role_names.insert(name, id) {
                report.error(id, format!("role name '{}' is also used by {}", name, other));
            }
        }
    }

    let mut table_names: HashMap<&str, &str> = HashMap::new();
    for (id, table) in &blueprint.tables {
        if let Some(name) = &table.name {
            if !TABLE_NAME.is_match(name) {
                report.error(id, format!("invalid table name '{}'", name));
            }
            if let Some(other) = table_names.insert(name, id) {
                report.error(id, format!("table name '{}' is also used by {}", name, other));
            }
        }
    }

    for (id, topic) in &blueprint.topics {
        if let Some(name) = &topic.name
            && !TOPIC_NAME.is_match(name)
        {
            report.error(id, format!("invalid topic name '{}'", name));
        }
    }
}

/// 参照先が期待する種類のリソースか確認
fn expect_kind(
    blueprint: &Blueprint,
    owner: &str,
    target: &str,
    expected: ResourceKind,
    report: &mut ValidationReport,
) -> bool {
    match blueprint.kind_of(target) {
        Some(kind) if kind == expected => true,
        Some(kind) => {
            report.error(
                owner,
                format!("'{}' is a {}, expected a {}", target, kind, expected),
            );
            false
        }
        None => {
            report.error(owner, format!("unknown {} '{}'", expected, target));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_kdl_string;

    fn report_for(kdl: &str) -> ValidationReport {
        let blueprint = parse_kdl_string(kdl, "test".to_string()).unwrap();
        validate_blueprint(&blueprint)
    }

    fn has_error(report: &ValidationReport, needle: &str) -> bool {
        report.errors().any(|i| i.message.contains(needle))
    }

    #[test]
    fn test_dangling_references_are_all_reported() {
        let report = report_for(
            r#"
function "Fn" {
    code "src"
    role "MissingRole"
    event-source stream="MissingStream"
}
table "T" {
    partition-key "pk"
    kinesis-stream "MissingStream"
}
"#,
        );
        assert!(!report.is_valid());
        assert!(has_error(&report, "unknown role 'MissingRole'"));
        assert_eq!(
            report
                .errors()
                .filter(|i| i.message.contains("MissingStream"))
                .count(),
            2
        );
    }

    #[test]
    fn test_wrong_reference_kind() {
        let report = report_for(
            r#"
stream "S"
function "Fn" {
    code "src"
    role "S"
}
"#,
        );
        assert!(has_error(&report, "'S' is a stream, expected a role"));
    }

    #[test]
    fn test_password_policy_bounds() {
        let report = report_for(
            r#"
user-pool "P" {
    password-policy min-length=4
}
"#,
        );
        assert!(has_error(&report, "between 6 and 99"));
    }

    #[test]
    fn test_batch_size_bounds() {
        let report = report_for(
            r#"
role "R" { assumed-by service="lambda.amazonaws.com"; }
stream "S"
function "Fn" {
    code "src"
    role "R"
    event-source stream="S" batch-size=20000
}
"#,
        );
        assert!(has_error(&report, "batch-size"));
    }

    #[test]
    fn test_domain_prefix_rules() {
        let report = report_for(
            r#"
user-pool "A" {
    domain "D" prefix="My_Domain"
}
user-pool "B" {
    domain "D" prefix="my-cognito"
}
user-pool "C" {
    domain "D" prefix="shared"
}
user-pool "E" {
    domain "D" prefix="shared"
}
"#,
        );
        assert!(has_error(&report, "must be 1-63"));
        assert!(has_error(&report, "reserved word"));
        assert!(has_error(&report, "already used by C/D"));
    }

    #[test]
    fn test_oauth_rules() {
        let report = report_for(
            r#"
user-pool "P" {
    client "C" {
        oauth {
            flows "implicit" "client-credentials"
        }
    }
}
"#,
        );
        assert!(has_error(&report, "cannot be combined"));
        assert!(has_error(&report, "requires generate-secret"));
        assert!(has_error(&report, "at least one scope"));
        assert!(has_error(&report, "callback-url"));
    }

    #[test]
    fn test_self_trusting_role_is_rejected() {
        let report = report_for(
            r#"
role "R" {
    assumed-by function-role="Fn"
}
function "Fn" {
    code "src"
    role "R"
}
"#,
        );
        assert!(has_error(&report, "runs under this same role"));
    }

    #[test]
    fn test_broad_grants_are_warnings_only() {
        let report = report_for(
            r#"
role "R" {
    assumed-by service="lambda.amazonaws.com"
    managed-policy "IAMFullAccess"
    statement {
        actions "sns:Publish"
        resources "*"
    }
}
"#,
        );
        assert!(report.is_valid());
        assert_eq!(report.warnings().count(), 2);
    }

    #[test]
    fn test_table_requires_partition_key() {
        let report = report_for(r#"table "T" { name "customer-table"; }"#);
        assert!(has_error(&report, "requires a partition-key"));
    }

    #[test]
    fn test_duplicate_role_names() {
        let report = report_for(
            r#"
role "A" {
    name "AppAdmin"
    assumed-by service="lambda.amazonaws.com"
}
role "B" {
    name "AppAdmin"
    assumed-by service="lambda.amazonaws.com"
}
"#,
        );
        assert!(has_error(&report, "role name 'AppAdmin' is also used by A"));
    }

    #[test]
    fn test_into_result() {
        let report = report_for(r#"table "T" { }"#);
        let err = report.into_result().unwrap_err();
        assert!(err.to_string().contains("partition-key"));
    }
}
