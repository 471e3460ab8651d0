//! ID プール（ユーザーディレクトリ）定義

use super::removal::RemovalPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cognito の標準属性名
pub const STANDARD_ATTRIBUTES: &[&str] = &[
    "address",
    "birthdate",
    "email",
    "family_name",
    "gender",
    "given_name",
    "locale",
    "middle_name",
    "name",
    "nickname",
    "phone_number",
    "picture",
    "preferred_username",
    "profile",
    "updated_at",
    "website",
    "zoneinfo",
];

/// ユーザープール
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPool {
    /// プロバイダー上のプール名
    #[serde(default)]
    pub name: Option<String>,
    /// セルフサインアップを許可するか
    #[serde(default)]
    pub self_sign_up: bool,
    #[serde(default)]
    pub sign_in_aliases: Vec<SignInAlias>,
    /// 自動検証する属性
    #[serde(default)]
    pub auto_verify: Vec<VerifiableAttribute>,
    #[serde(default)]
    pub standard_attributes: Vec<StandardAttribute>,
    #[serde(default)]
    pub custom_attributes: Vec<CustomAttribute>,
    #[serde(default)]
    pub password_policy: PasswordPolicy,
    #[serde(default)]
    pub account_recovery: AccountRecovery,
    #[serde(default)]
    pub removal_policy: RemovalPolicy,
    #[serde(default)]
    pub clients: Vec<UserPoolClient>,
    #[serde(default)]
    pub domains: Vec<UserPoolDomain>,
    #[serde(default)]
    pub groups: Vec<UserPoolGroup>,
}

impl UserPool {
    /// サインアップ時に必須となる属性名（custom: プレフィックスなし）
    pub fn required_attributes(&self) -> Vec<&str> {
        self.standard_attributes
            .iter()
            .filter(|a| a.required)
            .map(|a| a.name.as_str())
            .collect()
    }

    pub fn client(&self, id: &str) -> Option<&UserPoolClient> {
        self.clients.iter().find(|c| c.id == id)
    }

    pub fn group(&self, id: &str) -> Option<&UserPoolGroup> {
        self.groups.iter().find(|g| g.id == id)
    }
}

/// サインインに使える識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignInAlias {
    Username,
    Email,
    Phone,
    PreferredUsername,
}

impl FromStr for SignInAlias {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "username" => Ok(SignInAlias::Username),
            "email" => Ok(SignInAlias::Email),
            "phone" => Ok(SignInAlias::Phone),
            "preferred-username" | "preferred_username" => Ok(SignInAlias::PreferredUsername),
            other => Err(format!("unknown sign-in alias: {}", other)),
        }
    }
}

impl SignInAlias {
    /// AliasAttributes / UsernameAttributes に載る属性名
    pub fn attribute_name(&self) -> Option<&'static str> {
        match self {
            SignInAlias::Username => None,
            SignInAlias::Email => Some("email"),
            SignInAlias::Phone => Some("phone_number"),
            SignInAlias::PreferredUsername => Some("preferred_username"),
        }
    }
}

/// 自動検証できる属性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifiableAttribute {
    Email,
    Phone,
}

impl VerifiableAttribute {
    pub fn attribute_name(&self) -> &'static str {
        match self {
            VerifiableAttribute::Email => "email",
            VerifiableAttribute::Phone => "phone_number",
        }
    }
}

impl FromStr for VerifiableAttribute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(VerifiableAttribute::Email),
            "phone" | "phone_number" => Ok(VerifiableAttribute::Phone),
            other => Err(format!("unknown verifiable attribute: {}", other)),
        }
    }
}

/// 標準属性の設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardAttribute {
    /// snake_case の属性名（given_name など）
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_true")]
    pub mutable: bool,
}

/// カスタム属性の設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomAttribute {
    pub name: String,
    #[serde(default)]
    pub data_type: AttributeDataType,
    #[serde(default)]
    pub mutable: bool,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub max_length: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AttributeDataType {
    #[default]
    String,
    Number,
    Boolean,
    DateTime,
}

impl AttributeDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeDataType::String => "String",
            AttributeDataType::Number => "Number",
            AttributeDataType::Boolean => "Boolean",
            AttributeDataType::DateTime => "DateTime",
        }
    }
}

impl FromStr for AttributeDataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "string" => Ok(AttributeDataType::String),
            "number" => Ok(AttributeDataType::Number),
            "boolean" => Ok(AttributeDataType::Boolean),
            "datetime" | "date-time" => Ok(AttributeDataType::DateTime),
            other => Err(format!("unknown attribute type: {}", other)),
        }
    }
}

/// パスワードポリシー
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordPolicy {
    pub min_length: u32,
    pub require_lowercase: bool,
    pub require_uppercase: bool,
    pub require_digits: bool,
    pub require_symbols: bool,
    #[serde(default)]
    pub temp_password_validity_days: Option<u32>,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_lowercase: true,
            require_uppercase: true,
            require_digits: true,
            require_symbols: true,
            temp_password_validity_days: None,
        }
    }
}

/// パスワードポリシー違反
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordViolation {
    TooShort(u32),
    MissingLowercase,
    MissingUppercase,
    MissingDigit,
    MissingSymbol,
}

impl fmt::Display for PasswordViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PasswordViolation::TooShort(min) => {
                write!(f, "password must be at least {} characters", min)
            }
            PasswordViolation::MissingLowercase => write!(f, "password must contain a lowercase letter"),
            PasswordViolation::MissingUppercase => write!(f, "password must contain an uppercase letter"),
            PasswordViolation::MissingDigit => write!(f, "password must contain a digit"),
            PasswordViolation::MissingSymbol => write!(f, "password must contain a symbol"),
        }
    }
}

impl PasswordPolicy {
    /// パスワードを検査し、違反をすべて返す
    pub fn check(&self, password: &str) -> Vec<PasswordViolation> {
        let mut violations = Vec::new();

        if (password.chars().count() as u32) < self.min_length {
            violations.push(PasswordViolation::TooShort(self.min_length));
        }
        if self.require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
            violations.push(PasswordViolation::MissingLowercase);
        }
        if self.require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            violations.push(PasswordViolation::MissingUppercase);
        }
        if self.require_digits && !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push(PasswordViolation::MissingDigit);
        }
        // Cognito の記号は ASCII の記号とスペース
        if self.require_symbols
            && !password
                .chars()
                .any(|c| c.is_ascii_punctuation() || c == ' ')
        {
            violations.push(PasswordViolation::MissingSymbol);
        }

        violations
    }
}

/// アカウント復旧手段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountRecovery {
    EmailOnly,
    #[default]
    PhoneWithoutMfaAndEmail,
    EmailAndPhoneWithoutMfa,
    PhoneAndEmail,
    PhoneOnlyWithoutMfa,
    None,
}

impl AccountRecovery {
    /// RecoveryMechanisms（名前, 優先度）
    pub fn mechanisms(&self) -> Vec<(&'static str, u32)> {
        match self {
            AccountRecovery::EmailOnly => vec![("verified_email", 1)],
            AccountRecovery::PhoneWithoutMfaAndEmail => {
                vec![("verified_phone_number", 1), ("verified_email", 2)]
            }
            AccountRecovery::EmailAndPhoneWithoutMfa => {
                vec![("verified_email", 1), ("verified_phone_number", 2)]
            }
            AccountRecovery::PhoneAndEmail => vec![],
            AccountRecovery::PhoneOnlyWithoutMfa => vec![("verified_phone_number", 1)],
            AccountRecovery::None => vec![("admin_only", 1)],
        }
    }
}

impl FromStr for AccountRecovery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email-only" => Ok(AccountRecovery::EmailOnly),
            "phone-without-mfa-and-email" => Ok(AccountRecovery::PhoneWithoutMfaAndEmail),
            "email-and-phone-without-mfa" => Ok(AccountRecovery::EmailAndPhoneWithoutMfa),
            "phone-and-email" => Ok(AccountRecovery::PhoneAndEmail),
            "phone-only-without-mfa" => Ok(AccountRecovery::PhoneOnlyWithoutMfa),
            "none" => Ok(AccountRecovery::None),
            other => Err(format!("unknown account recovery: {}", other)),
        }
    }
}

/// アプリクライアント
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPoolClient {
    /// ブループリント内の ID
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub generate_secret: bool,
    #[serde(default)]
    pub auth_flows: AuthFlows,
    #[serde(default)]
    pub oauth: Option<OAuthSettings>,
}

/// 有効な認証フロー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthFlows {
    pub user_password: bool,
    pub admin_user_password: bool,
    pub custom: bool,
    pub user_srp: bool,
}

impl AuthFlows {
    /// ExplicitAuthFlows の値（リフレッシュトークンは常に許可）
    pub fn explicit_flows(&self) -> Vec<&'static str> {
        let mut flows = Vec::new();
        if self.user_password {
            flows.push("ALLOW_USER_PASSWORD_AUTH");
        }
        if self.admin_user_password {
            flows.push("ALLOW_ADMIN_USER_PASSWORD_AUTH");
        }
        if self.custom {
            flows.push("ALLOW_CUSTOM_AUTH");
        }
        if self.user_srp {
            flows.push("ALLOW_USER_SRP_AUTH");
        }
        if !flows.is_empty() {
            flows.push("ALLOW_REFRESH_TOKEN_AUTH");
        }
        flows
    }

    pub fn is_empty(&self) -> bool {
        !(self.user_password || self.admin_user_password || self.custom || self.user_srp)
    }
}

/// OAuth 設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthSettings {
    #[serde(default)]
    pub flows: OAuthFlows,
    #[serde(default)]
    pub scopes: Vec<OAuthScope>,
    #[serde(default)]
    pub callback_urls: Vec<String>,
    #[serde(default)]
    pub logout_urls: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OAuthFlows {
    pub authorization_code: bool,
    pub implicit: bool,
    pub client_credentials: bool,
}

impl OAuthFlows {
    /// AllowedOAuthFlows の値
    pub fn allowed_flows(&self) -> Vec<&'static str> {
        let mut flows = Vec::new();
        if self.client_credentials {
            flows.push("client_credentials");
        }
        if self.implicit {
            flows.push("implicit");
        }
        if self.authorization_code {
            flows.push("code");
        }
        flows
    }
}

/// OAuth スコープ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OAuthScope {
    Phone,
    Email,
    OpenId,
    Profile,
    CognitoAdmin,
    Custom(String),
}

impl OAuthScope {
    pub fn as_str(&self) -> &str {
        match self {
            OAuthScope::Phone => "phone",
            OAuthScope::Email => "email",
            OAuthScope::OpenId => "openid",
            OAuthScope::Profile => "profile",
            OAuthScope::CognitoAdmin => "aws.cognito.signin.user.admin",
            OAuthScope::Custom(scope) => scope,
        }
    }
}

impl FromStr for OAuthScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "phone" => OAuthScope::Phone,
            "email" => OAuthScope::Email,
            "openid" => OAuthScope::OpenId,
            "profile" => OAuthScope::Profile,
            "cognito-admin" | "aws.cognito.signin.user.admin" => OAuthScope::CognitoAdmin,
            other if other.contains('/') => OAuthScope::Custom(other.to_string()),
            other => return Err(format!("unknown OAuth scope: {}", other)),
        })
    }
}

/// ホストされたログインドメイン
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPoolDomain {
    pub id: String,
    /// ドメインプレフィックス（<prefix>.auth.<region>.amazoncognito.com）
    pub prefix: String,
}

/// プール内のグループ
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPoolGroup {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// メンバーに割り当てるロールのID
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub precedence: Option<u32>,
}

fn default_true() -> bool {
    true
}
