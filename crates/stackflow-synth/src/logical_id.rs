//! 論理ID
//!
//! ブループリントのID（`create-customer-api`, `createCustomerLambdaRole` など）を
//! CloudFormation の論理ID（英数字のみ）に変換します。

/// ID を英数字以外で区切り、各区切りの先頭を大文字にして連結
///
/// `create-customer-api` → `CreateCustomerApi`
pub fn logical_id(id: &str) -> String {
    id.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|segment| !segment.is_empty())
        .map(capitalize)
        .collect()
}

/// 親リソースの論理IDを前置したネストID
pub fn nested_logical_id(parent: &str, child: &str) -> String {
    format!("{}{}", logical_id(parent), logical_id(child))
}

fn capitalize(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_id() {
        assert_eq!(logical_id("create-customer-api"), "CreateCustomerApi");
        assert_eq!(logical_id("createCustomerLambdaRole"), "CreateCustomerLambdaRole");
        assert_eq!(logical_id("UserPool"), "UserPool");
        assert_eq!(logical_id("customer_table.v2"), "CustomerTableV2");
    }

    #[test]
    fn test_nested_logical_id() {
        assert_eq!(
            nested_logical_id("create-customer-api", "create-customer-auth"),
            "CreateCustomerApiCreateCustomerAuth"
        );
        assert_eq!(nested_logical_id("UserPool", "MyClient"), "UserPoolMyClient");
    }
}
