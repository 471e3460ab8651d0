//! ブループリントのデータモデル

mod api;
mod compute;
mod data;
mod iam;
mod identity;
mod removal;
mod stack;

pub use api::*;
pub use compute::*;
pub use data::*;
pub use iam::*;
pub use identity::*;
pub use removal::*;
pub use stack::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_of_and_count() {
        let mut blueprint = Blueprint::new("Demo");
        blueprint
            .tables
            .insert("CustomerTable".to_string(), Table::default());
        blueprint.functions.insert(
            "CreateCustomerLambda".to_string(),
            Function {
                role: Some("CreateCustomerRole".to_string()),
                ..Default::default()
            },
        );

        assert_eq!(blueprint.kind_of("CustomerTable"), Some(ResourceKind::Table));
        assert_eq!(
            blueprint.kind_of("CreateCustomerLambda"),
            Some(ResourceKind::Function)
        );
        assert_eq!(blueprint.kind_of("Missing"), None);
        assert_eq!(blueprint.resource_count(), 2);
        assert_eq!(
            blueprint.role_of_function("CreateCustomerLambda"),
            Some("CreateCustomerRole")
        );
    }

    #[test]
    fn test_resource_ids_are_grouped_by_kind() {
        let mut blueprint = Blueprint::new("Demo");
        blueprint.topics.insert("B".to_string(), Topic::default());
        blueprint.user_pools.insert("A".to_string(), UserPool::default());

        let ids = blueprint.resource_ids();
        assert_eq!(ids[0], ("A", ResourceKind::UserPool));
        assert_eq!(ids[1], ("B", ResourceKind::Topic));
    }

    #[test]
    fn test_blueprint_serializes_to_json() {
        let mut blueprint = Blueprint::new("Demo");
        blueprint.tables.insert(
            "CustomerTable".to_string(),
            Table {
                partition_key: Some(KeyAttribute::string("customerName")),
                removal_policy: RemovalPolicy::Destroy,
                ..Default::default()
            },
        );
        let json = serde_json::to_value(&blueprint).unwrap();
        assert_eq!(json["tables"]["CustomerTable"]["removal_policy"], "destroy");
    }
}
