//! Handlers for the customer onboarding functions
//!
//! `POST /` assumes the elevated role and stores the customer. Every change
//! record on the table's feed is announced on the `CustomerCreated` topic
//! with its `eventName`. The provisioning function creates the customer's
//! administrator, or refreshes its attributes when it already exists.
//! Removals are announced but leave the administrator in place.

use crate::error::SandboxError;
use crate::function::InvocationContext;
use crate::sandbox::Sandbox;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tracing::debug;

pub const CUSTOMER_TABLE: &str = "customer-table";
pub const CUSTOMER_CREATED_TOPIC: &str = "CustomerCreated";
pub const USER_POOL_NAME: &str = "MyUserPool";
pub const ADMIN_GROUP: &str = "AppAdmin";
/// Role assumed by the create function
pub const ADMIN_ROLE: &str = "AppAdmin";

type HandlerResult = std::result::Result<Value, String>;

/// Register handlers under the functions' logical ids
pub fn register_onboarding_handlers(sandbox: &mut Sandbox) {
    sandbox.register_handler("CreateCustomerLambda", create_customer);
    sandbox.register_handler("ListenDynamoDBStream", listen_table_stream);
    sandbox.register_handler("ProvisionCustomer", provision_customer);
}

fn response(status: u16, body: Value) -> Value {
    json!({
        "statusCode": status,
        "headers": { "Content-Type": "application/json" },
        "body": body.to_string(),
    })
}

/// API proxy handler: stores the customer from the request body
pub fn create_customer(ctx: &mut InvocationContext<'_>, event: Value) -> HandlerResult {
    let body: Value = match event.get("body").and_then(Value::as_str) {
        Some(raw) => match serde_json::from_str(raw) {
            Ok(body) => body,
            Err(e) => return Ok(response(400, json!({ "message": e.to_string() }))),
        },
        None => Value::Null,
    };
    let Some(customer_name) = body.get("customerName").and_then(Value::as_str) else {
        return Ok(response(400, json!({ "message": "customerName is required" })));
    };

    let mut item = match body.as_object() {
        Some(fields) => fields.clone(),
        None => serde_json::Map::new(),
    };
    if let Some(caller) = event.pointer("/requestContext/authorizer/claims/cognito:username") {
        item.insert("createdBy".to_string(), caller.clone());
    }

    // The elevated role trusts only this function's session; nothing is stored without it
    let role_arn = ctx
        .role_arn(ADMIN_ROLE)
        .ok_or_else(|| format!("Role not found: {}", ADMIN_ROLE))?;
    let session_name = ctx.function_name().to_string();
    let admin = ctx
        .assume_role(&role_arn, &session_name)
        .map_err(|e| e.to_string())?;
    debug!(session = %admin.arn, "Assumed elevated role");

    ctx.put_item(CUSTOMER_TABLE, Value::Object(item))
        .map_err(|e| e.to_string())?;

    Ok(response(
        200,
        json!({ "customerName": customer_name, "status": "CREATED" }),
    ))
}

fn subject(event_name: &str) -> &'static str {
    match event_name {
        "INSERT" => "Customer created",
        "REMOVE" => "Customer removed",
        _ => "Customer updated",
    }
}

/// Stream consumer: announces every change record
pub fn listen_table_stream(ctx: &mut InvocationContext<'_>, event: Value) -> HandlerResult {
    let topic_arn = ctx
        .topic_arn(CUSTOMER_CREATED_TOPIC)
        .ok_or_else(|| format!("Topic not found: {}", CUSTOMER_CREATED_TOPIC))?;
    let records = event
        .get("Records")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut published = 0;
    for record in &records {
        let data = record
            .pointer("/kinesis/data")
            .and_then(Value::as_str)
            .ok_or("record without data")?;
        let bytes = STANDARD.decode(data).map_err(|e| e.to_string())?;
        let change: Value = serde_json::from_slice(&bytes).map_err(|e| e.to_string())?;
        let event_name = change
            .get("eventName")
            .and_then(Value::as_str)
            .ok_or("record without eventName")?;
        let image = match event_name {
            "REMOVE" => change.pointer("/dynamodb/OldImage"),
            _ => change.pointer("/dynamodb/NewImage"),
        };
        let Some(image) = image else {
            debug!(event_name, "Change record without image");
            continue;
        };
        let message = json!({ "eventName": event_name, "customer": image });
        ctx.publish(&topic_arn, Some(subject(event_name)), &message.to_string())
            .map_err(|e| e.to_string())?;
        published += 1;
    }
    Ok(json!({ "records": records.len(), "published": published }))
}

/// Topic subscriber: creates the customer's administrator
pub fn provision_customer(ctx: &mut InvocationContext<'_>, event: Value) -> HandlerResult {
    let pool_id = ctx
        .user_pool_id(USER_POOL_NAME)
        .ok_or_else(|| format!("User pool not found: {}", USER_POOL_NAME))?;
    let records = event
        .get("Records")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut provisioned = Vec::new();
    for record in &records {
        let message = record
            .pointer("/Sns/Message")
            .and_then(Value::as_str)
            .ok_or("record without message")?;
        let message: Value = serde_json::from_str(message).map_err(|e| e.to_string())?;
        let event_name = message
            .get("eventName")
            .and_then(Value::as_str)
            .unwrap_or("INSERT");
        let customer = message.get("customer").unwrap_or(&message);
        let name = customer
            .get("customerName")
            .and_then(Value::as_str)
            .ok_or("customerName missing from message")?;
        if event_name == "REMOVE" {
            debug!(customer = name, "Customer removed, administrator kept");
            continue;
        }
        let field = |key: &str| customer.get(key).and_then(Value::as_str).unwrap_or(name);

        let username = format!("{}-admin", name);
        let mut attributes = vec![
            ("given_name", field("givenName")),
            ("family_name", field("familyName")),
            ("custom:customer", name),
        ];
        if let Some(email) = customer.get("email").and_then(Value::as_str) {
            attributes.push(("email", email));
        }
        if let Some(region) = customer.get("region").and_then(Value::as_str) {
            attributes.push(("custom:region", region));
        }
        match ctx.admin_create_user(&pool_id, &username, &attributes) {
            Ok(_) => {}
            Err(SandboxError::UsernameExists(_)) => {
                debug!(user = %username, event_name, "Administrator exists, updating attributes");
                ctx.admin_update_user_attributes(&pool_id, &username, &attributes)
                    .map_err(|e| e.to_string())?;
            }
            Err(e) => return Err(e.to_string()),
        }
        ctx.admin_add_user_to_group(&pool_id, &username, ADMIN_GROUP)
            .map_err(|e| e.to_string())?;
        provisioned.push(username);
    }
    Ok(json!({ "provisioned": provisioned }))
}
