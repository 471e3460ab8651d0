//! Topics and subscriptions
//!
//! Publishing enqueues one delivery per subscription. Deliveries are drained
//! by [`Sandbox::run_until_idle`]; a delivery that cannot invoke its function
//! is recorded as a failure and not retried.

use crate::error::{Result, SandboxError};
use crate::function::Trigger;
use crate::props::{function_name_of, str_prop};
use crate::sandbox::{PhysicalResource, Sandbox};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const SNS_PRINCIPAL: &str = "sns.amazonaws.com";

#[derive(Debug, Clone)]
pub struct Subscription {
    pub arn: String,
    pub topic_arn: String,
    pub protocol: String,
    pub endpoint: String,
}

#[derive(Debug, Clone)]
pub struct Topic {
    pub name: String,
    pub arn: String,
    pub display_name: Option<String>,
    pub subscriptions: BTreeMap<String, Subscription>,
}

/// A message accepted by a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedMessage {
    pub message_id: String,
    pub topic_arn: String,
    pub subject: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// One pending delivery of a message to one subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message: PublishedMessage,
    pub subscription: String,
    pub protocol: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub delivery: Delivery,
    pub reason: String,
}

impl Sandbox {
    pub(crate) fn create_topic(
        &mut self,
        stack_name: &str,
        logical_id: &str,
        props: &Value,
    ) -> Result<PhysicalResource> {
        let name = match str_prop(props, "TopicName") {
            Some(name) => name.to_string(),
            None => self.generate_name(stack_name, logical_id, 256),
        };
        let arn = format!("arn:aws:sns:{}:{}:{}", self.region, self.account_id, name);
        if self.topics.contains_key(&arn) {
            return Err(SandboxError::AlreadyExists(format!("topic {}", name)));
        }

        self.topics.insert(
            arn.clone(),
            Topic {
                name: name.clone(),
                arn: arn.clone(),
                display_name: str_prop(props, "DisplayName").map(String::from),
                subscriptions: BTreeMap::new(),
            },
        );
        info!(topic = %name, "Topic created");
        // Ref of a topic is its ARN
        Ok(PhysicalResource::new("AWS::SNS::Topic", arn.clone())
            .with_attribute("TopicArn", json!(arn))
            .with_attribute("TopicName", json!(name)))
    }

    pub(crate) fn create_subscription(&mut self, logical_id: &str, props: &Value) -> Result<PhysicalResource> {
        let topic_arn = str_prop(props, "TopicArn")
            .ok_or_else(|| SandboxError::invalid(logical_id, "TopicArn is required"))?
            .to_string();
        let protocol = str_prop(props, "Protocol")
            .ok_or_else(|| SandboxError::invalid(logical_id, "Protocol is required"))?
            .to_string();
        let endpoint = str_prop(props, "Endpoint").unwrap_or_default().to_string();
        let topic = self
            .topics
            .get_mut(&topic_arn)
            .ok_or_else(|| SandboxError::not_found("Topic", topic_arn.as_str()))?;

        let arn = format!("{}:{}", topic_arn, Uuid::new_v4());
        topic.subscriptions.insert(
            arn.clone(),
            Subscription {
                arn: arn.clone(),
                topic_arn: topic_arn.clone(),
                protocol,
                endpoint,
            },
        );
        Ok(PhysicalResource::new("AWS::SNS::Subscription", arn).with_parent(topic_arn))
    }

    pub(crate) fn delete_topic_resource(&mut self, resource: &PhysicalResource) {
        match resource.resource_type.as_str() {
            "AWS::SNS::Topic" => {
                self.topics.remove(&resource.physical_id);
            }
            "AWS::SNS::Subscription" => {
                if let Some(topic) = resource
                    .parent
                    .as_deref()
                    .and_then(|arn| self.topics.get_mut(arn))
                {
                    topic.subscriptions.remove(&resource.physical_id);
                }
            }
            _ => {}
        }
    }

    pub fn topic(&self, arn: &str) -> Option<&Topic> {
        self.topics.get(arn)
    }

    /// Topic ARN by topic name
    pub fn topic_arn(&self, name: &str) -> Option<String> {
        self.topics
            .values()
            .find(|t| t.name == name)
            .map(|t| t.arn.clone())
    }

    /// Accept a message and enqueue a delivery per subscription
    pub fn publish(&mut self, topic_arn: &str, subject: Option<&str>, message: &str) -> Result<String> {
        let now = self.now();
        let topic = self
            .topics
            .get(topic_arn)
            .ok_or_else(|| SandboxError::not_found("Topic", topic_arn))?;

        let published = PublishedMessage {
            message_id: Uuid::new_v4().to_string(),
            topic_arn: topic_arn.to_string(),
            subject: subject.map(String::from),
            message: message.to_string(),
            timestamp: now,
        };
        for subscription in topic.subscriptions.values() {
            self.deliveries.push_back(Delivery {
                message: published.clone(),
                subscription: subscription.arn.clone(),
                protocol: subscription.protocol.clone(),
                endpoint: subscription.endpoint.clone(),
            });
        }
        debug!(topic = %topic_arn, subscriptions = topic.subscriptions.len(), "Message published");
        let message_id = published.message_id.clone();
        self.published.push(published);
        Ok(message_id)
    }

    /// Every message accepted so far
    pub fn published_messages(&self) -> &[PublishedMessage] {
        &self.published
    }

    pub fn delivery_failures(&self) -> &[DeliveryFailure] {
        &self.delivery_failures
    }

    /// Process every queued delivery; returns how many were processed
    pub fn drain_deliveries(&mut self) -> usize {
        let mut processed = 0;
        while let Some(delivery) = self.deliveries.pop_front() {
            processed += 1;
            if let Err(reason) = self.deliver(&delivery) {
                warn!(subscription = %delivery.subscription, reason = %reason, "Delivery failed");
                self.delivery_failures.push(DeliveryFailure { delivery, reason });
            }
        }
        processed
    }

    fn deliver(&mut self, delivery: &Delivery) -> std::result::Result<(), String> {
        if delivery.protocol != "lambda" {
            return Err(format!("protocol {} is not delivered", delivery.protocol));
        }
        let function_name = function_name_of(&delivery.endpoint).to_string();
        if !self.functions.contains_key(&function_name) {
            return Err(format!("Function not found: {}", function_name));
        }
        let message = &delivery.message;
        if !self.permits_invoke(&function_name, SNS_PRINCIPAL, &message.topic_arn) {
            return Err(format!(
                "{} is not allowed to invoke {}",
                SNS_PRINCIPAL, function_name
            ));
        }

        let event = json!({
            "Records": [{
                "EventSource": "aws:sns",
                "EventVersion": "1.0",
                "EventSubscriptionArn": delivery.subscription,
                "Sns": {
                    "Type": "Notification",
                    "MessageId": message.message_id,
                    "TopicArn": message.topic_arn,
                    "Subject": message.subject,
                    "Message": message.message,
                    "Timestamp": message.timestamp.to_rfc3339(),
                    "SignatureVersion": "1",
                    "MessageAttributes": {},
                }
            }]
        });
        let trigger = Trigger::Topic {
            topic_arn: message.topic_arn.clone(),
            message_id: message.message_id.clone(),
        };
        self.invoke_function(&function_name, event, trigger)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::InvocationContext;

    fn sandbox(with_permission: bool) -> (Sandbox, String) {
        let mut sandbox = Sandbox::default();
        sandbox
            .create_role("Test", "Role", &json!({ "RoleName": "provision" }))
            .unwrap();
        let function = sandbox
            .create_function(
                "Test",
                "Provision",
                &json!({ "FunctionName": "provision", "Role": "arn:aws:iam::123456789012:role/provision" }),
            )
            .unwrap();
        let topic = sandbox
            .create_topic("Test", "Topic", &json!({ "TopicName": "CustomerCreated" }))
            .unwrap();
        sandbox
            .create_subscription(
                "Sub",
                &json!({
                    "TopicArn": topic.physical_id,
                    "Protocol": "lambda",
                    "Endpoint": function.attributes["Arn"]
                }),
            )
            .unwrap();
        if with_permission {
            sandbox
                .create_permission(
                    "Test",
                    "Perm",
                    &json!({
                        "FunctionName": "provision",
                        "Principal": SNS_PRINCIPAL,
                        "SourceArn": topic.physical_id
                    }),
                )
                .unwrap();
        }
        sandbox.register_handler("provision", |_: &mut InvocationContext<'_>, event: Value| {
            Ok(event["Records"][0]["Sns"]["Message"].clone())
        });
        (sandbox, topic.physical_id)
    }

    #[test]
    fn test_publish_invokes_subscriber_once() {
        let (mut sandbox, topic) = sandbox(true);
        assert_eq!(sandbox.topic_arn("CustomerCreated"), Some(topic.clone()));

        sandbox.publish(&topic, None, "acme").unwrap();
        assert_eq!(sandbox.drain_deliveries(), 1);
        assert_eq!(sandbox.drain_deliveries(), 0);

        let invocations = sandbox.invocations_of("provision");
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].result, Ok(json!("acme")));
        assert_eq!(sandbox.published_messages().len(), 1);
        assert!(sandbox.delivery_failures().is_empty());
    }

    #[test]
    fn test_delivery_without_permission_fails_once() {
        let (mut sandbox, topic) = sandbox(false);
        sandbox.publish(&topic, Some("created"), "acme").unwrap();
        assert_eq!(sandbox.drain_deliveries(), 1);
        assert!(sandbox.invocations().is_empty());
        assert_eq!(sandbox.delivery_failures().len(), 1);
        assert!(sandbox.delivery_failures()[0].reason.contains("not allowed"));
        assert_eq!(sandbox.drain_deliveries(), 0);
    }

    #[test]
    fn test_publish_to_unknown_topic() {
        let (mut sandbox, _) = sandbox(true);
        assert!(matches!(
            sandbox.publish("arn:aws:sns:us-east-1:123456789012:nope", None, "x"),
            Err(SandboxError::NotFound { .. })
        ));
    }
}
