//! Event source mappings from streams to functions
//!
//! Each poll reads at most `BatchSize` records per shard from the mapping's
//! checkpoint and invokes the function once per non-empty batch. A batch is
//! checkpointed only when the invocation succeeds; a failed batch is read
//! again on the next poll.

use crate::error::{Result, SandboxError};
use crate::function::Trigger;
use crate::props::{bool_prop, function_name_of, str_prop, u64_prop};
use crate::sandbox::{PhysicalResource, Sandbox};
use crate::stream::StreamRecord;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_BATCH_SIZE: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartingPosition {
    TrimHorizon,
    Latest,
}

impl StartingPosition {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "TRIM_HORIZON" => Some(Self::TrimHorizon),
            "LATEST" => Some(Self::Latest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSourceMapping {
    pub uuid: String,
    pub function_name: String,
    pub stream_name: String,
    pub batch_size: usize,
    pub starting_position: StartingPosition,
    pub enabled: bool,
    /// Shard id → next sequence to deliver
    pub checkpoints: BTreeMap<String, u64>,
    pub last_error: Option<String>,
}

impl Sandbox {
    pub(crate) fn create_event_source_mapping(
        &mut self,
        logical_id: &str,
        props: &Value,
    ) -> Result<PhysicalResource> {
        let source_arn = str_prop(props, "EventSourceArn")
            .ok_or_else(|| SandboxError::invalid(logical_id, "EventSourceArn is required"))?;
        let stream_name = self
            .stream_name_by_arn(source_arn)
            .ok_or_else(|| SandboxError::not_found("Stream", source_arn))?;
        let function_name = str_prop(props, "FunctionName")
            .map(function_name_of)
            .ok_or_else(|| SandboxError::invalid(logical_id, "FunctionName is required"))?
            .to_string();
        if !self.functions.contains_key(&function_name) {
            return Err(SandboxError::not_found("Function", function_name));
        }

        let position = str_prop(props, "StartingPosition").ok_or_else(|| {
            SandboxError::invalid(logical_id, "StartingPosition is required for stream sources")
        })?;
        let starting_position = StartingPosition::parse(position).ok_or_else(|| {
            SandboxError::invalid(logical_id, format!("unsupported StartingPosition {}", position))
        })?;
        let batch_size = u64_prop(props, "BatchSize").unwrap_or(DEFAULT_BATCH_SIZE);
        if !(1..=10_000).contains(&batch_size) {
            return Err(SandboxError::invalid(
                logical_id,
                format!("BatchSize {} is out of range 1..=10000", batch_size),
            ));
        }

        let stream = self
            .streams
            .get(&stream_name)
            .ok_or_else(|| SandboxError::not_found("Stream", stream_name.as_str()))?;
        let checkpoints = stream
            .shards
            .iter()
            .map(|shard| {
                let start = match starting_position {
                    StartingPosition::TrimHorizon => 0,
                    StartingPosition::Latest => shard.next_sequence,
                };
                (shard.id.clone(), start)
            })
            .collect();

        let uuid = Uuid::new_v4().to_string();
        self.mappings.insert(
            uuid.clone(),
            EventSourceMapping {
                uuid: uuid.clone(),
                function_name: function_name.clone(),
                stream_name: stream_name.clone(),
                batch_size: batch_size as usize,
                starting_position,
                enabled: bool_prop(props, "Enabled").unwrap_or(true),
                checkpoints,
                last_error: None,
            },
        );
        info!(mapping = %uuid, function = %function_name, stream = %stream_name, "Event source mapping created");
        Ok(PhysicalResource::new("AWS::Lambda::EventSourceMapping", uuid))
    }

    pub(crate) fn delete_event_source_mapping(&mut self, resource: &PhysicalResource) {
        self.mappings.remove(&resource.physical_id);
    }

    pub fn event_source_mapping(&self, uuid: &str) -> Option<&EventSourceMapping> {
        self.mappings.get(uuid)
    }

    pub fn event_source_mappings(&self) -> impl Iterator<Item = &EventSourceMapping> {
        self.mappings.values()
    }

    /// Poll every enabled mapping once; returns the number of batches delivered
    pub fn poll_mappings(&mut self) -> usize {
        let ids: Vec<String> = self.mappings.keys().cloned().collect();
        ids.iter().map(|id| self.poll_mapping(id)).sum()
    }

    fn poll_mapping(&mut self, uuid: &str) -> usize {
        let Some(mapping) = self.mappings.get(uuid).cloned() else {
            return 0;
        };
        if !mapping.enabled {
            return 0;
        }

        let now = self.now();
        let Some(stream) = self.streams.get_mut(&mapping.stream_name) else {
            return 0;
        };
        stream.expire(now);
        let stream_arn = stream.arn.clone();
        let batches: Vec<(String, Vec<StreamRecord>)> = stream
            .shards
            .iter()
            .map(|shard| {
                let from = mapping.checkpoints.get(&shard.id).copied().unwrap_or(0);
                let batch: Vec<StreamRecord> = shard
                    .records
                    .iter()
                    .filter(|r| r.sequence >= from)
                    .take(mapping.batch_size)
                    .cloned()
                    .collect();
                (shard.id.clone(), batch)
            })
            .filter(|(_, batch)| !batch.is_empty())
            .collect();
        if batches.is_empty() {
            return 0;
        }

        // The service reads the stream with the function's execution role
        let role_arn = match self.functions.get(&mapping.function_name) {
            Some(function) => function.role_arn.clone(),
            None => return 0,
        };
        let session = self.service_session(&role_arn, &mapping.function_name);
        let read = session.and_then(|s| self.authorize(&s, "kinesis:GetRecords", &stream_arn));
        if let Err(e) = read {
            warn!(mapping = %uuid, error = %e, "Mapping cannot read its stream");
            self.set_mapping_error(uuid, Some(e.to_string()));
            return 0;
        }

        let mut delivered = 0;
        for (shard_id, batch) in batches {
            let next = batch.last().map_or(0, |r| r.sequence + 1);
            let event = json!({
                "Records": batch
                    .iter()
                    .map(|r| self.kinesis_event_record(r, &shard_id, &stream_arn, &role_arn))
                    .collect::<Vec<_>>()
            });
            let trigger = Trigger::Stream {
                mapping: uuid.to_string(),
                shard_id: shard_id.clone(),
                records: batch.len(),
            };
            match self.invoke_function(&mapping.function_name, event, trigger) {
                Ok(_) => {
                    if let Some(m) = self.mappings.get_mut(uuid) {
                        m.checkpoints.insert(shard_id, next);
                        m.last_error = None;
                    }
                    delivered += 1;
                }
                Err(e) => self.set_mapping_error(uuid, Some(e)),
            }
        }
        delivered
    }

    fn set_mapping_error(&mut self, uuid: &str, error: Option<String>) {
        if let Some(mapping) = self.mappings.get_mut(uuid) {
            mapping.last_error = error;
        }
    }

    fn kinesis_event_record(
        &self,
        record: &StreamRecord,
        shard_id: &str,
        stream_arn: &str,
        role_arn: &str,
    ) -> Value {
        json!({
            "kinesis": {
                "kinesisSchemaVersion": "1.0",
                "partitionKey": record.partition_key,
                "sequenceNumber": record.sequence_number(),
                "data": STANDARD.encode(&record.data),
                "approximateArrivalTimestamp": record.arrival.timestamp_millis() as f64 / 1000.0,
            },
            "eventSource": "aws:kinesis",
            "eventVersion": "1.0",
            "eventID": format!("{}:{}", shard_id, record.sequence_number()),
            "eventName": "aws:kinesis:record",
            "invokeIdentityArn": role_arn,
            "awsRegion": self.region,
            "eventSourceARN": stream_arn,
        })
    }
}
