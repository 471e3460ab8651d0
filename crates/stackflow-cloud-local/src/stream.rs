//! Kinesis streams
//!
//! Records are routed to a shard by hashing the partition key into the
//! shards' evenly split key ranges. Each shard numbers its records in arrival
//! order; records older than the retention window are dropped against the
//! sandbox clock.

use crate::error::{Result, SandboxError};
use crate::props::{str_prop, u64_prop};
use crate::sandbox::{PhysicalResource, Sandbox};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

pub const DEFAULT_RETENTION_HOURS: u64 = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub sequence: u64,
    pub partition_key: String,
    pub data: Vec<u8>,
    pub arrival: DateTime<Utc>,
}

impl StreamRecord {
    pub fn sequence_number(&self) -> String {
        format!("{:056}", self.sequence)
    }
}

#[derive(Debug, Clone)]
pub struct Shard {
    pub id: String,
    pub records: Vec<StreamRecord>,
    pub(crate) next_sequence: u64,
}

#[derive(Debug, Clone)]
pub struct Stream {
    pub name: String,
    pub arn: String,
    pub retention_hours: u64,
    pub shards: Vec<Shard>,
}

impl Stream {
    fn shard_index(&self, partition_key: &str) -> usize {
        let digest = Sha256::digest(partition_key.as_bytes());
        let mut top = [0u8; 8];
        top.copy_from_slice(&digest[..8]);
        let position = u64::from_be_bytes(top) as u128;
        ((position * self.shards.len() as u128) >> 64) as usize
    }

    pub(crate) fn expire(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(self.retention_hours as i64);
        for shard in &mut self.shards {
            shard.records.retain(|r| r.arrival > cutoff);
        }
    }
}

impl Sandbox {
    pub(crate) fn create_stream(
        &mut self,
        stack_name: &str,
        logical_id: &str,
        props: &serde_json::Value,
    ) -> Result<PhysicalResource> {
        let name = match str_prop(props, "Name") {
            Some(name) => name.to_string(),
            None => self.generate_name(stack_name, logical_id, 128),
        };
        if self.streams.contains_key(&name) {
            return Err(SandboxError::AlreadyExists(format!("stream {}", name)));
        }
        let shard_count = u64_prop(props, "ShardCount").unwrap_or(1);
        if shard_count == 0 {
            return Err(SandboxError::invalid(logical_id, "ShardCount must be at least 1"));
        }

        let arn = format!(
            "arn:aws:kinesis:{}:{}:stream/{}",
            self.region, self.account_id, name
        );
        let shards = (0..shard_count)
            .map(|i| Shard {
                id: format!("shardId-{:012}", i),
                records: Vec::new(),
                next_sequence: 0,
            })
            .collect();
        self.streams.insert(
            name.clone(),
            Stream {
                name: name.clone(),
                arn: arn.clone(),
                retention_hours: u64_prop(props, "RetentionPeriodHours")
                    .unwrap_or(DEFAULT_RETENTION_HOURS),
                shards,
            },
        );
        info!(stream = %name, shards = shard_count, "Stream created");
        Ok(PhysicalResource::new("AWS::Kinesis::Stream", name).with_attribute("Arn", json!(arn)))
    }

    pub(crate) fn delete_stream(&mut self, resource: &PhysicalResource) {
        self.streams.remove(&resource.physical_id);
    }

    pub fn stream(&self, name: &str) -> Option<&Stream> {
        self.streams.get(name)
    }

    pub(crate) fn stream_name_by_arn(&self, arn: &str) -> Option<String> {
        self.streams
            .values()
            .find(|s| s.arn == arn)
            .map(|s| s.name.clone())
    }

    /// Append a record, returning the shard id and sequence number
    pub fn put_record(
        &mut self,
        stream_name: &str,
        partition_key: &str,
        data: Vec<u8>,
    ) -> Result<(String, String)> {
        let now = self.now();
        let stream = self
            .streams
            .get_mut(stream_name)
            .ok_or_else(|| SandboxError::not_found("Stream", stream_name))?;
        stream.expire(now);

        let index = stream.shard_index(partition_key);
        let shard = &mut stream.shards[index];
        let record = StreamRecord {
            sequence: shard.next_sequence,
            partition_key: partition_key.to_string(),
            data,
            arrival: now,
        };
        shard.next_sequence += 1;
        let sequence_number = record.sequence_number();
        shard.records.push(record);
        debug!(stream = %stream_name, shard = %shard.id, sequence = %sequence_number, "Record put");
        Ok((shard.id.clone(), sequence_number))
    }

    /// Retained records of every shard, shard by shard
    pub fn stream_records(&mut self, stream_name: &str) -> Vec<StreamRecord> {
        let now = self.now();
        let Some(stream) = self.streams.get_mut(stream_name) else {
            return Vec::new();
        };
        stream.expire(now);
        stream
            .shards
            .iter()
            .flat_map(|s| s.records.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_numbers_increase_per_shard() {
        let mut sandbox = Sandbox::default();
        sandbox
            .create_stream("Test", "Stream", &json!({ "Name": "s", "ShardCount": 1 }))
            .unwrap();
        let (shard, first) = sandbox.put_record("s", "acme", b"1".to_vec()).unwrap();
        let (_, second) = sandbox.put_record("s", "zeta", b"2".to_vec()).unwrap();
        assert_eq!(shard, "shardId-000000000000");
        assert!(first < second);
        assert_eq!(first.len(), 56);
    }

    #[test]
    fn test_partition_key_picks_a_stable_shard() {
        let mut sandbox = Sandbox::default();
        sandbox
            .create_stream("Test", "Stream", &json!({ "Name": "s", "ShardCount": 4 }))
            .unwrap();
        let (a, _) = sandbox.put_record("s", "acme", vec![]).unwrap();
        let (b, _) = sandbox.put_record("s", "acme", vec![]).unwrap();
        assert_eq!(a, b);

        let shards: std::collections::BTreeSet<String> = (0..64)
            .map(|i| sandbox.put_record("s", &format!("customer-{}", i), vec![]).unwrap().0)
            .collect();
        assert!(shards.len() > 1);
    }

    #[test]
    fn test_retention_window() {
        let mut sandbox = Sandbox::default();
        sandbox
            .create_stream("Test", "Stream", &json!({ "Name": "s", "RetentionPeriodHours": 24 }))
            .unwrap();
        sandbox.put_record("s", "old", vec![]).unwrap();
        sandbox.advance_clock(Duration::hours(23));
        sandbox.put_record("s", "new", vec![]).unwrap();
        assert_eq!(sandbox.stream_records("s").len(), 2);

        sandbox.advance_clock(Duration::hours(2));
        let records = sandbox.stream_records("s");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].partition_key, "new");
        assert_eq!(records[0].sequence, 1);
    }
}
