//! function / stream ノードのパース

use super::{first_string, first_u32, invalid, parse_first, parse_value, prop_string, prop_u32};
use crate::error::Result;
use crate::model::{EventSource, Function, StartingPosition, Stream};
use kdl::KdlNode;
use std::path::PathBuf;

/// function ノードをパース
pub fn parse_function(node: &KdlNode) -> Result<Function> {
    let mut function = Function::default();
    let mut has_code = false;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "name" => function.name = first_string(child),
                "runtime" => {
                    if let Some(runtime) = first_string(child) {
                        function.runtime = runtime;
                    }
                }
                "handler" => {
                    if let Some(handler) = first_string(child) {
                        function.handler = handler;
                    }
                }
                "code" => {
                    if let Some(code) = first_string(child) {
                        function.code = PathBuf::from(code);
                        has_code = true;
                    }
                }
                "role" => function.role = first_string(child),
                "memory" | "memory-size" => {
                    if let Some(memory) = first_u32(child)? {
                        function.memory_mb = memory;
                    }
                }
                "timeout" => {
                    if let Some(timeout) = first_u32(child)? {
                        function.timeout_secs = timeout;
                    }
                }
                "environment" | "env" => {
                    if let Some(vars) = child.children() {
                        for var in vars.nodes() {
                            let key = var.name().value().to_string();
                            let value = first_string(var).unwrap_or_default();
                            function.environment.insert(key, value);
                        }
                    }
                }
                "event-source" | "event_source" => {
                    function.event_sources.push(parse_event_source(child)?);
                }
                _ => {}
            }
        }
    }

    if !has_code {
        return Err(invalid(node, "requires a code directory"));
    }

    Ok(function)
}

fn parse_event_source(node: &KdlNode) -> Result<EventSource> {
    let stream = prop_string(node, "stream")
        .or_else(|| first_string(node))
        .ok_or_else(|| invalid(node, "requires stream=\"<id>\""))?;

    let mut source = EventSource::new(stream);
    if let Some(batch) = prop_u32(node, "batch-size")? {
        source.batch_size = batch;
    }
    if let Some(position) = prop_string(node, "starting-position") {
        source.starting_position = parse_value::<StartingPosition>(node, &position)?;
    }

    Ok(source)
}

/// stream ノードをパース
pub fn parse_stream(node: &KdlNode) -> Result<Stream> {
    let mut stream = Stream::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "name" => stream.name = first_string(child),
                "shard-count" | "shard_count" | "shards" => {
                    if let Some(count) = first_u32(child)? {
                        stream.shard_count = count;
                    }
                }
                "retention-hours" | "retention_hours" => {
                    if let Some(hours) = first_u32(child)? {
                        stream.retention_hours = hours;
                    }
                }
                "removal-policy" | "removal_policy" => {
                    stream.removal_policy = parse_first(child)?;
                }
                _ => {}
            }
        }
    }

    Ok(stream)
}
