//! 関数とストリームの変換

use crate::assets::build_asset;
use crate::error::Result;
use crate::intrinsic::{get_att, ref_};
use crate::logical_id::logical_id;
use crate::synth::Synthesizer;
use crate::template::{Parameter, Resource};
use serde_json::{Value, json};
use stackflow_core::{Function, Stream};

/// AWS::Kinesis::Stream を追加
pub fn add_stream(synth: &mut Synthesizer<'_>, id: &str, stream: &Stream) -> Result<()> {
    let resource = Resource::new("AWS::Kinesis::Stream")
        .with_opt("Name", stream.name.clone().map(Value::from))
        .with("RetentionPeriodHours", json!(stream.retention_hours))
        .with("ShardCount", json!(stream.shard_count))
        .with_removal(stream.removal_policy.deletion_policy());
    synth.add(synth.id(id), resource)
}

/// AWS::Lambda::Function とイベントソースマッピングを追加
///
/// コードは `<Fn>CodeS3Bucket` / `<Fn>CodeS3Key` パラメータで受け取る。
pub fn add_function(synth: &mut Synthesizer<'_>, id: &str, function: &Function) -> Result<()> {
    let logical = synth.id(id);

    let asset = build_asset(&logical, &function.code, synth.options.asset_root.as_deref())?;
    synth.add_parameter(
        asset.bucket_parameter.clone(),
        Parameter::string(format!("S3 bucket for the code of {}", logical)),
    );
    synth.add_parameter(
        asset.key_parameter.clone(),
        Parameter::string(format!("S3 key for the code of {}", logical)),
    );

    let mut resource = Resource::new("AWS::Lambda::Function")
        .with(
            "Code",
            json!({
                "S3Bucket": ref_(&asset.bucket_parameter),
                "S3Key": ref_(&asset.key_parameter),
            }),
        )
        .with_opt("FunctionName", function.name.clone().map(Value::from))
        .with("Handler", json!(function.handler))
        .with("MemorySize", json!(function.memory_mb))
        .with("Runtime", json!(function.runtime))
        .with("Timeout", json!(function.timeout_secs));
    synth.assets.assets.push(asset);

    if !function.environment.is_empty() {
        resource = resource.with(
            "Environment",
            json!({ "Variables": function.environment }),
        );
    }

    // 実行ロールのインラインポリシーが付いてから関数を作る
    let default_policy = function
        .role
        .as_deref()
        .and_then(|role| synth.default_policy_of(role));
    if let Some(role) = function.role.as_deref() {
        let role_logical = synth.id(role);
        resource = resource
            .with("Role", get_att(&role_logical, "Arn"))
            .depends_on(role_logical);
    }
    if let Some(policy) = &default_policy {
        resource = resource.depends_on(policy.clone());
    }
    synth.add(logical.clone(), resource)?;

    for source in &function.event_sources {
        let mut mapping = Resource::new("AWS::Lambda::EventSourceMapping")
            .with("BatchSize", json!(source.batch_size))
            .with("EventSourceArn", get_att(&synth.id(&source.stream), "Arn"))
            .with("FunctionName", ref_(&logical))
            .with("StartingPosition", json!(source.starting_position.as_str()));
        if let Some(policy) = &default_policy {
            mapping = mapping.depends_on(policy.clone());
        }
        let mapping_id = format!("{}EventSource{}", logical, logical_id(&source.stream));
        synth.add(mapping_id, mapping)?;
    }

    Ok(())
}
