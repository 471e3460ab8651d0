//! KDLパーサー
//!
//! StackFlowのKDLブループリントをパースします。
//! 各リソース種別のパース処理はモジュールに分離されています。

mod api;
mod compute;
mod data;
mod iam;
mod identity;

use api::parse_rest_api;
use compute::{parse_function, parse_stream};
use data::{parse_table, parse_topic};
use iam::{parse_policy, parse_role};
use identity::parse_user_pool;

use crate::error::{Result, StackError};
use crate::model::{Blueprint, ResourceKind};
use kdl::{KdlDocument, KdlNode};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// KDLファイルをパースしてBlueprintを生成
pub fn parse_kdl_file<P: AsRef<Path>>(path: P) -> Result<Blueprint> {
    let content = fs::read_to_string(path.as_ref())?;
    let name = path
        .as_ref()
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    parse_kdl_string(&content, name)
}

/// KDL文字列をパース
pub fn parse_kdl_string(content: &str, default_name: String) -> Result<Blueprint> {
    parse_kdl_string_with_stage(content, default_name, None)
}

/// KDL文字列をステージ指定でパース
///
/// `stage "name" { ... }` 内のリソース宣言は、そのステージが指定された場合のみ適用され、
/// 同じIDのトップレベル宣言を置き換えます。
pub fn parse_kdl_string_with_stage(
    content: &str,
    default_name: String,
    target_stage: Option<&str>,
) -> Result<Blueprint> {
    let doc: KdlDocument = content.parse()?;

    let mut blueprint = Blueprint::new(default_name);
    let mut declared: HashMap<String, ResourceKind> = HashMap::new();
    let mut stage_overrides: Vec<&KdlNode> = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "stack" | "project" => {
                if let Some(name) = first_string(node) {
                    blueprint.name = name;
                }
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        if child.name().value() == "description" {
                            blueprint.description = first_string(child);
                        }
                    }
                }
            }
            "description" => {
                blueprint.description = first_string(node);
            }
            "variables" => {
                // プロジェクトレベルの共通変数
                if let Some(vars) = node.children() {
                    for var in vars.nodes() {
                        let key = var.name().value().to_string();
                        let value = first_string(var).unwrap_or_default();
                        blueprint.variables.insert(key, value);
                    }
                }
            }
            "stage" => {
                let stage_name = node_id(node)?;
                if !blueprint.stages.contains(&stage_name) {
                    blueprint.stages.push(stage_name.clone());
                }
                if target_stage == Some(stage_name.as_str()) {
                    stage_overrides.push(node);
                }
            }
            _ => {
                if !apply_resource_node(&mut blueprint, &mut declared, node)? {
                    debug!(node = node.name().value(), "Skipping unknown node");
                }
            }
        }
    }

    // 指定ステージの宣言を最後に適用
    for stage_node in stage_overrides {
        if let Some(children) = stage_node.children() {
            for child in children.nodes() {
                if child.name().value() == "variables" {
                    if let Some(vars) = child.children() {
                        for var in vars.nodes() {
                            blueprint.variables.insert(
                                var.name().value().to_string(),
                                first_string(var).unwrap_or_default(),
                            );
                        }
                    }
                } else if !apply_resource_node(&mut blueprint, &mut declared, child)? {
                    debug!(
                        node = child.name().value(),
                        "Skipping unknown node in stage block"
                    );
                }
            }
        }
    }

    Ok(blueprint)
}

/// リソースノードをブループリントに登録する
///
/// リソースノードでなければ false を返す。
fn apply_resource_node(
    blueprint: &mut Blueprint,
    declared: &mut HashMap<String, ResourceKind>,
    node: &KdlNode,
) -> Result<bool> {
    let kind = match node.name().value() {
        "user-pool" | "user_pool" => ResourceKind::UserPool,
        "role" => ResourceKind::Role,
        "policy" => ResourceKind::Policy,
        "function" => ResourceKind::Function,
        "stream" => ResourceKind::Stream,
        "rest-api" | "rest_api" => ResourceKind::RestApi,
        "table" => ResourceKind::Table,
        "topic" => ResourceKind::Topic,
        _ => return Ok(false),
    };

    let id = node_id(node)?;
    if let Some(existing) = declared.get(&id)
        && *existing != kind
    {
        return Err(StackError::DuplicateResource {
            id,
            first: existing.to_string(),
            second: kind.to_string(),
        });
    }
    declared.insert(id.clone(), kind);

    // 同じ種類・同じIDの後続宣言は前の宣言を置き換える
    match kind {
        ResourceKind::UserPool => {
            blueprint.user_pools.insert(id, parse_user_pool(node)?);
        }
        ResourceKind::Role => {
            blueprint.roles.insert(id, parse_role(node)?);
        }
        ResourceKind::Policy => {
            blueprint.policies.insert(id, parse_policy(node)?);
        }
        ResourceKind::Function => {
            blueprint.functions.insert(id, parse_function(node)?);
        }
        ResourceKind::Stream => {
            blueprint.streams.insert(id, parse_stream(node)?);
        }
        ResourceKind::RestApi => {
            blueprint.rest_apis.insert(id, parse_rest_api(node)?);
        }
        ResourceKind::Table => {
            blueprint.tables.insert(id, parse_table(node)?);
        }
        ResourceKind::Topic => {
            blueprint.topics.insert(id, parse_topic(node)?);
        }
    }

    Ok(true)
}

/// ノードの最初の位置引数をIDとして取得（必須）
pub(crate) fn node_id(node: &KdlNode) -> Result<String> {
    first_string(node).ok_or_else(|| StackError::InvalidNode {
        node: node.name().value().to_string(),
        message: "requires an id as its first argument".to_string(),
    })
}

/// 位置引数のみを列挙
fn arguments(node: &KdlNode) -> impl Iterator<Item = &kdl::KdlEntry> {
    node.entries().iter().filter(|e| e.name().is_none())
}

/// 最初の位置引数（文字列）
pub(crate) fn first_string(node: &KdlNode) -> Option<String> {
    arguments(node)
        .next()
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// 最初の位置引数（整数）
pub(crate) fn first_u32(node: &KdlNode) -> Result<Option<u32>> {
    match arguments(node).next() {
        Some(entry) => entry
            .value()
            .as_integer()
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| invalid(node, "expects a non-negative integer")),
        None => Ok(None),
    }
}

/// フラグノード（引数なしは #true 扱い）
pub(crate) fn flag(node: &KdlNode) -> bool {
    arguments(node)
        .next()
        .and_then(|e| e.value().as_bool())
        .unwrap_or(true)
}

/// 全ての位置引数（文字列）
pub(crate) fn string_args(node: &KdlNode) -> Vec<String> {
    arguments(node)
        .filter_map(|e| e.value().as_string().map(|s| s.to_string()))
        .collect()
}

fn prop<'a>(node: &'a KdlNode, key: &str) -> Option<&'a kdl::KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().map(|n| n.value()) == Some(key))
        .map(|e| e.value())
}

/// プロパティ（文字列）
pub(crate) fn prop_string(node: &KdlNode, key: &str) -> Option<String> {
    prop(node, key)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

/// プロパティ（真偽値）
pub(crate) fn prop_bool(node: &KdlNode, key: &str) -> Option<bool> {
    prop(node, key).and_then(|v| v.as_bool())
}

/// プロパティ（整数）
pub(crate) fn prop_u32(node: &KdlNode, key: &str) -> Result<Option<u32>> {
    match prop(node, key) {
        Some(value) => value
            .as_integer()
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| invalid(node, &format!("'{}' expects a non-negative integer", key))),
        None => Ok(None),
    }
}

/// 文字列を列挙型などに変換
pub(crate) fn parse_value<T>(node: &KdlNode, value: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    value.parse::<T>().map_err(|message| invalid(node, &message))
}

/// 必須の位置引数を変換
pub(crate) fn parse_first<T>(node: &KdlNode) -> Result<T>
where
    T: FromStr<Err = String>,
{
    let value = first_string(node).ok_or_else(|| invalid(node, "requires a value"))?;
    parse_value(node, &value)
}

pub(crate) fn invalid(node: &KdlNode, message: &str) -> StackError {
    StackError::InvalidNode {
        node: node.name().value().to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests;
