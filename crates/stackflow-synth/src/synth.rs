//! ブループリントからテンプレートを合成

use crate::assets::AssetManifest;
use crate::convert;
use crate::error::{Result, SynthError};
use crate::graph::DependencyGraph;
use crate::logical_id::logical_id;
use crate::template::{Output, Parameter, Resource, Template};
use serde_json::Value;
use stackflow_core::{Blueprint, validate_blueprint};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, instrument};

/// 合成オプション
#[derive(Debug, Clone, Default)]
pub struct SynthOptions {
    /// 関数コードの相対パスを解決するディレクトリ（フィンガープリント計算用）
    pub asset_root: Option<PathBuf>,
    /// 検証をスキップする
    pub skip_validation: bool,
}

/// 合成結果
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub template: Template,
    pub assets: AssetManifest,
}

impl Synthesis {
    /// パラメータの既定値（フィンガープリントが分かるキーのみ）
    pub fn default_parameters(&self, bucket: &str) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        for asset in &self.assets.assets {
            params.insert(asset.bucket_parameter.clone(), bucket.to_string());
            if let Some(key) = asset.default_key() {
                params.insert(asset.key_parameter.clone(), key);
            }
        }
        params
    }
}

/// ブループリントを合成（検証込み）
pub fn synthesize(blueprint: &Blueprint) -> Result<Synthesis> {
    synthesize_with_options(blueprint, &SynthOptions::default())
}

/// オプション指定で合成
#[instrument(skip_all, fields(stack = %blueprint.name))]
pub fn synthesize_with_options(blueprint: &Blueprint, options: &SynthOptions) -> Result<Synthesis> {
    if !options.skip_validation {
        validate_blueprint(blueprint).into_result()?;
    }

    let mut synth = Synthesizer::new(blueprint, options);
    synth.template.description = blueprint.description.clone();

    convert::iam::collect_default_statements(&mut synth);
    for (id, role) in &blueprint.roles {
        convert::iam::add_role(&mut synth, id, role)?;
    }
    for (id, policy) in &blueprint.policies {
        convert::iam::add_policy(&mut synth, id, policy)?;
    }
    for (id, pool) in &blueprint.user_pools {
        convert::identity::add_user_pool(&mut synth, id, pool)?;
    }
    for (id, stream) in &blueprint.streams {
        convert::compute::add_stream(&mut synth, id, stream)?;
    }
    for (id, function) in &blueprint.functions {
        convert::compute::add_function(&mut synth, id, function)?;
    }
    for (id, table) in &blueprint.tables {
        convert::data::add_table(&mut synth, id, table)?;
    }
    for (id, topic) in &blueprint.topics {
        convert::data::add_topic(&mut synth, id, topic)?;
    }
    for (id, api) in &blueprint.rest_apis {
        convert::api::add_rest_api(&mut synth, id, api)?;
    }

    // 参照切れ・循環をここで検出する
    let graph = DependencyGraph::from_template(&synth.template)?;
    graph.deployment_order()?;

    info!(
        resources = synth.template.resources.len(),
        parameters = synth.template.parameters.len(),
        outputs = synth.template.outputs.len(),
        "Template synthesized"
    );

    Ok(Synthesis {
        template: synth.template,
        assets: synth.assets,
    })
}

/// 合成中の状態
pub struct Synthesizer<'a> {
    pub(crate) blueprint: &'a Blueprint,
    pub(crate) options: &'a SynthOptions,
    pub(crate) template: Template,
    pub(crate) assets: AssetManifest,
    /// ロールID → DefaultPolicy に入れるステートメント
    pub(crate) default_statements: BTreeMap<String, Vec<Value>>,
}

impl<'a> Synthesizer<'a> {
    fn new(blueprint: &'a Blueprint, options: &'a SynthOptions) -> Self {
        Self {
            blueprint,
            options,
            template: Template::default(),
            assets: AssetManifest::default(),
            default_statements: BTreeMap::new(),
        }
    }

    /// リソースを登録（論理IDの重複はエラー）
    pub(crate) fn add(&mut self, logical_id: String, resource: Resource) -> Result<()> {
        if self.template.resources.contains_key(&logical_id) {
            return Err(SynthError::DuplicateLogicalId(logical_id));
        }
        debug!(logical_id = %logical_id, resource_type = %resource.resource_type, "Adding resource");
        self.template.resources.insert(logical_id, resource);
        Ok(())
    }

    pub(crate) fn add_parameter(&mut self, name: String, parameter: Parameter) {
        self.template.parameters.insert(name, parameter);
    }

    pub(crate) fn add_output(&mut self, name: String, value: Value, description: &str) {
        self.template.outputs.insert(
            name,
            Output {
                value,
                description: Some(description.to_string()),
            },
        );
    }

    /// ブループリントIDの論理ID
    pub(crate) fn id(&self, blueprint_id: &str) -> String {
        logical_id(blueprint_id)
    }

    /// ロールの DefaultPolicy の論理ID（ステートメントが無ければ None）
    pub(crate) fn default_policy_of(&self, role_id: &str) -> Option<String> {
        self.default_statements
            .get(role_id)
            .filter(|s| !s.is_empty())
            .map(|_| format!("{}DefaultPolicy", logical_id(role_id)))
    }
}
