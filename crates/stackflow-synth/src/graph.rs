//! リソース依存グラフ
//!
//! `Ref` / `Fn::GetAtt` / `DependsOn` から依存関係を組み立て、
//! 葉から順に並べた配備順序を求めます。

use crate::error::{Result, SynthError};
use crate::intrinsic::references;
use crate::template::Template;
use std::collections::{BTreeMap, BTreeSet};

/// 依存グラフ（キーのリソースが値のリソースに依存する）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    dependencies: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// テンプレートから依存グラフを作る
    ///
    /// パラメータへの参照は依存に含めない。未定義の参照はエラー。
    pub fn from_template(template: &Template) -> Result<Self> {
        let mut dependencies = BTreeMap::new();

        for (id, resource) in &template.resources {
            let mut deps = BTreeSet::new();
            let properties = serde_json::Value::Object(resource.properties.clone());
            for target in references(&properties)
                .into_iter()
                .chain(resource.depends_on.iter().cloned())
            {
                if template.parameters.contains_key(&target) {
                    continue;
                }
                if !template.resources.contains_key(&target) {
                    return Err(SynthError::UnknownReference {
                        from: id.clone(),
                        target,
                    });
                }
                deps.insert(target);
            }
            dependencies.insert(id.clone(), deps);
        }

        for (name, output) in &template.outputs {
            for target in references(&output.value) {
                if !template.resources.contains_key(&target)
                    && !template.parameters.contains_key(&target)
                {
                    return Err(SynthError::UnknownReference {
                        from: format!("Outputs.{}", name),
                        target,
                    });
                }
            }
        }

        Ok(Self { dependencies })
    }

    /// 直接の依存先
    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        self.dependencies
            .get(id)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// 直接の依存元
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter(|(_, deps)| deps.contains(id))
            .map(|(dependent, _)| dependent.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// 配備順序（Kahn 法、同順位は論理ID順）
    pub fn deployment_order(&self) -> Result<Vec<String>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .dependencies
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();
        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.dependencies.len());

        while let Some(id) = ready.pop_first() {
            remaining.remove(id);
            order.push(id.to_string());
            for dependent in self.dependents_of(id) {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if !remaining.is_empty() {
            return Err(SynthError::Cycle(
                remaining.keys().map(|id| id.to_string()).collect(),
            ));
        }

        Ok(order)
    }

    /// 削除順序（配備順序の逆）
    pub fn teardown_order(&self) -> Result<Vec<String>> {
        let mut order = self.deployment_order()?;
        order.reverse();
        Ok(order)
    }
}

/// テンプレートの配備順序
pub fn deployment_order(template: &Template) -> Result<Vec<String>> {
    DependencyGraph::from_template(template)?.deployment_order()
}
