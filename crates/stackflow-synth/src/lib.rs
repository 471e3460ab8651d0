//! StackFlow Synth
//!
//! ブループリントを CloudFormation テンプレートに合成します。
//!
//! - 各リソースの変換（ロール・ユーザープール・関数・テーブル・トピック・API）
//! - 関数コードのアセットとフィンガープリント
//! - 依存グラフと配備順序
//! - テスト用のテンプレートアサーション

pub mod assertions;
pub mod assets;
mod convert;
pub mod error;
pub mod graph;
pub mod intrinsic;
pub mod logical_id;
pub mod synth;
pub mod template;

pub use assertions::mismatch;
pub use assets::{Asset, AssetManifest, build_asset, fingerprint_dir, parameter_names};
pub use error::{Result, SynthError};
pub use graph::{DependencyGraph, deployment_order};
pub use logical_id::{logical_id, nested_logical_id};
pub use synth::{SynthOptions, Synthesis, synthesize, synthesize_with_options};
pub use template::{FORMAT_VERSION, Output, Parameter, Resource, Template};
