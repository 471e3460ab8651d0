use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SynthError {
    #[error("ブループリントエラー: {0}")]
    Blueprint(#[from] stackflow_core::StackError),

    #[error("'{from}' が未定義のリソース '{target}' を参照しています")]
    UnknownReference { from: String, target: String },

    #[error("論理ID '{0}' が重複しています")]
    DuplicateLogicalId(String),

    #[error("依存関係が循環しています: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("アセットの読み込みに失敗しました: {path}\n理由: {message}")]
    Asset { path: PathBuf, message: String },

    #[error("テンプレートのJSON変換に失敗しました: {0}")]
    Json(#[from] serde_json::Error),

    #[error("アサーション失敗: {0}")]
    Assertion(String),
}

pub type Result<T> = std::result::Result<T, SynthError>;
