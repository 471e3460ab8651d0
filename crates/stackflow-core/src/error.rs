use crate::validate::ValidationReport;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("KDLパースエラー: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("ファイル読み込みエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO エラー: {path}\n理由: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("無効な設定: {0}")]
    InvalidConfig(String),

    #[error("'{node}' ノードが不正です: {message}")]
    InvalidNode { node: String, message: String },

    #[error("テンプレートエラー: {file}\n理由: {message}")]
    TemplateError {
        file: PathBuf,
        line: Option<usize>,
        message: String,
    },

    #[error("テンプレート展開エラー: {0}")]
    TemplateRenderError(String),

    #[error("ファイル発見エラー: {path}\n理由: {message}")]
    DiscoveryError { path: PathBuf, message: String },

    #[error(
        "プロジェクトルートが見つかりません\n探索開始位置: {0}\nヒント: stack.kdl ファイルを含むディレクトリで実行してください"
    )]
    ProjectRootNotFound(PathBuf),

    #[error("リソースが見つかりません: {0}")]
    ResourceNotFound(String),

    #[error("リソースID '{id}' が重複しています ({first} と {second})")]
    DuplicateResource {
        id: String,
        first: String,
        second: String,
    },

    #[error("ブループリントの検証に失敗しました:\n{0}")]
    Invalid(ValidationReport),
}

pub type Result<T> = std::result::Result<T, StackError>;
