//! StackFlow Core
//!
//! ブループリント（マネージドサービスのリソースと権限の宣言）のモデル、
//! KDLパーサー、ファイル発見、テンプレート展開、意味検証を提供します。

pub mod blueprints;
pub mod discovery;
pub mod error;
pub mod loader;
pub mod model;
pub mod parser;
pub mod template;
pub mod validate;

pub use discovery::{
    DiscoveredFiles, discover_files, discover_files_with_stage, find_project_root,
    find_project_root_from,
};
pub use error::{Result, StackError};
pub use loader::{
    load_blueprint_str, load_project, load_project_from_root, load_project_from_root_with_stage,
};
pub use model::*;
pub use parser::{parse_kdl_file, parse_kdl_string, parse_kdl_string_with_stage};
pub use template::{TemplateProcessor, Variables};
pub use validate::{Issue, Severity, ValidationReport, validate_blueprint};
