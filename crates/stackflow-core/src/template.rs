//! テンプレート展開
//!
//! Teraでブループリントの `{{ variable }}` を展開します。
//! 変数の出どころは `variables {}` ブロック、`.env` ファイル、許可された環境変数です。

use crate::error::{Result, StackError};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tera::{Context, Tera};
use tracing::{debug, info};

/// テンプレートに渡す変数
pub type Variables = HashMap<String, serde_json::Value>;

/// テンプレートに取り込む環境変数のプレフィックス
pub const ALLOWED_ENV_PREFIXES: &[&str] = &["STACKFLOW_", "CI_", "APP_"];

/// テンプレートプロセッサ
pub struct TemplateProcessor {
    tera: Tera,
    context: Context,
}

impl TemplateProcessor {
    pub fn new() -> Self {
        Self {
            tera: Tera::default(),
            context: Context::new(),
        }
    }

    /// 変数を追加
    pub fn add_variable(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.context.insert(key.into(), &value);
    }

    /// 複数の変数を追加（既存のキーは上書き）
    pub fn add_variables(&mut self, variables: Variables) {
        for (key, value) in variables {
            self.context.insert(key, &value);
        }
    }

    /// 許可されたプレフィックスの環境変数を追加
    #[tracing::instrument(skip(self))]
    pub fn add_env_variables(&mut self) {
        let mut count = 0;

        for (key, value) in std::env::vars() {
            if ALLOWED_ENV_PREFIXES
                .iter()
                .any(|prefix| key.starts_with(prefix))
            {
                debug!(key = %key, "Adding environment variable");
                self.context.insert(key, &serde_json::Value::String(value));
                count += 1;
            }
        }

        info!(env_var_count = count, "Added filtered environment variables");
    }

    /// .env ファイルの変数を追加
    ///
    /// .env は明示的に置かれたファイルなのでプレフィックス制限はかけない。
    #[tracing::instrument(skip(self))]
    pub fn add_env_file_variables(&mut self, env_file_path: &Path) -> Result<()> {
        let content =
            std::fs::read_to_string(env_file_path).map_err(|e| StackError::IoError {
                path: env_file_path.to_path_buf(),
                message: e.to_string(),
            })?;

        let variables = parse_env_file(&content);
        let count = variables.len();
        for (key, value) in variables {
            debug!(key = %key, "Adding variable from .env file");
            self.context.insert(key, &serde_json::Value::String(value));
        }

        info!(
            env_file = %env_file_path.display(),
            variable_count = count,
            "Loaded variables from .env file"
        );

        Ok(())
    }

    /// 文字列をテンプレートとして展開
    pub fn render_str(&mut self, template: &str) -> Result<String> {
        self.tera
            .render_str(template, &self.context)
            .map_err(|e| StackError::TemplateRenderError(extract_tera_error_detail(&e)))
    }

    /// ファイルを読み込んで展開
    pub fn render_file(&mut self, path: &Path) -> Result<String> {
        let content = std::fs::read_to_string(path).map_err(|e| StackError::IoError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        self.render_str(&content).map_err(|e| match e {
            StackError::TemplateRenderError(message) => StackError::TemplateError {
                file: path.to_path_buf(),
                line: None,
                message,
            },
            other => other,
        })
    }

    /// 複数ファイルを順に展開して結合
    pub fn render_files(&mut self, paths: &[impl AsRef<Path>]) -> Result<String> {
        let mut result = String::new();
        for path in paths {
            result.push_str(&self.render_file(path.as_ref())?);
            result.push('\n');
        }
        Ok(result)
    }
}

impl Default for TemplateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// KEY=VALUE 形式の .env をパース
///
/// 空行と `#` コメントは無視し、値の両端のクォートは外す。
pub fn parse_env_file(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            line.split_once('=').map(|(key, value)| {
                (
                    key.trim().to_string(),
                    strip_quotes(value.trim()).to_string(),
                )
            })
        })
        .collect()
}

/// KDLからトップレベルの variables ブロックを抽出
pub fn extract_variables(kdl_content: &str) -> Result<Variables> {
    extract_variables_with_stage(kdl_content, None)
}

/// トップレベルと指定ステージの variables ブロックを抽出
///
/// テンプレート展開前の文書は `{{ ... }}` を含み KDL としてパースできないことがあるため、
/// ブロックは正規表現で切り出してからパースする。ステージの変数がトップレベルを上書きする。
pub fn extract_variables_with_stage(kdl_content: &str, stage: Option<&str>) -> Result<Variables> {
    let stage_re = compile(r#"stage\s+"([^"]+)"\s*\{"#)?;

    let mut global_content = String::with_capacity(kdl_content.len());
    let mut stage_content = String::new();
    let mut last_end = 0;

    for caps in stage_re.captures_iter(kdl_content) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() < last_end {
            continue;
        }
        let Some(end) = find_matching_brace(kdl_content, whole.end() - 1) else {
            continue;
        };
        global_content.push_str(&kdl_content[last_end..whole.start()]);
        if stage == Some(name.as_str()) {
            stage_content.push_str(&kdl_content[whole.end()..end]);
            stage_content.push('\n');
        }
        last_end = end + 1;
    }
    global_content.push_str(&kdl_content[last_end..]);

    let mut variables = variables_in(&global_content)?;
    variables.extend(variables_in(&stage_content)?);
    Ok(variables)
}

/// テキスト中の variables { ... } ブロックを全て読む
fn variables_in(content: &str) -> Result<Variables> {
    let re = compile(r"(?m)^\s*variables\s*\{")?;
    let mut variables = HashMap::new();

    for mat in re.find_iter(content) {
        let Some(end) = find_matching_brace(content, mat.end() - 1) else {
            continue;
        };
        let body = &content[mat.end()..end];
        let doc: kdl::KdlDocument = body.parse().map_err(|e| {
            StackError::InvalidConfig(format!("KDL パースエラー (variables ブロック): {}", e))
        })?;

        for var in doc.nodes() {
            if let Some(entry) = var.entries().first() {
                variables.insert(var.name().value().to_string(), kdl_value_to_json(entry.value()));
            }
        }
    }

    Ok(variables)
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| StackError::InvalidConfig(format!("正規表現のコンパイルエラー: {}", e)))
}

/// 対応する閉じ波括弧の位置（文字列リテラル内は無視）
pub(crate) fn find_matching_brace(content: &str, open_pos: usize) -> Option<usize> {
    let bytes = content.as_bytes();
    if bytes.get(open_pos) != Some(&b'{') {
        return None;
    }

    let mut depth = 1;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &c) in bytes[open_pos + 1..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            b'\\' => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(open_pos + 1 + offset);
                }
            }
            _ => {}
        }
    }

    None
}

fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Teraのエラーチェーンから読みやすいメッセージを作る
fn extract_tera_error_detail(e: &tera::Error) -> String {
    use std::error::Error;

    let mut details = vec![e.to_string()];
    let mut source = e.source();
    while let Some(err) = source {
        details.push(err.to_string());
        source = err.source();
    }
    let full_error = details.join(" | ");

    // "Variable `xxx` not found in context"
    if let Some(start) = full_error.find("Variable `")
        && let Some(len) = full_error[start + 10..].find('`')
    {
        let name = &full_error[start + 10..start + 10 + len];
        return format!(
            "未定義の変数: `{}`\nヒント: variables ブロックで定義するか、.env ファイルに追加してください",
            name
        );
    }

    full_error
}

fn kdl_value_to_json(value: &kdl::KdlValue) -> serde_json::Value {
    if let Some(s) = value.as_string() {
        serde_json::Value::String(s.to_string())
    } else if let Some(i) = value.as_integer() {
        serde_json::Value::Number((i as i64).into())
    } else if let Some(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    } else if let Some(b) = value.as_bool() {
        serde_json::Value::Bool(b)
    } else {
        serde_json::Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_simple_variable_expansion() {
        let mut processor = TemplateProcessor::new();
        processor.add_variable("prefix", serde_json::json!("anupam-test1-0303"));

        let result = processor
            .render_str(r#"domain "MyDomain" prefix="{{ prefix }}""#)
            .unwrap();
        assert_eq!(result, r#"domain "MyDomain" prefix="anupam-test1-0303""#);
    }

    #[test]
    fn test_json_braces_are_not_template_syntax() {
        let mut processor = TemplateProcessor::new();
        let template = r#"request-template "application/json" "{ \"statusCode\": \"200\" }""#;
        assert_eq!(processor.render_str(template).unwrap(), template);
    }

    #[test]
    fn test_undefined_variable_error() {
        let mut processor = TemplateProcessor::new();
        let err = processor.render_str("name \"{{ missing }}\"").unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_extract_variables() {
        let kdl = r#"
variables {
    runtime "nodejs14.x"
    memory 256
}

function "Fn" {
    runtime "{{ runtime }}"
}
"#;
        let vars = extract_variables(kdl).unwrap();
        assert_eq!(vars["runtime"], serde_json::json!("nodejs14.x"));
        assert_eq!(vars["memory"], serde_json::json!(256));
    }

    #[test]
    fn test_stage_variables_override_global() {
        let kdl = r#"
variables {
    domain_prefix "dev-onboarding"
}

stage "prod" {
    variables {
        domain_prefix "prod-onboarding"
    }
}

stage "staging" {
    variables {
        domain_prefix "staging-onboarding"
    }
}
"#;
        let global = extract_variables(kdl).unwrap();
        assert_eq!(global["domain_prefix"], serde_json::json!("dev-onboarding"));

        let prod = extract_variables_with_stage(kdl, Some("prod")).unwrap();
        assert_eq!(prod["domain_prefix"], serde_json::json!("prod-onboarding"));
    }

    #[test]
    fn test_env_file_variables() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "TABLE_NAME=customer-table").unwrap();
        writeln!(file, "TOPIC_NAME=\"CustomerCreated\"").unwrap();
        writeln!(file).unwrap();

        let mut processor = TemplateProcessor::new();
        processor.add_env_file_variables(file.path()).unwrap();

        let result = processor
            .render_str("{{ TABLE_NAME }} {{ TOPIC_NAME }}")
            .unwrap();
        assert_eq!(result, "customer-table CustomerCreated");
    }

    #[test]
    fn test_parse_env_file_strips_quotes_and_export() {
        let vars = parse_env_file("export A='x'\nB=\"y\"\nC=z\n#D=w");
        assert_eq!(
            vars,
            vec![
                ("A".to_string(), "x".to_string()),
                ("B".to_string(), "y".to_string()),
                ("C".to_string(), "z".to_string()),
            ]
        );
    }

    #[test]
    fn test_find_matching_brace() {
        let content = r#"stage "a" { x "}" { } }"#;
        let open = content.find('{').unwrap();
        assert_eq!(find_matching_brace(content, open), Some(content.len() - 1));
        assert_eq!(find_matching_brace("{ {", 0), None);
    }
}
