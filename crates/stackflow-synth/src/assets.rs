//! 関数コードのアセット
//!
//! 関数ごとにコードの置き場所を指す2つのパラメータ（バケットとキー）を作り、
//! コードディレクトリの内容から SHA-256 フィンガープリントを計算します。

use crate::error::{Result, SynthError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// 1つの関数のアセット
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// 関数の論理ID
    pub function: String,
    /// ブループリントに書かれたコードパス
    pub path: PathBuf,
    /// ディレクトリが存在する場合のフィンガープリント
    pub fingerprint: Option<String>,
    pub bucket_parameter: String,
    pub key_parameter: String,
}

impl Asset {
    /// キーパラメータの既定値（assets/<fingerprint>.zip）
    pub fn default_key(&self) -> Option<String> {
        self.fingerprint
            .as_ref()
            .map(|fp| format!("assets/{}.zip", fp))
    }
}

/// アセット一覧
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifest {
    pub assets: Vec<Asset>,
}

impl AssetManifest {
    pub fn get(&self, function: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.function == function)
    }
}

/// パラメータ名（<Fn>CodeS3Bucket, <Fn>CodeS3Key）
pub fn parameter_names(function_logical_id: &str) -> (String, String) {
    (
        format!("{}CodeS3Bucket", function_logical_id),
        format!("{}CodeS3Key", function_logical_id),
    )
}

/// コードディレクトリのアセットを作る
///
/// root が与えられ、ディレクトリが存在すればフィンガープリントを計算する。
pub fn build_asset(function_logical_id: &str, code: &Path, root: Option<&Path>) -> Result<Asset> {
    let (bucket_parameter, key_parameter) = parameter_names(function_logical_id);
    let fingerprint = match root.map(|r| r.join(code)) {
        Some(dir) if dir.is_dir() => Some(fingerprint_dir(&dir)?),
        _ => None,
    };

    Ok(Asset {
        function: function_logical_id.to_string(),
        path: code.to_path_buf(),
        fingerprint,
        bucket_parameter,
        key_parameter,
    })
}

/// ディレクトリ配下の全ファイルの相対パスと内容からハッシュを計算
///
/// ファイルはパス順に処理するので、走査順に依存しない。
pub fn fingerprint_dir(dir: &Path) -> Result<String> {
    let mut files = Vec::new();
    collect_files(dir, &mut files)?;
    files.sort();

    let mut hasher = Sha256::new();
    for file in &files {
        let relative = file.strip_prefix(dir).unwrap_or(file);
        hasher.update(relative.to_string_lossy().replace('\\', "/").as_bytes());
        hasher.update([0u8]);
        let content = fs::read(file).map_err(|e| asset_error(file, e))?;
        hasher.update(&content);
        hasher.update([0u8]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).map_err(|e| asset_error(dir, e))? {
        let path = entry.map_err(|e| asset_error(dir, e))?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

fn asset_error(path: &Path, e: std::io::Error) -> SynthError {
    SynthError::Asset {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fingerprint_is_stable_and_content_sensitive() {
        let dir = tempdir().unwrap();
        let code = dir.path().join("resources/createCustomer");
        fs::create_dir_all(code.join("lib")).unwrap();
        fs::write(code.join("createCustomer.js"), "exports.main = async () => {}").unwrap();
        fs::write(code.join("lib/util.js"), "module.exports = {}").unwrap();

        let first = fingerprint_dir(&code).unwrap();
        assert_eq!(first, fingerprint_dir(&code).unwrap());
        assert_eq!(first.len(), 64);

        fs::write(code.join("lib/util.js"), "module.exports = { x: 1 }").unwrap();
        assert_ne!(first, fingerprint_dir(&code).unwrap());
    }

    #[test]
    fn test_build_asset_without_directory() {
        let asset = build_asset(
            "CreateCustomerLambda",
            Path::new("resources/createCustomer"),
            None,
        )
        .unwrap();
        assert_eq!(asset.bucket_parameter, "CreateCustomerLambdaCodeS3Bucket");
        assert_eq!(asset.key_parameter, "CreateCustomerLambdaCodeS3Key");
        assert!(asset.fingerprint.is_none());
        assert!(asset.default_key().is_none());
    }

    #[test]
    fn test_build_asset_with_directory() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("resources/provision")).unwrap();
        fs::write(dir.path().join("resources/provision/index.js"), "x").unwrap();

        let asset = build_asset(
            "ProvisionCustomer",
            Path::new("resources/provision"),
            Some(dir.path()),
        )
        .unwrap();
        let key = asset.default_key().unwrap();
        assert!(key.starts_with("assets/") && key.ends_with(".zip"));
    }
}
