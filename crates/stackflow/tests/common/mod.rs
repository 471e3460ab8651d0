#![allow(deprecated)]

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const STACKFLOW_ENV: [&str; 8] = [
    "STACKFLOW_STAGE",
    "STACKFLOW_CONFIG_PATH",
    "STACKFLOW_PROJECT_ROOT",
    "STACKFLOW_REGION",
    "STACKFLOW_PROFILE",
    "STACKFLOW_ACCOUNT_ID",
    "STACKFLOW_OUTPUT_DIR",
    "RUST_LOG",
];

/// 一時ディレクトリのプロジェクトと、隔離した設定ディレクトリ
pub struct TestProject {
    pub root: TempDir,
    pub config_home: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
            config_home: tempfile::tempdir().unwrap(),
        }
    }

    pub fn write_stack_kdl(&self, content: &str) {
        fs::write(self.root.path().join("stack.kdl"), content).unwrap();
    }

    #[allow(dead_code)]
    pub fn write_settings(&self, content: &str) {
        let dir = self.config_home.path().join("stackflow");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.yaml"), content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    /// プロジェクト内で実行するコマンド（環境変数は隔離済み）
    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("stackflow").unwrap();
        cmd.current_dir(self.root.path())
            .env("XDG_CONFIG_HOME", self.config_home.path())
            .env("HOME", self.config_home.path())
            .env("NO_COLOR", "1")
            .env_remove("CLICOLOR_FORCE");
        for name in STACKFLOW_ENV {
            cmd.env_remove(name);
        }
        cmd
    }
}
