mod commands;
mod utils;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stackflow")]
#[command(about = "宣言する。合成する。スタックは、KDLになった。", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// ステージ指定（位置引数 または -s/--stage、STACKFLOW_STAGE 環境変数）
#[derive(Args, Debug, Clone)]
pub struct StageArgs {
    /// ステージ名 (dev, stg, prod)
    stage: Option<String>,
    /// ステージ名 (-s/--stage フラグ、STACKFLOW_STAGE 環境変数)
    #[arg(
        short = 's',
        long = "stage",
        env = "STACKFLOW_STAGE",
        conflicts_with = "stage",
        hide = true
    )]
    stage_flag: Option<String>,
}

impl StageArgs {
    pub fn resolve(self) -> Option<String> {
        self.stage.or(self.stage_flag)
    }
}

/// デプロイ先
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// CloudFormation
    Aws,
    /// プロセス内サンドボックス
    Local,
}

#[derive(Subcommand)]
enum Commands {
    /// 顧客オンボーディングのブループリントでプロジェクトを作成
    Init {
        /// 作成先ディレクトリ
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// 既存の stack.kdl を上書きする
        #[arg(short, long)]
        force: bool,
    },
    /// ブループリントを検証
    Validate {
        #[command(flatten)]
        stage: StageArgs,
    },
    /// CloudFormation テンプレートを合成
    Synth {
        #[command(flatten)]
        stage: StageArgs,
        /// 出力先ディレクトリ（デフォルトは設定の output_dir）
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// ファイルに書かず標準出力へ出す
        #[arg(long)]
        stdout: bool,
    },
    /// リソースの依存関係と配備順序を表示
    Graph {
        #[command(flatten)]
        stage: StageArgs,
    },
    /// デプロイ計画を表示
    Plan {
        #[command(flatten)]
        stage: StageArgs,
        /// デプロイ先
        #[arg(short, long, value_enum, default_value = "aws")]
        provider: ProviderKind,
        /// 関数コードのバケット
        #[arg(short, long)]
        bucket: Option<String>,
    },
    /// スタックをデプロイ
    Deploy {
        #[command(flatten)]
        stage: StageArgs,
        /// デプロイ先
        #[arg(short, long, value_enum, default_value = "aws")]
        provider: ProviderKind,
        /// 関数コードのバケット
        #[arg(short, long)]
        bucket: Option<String>,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// スタックを削除
    Destroy {
        #[command(flatten)]
        stage: StageArgs,
        /// デプロイ先
        #[arg(short, long, value_enum, default_value = "aws")]
        provider: ProviderKind,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// 記録済みのスタックと残存リソースを表示
    Status,
    /// サンドボックスで顧客登録の流れを実行
    Simulate {
        #[command(flatten)]
        stage: StageArgs,
        /// 登録する顧客名
        #[arg(short, long, default_value = "acme")]
        customer: String,
    },
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { dir, force } => commands::init::handle(&dir, force)?,
        Commands::Validate { stage } => commands::validate::handle(stage.resolve())?,
        Commands::Synth {
            stage,
            output,
            stdout,
        } => commands::synth::handle(stage.resolve(), output, stdout)?,
        Commands::Graph { stage } => commands::graph::handle(stage.resolve())?,
        Commands::Plan {
            stage,
            provider,
            bucket,
        } => commands::plan::handle(stage.resolve(), provider, bucket).await?,
        Commands::Deploy {
            stage,
            provider,
            bucket,
            yes,
        } => commands::deploy::handle(stage.resolve(), provider, bucket, yes).await?,
        Commands::Destroy {
            stage,
            provider,
            yes,
        } => commands::destroy::handle(stage.resolve(), provider, yes).await?,
        Commands::Status => commands::status::handle().await?,
        Commands::Simulate { stage, customer } => {
            commands::simulate::handle(stage.resolve(), &customer)?
        }
        Commands::Version => {
            println!("stackflow {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
