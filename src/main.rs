use anyhow::Result;
use assetsync_lib::commands::{connection, log, settings, transfer, tree};
use assetsync_lib::config::{RemoteConfig, RemoteType};
use assetsync_lib::logging::init_logging;
use assetsync_lib::AppState;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "assetsync")]
#[command(about = "本地目录与云端网盘的树形对账与同步", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置目录（默认使用系统应用配置目录）
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// 同时输出日志到控制台
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 打印合并后的树
    Tree {
        /// 最多显示的层数
        #[arg(short, long)]
        depth: Option<usize>,

        /// 显示同步状态
        #[arg(short, long)]
        status: bool,
    },

    /// 显示单个节点的各列
    Status {
        /// 节点路径，例如 Projects/Alpha
        path: String,
    },

    /// 下载选中的节点（递归）
    Download {
        #[arg(required = true)]
        paths: Vec<String>,

        /// 覆盖本地修改时不再确认
        #[arg(short, long)]
        yes: bool,
    },

    /// 上传单个文件
    Upload { path: String },

    /// 导出树为 JSON
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 配置管理
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// 检查远程连接
    Check,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// 显示当前配置
    Show,

    /// 设置下载目录
    SetDownloadDir { path: String },

    /// 设置远程存储
    Remote {
        #[arg(value_enum)]
        typ: RemoteKind,

        /// 根节点（可重复）
        #[arg(long = "root", required = true)]
        roots: Vec<String>,

        #[arg(long)]
        client_id: Option<String>,
        #[arg(long)]
        client_secret: Option<String>,
        #[arg(long)]
        credentials: Option<String>,
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        endpoint: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        bucket: Option<String>,
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        access_key: Option<String>,
        #[arg(long)]
        secret_key: Option<String>,
        #[arg(long)]
        prefix: Option<String>,
    },

    /// 日志设置
    Log {
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        max_size_mb: Option<u32>,
        #[arg(long)]
        level: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RemoteKind {
    Gdrive,
    Fs,
    Webdav,
    S3,
}

impl From<RemoteKind> for RemoteType {
    fn from(kind: RemoteKind) -> Self {
        match kind {
            RemoteKind::Gdrive => RemoteType::Gdrive,
            RemoteKind::Fs => RemoteType::Fs,
            RemoteKind::Webdav => RemoteType::WebDav,
            RemoteKind::S3 => RemoteType::S3,
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli, state: AppState) -> Result<()> {
    match cli.command {
        Commands::Tree { depth, status } => {
            let options = tree::TreeOptions {
                max_depth: depth,
                show_status: status,
            };
            print!("{}", tree::show_tree(&state, &options).await?);
        }
        Commands::Status { path } => {
            for (header, value) in tree::show_status(&state, &path).await? {
                println!("{:<10} {}", header, value);
            }
        }
        Commands::Download { paths, yes } => {
            let reports = transfer::download(&state, &paths, yes).await?;
            let all_ok = reports.iter().all(|(_, r)| r.is_success());
            let summary: Vec<_> = reports
                .iter()
                .map(|(path, report)| serde_json::json!({ "path": path, "report": report }))
                .collect();
            print_json(&summary)?;
            if !all_ok {
                anyhow::bail!("部分节点下载失败");
            }
        }
        Commands::Upload { path } => {
            let entry = transfer::upload(&state, &path).await?;
            print_json(&entry)?;
        }
        Commands::Export { output } => {
            if let Some(content) = tree::export_tree(&state, output.as_deref()).await? {
                println!("{}", content);
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => print_json(&settings::show_config(&state)?)?,
            ConfigAction::SetDownloadDir { path } => {
                let root = settings::set_download_dir(&state, &path)?;
                println!("下载目录: {}", root.display());
            }
            ConfigAction::Remote {
                typ,
                roots,
                client_id,
                client_secret,
                credentials,
                path,
                endpoint,
                username,
                password,
                bucket,
                region,
                access_key,
                secret_key,
                prefix,
            } => {
                let mut remote = RemoteConfig::new(typ.into());
                remote.root_ids = roots;
                remote.client_id = client_id;
                remote.client_secret = client_secret;
                remote.credentials_path = credentials;
                remote.path = path;
                remote.endpoint = endpoint;
                remote.username = username;
                remote.password = password;
                remote.bucket = bucket;
                remote.region = region;
                remote.access_key = access_key;
                remote.secret_key = secret_key;
                remote.prefix = prefix;
                settings::set_remote(&state, &remote)?;
                println!("远程存储配置已保存");
            }
            ConfigAction::Log {
                enabled,
                max_size_mb,
                level,
            } => {
                let config = log::set_log_config(&state, enabled, max_size_mb, level)?;
                print_json(&config)?;
                println!("日志目录: {}", log::log_location(&state).display());
            }
        },
        Commands::Check => {
            let result = connection::test_connection(&state).await?;
            print_json(&result)?;
            if !result.success {
                anyhow::bail!(result.message);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let state = AppState::new(cli.config_dir.clone())?;

    // guard 需要存活到程序结束
    let _guard = init_logging(&state.config_dir, cli.verbose);

    let result = run(cli, state).await;
    if let Err(e) = &result {
        tracing::error!("命令执行失败: {:#}", e);
    }
    result
}
