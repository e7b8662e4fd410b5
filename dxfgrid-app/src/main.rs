use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use dxfgrid_config::{AppConfig, ConfigError};
use dxfgrid_engine::TableFormat;
use dxfgrid_io::IoError;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

mod pipeline;

/// DXF 实体展平与表格网格重建。
#[derive(Parser, Debug)]
#[command(name = "dxfgrid", version, about)]
struct Cli {
    /// 配置文件路径（默认读取 DXFGRID_CONFIG 或 ./config/default.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 把全部实体展平为一张 CSV
    Flatten {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 从一个布局重建表格
    Table {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// 布局名，默认模型空间
        #[arg(long)]
        layout: Option<String>,
        /// 先按线段聚类挑出内层表格再重建
        #[arg(long)]
        isolate: bool,
        #[arg(long, value_enum, default_value_t = FormatArg::Csv)]
        format: FormatArg,
    },
    /// 检测每个布局中的全部表格，逐个输出
    Tables {
        input: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
        #[arg(long)]
        layout: Option<String>,
        #[arg(long, value_enum, default_value_t = FormatArg::Csv)]
        format: FormatArg,
    },
    /// 展平目录下的全部 DXF
    Batch {
        dir: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// 调用 dwg2dxf 把 DWG 转为 DXF
    Convert {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Csv,
    Json,
}

impl From<FormatArg> for TableFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Csv => TableFormat::Csv,
            FormatArg::Json => TableFormat::Json,
        }
    }
}

/// 文档结构错误。
const EXIT_DOCUMENT: u8 = 3;
/// 其余失败（读写、转换、参数）。
const EXIT_FAILURE: u8 = 4;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = load_configuration(cli.config.as_deref());
    init_logging(&config);

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "执行失败");
            eprintln!("错误：{err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn run(command: Command, config: &AppConfig) -> anyhow::Result<()> {
    match command {
        Command::Flatten { input, output } => {
            let output = output.unwrap_or_else(|| sibling(&input, "_flat", "csv"));
            pipeline::flatten_file(&input, &output, config)
        }
        Command::Table {
            input,
            output,
            layout,
            isolate,
            format,
        } => {
            let format = TableFormat::from(format);
            let output = output.unwrap_or_else(|| sibling(&input, "_table", format.extension()));
            pipeline::table_file(&input, &output, layout.as_deref(), isolate, format, config)
        }
        Command::Tables {
            input,
            out_dir,
            layout,
            format,
        } => {
            let written =
                pipeline::tables_file(&input, &out_dir, layout.as_deref(), format.into(), config)?;
            info!(count = written.len(), dir = %out_dir.display(), "表格输出完成");
            for path in written {
                println!("{}", path.display());
            }
            Ok(())
        }
        Command::Batch { dir, out_dir } => {
            let summary = pipeline::batch_flatten(&dir, &out_dir, config)?;
            println!("{} 个文件成功，{} 个失败", summary.succeeded, summary.failed);
            if summary.failed > 0 {
                anyhow::bail!("{} 个文件展平失败", summary.failed);
            }
            Ok(())
        }
        Command::Convert { input, output } => {
            let output = output.unwrap_or_else(|| input.with_extension("dxf"));
            let produced = pipeline::convert(&input, &output, config)?;
            println!("{}", produced.display());
            Ok(())
        }
    }
}

/// 在输入旁生成 `<stem><suffix>.<ext>`。
fn sibling(input: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{stem}{suffix}.{extension}"))
}

fn exit_code(err: &anyhow::Error) -> u8 {
    let document_error = err.chain().any(|cause| {
        cause
            .downcast_ref::<IoError>()
            .is_some_and(IoError::is_document_error)
    });
    if document_error {
        EXIT_DOCUMENT
    } else {
        EXIT_FAILURE
    }
}

fn load_configuration(explicit: Option<&Path>) -> AppConfig {
    AppConfig::load(explicit).unwrap_or_else(|err| {
        match &err {
            ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                warn!(path = %path.display(), error = %err, "加载配置失败，使用内建默认值");
            }
            ConfigError::Invalid(_) | ConfigError::Context { .. } => {
                warn!(error = %err, "加载配置失败，使用内建默认值");
            }
        }
        eprintln!("警告：{err}，使用内建默认配置");
        AppConfig::default()
    })
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    // 测试或嵌入场景下可能已有全局订阅者
    subscriber.try_init().ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_can_be_initialised_twice() {
        let config = AppConfig::default();
        init_logging(&config);
        init_logging(&config);
    }

    #[test]
    fn sibling_keeps_directory_and_appends_suffix() {
        let path = sibling(Path::new("plans/road.dxf"), "_table", "json");
        assert_eq!(path, Path::new("plans/road_table.json"));
    }
}
