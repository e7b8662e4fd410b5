//! 命令行各子命令的执行流程：准备输入、调用引擎、写出结果。

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use dxfgrid_config::AppConfig;
use dxfgrid_core::document::{Document, Layout};
use dxfgrid_engine::export::table_file_name;
use dxfgrid_engine::{
    FlattenOptions, TableFormat, TableMatrix, TableOptions, extract_inner_table, extract_tables,
    flatten_with, reconstruct_layout, save_flat_csv, save_table,
};
use dxfgrid_io::{ConverterSettings, DocumentLoader, DxfFacade, convert_dwg_to_dxf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn flatten_options(config: &AppConfig) -> FlattenOptions {
    FlattenOptions {
        max_depth: config.flatten.max_depth,
        precision: config.flatten.precision,
    }
}

pub fn table_options(config: &AppConfig) -> TableOptions {
    let table = &config.table;
    let filter = table.layer_filter.trim();
    TableOptions {
        axis_tolerance: table.axis_tolerance,
        merge_tolerance: table.merge_tolerance,
        edge_cover_ratio: table.edge_cover_ratio,
        cluster_tolerance: table.cluster_tolerance,
        cluster_snap_tolerance: table.cluster_snap_tolerance,
        layer_filter: (!filter.is_empty()).then(|| filter.to_string()),
    }
}

fn converter_settings(config: &AppConfig) -> ConverterSettings {
    ConverterSettings {
        libredwg_dir: config.converter.libredwg_dir.clone(),
        executable: config.converter.executable.clone(),
    }
}

fn is_dwg(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("dwg"))
}

/// DWG 输入先转换；同名 DXF 已存在时直接复用。
fn resolve_input(input: &Path, config: &AppConfig) -> anyhow::Result<PathBuf> {
    if !is_dwg(input) {
        return Ok(input.to_path_buf());
    }
    let dxf = input.with_extension("dxf");
    if dxf.is_file() {
        info!(dxf = %dxf.display(), "复用已有的 DXF");
        return Ok(dxf);
    }
    convert(input, &dxf, config)
}

fn load_document(input: &Path, config: &AppConfig) -> anyhow::Result<Document> {
    let path = resolve_input(input, config)?;
    let document = DxfFacade::new()
        .load(&path)
        .with_context(|| format!("加载 {} 失败", path.display()))?;
    info!(
        path = %path.display(),
        layouts = document.layouts().count(),
        entities = document.entities().count(),
        "文档已加载"
    );
    Ok(document)
}

fn select_layout<'d>(document: &'d Document, name: Option<&str>) -> anyhow::Result<&'d Layout> {
    match name {
        None => Ok(document.model_space()),
        Some(name) => match document.layout(name) {
            Some(layout) => Ok(layout),
            None => {
                let known: Vec<&str> = document.layouts().map(|l| l.name.as_str()).collect();
                bail!("布局 {name:?} 不存在，可用布局：{}", known.join(", "))
            }
        },
    }
}

pub fn convert(input: &Path, output: &Path, config: &AppConfig) -> anyhow::Result<PathBuf> {
    convert_dwg_to_dxf(input, output, &converter_settings(config))
        .with_context(|| format!("转换 {} 失败", input.display()))
}

pub fn flatten_file(input: &Path, output: &Path, config: &AppConfig) -> anyhow::Result<()> {
    let document = load_document(input, config)?;
    let flattened = flatten_with(&document, flatten_options(config));
    save_flat_csv(output, &flattened.rows)
        .with_context(|| format!("写出 {} 失败", output.display()))?;
    Ok(())
}

pub fn table_file(
    input: &Path,
    output: &Path,
    layout: Option<&str>,
    isolate: bool,
    format: TableFormat,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let document = load_document(input, config)?;
    let layout = select_layout(&document, layout)?;
    let options = table_options(config);
    let matrix = if isolate {
        match extract_inner_table(&document, layout, &options) {
            Some(table) => table.matrix,
            None => {
                warn!(layout = %layout.name, "没有检测到可隔离的表格");
                TableMatrix::empty()
            }
        }
    } else {
        reconstruct_layout(&document, layout, &options)
    };
    if matrix.is_empty() {
        warn!(layout = %layout.name, "未能重建网格，输出空表");
    }
    save_table(output, &matrix, format).with_context(|| format!("写出 {} 失败", output.display()))
}

/// 逐布局检测表格并写出，返回生成的文件列表。
pub fn tables_file(
    input: &Path,
    out_dir: &Path,
    layout: Option<&str>,
    format: TableFormat,
    config: &AppConfig,
) -> anyhow::Result<Vec<PathBuf>> {
    let document = load_document(input, config)?;
    let layouts: Vec<&Layout> = match layout {
        Some(name) => vec![select_layout(&document, Some(name))?],
        None => document.layouts().collect(),
    };
    let options = table_options(config);

    let mut written = Vec::new();
    for layout in layouts {
        for (index, table) in extract_tables(&document, layout, &options).iter().enumerate() {
            let path = out_dir.join(table_file_name(&layout.name, index + 1, format));
            save_table(&path, &table.matrix, format)
                .with_context(|| format!("写出 {} 失败", path.display()))?;
            written.push(path);
        }
    }
    if written.is_empty() {
        warn!(input = %input.display(), "没有检测到任何表格");
    }
    Ok(written)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// 展平目录下的全部 `.dxf`，输出目录保持相对路径结构。单个文件失败不影响其余文件。
pub fn batch_flatten(dir: &Path, out_dir: &Path, config: &AppConfig) -> anyhow::Result<BatchSummary> {
    if !dir.is_dir() {
        bail!("{} 不是目录", dir.display());
    }
    let mut summary = BatchSummary::default();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("遍历 {} 失败", dir.display()))?;
        let path = entry.path();
        let is_dxf = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("dxf"));
        if !entry.file_type().is_file() || !is_dxf {
            continue;
        }
        let relative = path.strip_prefix(dir).unwrap_or(path);
        let output = out_dir.join(relative).with_extension("csv");
        match flatten_file(path, &output, config) {
            Ok(()) => summary.succeeded += 1,
            Err(err) => {
                warn!(path = %path.display(), error = %format!("{err:#}"), "展平失败，继续处理其余文件");
                summary.failed += 1;
            }
        }
    }
    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        "批量展平完成"
    );
    Ok(summary)
}
