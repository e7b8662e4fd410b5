//! CSV / JSON 输出。CSV 统一为带 BOM 的 UTF-8、`\r\n` 行尾。

use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::errors::ExportError;
use crate::flatten::{FLAT_COLUMNS, FlatRow};
use crate::table::TableMatrix;

pub const UTF8_BOM: &str = "\u{feff}";

/// 表格输出格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableFormat {
    #[default]
    Csv,
    Json,
}

impl TableFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TableFormat::Csv => "csv",
            TableFormat::Json => "json",
        }
    }
}

/// 文件名中的非法字符替换为 `_`，空名回退为 `TABLE`。
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if "\\/:*?\"<>|".contains(c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "TABLE".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `table_<布局>_grid_<序号>.<扩展名>`，序号从 1 开始。
pub fn table_file_name(layout: &str, index: usize, format: TableFormat) -> String {
    format!(
        "table_{}_grid_{index}.{}",
        sanitize_name(layout),
        format.extension()
    )
}

/// 浮点数的最短往返表示；整数值保留 `.0`。
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0.0".to_string();
    }
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// 含逗号、引号或换行的字段加引号，内部引号加倍。
pub fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

pub fn write_record<W, S>(writer: &mut W, fields: &[S]) -> std::io::Result<()>
where
    W: Write,
    S: AsRef<str>,
{
    for (index, field) in fields.iter().enumerate() {
        if index > 0 {
            writer.write_all(b",")?;
        }
        writer.write_all(csv_field(field.as_ref()).as_bytes())?;
    }
    writer.write_all(b"\r\n")
}

/// 写出扁平 CSV（含表头）。
pub fn write_flat_csv<W: Write>(mut writer: W, rows: &[FlatRow]) -> std::io::Result<()> {
    writer.write_all(UTF8_BOM.as_bytes())?;
    write_record(&mut writer, FLAT_COLUMNS.as_slice())?;
    for row in rows {
        write_record(&mut writer, row.to_record().as_slice())?;
    }
    writer.flush()
}

/// 写出表格矩阵 CSV（无表头）。
pub fn write_table_csv<W: Write>(mut writer: W, matrix: &TableMatrix) -> std::io::Result<()> {
    writer.write_all(UTF8_BOM.as_bytes())?;
    for row in matrix.rows() {
        write_record(&mut writer, row)?;
    }
    writer.flush()
}

pub fn write_table_json<W: Write>(mut writer: W, matrix: &TableMatrix) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(&mut writer, matrix)?;
    writer.write_all(b"\n").map_err(ExportError::Stream)?;
    writer.flush().map_err(ExportError::Stream)
}

pub fn save_flat_csv(path: &Path, rows: &[FlatRow]) -> Result<(), ExportError> {
    let writer = create(path)?;
    write_flat_csv(writer, rows).map_err(|source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), rows = rows.len(), "已写出扁平 CSV");
    Ok(())
}

pub fn save_table(path: &Path, matrix: &TableMatrix, format: TableFormat) -> Result<(), ExportError> {
    let writer = create(path)?;
    match format {
        TableFormat::Csv => write_table_csv(writer, matrix).map_err(|source| ExportError::Write {
            path: path.to_path_buf(),
            source,
        })?,
        TableFormat::Json => write_table_json(writer, matrix)?,
    }
    info!(
        path = %path.display(),
        rows = matrix.row_count(),
        cols = matrix.col_count(),
        "已写出表格"
    );
    Ok(())
}

fn create(path: &Path) -> Result<BufWriter<File>, ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ExportError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let file = File::create(path).map_err(|source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_use_shortest_form() {
        assert_eq!(format_number(1.0), "1.0");
        assert_eq!(format_number(-0.0), "0.0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_number(-12.345), "-12.345");
    }

    #[test]
    fn table_names_replace_reserved_characters() {
        assert_eq!(sanitize_name(" A/B:C "), "A_B_C");
        assert_eq!(sanitize_name("  "), "TABLE");
        assert_eq!(
            table_file_name("Model", 2, TableFormat::Json),
            "table_Model_grid_2.json"
        );
        assert_eq!(
            table_file_name("图纸<1>", 1, TableFormat::Csv),
            "table_图纸_1__grid_1.csv"
        );
    }

    #[test]
    fn fields_are_quoted_when_needed() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("两行\n文字"), "\"两行\n文字\"");
    }

    #[test]
    fn flat_csv_starts_with_bom_and_header() {
        let mut buffer = Vec::new();
        write_flat_csv(&mut buffer, &[FlatRow::default()]).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with(UTF8_BOM));
        let mut lines = text.trim_start_matches(UTF8_BOM).split("\r\n");
        assert_eq!(lines.next().map(|l| l.split(',').count()), Some(40));
        assert!(text.trim_start_matches(UTF8_BOM).starts_with("X,Y,Z,Layer,"));
        assert_eq!(lines.next().map(|l| l.split(',').count()), Some(40));
    }

    #[test]
    fn table_json_is_array_of_rows() {
        let matrix = TableMatrix::from_rows(vec![
            vec!["a".to_string(), "b".to_string()],
            vec![String::new(), "c".to_string()],
        ]);
        let mut buffer = Vec::new();
        write_table_json(&mut buffer, &matrix).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(value, serde_json::json!([["a", "b"], ["", "c"]]));
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("table.csv");
        let matrix = TableMatrix::from_rows(vec![vec!["桩型".to_string(), "1,2".to_string()]]);
        save_table(&path, &matrix, TableFormat::Csv).expect("save table");
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "\u{feff}桩型,\"1,2\"\r\n");
    }
}
