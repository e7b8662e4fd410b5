use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 指定配置文件路径的环境变量。
pub const CONFIG_ENV: &str = "DXFGRID_CONFIG";

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub flatten: FlattenConfig,
    #[serde(default)]
    pub table: TableConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 自动发现配置文件：优先读取环境变量 `DXFGRID_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// 命令行显式给出的路径优先，其余同 [`AppConfig::discover`]。
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => Self::discover(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let table = &self.table;
        let positive = [
            ("table.axis_tolerance", table.axis_tolerance),
            ("table.merge_tolerance", table.merge_tolerance),
            ("table.cluster_tolerance", table.cluster_tolerance),
            ("table.cluster_snap_tolerance", table.cluster_snap_tolerance),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{name} 必须为正数（当前 {value}）")));
            }
        }
        if !(table.edge_cover_ratio > 0.0 && table.edge_cover_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "table.edge_cover_ratio 必须位于 (0, 1]（当前 {}）",
                table.edge_cover_ratio
            )));
        }
        if self.flatten.precision > 12 {
            return Err(ConfigError::Invalid(format!(
                "flatten.precision 过大（当前 {}，上限 12）",
                self.flatten.precision
            )));
        }
        Ok(())
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 实体展平参数。
#[derive(Debug, Clone, Deserialize)]
pub struct FlattenConfig {
    #[serde(default = "FlattenConfig::default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "FlattenConfig::default_precision")]
    pub precision: u32,
}

impl FlattenConfig {
    fn default_max_depth() -> usize {
        10
    }

    fn default_precision() -> u32 {
        3
    }
}

impl Default for FlattenConfig {
    fn default() -> Self {
        Self {
            max_depth: Self::default_max_depth(),
            precision: Self::default_precision(),
        }
    }
}

/// 表格重建参数。
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    #[serde(default = "TableConfig::default_axis_tolerance")]
    pub axis_tolerance: f64,
    #[serde(default = "TableConfig::default_merge_tolerance")]
    pub merge_tolerance: f64,
    #[serde(default = "TableConfig::default_edge_cover_ratio")]
    pub edge_cover_ratio: f64,
    #[serde(default = "TableConfig::default_cluster_tolerance")]
    pub cluster_tolerance: f64,
    #[serde(default = "TableConfig::default_cluster_snap_tolerance")]
    pub cluster_snap_tolerance: f64,
    /// 隔离表格时过滤的图层名（不区分大小写）；空字符串表示不过滤。
    #[serde(default = "TableConfig::default_layer_filter")]
    pub layer_filter: String,
}

impl TableConfig {
    fn default_axis_tolerance() -> f64 {
        0.5
    }

    fn default_merge_tolerance() -> f64 {
        1.0
    }

    fn default_edge_cover_ratio() -> f64 {
        0.6
    }

    fn default_cluster_tolerance() -> f64 {
        2.0
    }

    fn default_cluster_snap_tolerance() -> f64 {
        0.5
    }

    fn default_layer_filter() -> String {
        "TEXT".to_string()
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            axis_tolerance: Self::default_axis_tolerance(),
            merge_tolerance: Self::default_merge_tolerance(),
            edge_cover_ratio: Self::default_edge_cover_ratio(),
            cluster_tolerance: Self::default_cluster_tolerance(),
            cluster_snap_tolerance: Self::default_cluster_snap_tolerance(),
            layer_filter: Self::default_layer_filter(),
        }
    }
}

/// DWG 转换器位置。
#[derive(Debug, Clone, Deserialize)]
pub struct ConverterConfig {
    #[serde(default)]
    pub libredwg_dir: Option<PathBuf>,
    #[serde(default = "ConverterConfig::default_executable")]
    pub executable: String,
}

impl ConverterConfig {
    fn default_executable() -> String {
        "dwg2dxf".to_string()
    }
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            libredwg_dir: None,
            executable: Self::default_executable(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("配置无效: {0}")]
    Invalid(String),
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reconstruction_constants() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.flatten.max_depth, 10);
        assert_eq!(cfg.flatten.precision, 3);
        assert_eq!(cfg.table.axis_tolerance, 0.5);
        assert_eq!(cfg.table.merge_tolerance, 1.0);
        assert_eq!(cfg.table.edge_cover_ratio, 0.6);
        assert_eq!(cfg.table.cluster_tolerance, 2.0);
        assert_eq!(cfg.table.cluster_snap_tolerance, 0.5);
        assert_eq!(cfg.table.layer_filter, "TEXT");
        assert_eq!(cfg.converter.executable, "dwg2dxf");
        assert!(cfg.converter.libredwg_dir.is_none());
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn load_from_temp_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(
            file,
            r#"
            [logging]
            level = "debug"

            [flatten]
            max_depth = 4

            [table]
            axis_tolerance = 0.25
            layer_filter = ""

            [converter]
            libredwg_dir = "/opt/libredwg"
            "#
        )
        .unwrap();

        let cfg = AppConfig::load(Some(file.path())).expect("load config");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.flatten.max_depth, 4);
        assert_eq!(cfg.flatten.precision, 3);
        assert_eq!(cfg.table.axis_tolerance, 0.25);
        assert_eq!(cfg.table.merge_tolerance, 1.0);
        assert!(cfg.table.layer_filter.is_empty());
        assert_eq!(
            cfg.converter
                .libredwg_dir
                .as_deref()
                .map(|p| p.to_string_lossy().to_string()),
            Some("/opt/libredwg".to_string())
        );
    }

    #[test]
    fn invalid_ratio_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "[table]\nedge_cover_ratio = 1.5").unwrap();
        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_toml_reports_path() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "[table\naxis_tolerance = ").unwrap();
        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_explicit_file_is_io_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
