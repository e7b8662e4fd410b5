use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use dxfgrid_core::document::Document;
use thiserror::Error;
use tracing::{debug, warn};

pub mod converter;
mod entities;
mod parser;
mod reader;

pub use converter::{ConverterSettings, convert_dwg_to_dxf};

use parser::DxfParser;

/// 二进制 DXF 的文件头标记。
const BINARY_DXF_SENTINEL: &[u8] = b"AutoCAD Binary DXF";

#[derive(Debug, Error)]
pub enum IoError {
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid document structure: {0}")]
    InvalidDocument(String),
    #[error("DWG conversion failed: {0}")]
    Converter(String),
}

impl IoError {
    /// 是否为文档结构层面的错误（命令行据此选择退出码）。
    pub fn is_document_error(&self) -> bool {
        matches!(
            self,
            IoError::InvalidDocument(_) | IoError::UnsupportedFeature(_)
        )
    }
}

pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<Document, IoError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DxfFacade;

impl DxfFacade {
    pub fn new() -> Self {
        Self
    }

    /// 从内存中的 DXF 文本解析文档。
    pub fn parse_str(&self, source: &str) -> Result<Document, IoError> {
        let source = source.strip_prefix('\u{feff}').unwrap_or(source);
        DxfParser::new(source).parse().map_err(IoError::from)
    }
}

impl DocumentLoader for DxfFacade {
    fn load(&self, path: &Path) -> Result<Document, IoError> {
        let bytes = fs::read(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        if bytes.starts_with(BINARY_DXF_SENTINEL) {
            return Err(IoError::UnsupportedFeature(format!(
                "二进制 DXF 暂不支持：{}",
                path.display()
            )));
        }
        let text = match String::from_utf8_lossy(&bytes) {
            Cow::Borrowed(text) => Cow::Borrowed(text),
            Cow::Owned(text) => {
                warn!(path = %path.display(), "文件不是有效的 UTF-8，已按替换字符解码");
                Cow::Owned(text)
            }
        };
        let document = self.parse_str(&text)?;
        debug!(
            path = %path.display(),
            layouts = document.layouts().count(),
            blocks = document.blocks().count(),
            "DXF 文档加载完成"
        );
        Ok(document)
    }
}

#[derive(Debug)]
pub(crate) enum DxfError {
    Invalid { message: String },
}

impl DxfError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DxfError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DxfError::Invalid { message } => f.write_str(message),
        }
    }
}

impl From<DxfError> for IoError {
    fn from(err: DxfError) -> Self {
        match err {
            DxfError::Invalid { message } => IoError::InvalidDocument(message),
        }
    }
}
