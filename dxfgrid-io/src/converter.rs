//! 通过外部 LibreDWG `dwg2dxf` 将 DWG 转换为 DXF。

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::IoError;

/// 转换器位置设置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterSettings {
    /// LibreDWG 安装目录（可执行文件位于其中或其 `bin/` 下）。
    pub libredwg_dir: Option<PathBuf>,
    /// 可执行文件名，目录中找不到时交给 PATH 解析。
    pub executable: String,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            libredwg_dir: None,
            executable: "dwg2dxf".to_string(),
        }
    }
}

impl ConverterSettings {
    /// 解析实际要执行的程序路径。
    pub fn locate(&self) -> PathBuf {
        if let Some(dir) = &self.libredwg_dir {
            let names = [
                self.executable.clone(),
                format!("{}{}", self.executable, std::env::consts::EXE_SUFFIX),
            ];
            for base in [dir.clone(), dir.join("bin")] {
                for name in &names {
                    let candidate = base.join(name);
                    if candidate.is_file() {
                        return candidate;
                    }
                }
            }
        }
        PathBuf::from(&self.executable)
    }
}

/// 运行 `dwg2dxf` 并把结果放到 `dxf_out`；返回最终的 DXF 路径。
pub fn convert_dwg_to_dxf(
    dwg: &Path,
    dxf_out: &Path,
    settings: &ConverterSettings,
) -> Result<PathBuf, IoError> {
    if !dwg.is_file() {
        return Err(IoError::Converter(format!(
            "输入 DWG 不存在：{}",
            dwg.display()
        )));
    }
    if let Some(parent) = dxf_out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| IoError::WriteError {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let program = settings.locate();
    info!(program = %program.display(), input = %dwg.display(), "运行 DWG 转换器");
    let output = Command::new(&program)
        .arg(dwg)
        .output()
        .map_err(|err| {
            IoError::Converter(format!("无法启动 {}：{err}", program.display()))
        })?;
    if !output.stdout.is_empty() {
        debug!(stdout = %String::from_utf8_lossy(&output.stdout), "转换器输出");
    }
    if !output.status.success() {
        return Err(IoError::Converter(format!(
            "{} 退出码 {:?}：{}",
            program.display(),
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let produced = output_candidates(dwg, &program)
        .into_iter()
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            IoError::Converter(format!("转换器未生成 {} 对应的 DXF", dwg.display()))
        })?;
    move_into_place(&produced, dxf_out)?;
    info!(output = %dxf_out.display(), "DWG 转换完成");
    Ok(dxf_out.to_path_buf())
}

/// 转换器可能写出结果的位置：输入旁、可执行文件旁、当前目录。
fn output_candidates(dwg: &Path, program: &Path) -> Vec<PathBuf> {
    let file_name = dwg.with_extension("dxf");
    let mut candidates = vec![file_name.clone()];
    if let Some(name) = file_name.file_name() {
        if let Some(dir) = program.parent().filter(|p| !p.as_os_str().is_empty()) {
            candidates.push(dir.join(name));
        }
        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd.join(name));
        }
    }
    candidates
}

fn move_into_place(found: &Path, target: &Path) -> Result<(), IoError> {
    let same = match (fs::canonicalize(found), fs::canonicalize(target)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if same {
        return Ok(());
    }
    if fs::rename(found, target).is_ok() {
        return Ok(());
    }
    // 跨文件系统时退化为复制后删除
    fs::copy(found, target).map_err(|source| IoError::WriteError {
        path: target.to_path_buf(),
        source,
    })?;
    fs::remove_file(found).map_err(|source| IoError::WriteError {
        path: found.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_falls_back_to_path_lookup() {
        let settings = ConverterSettings {
            libredwg_dir: Some(PathBuf::from("/nonexistent/libredwg")),
            executable: "dwg2dxf".to_string(),
        };
        assert_eq!(settings.locate(), PathBuf::from("dwg2dxf"));
    }

    #[test]
    fn locate_prefers_bin_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let exe = bin.join("dwg2dxf");
        fs::write(&exe, b"").unwrap();
        let settings = ConverterSettings {
            libredwg_dir: Some(dir.path().to_path_buf()),
            executable: "dwg2dxf".to_string(),
        };
        assert_eq!(settings.locate(), exe);
    }

    #[test]
    fn missing_input_is_converter_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let result = convert_dwg_to_dxf(
            &dir.path().join("absent.dwg"),
            &dir.path().join("out.dxf"),
            &ConverterSettings::default(),
        );
        assert!(matches!(result, Err(IoError::Converter(_))));
    }
}
