use crate::DxfError;

/// 组码/值成对读取器，支持回退一个 pair。
pub(crate) struct DxfReader<'a> {
    lines: std::str::Lines<'a>,
    buffer: Option<(i32, String)>,
    line_number: usize,
}

impl<'a> DxfReader<'a> {
    pub(crate) fn new(source: &'a str) -> Self {
        Self {
            lines: source.lines(),
            buffer: None,
            line_number: 0,
        }
    }

    pub(crate) fn next_pair(&mut self) -> Result<Option<(i32, String)>, DxfError> {
        if let Some(pair) = self.buffer.take() {
            return Ok(Some(pair));
        }

        let code_line = loop {
            match self.lines.next() {
                Some(line) => {
                    self.line_number += 1;
                    if !line.trim().is_empty() {
                        break line;
                    }
                }
                None => return Ok(None),
            }
        };

        let value_line = match self.lines.next() {
            Some(line) => {
                self.line_number += 1;
                line
            }
            None => {
                return Err(DxfError::invalid(format!(
                    "文件在第 {} 行结束，缺少与组码对应的值行",
                    self.line_number
                )));
            }
        };

        let code = code_line.trim().parse::<i32>().map_err(|_| {
            DxfError::invalid(format!(
                "第 {} 行的组码 \"{}\" 无法解析为整数",
                self.line_number - 1,
                code_line.trim()
            ))
        })?;
        let value = value_line.trim_end_matches('\r').to_string();
        Ok(Some((code, value)))
    }

    pub(crate) fn put_back(&mut self, pair: (i32, String)) {
        debug_assert!(self.buffer.is_none(), "DXF pair 只能回退一次");
        self.buffer = Some(pair);
    }

    /// 读取实体主体（直到下一个组码 0，不消费该组码）。
    pub(crate) fn read_body(&mut self) -> Result<Vec<(i32, String)>, DxfError> {
        let mut pairs = Vec::new();
        loop {
            match self.next_pair()? {
                Some((0, value)) => {
                    self.put_back((0, value));
                    break;
                }
                Some(pair) => pairs.push(pair),
                None => break,
            }
        }
        Ok(pairs)
    }
}

pub(crate) fn parse_f64(raw: &str, context: &str) -> Result<f64, DxfError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

pub(crate) fn parse_i32(raw: &str, context: &str) -> Result<i32, DxfError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

pub(crate) fn parse_i16(raw: &str, context: &str) -> Result<i16, DxfError> {
    let value = parse_i32(raw, context)?;
    i16::try_from(value)
        .map_err(|_| DxfError::invalid(format!("{context} 超出 i16 范围（值：{value}）")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_pairs_and_put_back() {
        let mut reader = DxfReader::new("  0\r\nSECTION\r\n  2\r\nENTITIES\r\n");
        let first = reader.next_pair().unwrap().unwrap();
        assert_eq!(first, (0, "SECTION".to_string()));
        reader.put_back(first.clone());
        assert_eq!(reader.next_pair().unwrap(), Some(first));
        assert_eq!(reader.next_pair().unwrap(), Some((2, "ENTITIES".to_string())));
        assert_eq!(reader.next_pair().unwrap(), None);
    }

    #[test]
    fn malformed_code_is_invalid() {
        let mut reader = DxfReader::new("abc\nLINE\n");
        assert!(matches!(reader.next_pair(), Err(DxfError::Invalid { .. })));
    }

    #[test]
    fn truncated_pair_is_invalid() {
        let mut reader = DxfReader::new("0\nSECTION\n2");
        reader.next_pair().unwrap();
        assert!(reader.next_pair().is_err());
    }
}
