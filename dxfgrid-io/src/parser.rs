use std::collections::HashMap;

use dxfgrid_core::{
    document::{BlockDefinition, Document, Layer, LayoutKind},
    geometry::Point3,
};
use tracing::{debug, warn};

use crate::DxfError;
use crate::entities::{RawEntity, decode_entity};
use crate::reader::{DxfReader, parse_f64};

/// 当前激活图纸空间在未解析到 LAYOUT 名称时的显示名。
const ACTIVE_PAPER_NAME: &str = "Paper";

pub(crate) struct DxfParser<'a> {
    reader: DxfReader<'a>,
    /// `*Paper_Space` 对应的布局下标（ENTITIES 中 67=1 的实体归入此处）。
    active_paper: Option<usize>,
}

impl<'a> DxfParser<'a> {
    pub(crate) fn new(source: &'a str) -> Self {
        Self {
            reader: DxfReader::new(source),
            active_paper: None,
        }
    }

    pub(crate) fn parse(mut self) -> Result<Document, DxfError> {
        let mut document = Document::new();
        while let Some((code, value)) = self.reader.next_pair()? {
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "意外的组码 {code}（期望 0 表示 SECTION/EOF）"
                )));
            }
            match value.trim() {
                "SECTION" => {
                    let (name_code, name) = self
                        .reader
                        .next_pair()?
                        .ok_or_else(|| DxfError::invalid("SECTION 缺少名称（组码 2）"))?;
                    if name_code != 2 {
                        return Err(DxfError::invalid(format!(
                            "SECTION 名称使用了组码 {name_code}（期望 2）"
                        )));
                    }
                    match name.trim() {
                        "TABLES" => self.parse_tables(&mut document)?,
                        "BLOCKS" => self.parse_blocks(&mut document)?,
                        "ENTITIES" => self.parse_entities(&mut document)?,
                        "OBJECTS" => self.parse_objects(&mut document)?,
                        other => {
                            debug!(section = other, "跳过段");
                            self.skip_section()?;
                        }
                    }
                }
                "EOF" => break,
                unexpected => {
                    return Err(DxfError::invalid(format!(
                        "意外的标记 {unexpected}，期望 SECTION 或 EOF"
                    )));
                }
            }
        }
        Ok(document)
    }

    fn skip_section(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) if value.trim() == "ENDSEC" => break,
                Some(_) => continue,
                None => {
                    return Err(DxfError::invalid("SECTION 未找到 ENDSEC 终止标记"));
                }
            }
        }
        Ok(())
    }

    /// 读取实体列表直到遇到 `terminator`（已消费）。
    /// VERTEX/ATTRIB 附着到前一个实体，SEQEND 被丢弃。
    fn read_entity_list(
        &mut self,
        section: &str,
        terminator: &str,
    ) -> Result<Vec<RawEntity>, DxfError> {
        let mut entities: Vec<RawEntity> = Vec::new();
        loop {
            let (code, value) = self
                .reader
                .next_pair()?
                .ok_or_else(|| DxfError::invalid(format!("{section} 未找到 {terminator} 终止标记")))?;
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "{section} 遇到组码 {code}（期望 0 表示实体起始）"
                )));
            }
            let dxf_type = value.trim().to_string();
            if dxf_type == terminator {
                return Ok(entities);
            }
            let pairs = self.reader.read_body()?;
            match dxf_type.as_str() {
                "SEQEND" => {}
                "VERTEX" | "ATTRIB" => match entities.last_mut() {
                    Some(owner) if owner.accepts_child(&dxf_type) => {
                        owner.children.push(RawEntity::new(dxf_type, pairs));
                    }
                    _ => warn!(dxf_type = %dxf_type, "孤立的序列子记录，已忽略"),
                },
                _ => entities.push(RawEntity::new(dxf_type, pairs)),
            }
        }
    }

    fn parse_tables(&mut self, document: &mut Document) -> Result<(), DxfError> {
        loop {
            let (code, value) = self
                .reader
                .next_pair()?
                .ok_or_else(|| DxfError::invalid("TABLES 段提前结束"))?;
            if code != 0 {
                continue;
            }
            match value.trim() {
                "ENDSEC" => break,
                "LAYER" => {
                    let pairs = self.reader.read_body()?;
                    let mut name = None;
                    let mut visible = true;
                    for (code, value) in &pairs {
                        match code {
                            2 => name = Some(value.trim().to_string()),
                            62 => visible = value.trim().parse::<i32>().map_or(true, |c| c >= 0),
                            70 => {
                                if value.trim().parse::<i32>().is_ok_and(|flags| flags & 1 != 0) {
                                    visible = false;
                                }
                            }
                            _ => {}
                        }
                    }
                    if let Some(name) = name.filter(|name| !name.is_empty()) {
                        document.add_layer(Layer {
                            name,
                            is_visible: visible,
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_blocks(&mut self, document: &mut Document) -> Result<(), DxfError> {
        loop {
            let (code, value) = self
                .reader
                .next_pair()?
                .ok_or_else(|| DxfError::invalid("BLOCKS 段提前结束"))?;
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "BLOCKS 段遇到组码 {code}（期望 0 表示实体起始）"
                )));
            }
            match value.trim() {
                "ENDSEC" => break,
                "BLOCK" => self.parse_block_definition(document)?,
                _ => {
                    self.reader.read_body()?;
                }
            }
        }
        Ok(())
    }

    fn parse_block_definition(&mut self, document: &mut Document) -> Result<(), DxfError> {
        let header = RawEntity::new("BLOCK", self.reader.read_body()?);
        let mut name: Option<String> = None;
        let mut base = [0.0_f64; 3];
        let mut block_handle = None;
        let mut record_handle = None;
        let mut in_group = false;
        for (code, value) in &header.pairs {
            if *code == 102 {
                in_group = value.trim_start().starts_with('{');
                continue;
            }
            if in_group {
                continue;
            }
            match code {
                2 => name = Some(value.trim().to_string()),
                10 => base[0] = parse_f64(value, "BLOCK 基点 X")?,
                20 => base[1] = parse_f64(value, "BLOCK 基点 Y")?,
                30 => base[2] = parse_f64(value, "BLOCK 基点 Z")?,
                5 => block_handle = Some(value.trim().to_string()),
                330 if record_handle.is_none() => record_handle = Some(value.trim().to_string()),
                _ => {}
            }
        }
        let name = name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| DxfError::invalid("BLOCK 缺少名称（组码 2）"))?;

        let raw_entities = self.read_entity_list("BLOCK 定义", "ENDBLK")?;
        self.reader.read_body()?;

        let upper = name.to_ascii_uppercase();
        if upper == "*MODEL_SPACE" {
            return Ok(());
        }
        if upper.starts_with("*PAPER_SPACE") {
            let is_active = upper == "*PAPER_SPACE";
            let layout_name = if is_active {
                ACTIVE_PAPER_NAME.to_string()
            } else {
                name.clone()
            };
            let index = document.ensure_layout(&layout_name, LayoutKind::Paper);
            document.set_layout_block_record(index, record_handle);
            if is_active {
                self.active_paper = Some(index);
            }
            for raw in raw_entities.iter().filter(|raw| raw.dxf_type != "ATTDEF") {
                document.add_entity_to(index, decode_entity(raw));
            }
            return Ok(());
        }

        let mut definition = BlockDefinition::new(name, Point3::new(base[0], base[1], base[2]));
        definition.handle = block_handle;
        definition.record_handle = record_handle;
        definition.entities = raw_entities
            .iter()
            .filter(|raw| raw.dxf_type != "ATTDEF")
            .map(decode_entity)
            .collect();
        document.add_block_definition(definition);
        Ok(())
    }

    fn parse_entities(&mut self, document: &mut Document) -> Result<(), DxfError> {
        let raw_entities = self.read_entity_list("ENTITIES 段", "ENDSEC")?;
        for raw in &raw_entities {
            let entity = decode_entity(raw);
            if entity.header.paper_space {
                let index = match self.active_paper {
                    Some(index) => index,
                    None => {
                        let index = document.ensure_layout(ACTIVE_PAPER_NAME, LayoutKind::Paper);
                        self.active_paper = Some(index);
                        index
                    }
                };
                document.add_entity_to(index, entity);
            } else {
                document.add_entity(entity);
            }
        }
        Ok(())
    }

    /// 仅解析 LAYOUT 对象，用于给图纸空间布局命名。
    fn parse_objects(&mut self, document: &mut Document) -> Result<(), DxfError> {
        let mut names_by_record: HashMap<String, String> = HashMap::new();
        loop {
            let (code, value) = self
                .reader
                .next_pair()?
                .ok_or_else(|| DxfError::invalid("OBJECTS 段提前结束"))?;
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "OBJECTS 段遇到组码 {code}（期望 0 表示对象起始）"
                )));
            }
            match value.trim() {
                "ENDSEC" => break,
                "LAYOUT" => {
                    let pairs = self.reader.read_body()?;
                    if let Some((record, name)) = layout_record(&pairs) {
                        names_by_record.insert(record, name);
                    }
                }
                _ => {
                    self.reader.read_body()?;
                }
            }
        }
        for (record, name) in &names_by_record {
            document.rename_layout_by_record(record, name);
        }
        Ok(())
    }
}

/// 从 LAYOUT 对象中取出 (块记录句柄, 布局名)，两者都位于 `AcDbLayout` 子类标记之后。
fn layout_record(pairs: &[(i32, String)]) -> Option<(String, String)> {
    let marker = pairs
        .iter()
        .position(|(code, value)| *code == 100 && value.trim() == "AcDbLayout")?;
    let tail = &pairs[marker + 1..];
    let name = tail
        .iter()
        .find(|(code, _)| *code == 1)
        .map(|(_, value)| value.trim().to_string())?;
    let record = tail
        .iter()
        .find(|(code, _)| *code == 330)
        .map(|(_, value)| value.trim().to_string())?;
    Some((record, name))
}
