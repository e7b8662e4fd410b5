//! 实体展平：遍历各布局的实体（含块参照递归展开），输出统一列结构的扁平行。

use std::collections::HashMap;

use dxfgrid_core::document::{BlockReference, Document, Entity, EntityKind, Hatch, HatchEdge};
use dxfgrid_core::geometry::{Point2, Point3};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::FlattenError;
use crate::export::format_number;

/// 扁平 CSV 的列名，顺序固定。
pub const FLAT_COLUMNS: [&str; 40] = [
    "X",
    "Y",
    "Z",
    "Layer",
    "SubClass",
    "Linetype",
    "Text",
    "GroupId",
    "ModuleId",
    "EntityHandle",
    "OwnerHandle",
    "VertexIndex",
    "Bulge",
    "StartWidth",
    "EndWidth",
    "StartX",
    "StartY",
    "StartZ",
    "EndX",
    "EndY",
    "EndZ",
    "CenterX",
    "CenterY",
    "CenterZ",
    "Radius",
    "StartAngle",
    "EndAngle",
    "IsClosed",
    "HatchPatternName",
    "HatchPatternScale",
    "HatchPatternAngle",
    "HatchSolid",
    "HatchPathIndex",
    "HatchPathIsHole",
    "HatchPathType",
    "Space",
    "ModuleFather",
    "ModuleNowID",
    "ModuleRoot",
    "ModuleName",
];

pub type Coord = [f64; 3];

/// 展平参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlattenOptions {
    /// INSERT 嵌套展开的最大深度。
    pub max_depth: usize,
    /// 坐标保留的小数位数。
    pub precision: u32,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            max_depth: 10,
            precision: 3,
        }
    }
}

/// 填充图案字段。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HatchPattern {
    pub name: String,
    pub scale: Option<f64>,
    pub angle: Option<f64>,
    pub is_solid: bool,
}

/// 填充边界路径字段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HatchPathInfo {
    pub index: usize,
    pub is_hole: bool,
    pub is_external: bool,
}

impl HatchPathInfo {
    pub fn path_type(&self) -> &'static str {
        if self.is_external {
            "EXTERNAL"
        } else {
            "INTERNAL"
        }
    }
}

/// 块嵌套关系：直接父级、当前块实例与顶层祖先。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModuleLink {
    pub father: Option<u64>,
    pub now: u64,
    pub root: u64,
}

/// 一条扁平行。缺省字段输出为空串。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlatRow {
    pub position: Option<Coord>,
    pub layer: String,
    pub subclass: String,
    pub linetype: String,
    pub text: String,
    pub group_id: Option<u64>,
    pub module_id: Option<u64>,
    pub handle: String,
    pub owner: String,
    pub vertex_index: Option<usize>,
    pub bulge: Option<f64>,
    pub start_width: Option<f64>,
    pub end_width: Option<f64>,
    pub start: Option<Coord>,
    pub end: Option<Coord>,
    pub center: Option<Coord>,
    pub radius: Option<f64>,
    pub start_angle: Option<f64>,
    pub end_angle: Option<f64>,
    pub is_closed: Option<bool>,
    pub hatch: Option<HatchPattern>,
    pub hatch_path: Option<HatchPathInfo>,
    pub space: String,
    pub module_link: Option<ModuleLink>,
    pub module_name: String,
}

impl FlatRow {
    /// 按 [`FLAT_COLUMNS`] 的顺序输出字段文本。
    pub fn to_record(&self) -> Vec<String> {
        let mut record = Vec::with_capacity(FLAT_COLUMNS.len());
        push_coord(&mut record, self.position);
        record.push(self.layer.clone());
        record.push(self.subclass.clone());
        record.push(self.linetype.clone());
        record.push(self.text.clone());
        record.push(integer(self.group_id));
        record.push(integer(self.module_id));
        record.push(self.handle.clone());
        record.push(self.owner.clone());
        record.push(integer(self.vertex_index));
        record.push(number(self.bulge));
        record.push(number(self.start_width));
        record.push(number(self.end_width));
        push_coord(&mut record, self.start);
        push_coord(&mut record, self.end);
        push_coord(&mut record, self.center);
        record.push(number(self.radius));
        record.push(number(self.start_angle));
        record.push(number(self.end_angle));
        record.push(flag(self.is_closed));
        match &self.hatch {
            Some(pattern) => {
                record.push(pattern.name.clone());
                record.push(number(pattern.scale));
                record.push(number(pattern.angle));
                record.push(flag(Some(pattern.is_solid)));
            }
            None => record.extend(std::iter::repeat_n(String::new(), 4)),
        }
        match &self.hatch_path {
            Some(path) => {
                record.push(path.index.to_string());
                record.push(flag(Some(path.is_hole)));
                record.push(path.path_type().to_string());
            }
            None => record.extend(std::iter::repeat_n(String::new(), 3)),
        }
        record.push(self.space.clone());
        match self.module_link {
            Some(link) => {
                record.push(integer(link.father));
                record.push(link.now.to_string());
                record.push(link.root.to_string());
            }
            None => record.extend(std::iter::repeat_n(String::new(), 3)),
        }
        record.push(self.module_name.clone());
        record
    }
}

fn push_coord(record: &mut Vec<String>, coord: Option<Coord>) {
    match coord {
        Some(values) => record.extend(values.iter().map(|value| format_number(*value))),
        None => record.extend(std::iter::repeat_n(String::new(), 3)),
    }
}

fn integer<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn number(value: Option<f64>) -> String {
    value.map(format_number).unwrap_or_default()
}

fn flag(value: Option<bool>) -> String {
    match value {
        Some(true) => "1".to_string(),
        Some(false) => "0".to_string(),
        None => String::new(),
    }
}

/// 字符串键到递增整数的映射，编号从 1 开始，同键复用。
#[derive(Debug, Clone)]
pub struct IdAllocator {
    ids: HashMap<String, u64>,
    next: u64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            ids: HashMap::new(),
            next: 1,
        }
    }

    pub fn assign(&mut self, key: &str) -> u64 {
        if let Some(id) = self.ids.get(key) {
            return *id;
        }
        let id = self.next;
        self.next += 1;
        self.ids.insert(key.to_string(), id);
        id
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<u64> {
        self.ids.get(key).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// 下一个待分配的编号，配合 [`IdAllocator::rollback`] 使用。
    #[inline]
    pub fn mark(&self) -> u64 {
        self.next
    }

    /// 撤销 `mark` 之后分配的全部编号。
    pub fn rollback(&mut self, mark: u64) {
        if self.next > mark {
            self.ids.retain(|_, id| *id < mark);
            self.next = mark;
        }
    }
}

/// [`FlattenContext::checkpoint`] 记录的编号位置。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    groups: u64,
    modules: u64,
    last_insert: u64,
}

/// 单次展平的编号状态。分组键包含图层名，模块键不包含。
#[derive(Debug, Default)]
pub struct FlattenContext {
    groups: IdAllocator,
    modules: IdAllocator,
    last_insert: u64,
    module_names: HashMap<u64, String>,
}

impl FlattenContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_id(&mut self, layer: &str, raw_key: &str) -> u64 {
        self.groups.assign(&format!("{layer}|{raw_key}"))
    }

    pub fn module_id(&mut self, module_key: &str) -> u64 {
        self.modules.assign(module_key)
    }

    /// 每个 INSERT 实例（含展开中的嵌套实例）分配一个新编号。
    pub fn next_insert_id(&mut self) -> u64 {
        self.last_insert += 1;
        self.last_insert
    }

    pub fn record_module_name(&mut self, insert_id: u64, block_name: &str) {
        self.module_names.insert(insert_id, block_name.to_string());
    }

    pub fn module_name(&self, insert_id: u64) -> Option<&str> {
        self.module_names.get(&insert_id).map(String::as_str)
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            groups: self.groups.mark(),
            modules: self.modules.mark(),
            last_insert: self.last_insert,
        }
    }

    /// 回到检查点：之后分配的分组、模块和 INSERT 编号全部作废，保持编号连续。
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.groups.rollback(checkpoint.groups);
        self.modules.rollback(checkpoint.modules);
        if self.last_insert > checkpoint.last_insert {
            self.module_names
                .retain(|occurrence, _| *occurrence <= checkpoint.last_insert);
            self.last_insert = checkpoint.last_insert;
        }
    }

    #[inline]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    #[inline]
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }
}

/// 展平统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlattenReport {
    pub entities: usize,
    pub rows: usize,
    pub placeholders: usize,
    pub expanded_inserts: usize,
    pub depth_limited: usize,
    pub missing_blocks: usize,
    pub groups: usize,
    pub modules: usize,
}

#[derive(Debug, Clone)]
pub struct Flattened {
    pub rows: Vec<FlatRow>,
    pub report: FlattenReport,
}

/// 以默认参数展平整个文档。
pub fn flatten(document: &Document) -> Vec<FlatRow> {
    flatten_with(document, FlattenOptions::default()).rows
}

pub fn flatten_with(document: &Document, options: FlattenOptions) -> Flattened {
    Flattener::new(document, options).run()
}

/// 当前实体所处的展开上下文。
#[derive(Debug, Clone)]
struct Scope<'d> {
    space: &'d str,
    depth: usize,
    /// 顶层为句柄或合成键，展开中为 `<模块键>/<实例编号>:<子序号>`。
    raw_key: String,
    /// 展开中继承的顶层 INSERT 模块键。
    inherited_module: Option<String>,
    link: Option<ModuleLink>,
}

impl Scope<'_> {
    fn module_key(&self) -> &str {
        self.inherited_module.as_deref().unwrap_or(&self.raw_key)
    }

    fn in_expansion(&self) -> bool {
        self.inherited_module.is_some()
    }
}

pub struct Flattener<'d> {
    document: &'d Document,
    options: FlattenOptions,
    context: FlattenContext,
    rows: Vec<FlatRow>,
    report: FlattenReport,
}

impl<'d> Flattener<'d> {
    pub fn new(document: &'d Document, options: FlattenOptions) -> Self {
        Self {
            document,
            options,
            context: FlattenContext::new(),
            rows: Vec::new(),
            report: FlattenReport::default(),
        }
    }

    pub fn run(mut self) -> Flattened {
        let document = self.document;
        for layout in document.layouts() {
            debug!(layout = %layout.name, entities = layout.len(), "展平布局");
            for (index, (_, entity)) in layout.entities().enumerate() {
                let raw_key = entity
                    .handle()
                    .filter(|handle| !handle.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("#{}:{index}", layout.name));
                let scope = Scope {
                    space: &layout.name,
                    depth: 0,
                    raw_key,
                    inherited_module: None,
                    link: None,
                };
                self.report.entities += 1;
                self.emit(entity, &scope);
            }
        }

        for row in &mut self.rows {
            if let Some(name) = row
                .module_link
                .and_then(|link| self.context.module_name(link.now))
            {
                row.module_name = name.to_string();
            }
        }

        self.report.rows = self.rows.len();
        self.report.groups = self.context.group_count();
        self.report.modules = self.context.module_count();
        info!(
            entities = self.report.entities,
            rows = self.report.rows,
            placeholders = self.report.placeholders,
            expanded = self.report.expanded_inserts,
            depth_limited = self.report.depth_limited,
            missing_blocks = self.report.missing_blocks,
            "展平完成"
        );
        Flattened {
            rows: self.rows,
            report: self.report,
        }
    }

    /// 输出单个实体；失败或无几何时以占位行代替，保证每个实体至少一行。
    fn emit(&mut self, entity: &Entity, scope: &Scope<'d>) {
        let start = self.rows.len();
        let checkpoint = self.context.checkpoint();
        let report = self.report;
        match self.dispatch(entity, scope) {
            Ok(()) if self.rows.len() > start => {}
            Ok(()) => {
                debug!(
                    entity = entity.dxf_type(),
                    key = %scope.raw_key,
                    "实体没有可输出的定位点，写入占位行"
                );
                self.push_placeholder(entity, scope);
            }
            Err(err) => {
                warn!(error = %err, key = %scope.raw_key, "实体展平失败，写入占位行");
                self.rows.truncate(start);
                self.context.restore(checkpoint);
                self.report = report;
                self.push_placeholder(entity, scope);
            }
        }
    }

    fn dispatch(&mut self, entity: &Entity, scope: &Scope<'d>) -> Result<(), FlattenError> {
        match &entity.kind {
            EntityKind::Point(point) => {
                let position = self.wcs(entity, point.location)?;
                let mut row = self.module_row(entity, scope);
                row.position = Some(position);
                self.rows.push(row);
            }
            EntityKind::Line(line) => {
                let start = self.wcs(entity, line.start)?;
                let end = self.wcs(entity, line.end)?;
                let mut row = self.module_row(entity, scope);
                row.position = Some(start);
                row.start = Some(start);
                row.end = Some(end);
                self.rows.push(row);
            }
            EntityKind::LwPolyline(polyline) => {
                let group = self.context.group_id(entity.layer_name(), &scope.raw_key);
                for (index, vertex) in polyline.vertices.iter().enumerate() {
                    let position = self.wcs(entity, vertex.position.with_z(polyline.elevation))?;
                    let mut row = self.module_row(entity, scope);
                    row.position = Some(position);
                    row.group_id = Some(group);
                    row.vertex_index = Some(index);
                    row.bulge = Some(vertex.bulge);
                    row.start_width = Some(vertex.start_width);
                    row.end_width = Some(vertex.end_width);
                    row.is_closed = Some(polyline.is_closed);
                    self.rows.push(row);
                }
            }
            EntityKind::Polyline(polyline) => {
                let group = self.context.group_id(entity.layer_name(), &scope.raw_key);
                for (index, vertex) in polyline.vertices.iter().enumerate() {
                    let position = self.wcs(entity, *vertex)?;
                    let mut row = self.module_row(entity, scope);
                    row.position = Some(position);
                    row.group_id = Some(group);
                    row.vertex_index = Some(index);
                    row.is_closed = Some(polyline.is_closed);
                    self.rows.push(row);
                }
            }
            EntityKind::Mesh(mesh) => self.vertex_rows(entity, scope, &mesh.vertices)?,
            EntityKind::Face3D(face) => self.vertex_rows(entity, scope, &face.vertices)?,
            EntityKind::Spline(spline) => {
                for point in &spline.control_points {
                    let position = self.wcs(entity, *point)?;
                    let mut row = self.module_row(entity, scope);
                    row.position = Some(position);
                    self.rows.push(row);
                }
            }
            EntityKind::Circle(circle) => {
                let center = self.wcs(entity, circle.center)?;
                let mut row = self.module_row(entity, scope);
                row.position = Some(center);
                row.center = Some(center);
                row.radius = Some(self.round(circle.radius));
                self.rows.push(row);
            }
            EntityKind::Arc(arc) => {
                let center = self.wcs(entity, arc.center)?;
                let mut row = self.module_row(entity, scope);
                row.position = Some(center);
                row.center = Some(center);
                row.radius = Some(self.round(arc.radius));
                row.start_angle = Some(self.angle(arc.start_angle));
                row.end_angle = Some(self.angle(arc.end_angle));
                self.rows.push(row);
            }
            EntityKind::Ellipse(ellipse) => {
                let center = self.wcs(entity, ellipse.center)?;
                let mut row = self.module_row(entity, scope);
                row.position = Some(center);
                row.center = Some(center);
                self.rows.push(row);
            }
            EntityKind::Text(text) => {
                // 插入点无效时退回对齐点
                let anchor = match text.align_point {
                    Some(align) if !text.insert.is_finite() => align,
                    _ => text.insert,
                };
                let position = self.wcs(entity, anchor)?;
                let mut row = self.module_row(entity, scope);
                row.position = Some(position);
                row.text = text.content.clone();
                self.rows.push(row);
            }
            EntityKind::MText(mtext) => {
                let position = self.wcs(entity, mtext.insert)?;
                let mut row = self.module_row(entity, scope);
                row.position = Some(position);
                row.text = mtext.content.clone();
                self.rows.push(row);
            }
            EntityKind::Insert(reference) => self.insert(entity, reference, scope)?,
            EntityKind::Hatch(hatch) => self.hatch(entity, hatch, scope)?,
            EntityKind::Generic(generic) => {
                if let Some(anchor) = generic.probe() {
                    let position = self.wcs(entity, anchor)?;
                    let mut row = self.module_row(entity, scope);
                    row.position = Some(position);
                    row.text = generic.text.clone().unwrap_or_default();
                    self.rows.push(row);
                }
            }
        }
        Ok(())
    }

    fn vertex_rows(
        &mut self,
        entity: &Entity,
        scope: &Scope<'d>,
        vertices: &[Point3],
    ) -> Result<(), FlattenError> {
        for (index, vertex) in vertices.iter().enumerate() {
            let position = self.wcs(entity, *vertex)?;
            let mut row = self.module_row(entity, scope);
            row.position = Some(position);
            row.vertex_index = Some(index);
            self.rows.push(row);
        }
        Ok(())
    }

    fn insert(
        &mut self,
        entity: &Entity,
        reference: &BlockReference,
        scope: &Scope<'d>,
    ) -> Result<(), FlattenError> {
        let position = self.wcs(entity, reference.insert)?;
        let occurrence = self.context.next_insert_id();
        let link = ModuleLink {
            father: scope.link.map(|parent| parent.now),
            now: occurrence,
            root: scope.link.map_or(occurrence, |parent| parent.root),
        };
        self.context.record_module_name(occurrence, &reference.name);

        let mut row = self.module_row(entity, scope);
        row.position = Some(position);
        row.text = attribute_text(reference);
        row.module_link = Some(link);
        self.rows.push(row);

        if scope.depth >= self.options.max_depth {
            self.report.depth_limited += 1;
            debug!(block = %reference.name, depth = scope.depth, "达到最大嵌套深度，停止展开");
            return Ok(());
        }
        let Some(children) = self.document.virtual_entities(entity) else {
            self.report.missing_blocks += 1;
            warn!(block = %reference.name, "块定义缺失，跳过展开");
            return Ok(());
        };
        self.report.expanded_inserts += 1;

        let module_key = scope.module_key().to_string();
        for (index, child) in children.iter().enumerate() {
            let child_scope = Scope {
                space: scope.space,
                depth: scope.depth + 1,
                raw_key: format!("{module_key}/{occurrence}:{index}"),
                inherited_module: Some(module_key.clone()),
                link: Some(link),
            };
            self.emit(child, &child_scope);
        }
        Ok(())
    }

    fn hatch(&mut self, entity: &Entity, hatch: &Hatch, scope: &Scope<'d>) -> Result<(), FlattenError> {
        let pattern = HatchPattern {
            name: hatch.pattern_name.clone(),
            scale: hatch.pattern_scale,
            angle: hatch.pattern_angle,
            is_solid: hatch.is_solid,
        };
        // 展开中的填充归属父 INSERT 模块，顶层则按种子点/路径各自编号
        let module_key = |suffix: &str| {
            if scope.in_expansion() {
                scope.module_key().to_string()
            } else {
                format!("{}:{suffix}", scope.raw_key)
            }
        };

        if !hatch.seeds.is_empty() {
            for (index, seed) in hatch.seeds.iter().enumerate() {
                let position = self.wcs(entity, seed.with_z(hatch.elevation))?;
                let mut row = self.base_row(entity, scope);
                row.module_id = Some(self.context.module_id(&module_key(&format!("seed{index}"))));
                row.position = Some(position);
                row.center = Some(position);
                row.hatch = Some(pattern.clone());
                self.rows.push(row);
            }
            return Ok(());
        }

        if hatch.paths.is_empty() {
            let mut row = self.base_row(entity, scope);
            row.module_id = Some(self.context.module_id(&module_key("p0")));
            row.hatch = Some(pattern);
            self.rows.push(row);
            return Ok(());
        }

        for (index, path) in hatch.paths.iter().enumerate() {
            let path_key = format!("{}:p{index}", scope.raw_key);
            let info = HatchPathInfo {
                index,
                is_hole: hatch.path_is_hole(index),
                is_external: path.is_boundary(),
            };
            let module = self.context.module_id(&module_key(&format!("p{index}")));
            let group = self.context.group_id(entity.layer_name(), &path_key);

            let representative = match path.representative_point() {
                Some(point) => Some(self.wcs(entity, point.with_z(hatch.elevation))?),
                None => None,
            };
            let mut row = self.base_row(entity, scope);
            row.position = representative;
            row.module_id = Some(module);
            row.group_id = Some(group);
            row.hatch = Some(pattern.clone());
            row.hatch_path = Some(info);
            self.rows.push(row);

            let vertices: Vec<Point2> = if path.vertices.is_empty() {
                edge_vertices(&path.edges)
            } else {
                path.vertices.iter().map(|vertex| vertex.position).collect()
            };
            for (vertex_index, vertex) in vertices.into_iter().enumerate() {
                let position = self.wcs(entity, vertex.with_z(hatch.elevation))?;
                let mut row = self.base_row(entity, scope);
                row.position = Some(position);
                row.vertex_index = Some(vertex_index);
                row.module_id = Some(module);
                row.group_id = Some(group);
                row.hatch = Some(pattern.clone());
                row.hatch_path = Some(info);
                self.rows.push(row);
            }
        }
        Ok(())
    }

    fn push_placeholder(&mut self, entity: &Entity, scope: &Scope<'d>) {
        let mut row = self.module_row(entity, scope);
        if let EntityKind::Insert(reference) = &entity.kind {
            row.text = attribute_text(reference);
        } else {
            row.text = entity.text_content().unwrap_or_default().to_string();
        }
        self.report.placeholders += 1;
        self.rows.push(row);
    }

    fn base_row(&self, entity: &Entity, scope: &Scope<'d>) -> FlatRow {
        let header = &entity.header;
        FlatRow {
            layer: header.layer.clone(),
            subclass: header.dxf_type.clone(),
            linetype: header.linetype.clone().unwrap_or_default(),
            handle: header.handle.clone().unwrap_or_default(),
            owner: header.owner.clone().unwrap_or_default(),
            space: scope.space.to_string(),
            module_link: scope.link,
            ..FlatRow::default()
        }
    }

    fn module_row(&mut self, entity: &Entity, scope: &Scope<'d>) -> FlatRow {
        let mut row = self.base_row(entity, scope);
        row.module_id = Some(self.context.module_id(scope.module_key()));
        row
    }

    fn wcs(&self, entity: &Entity, point: Point3) -> Result<Coord, FlattenError> {
        let world = entity.to_wcs(point);
        if !world.is_finite() {
            return Err(FlattenError::NonFiniteCoordinate {
                dxf_type: entity.dxf_type().to_string(),
                handle: entity.handle().unwrap_or_default().to_string(),
            });
        }
        Ok([
            self.round(world.x()),
            self.round(world.y()),
            self.round(world.z()),
        ])
    }

    fn round(&self, value: f64) -> f64 {
        let factor = 10f64.powi(self.options.precision as i32);
        let rounded = (value * factor).round() / factor;
        // 消除 -0.0
        if rounded == 0.0 { 0.0 } else { rounded }
    }

    /// 角度（度）规范到 [0, 360] 后取整。
    fn angle(&self, degrees: f64) -> f64 {
        let normalized = if (0.0..=360.0).contains(&degrees) {
            degrees
        } else {
            degrees.rem_euclid(360.0)
        };
        self.round(normalized)
    }
}

/// INSERT 行的文本：`标记=值` 以 `; ` 连接，标记为空时只写值。
fn attribute_text(reference: &BlockReference) -> String {
    reference
        .attributes
        .iter()
        .map(|attribute| {
            if attribute.tag.is_empty() {
                attribute.text.clone()
            } else {
                format!("{}={}", attribute.tag, attribute.text)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// 路径没有顶点列表时，由直线边起点（末条直线边加终点）与圆弧边起点生成伪顶点。
fn edge_vertices(edges: &[HatchEdge]) -> Vec<Point2> {
    let mut vertices = Vec::new();
    let last = edges.len().saturating_sub(1);
    for (index, edge) in edges.iter().enumerate() {
        match edge {
            HatchEdge::Line { start, end } => {
                vertices.push(*start);
                if index == last {
                    vertices.push(*end);
                }
            }
            HatchEdge::Arc { .. } => vertices.extend(edge.start_point()),
            HatchEdge::Ellipse { .. } | HatchEdge::Spline { .. } => {}
        }
    }
    vertices
}

#[cfg(test)]
mod tests {
    use dxfgrid_core::document::{
        Attribute, BlockDefinition, HatchPath, HatchVertex, LayoutKind,
    };
    use dxfgrid_core::geometry::Vector3;

    use super::*;

    fn origin() -> Point3 {
        Point3::new(0.0, 0.0, 0.0)
    }

    fn square_path(flags: i32, size: f64) -> HatchPath {
        HatchPath {
            flags,
            is_closed: true,
            vertices: [(0.0, 0.0), (size, 0.0), (size, size), (0.0, size)]
                .into_iter()
                .map(|(x, y)| HatchVertex {
                    position: Point2::new(x, y),
                    bulge: 0.0,
                })
                .collect(),
            edges: Vec::new(),
        }
    }

    fn solid_hatch(paths: Vec<HatchPath>, seeds: Vec<Point2>) -> Hatch {
        Hatch {
            pattern_name: "SOLID".to_string(),
            pattern_scale: None,
            pattern_angle: None,
            is_solid: true,
            elevation: 0.0,
            paths,
            seeds,
        }
    }

    #[test]
    fn allocator_reuses_ids_per_key() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.assign("a"), 1);
        assert_eq!(ids.assign("b"), 2);
        assert_eq!(ids.assign("a"), 1);
        assert_eq!(ids.get("b"), Some(2));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn context_scopes_groups_by_layer_only() {
        let mut context = FlattenContext::new();
        let first = context.group_id("L1", "1A");
        let second = context.group_id("L2", "1A");
        assert_ne!(first, second);
        assert_eq!(context.module_id("1A"), context.module_id("1A"));
        assert_eq!(context.next_insert_id(), 1);
        assert_eq!(context.next_insert_id(), 2);
    }

    #[test]
    fn line_row_carries_endpoints() {
        let mut doc = Document::new();
        doc.add_entity(
            Entity::line("AXIS", Point3::new(1.0, 2.0, 0.0), Point3::new(4.00049, 6.0, 0.0))
                .with_handle("2A"),
        );

        let rows = flatten(&doc);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.position, Some([1.0, 2.0, 0.0]));
        assert_eq!(row.end, Some([4.0, 6.0, 0.0]));
        assert_eq!(row.module_id, Some(1));
        assert_eq!(row.group_id, None);
        assert_eq!(row.handle, "2A");
        assert_eq!(row.space, "Model");
        assert!(row.module_link.is_none());
    }

    #[test]
    fn lwpolyline_vertices_share_group() {
        let mut doc = Document::new();
        doc.add_entity(Entity::lwpolyline(
            "WALL",
            [Point2::new(0.0, 0.0), Point2::new(5.0, 0.0), Point2::new(5.0, 5.0)],
            true,
        ));

        let rows = flatten(&doc);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.group_id == Some(1)));
        assert!(rows.iter().all(|row| row.is_closed == Some(true)));
        let indices: Vec<_> = rows.iter().map(|row| row.vertex_index).collect();
        assert_eq!(indices, [Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn ocs_circle_is_mapped_to_world() {
        let mut doc = Document::new();
        let mut circle = Entity::circle("0", Point3::new(2.0, 3.0, 1.0), 1.5);
        circle.header.extrusion = Some(Vector3::new(0.0, 0.0, -1.0));
        doc.add_entity(circle);

        let rows = flatten(&doc);
        assert_eq!(rows[0].center, Some([-2.0, 3.0, -1.0]));
        assert_eq!(rows[0].radius, Some(1.5));
    }

    #[test]
    fn insert_children_inherit_module_and_hierarchy() {
        let mut doc = Document::new();
        doc.add_block_definition(
            BlockDefinition::new("INNER", origin())
                .with_entity(Entity::point("PT", Point3::new(1.0, 0.0, 0.0))),
        );
        doc.add_block_definition(
            BlockDefinition::new("OUTER", origin())
                .with_entity(Entity::line("L1", origin(), Point3::new(1.0, 0.0, 0.0)))
                .with_entity(Entity::insert("L2", "INNER", Point3::new(10.0, 0.0, 0.0))),
        );
        let mut insert = Entity::insert("0", "OUTER", Point3::new(100.0, 0.0, 0.0)).with_handle("B1");
        if let EntityKind::Insert(reference) = &mut insert.kind {
            reference.attributes.push(Attribute {
                tag: "NO".to_string(),
                text: "P1".to_string(),
                insert: origin(),
                height: 1.0,
            });
            reference.attributes.push(Attribute {
                tag: String::new(),
                text: "X".to_string(),
                insert: origin(),
                height: 1.0,
            });
        }
        doc.add_entity(insert);

        let flattened = flatten_with(&doc, FlattenOptions::default());
        let rows = &flattened.rows;
        let kinds: Vec<&str> = rows.iter().map(|row| row.subclass.as_str()).collect();
        assert_eq!(kinds, ["INSERT", "LINE", "INSERT", "POINT"]);
        assert!(rows.iter().all(|row| row.module_id == Some(1)));

        assert_eq!(rows[0].text, "NO=P1; X");
        assert_eq!(
            rows[0].module_link,
            Some(ModuleLink { father: None, now: 1, root: 1 })
        );
        assert_eq!(rows[0].module_name, "OUTER");
        assert_eq!(
            rows[1].module_link,
            Some(ModuleLink { father: None, now: 1, root: 1 })
        );
        assert_eq!(
            rows[2].module_link,
            Some(ModuleLink { father: Some(1), now: 2, root: 1 })
        );
        assert_eq!(rows[2].module_name, "INNER");
        assert_eq!(rows[3].position, Some([111.0, 0.0, 0.0]));
        assert_eq!(
            rows[3].module_link,
            Some(ModuleLink { father: Some(1), now: 2, root: 1 })
        );
        assert_eq!(flattened.report.expanded_inserts, 2);
    }

    #[test]
    fn missing_block_keeps_insert_row() {
        let mut doc = Document::new();
        doc.add_entity(Entity::insert("0", "ABSENT", origin()));

        let flattened = flatten_with(&doc, FlattenOptions::default());
        assert_eq!(flattened.rows.len(), 1);
        assert_eq!(flattened.report.missing_blocks, 1);
        assert_eq!(flattened.rows[0].module_name, "ABSENT");
    }

    #[test]
    fn depth_limit_stops_expansion() {
        let mut doc = Document::new();
        doc.add_block_definition(
            BlockDefinition::new("LOOP", origin())
                .with_entity(Entity::insert("0", "LOOP", Point3::new(1.0, 0.0, 0.0))),
        );
        doc.add_entity(Entity::insert("0", "LOOP", origin()));

        let options = FlattenOptions {
            max_depth: 3,
            precision: 3,
        };
        let flattened = flatten_with(&doc, options);
        assert_eq!(flattened.rows.len(), 4);
        assert_eq!(flattened.report.depth_limited, 1);
        assert_eq!(flattened.rows[3].position, Some([3.0, 0.0, 0.0]));
    }

    #[test]
    fn hatch_seeds_take_precedence_over_paths() {
        let mut doc = Document::new();
        doc.add_entity(
            Entity::hatch(
                "HATCH",
                solid_hatch(
                    vec![square_path(1, 4.0)],
                    vec![Point2::new(1.0, 1.0), Point2::new(2.0, 2.0)],
                ),
            )
            .with_handle("3C"),
        );

        let rows = flatten(&doc);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].module_id, Some(1));
        assert_eq!(rows[1].module_id, Some(2));
        assert_eq!(rows[1].center, Some([2.0, 2.0, 0.0]));
        assert!(rows[0].hatch.as_ref().is_some_and(|p| p.is_solid));
        assert!(rows[0].hatch_path.is_none());
    }

    #[test]
    fn hatch_paths_emit_path_and_vertex_rows() {
        let mut doc = Document::new();
        doc.add_entity(
            Entity::hatch(
                "HATCH",
                solid_hatch(vec![square_path(1, 10.0), square_path(0, 2.0)], Vec::new()),
            )
            .with_handle("3C"),
        );

        let rows = flatten(&doc);
        assert_eq!(rows.len(), 10);
        let outer = rows[0].hatch_path.expect("path row");
        assert_eq!(outer.path_type(), "EXTERNAL");
        assert!(!outer.is_hole);
        assert_eq!(rows[0].vertex_index, None);
        assert_eq!(rows[1].vertex_index, Some(0));
        assert_eq!(rows[1].group_id, rows[0].group_id);

        let inner = rows[5].hatch_path.expect("path row");
        assert_eq!(inner.index, 1);
        assert!(inner.is_hole);
        assert_eq!(inner.path_type(), "INTERNAL");
        assert_ne!(rows[5].group_id, rows[0].group_id);
        assert_ne!(rows[5].module_id, rows[0].module_id);
    }

    #[test]
    fn hatch_edges_synthesize_vertices() {
        let path = HatchPath {
            flags: 1,
            is_closed: true,
            vertices: Vec::new(),
            edges: vec![
                HatchEdge::Line {
                    start: Point2::new(0.0, 0.0),
                    end: Point2::new(4.0, 0.0),
                },
                HatchEdge::Arc {
                    center: Point2::new(4.0, 2.0),
                    radius: 2.0,
                    start_angle: 270.0,
                    end_angle: 90.0,
                    is_counter_clockwise: true,
                },
                HatchEdge::Line {
                    start: Point2::new(4.0, 4.0),
                    end: Point2::new(0.0, 0.0),
                },
            ],
        };
        let vertices = edge_vertices(&path.edges);
        assert_eq!(vertices.len(), 4);
        assert!((vertices[1].y() - 0.0).abs() < 1e-9);
        assert_eq!(vertices[3], Point2::new(0.0, 0.0));
    }

    #[test]
    fn hatch_inside_block_uses_owner_module() {
        let mut doc = Document::new();
        doc.add_block_definition(
            BlockDefinition::new("ROOM", origin())
                .with_entity(Entity::hatch("FILL", solid_hatch(vec![square_path(1, 2.0)], Vec::new())))
                .with_entity(Entity::hatch(
                    "FILL",
                    solid_hatch(Vec::new(), vec![Point2::new(1.0, 1.0)]),
                )),
        );
        doc.add_entity(Entity::insert("0", "ROOM", origin()).with_handle("R1"));

        let rows = flatten(&doc);
        assert!(rows.len() > 3);
        assert!(rows.iter().all(|row| row.module_id == Some(1)));
    }

    #[test]
    fn generic_entity_probes_anchor_or_falls_back() {
        let mut doc = Document::new();
        let mut dimension = Entity::generic("DIMENSION", "DIM");
        if let EntityKind::Generic(generic) = &mut dimension.kind {
            generic
                .anchors
                .push((dxfgrid_core::document::AnchorRole::Start, Point3::new(7.0, 8.0, 0.0)));
            generic.text = Some("1200".to_string());
        }
        doc.add_entity(dimension);
        doc.add_entity(Entity::generic("VIEWPORT", "0"));

        let flattened = flatten_with(&doc, FlattenOptions::default());
        let rows = &flattened.rows;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].position, Some([7.0, 8.0, 0.0]));
        assert_eq!(rows[0].text, "1200");
        assert_eq!(rows[1].position, None);
        assert_eq!(rows[1].module_id, Some(2));
        assert_eq!(flattened.report.placeholders, 1);
    }

    #[test]
    fn non_finite_geometry_becomes_placeholder() {
        let mut doc = Document::new();
        doc.add_entity(Entity::point("0", Point3::new(f64::NAN, 0.0, 0.0)));
        doc.add_entity(Entity::point("0", Point3::new(1.0, 1.0, 0.0)));

        let flattened = flatten_with(&doc, FlattenOptions::default());
        assert_eq!(flattened.rows.len(), 2);
        assert_eq!(flattened.rows[0].position, None);
        assert_eq!(flattened.rows[1].position, Some([1.0, 1.0, 0.0]));
        assert_eq!(flattened.report.placeholders, 1);
    }

    #[test]
    fn failed_hatch_seed_releases_module_ids() {
        let mut doc = Document::new();
        doc.add_entity(
            Entity::hatch(
                "HATCH",
                solid_hatch(
                    Vec::new(),
                    vec![Point2::new(1.0, 1.0), Point2::new(f64::NAN, 2.0)],
                ),
            )
            .with_handle("3C"),
        );
        doc.add_entity(Entity::line("0", origin(), Point3::new(4.0, 0.0, 0.0)));

        let flattened = flatten_with(&doc, FlattenOptions::default());
        let rows = &flattened.rows;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].position, None);
        assert_eq!(rows[0].subclass, "HATCH");
        let modules: Vec<_> = rows.iter().map(|row| row.module_id).collect();
        assert_eq!(modules, [Some(1), Some(2)]);
        assert_eq!(flattened.report.placeholders, 1);
        assert_eq!(flattened.report.modules, 2);
    }

    #[test]
    fn failed_polyline_vertex_releases_group_and_module_ids() {
        let mut doc = Document::new();
        doc.add_entity(Entity::lwpolyline(
            "WALL",
            [
                Point2::new(0.0, 0.0),
                Point2::new(f64::NAN, 0.0),
                Point2::new(5.0, 5.0),
            ],
            false,
        ));
        doc.add_entity(Entity::lwpolyline(
            "WALL",
            [Point2::new(1.0, 1.0), Point2::new(2.0, 2.0)],
            false,
        ));

        let flattened = flatten_with(&doc, FlattenOptions::default());
        let rows = &flattened.rows;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].position, None);
        assert_eq!(rows[0].group_id, None);
        assert!(rows[1..].iter().all(|row| row.group_id == Some(1)));
        let modules: Vec<_> = rows.iter().map(|row| row.module_id).collect();
        assert_eq!(modules, [Some(1), Some(2), Some(2)]);
        assert_eq!(flattened.report.placeholders, 1);
        assert_eq!(flattened.report.groups, 1);
    }

    #[test]
    fn rollback_keeps_earlier_ids() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.assign("a"), 1);
        let mark = ids.mark();
        assert_eq!(ids.assign("b"), 2);
        assert_eq!(ids.assign("a"), 1);
        ids.rollback(mark);
        assert_eq!(ids.get("b"), None);
        assert_eq!(ids.assign("c"), 2);
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn paper_layout_rows_name_their_space() {
        let mut doc = Document::new();
        let paper = doc.ensure_layout("布局1", LayoutKind::Paper);
        doc.add_entity_to(paper, Entity::text("TEXT", origin(), "说明", 2.5));
        doc.add_entity(Entity::text("TEXT", origin(), "模型", 2.5));

        let rows = flatten(&doc);
        let spaces: Vec<(&str, &str)> = rows
            .iter()
            .map(|row| (row.space.as_str(), row.text.as_str()))
            .collect();
        assert_eq!(spaces, [("Model", "模型"), ("布局1", "说明")]);
    }

    #[test]
    fn record_follows_column_order() {
        let row = FlatRow {
            position: Some([1.0, 2.5, 0.0]),
            layer: "L".to_string(),
            subclass: "LWPOLYLINE".to_string(),
            group_id: Some(3),
            module_id: Some(4),
            vertex_index: Some(0),
            bulge: Some(0.0),
            is_closed: Some(false),
            space: "Model".to_string(),
            ..FlatRow::default()
        };
        let record = row.to_record();
        assert_eq!(record.len(), FLAT_COLUMNS.len());
        assert_eq!(&record[..3], ["1.0", "2.5", "0.0"]);
        assert_eq!(record[7], "3");
        assert_eq!(record[8], "4");
        assert_eq!(record[11], "0");
        assert_eq!(record[12], "0.0");
        assert_eq!(record[27], "0");
        assert_eq!(record[35], "Model");
        assert!(record[36..].iter().all(String::is_empty));
    }
}
