//! 实体解码：将收集到的原始组码序列转换为 [`Entity`]。
//!
//! 单个实体解码失败不会中断整个文档，失败的实体降级为 `Generic`
//! 并尽量保留可识别的定位点。

use std::f64::consts::TAU;

use dxfgrid_core::{
    document::{
        AnchorRole, Arc, Attribute, BlockReference, Circle, Ellipse, Entity, EntityHeader,
        EntityKind, GenericEntity, Hatch, HatchEdge, HatchPath, HatchVertex, Line, LwPolyline,
        LwVertex, MText, Mesh, PointEntity, Polyline, PolylineMode, Spline, Text, ThreeDFace,
    },
    geometry::{Point2, Point3, Vector3},
    text::{plain_mtext, plain_text},
};
use tracing::{debug, warn};

use crate::DxfError;
use crate::reader::{parse_f64, parse_i16, parse_i32};

/// 一个实体的原始组码序列；VERTEX/ATTRIB 作为子记录附着在所属实体上。
#[derive(Debug, Clone)]
pub(crate) struct RawEntity {
    pub dxf_type: String,
    pub pairs: Vec<(i32, String)>,
    pub children: Vec<RawEntity>,
}

impl RawEntity {
    pub(crate) fn new(dxf_type: impl Into<String>, pairs: Vec<(i32, String)>) -> Self {
        Self {
            dxf_type: dxf_type.into(),
            pairs,
            children: Vec::new(),
        }
    }

    /// 是否可以接收 VERTEX/ATTRIB 子记录。
    pub(crate) fn accepts_child(&self, child_type: &str) -> bool {
        matches!(
            (self.dxf_type.as_str(), child_type),
            ("POLYLINE", "VERTEX") | ("INSERT", "ATTRIB")
        )
    }
}

/// 按组码取首个值的只读视图。
struct Fields<'a> {
    pairs: &'a [(i32, String)],
    dxf_type: &'a str,
}

impl<'a> Fields<'a> {
    fn new(raw: &'a RawEntity) -> Self {
        Self {
            pairs: &raw.pairs,
            dxf_type: &raw.dxf_type,
        }
    }

    fn raw(&self, code: i32) -> Option<&'a str> {
        self.pairs
            .iter()
            .find(|(candidate, _)| *candidate == code)
            .map(|(_, value)| value.as_str())
    }

    fn string(&self, code: i32) -> Option<String> {
        self.raw(code).map(|value| value.trim().to_string())
    }

    fn f64(&self, code: i32) -> Result<Option<f64>, DxfError> {
        self.raw(code)
            .map(|value| parse_f64(value, &format!("{} 组码 {code}", self.dxf_type)))
            .transpose()
    }

    fn f64_or(&self, code: i32, default: f64) -> Result<f64, DxfError> {
        Ok(self.f64(code)?.unwrap_or(default))
    }

    fn i32_or(&self, code: i32, default: i32) -> Result<i32, DxfError> {
        self.raw(code)
            .map(|value| parse_i32(value, &format!("{} 组码 {code}", self.dxf_type)))
            .transpose()
            .map(|value| value.unwrap_or(default))
    }

    fn i16_or(&self, code: i32, default: i16) -> Result<i16, DxfError> {
        self.raw(code)
            .map(|value| parse_i16(value, &format!("{} 组码 {code}", self.dxf_type)))
            .transpose()
            .map(|value| value.unwrap_or(default))
    }

    /// 读取 `base`/`base+10`/`base+20` 坐标；X/Y 缺一即视为不存在。
    fn point(&self, base: i32) -> Result<Option<Point3>, DxfError> {
        match (self.f64(base)?, self.f64(base + 10)?) {
            (Some(x), Some(y)) => Ok(Some(Point3::new(x, y, self.f64_or(base + 20, 0.0)?))),
            (None, None) => Ok(None),
            _ => Err(DxfError::invalid(format!(
                "{} 坐标（组码 {base}）缺少完整的 XY 值",
                self.dxf_type
            ))),
        }
    }

    fn require_point(&self, base: i32, label: &str) -> Result<Point3, DxfError> {
        self.point(base)?.ok_or_else(|| {
            DxfError::invalid(format!("{} 缺少{label}（组码 {base}）", self.dxf_type))
        })
    }

    fn require_f64(&self, code: i32, label: &str) -> Result<f64, DxfError> {
        self.f64(code)?.ok_or_else(|| {
            DxfError::invalid(format!("{} 缺少{label}（组码 {code}）", self.dxf_type))
        })
    }

    /// 依次收集同一组码族的所有坐标（如样条控制点、网格顶点）。
    fn point_list(&self, base: i32) -> Result<Vec<Point3>, DxfError> {
        let mut points: Vec<Point3> = Vec::new();
        let mut pending: Option<(f64, Option<f64>)> = None;
        let context = format!("{} 坐标序列（组码 {base}）", self.dxf_type);
        for (code, value) in self.pairs {
            if *code == base {
                if let Some((x, Some(y))) = pending.take() {
                    points.push(Point3::new(x, y, 0.0));
                }
                pending = Some((parse_f64(value, &context)?, None));
            } else if *code == base + 10 {
                if let Some((_, y)) = pending.as_mut() {
                    *y = Some(parse_f64(value, &context)?);
                }
            } else if *code == base + 20 {
                if let Some((x, Some(y))) = pending.take() {
                    points.push(Point3::new(x, y, parse_f64(value, &context)?));
                }
            }
        }
        if let Some((x, Some(y))) = pending {
            points.push(Point3::new(x, y, 0.0));
        }
        Ok(points)
    }
}

/// 公共字段解析。102 组（`{ACAD_REACTORS` 等）内的组码被忽略。
pub(crate) fn decode_header(raw: &RawEntity) -> EntityHeader {
    let mut header = EntityHeader::new(raw.dxf_type.clone(), "0");
    let mut in_group = false;
    let mut extrusion: [Option<f64>; 3] = [None; 3];
    for (code, value) in &raw.pairs {
        if *code == 102 {
            in_group = value.trim_start().starts_with('{');
            continue;
        }
        if in_group {
            continue;
        }
        let trimmed = value.trim();
        match code {
            5 if !trimmed.is_empty() => header.handle = Some(trimmed.to_string()),
            330 if header.owner.is_none() && !trimmed.is_empty() => {
                header.owner = Some(trimmed.to_string())
            }
            8 if !trimmed.is_empty() => header.layer = trimmed.to_string(),
            6 if !trimmed.is_empty() => header.linetype = Some(trimmed.to_string()),
            67 => header.paper_space = trimmed.parse::<i32>().map(|v| v != 0).unwrap_or(false),
            210 => extrusion[0] = trimmed.parse().ok(),
            220 => extrusion[1] = trimmed.parse().ok(),
            230 => extrusion[2] = trimmed.parse().ok(),
            _ => {}
        }
    }
    if extrusion.iter().any(Option::is_some) {
        header.extrusion = Some(Vector3::new(
            extrusion[0].unwrap_or(0.0),
            extrusion[1].unwrap_or(0.0),
            extrusion[2].unwrap_or(1.0),
        ));
    }
    header
}

/// 解码单个实体；失败时降级为 `Generic` 并记录警告。
pub(crate) fn decode_entity(raw: &RawEntity) -> Entity {
    let header = decode_header(raw);
    match decode_kind(raw) {
        Ok(Some(kind)) => Entity::new(header, kind),
        Ok(None) => {
            debug!(dxf_type = %raw.dxf_type, "未建模的实体类型，按通用实体保留");
            Entity::new(header, EntityKind::Generic(salvage(raw)))
        }
        Err(err) => {
            warn!(
                dxf_type = %raw.dxf_type,
                handle = header.handle.as_deref().unwrap_or(""),
                error = %err,
                "实体解码失败，按通用实体保留"
            );
            Entity::new(header, EntityKind::Generic(salvage(raw)))
        }
    }
}

fn decode_kind(raw: &RawEntity) -> Result<Option<EntityKind>, DxfError> {
    let fields = Fields::new(raw);
    let kind = match raw.dxf_type.as_str() {
        "POINT" => EntityKind::Point(PointEntity {
            location: fields.require_point(10, "位置")?,
        }),
        "LINE" => EntityKind::Line(Line {
            start: fields.require_point(10, "起点")?,
            end: fields.require_point(11, "终点")?,
        }),
        "CIRCLE" => EntityKind::Circle(Circle {
            center: fields.require_point(10, "圆心")?,
            radius: fields.require_f64(40, "半径")?,
        }),
        "ARC" => EntityKind::Arc(Arc {
            center: fields.require_point(10, "圆心")?,
            radius: fields.require_f64(40, "半径")?,
            start_angle: fields.f64_or(50, 0.0)?,
            end_angle: fields.f64_or(51, 360.0)?,
        }),
        "ELLIPSE" => {
            let axis = fields.require_point(11, "长轴")?;
            EntityKind::Ellipse(Ellipse {
                center: fields.require_point(10, "中心")?,
                major_axis: Vector3::new(axis.x(), axis.y(), axis.z()),
                ratio: fields.f64_or(40, 1.0)?,
                start_parameter: fields.f64_or(41, 0.0)?,
                end_parameter: fields.f64_or(42, TAU)?,
            })
        }
        "SPLINE" => EntityKind::Spline(Spline {
            degree: fields.i32_or(71, 3)?,
            is_closed: fields.i32_or(70, 0)? & 0x01 != 0,
            control_points: fields.point_list(10)?,
            fit_points: fields.point_list(11)?,
        }),
        "3DFACE" => {
            let first = fields.require_point(10, "顶点 1")?;
            let second = fields.require_point(11, "顶点 2")?;
            let third = fields.require_point(12, "顶点 3")?;
            let fourth = fields.point(13)?.unwrap_or(third);
            EntityKind::Face3D(ThreeDFace {
                vertices: [first, second, third, fourth],
            })
        }
        "MESH" => EntityKind::Mesh(Mesh {
            vertices: fields.point_list(10)?,
        }),
        "LWPOLYLINE" => EntityKind::LwPolyline(decode_lwpolyline(raw)?),
        "POLYLINE" => EntityKind::Polyline(decode_polyline(raw)?),
        "TEXT" => EntityKind::Text(decode_text(&fields)?),
        "MTEXT" => EntityKind::MText(decode_mtext(raw, &fields)?),
        "INSERT" => EntityKind::Insert(decode_insert(raw, &fields)?),
        "HATCH" => EntityKind::Hatch(decode_hatch(raw)?),
        _ => return Ok(None),
    };
    Ok(Some(kind))
}

fn decode_lwpolyline(raw: &RawEntity) -> Result<LwPolyline, DxfError> {
    let mut polyline = LwPolyline {
        vertices: Vec::new(),
        elevation: 0.0,
        is_closed: false,
    };
    let mut pending_x: Option<f64> = None;
    for (code, value) in &raw.pairs {
        match code {
            38 => polyline.elevation = parse_f64(value, "LWPOLYLINE 高程（组码 38）")?,
            70 => {
                polyline.is_closed = parse_i32(value, "LWPOLYLINE 旗标（组码 70）")? & 0x01 != 0
            }
            10 => {
                if pending_x.is_some() {
                    return Err(DxfError::invalid("LWPOLYLINE 顶点缺少 Y 坐标（组码 20）"));
                }
                pending_x = Some(parse_f64(value, "LWPOLYLINE 顶点 X")?);
            }
            20 => {
                let x = pending_x
                    .take()
                    .ok_or_else(|| DxfError::invalid("LWPOLYLINE 顶点缺少 X 坐标（组码 10）"))?;
                let y = parse_f64(value, "LWPOLYLINE 顶点 Y")?;
                polyline.vertices.push(LwVertex::new(Point2::new(x, y)));
            }
            40 | 41 | 42 => {
                let parsed = parse_f64(value, "LWPOLYLINE 顶点属性")?;
                if let Some(vertex) = polyline.vertices.last_mut() {
                    match code {
                        40 => vertex.start_width = parsed,
                        41 => vertex.end_width = parsed,
                        _ => vertex.bulge = parsed,
                    }
                }
            }
            _ => {}
        }
    }
    if pending_x.is_some() {
        return Err(DxfError::invalid("LWPOLYLINE 顶点缺少 Y 坐标（组码 20）"));
    }
    Ok(polyline)
}

fn decode_polyline(raw: &RawEntity) -> Result<Polyline, DxfError> {
    let fields = Fields::new(raw);
    let flags = fields.i32_or(70, 0)?;
    let mode = if flags & 0x40 != 0 {
        PolylineMode::PolyfaceMesh
    } else if flags & 0x10 != 0 {
        PolylineMode::PolygonMesh
    } else if flags & 0x08 != 0 {
        PolylineMode::Polyline3d
    } else {
        PolylineMode::Polyline2d
    };
    let elevation = fields.f64_or(30, 0.0)?;

    let mut vertices = Vec::new();
    for child in raw.children.iter().filter(|child| child.dxf_type == "VERTEX") {
        let vertex = Fields::new(child);
        let vertex_flags = vertex.i32_or(70, 0)?;
        // 多面网格的面记录（128 且不含 64）与样条框架控制点（16）不是几何顶点
        if mode == PolylineMode::PolyfaceMesh && vertex_flags & 0x40 == 0 {
            continue;
        }
        if vertex_flags & 0x10 != 0 {
            continue;
        }
        let point = vertex.require_point(10, "顶点坐标")?;
        vertices.push(match mode {
            PolylineMode::Polyline2d => Point3::new(point.x(), point.y(), elevation),
            _ => point,
        });
    }

    Ok(Polyline {
        mode,
        vertices,
        is_closed: flags & 0x01 != 0,
    })
}

fn decode_text(fields: &Fields<'_>) -> Result<Text, DxfError> {
    Ok(Text {
        insert: fields.require_point(10, "插入点")?,
        align_point: fields.point(11)?,
        content: plain_text(fields.raw(1).unwrap_or_default()),
        height: fields.f64_or(40, 1.0)?,
        rotation: fields.f64_or(50, 0.0)?,
        width_factor: fields.f64_or(41, 1.0)?,
        horizontal_align: fields.i16_or(72, 0)?,
        vertical_align: fields.i16_or(73, 0)?,
    })
}

fn decode_mtext(raw: &RawEntity, fields: &Fields<'_>) -> Result<MText, DxfError> {
    // 组码 3 为前置分段，组码 1 为最后一段
    let mut content = String::new();
    for (_, value) in raw.pairs.iter().filter(|(code, _)| *code == 3) {
        content.push_str(value);
    }
    if let Some(tail) = fields.raw(1) {
        content.push_str(tail);
    }
    let direction = fields
        .point(11)?
        .map(|axis| Vector3::new(axis.x(), axis.y(), axis.z()));
    Ok(MText {
        insert: fields.require_point(10, "插入点")?,
        content: plain_mtext(&content),
        height: fields.f64_or(40, 1.0)?,
        reference_width: fields.f64(41)?.filter(|width| *width > 0.0),
        direction,
        rotation: fields.f64_or(50, 0.0)?,
        attachment_point: fields.i16_or(71, 1)?,
    })
}

fn decode_insert(raw: &RawEntity, fields: &Fields<'_>) -> Result<BlockReference, DxfError> {
    let name = fields
        .string(2)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| DxfError::invalid("INSERT 缺少块名称（组码 2）"))?;
    let mut attributes = Vec::new();
    for child in raw.children.iter().filter(|child| child.dxf_type == "ATTRIB") {
        let attrib = Fields::new(child);
        let insert = match attrib.point(10)? {
            Some(point) => point,
            None => attrib.point(11)?.unwrap_or(Point3::new(0.0, 0.0, 0.0)),
        };
        attributes.push(Attribute {
            tag: attrib.string(2).unwrap_or_default(),
            text: plain_text(attrib.raw(1).unwrap_or_default()),
            insert,
            height: attrib.f64_or(40, 1.0)?,
        });
    }
    Ok(BlockReference {
        name,
        insert: fields.point(10)?.unwrap_or(Point3::new(0.0, 0.0, 0.0)),
        scale: Vector3::new(
            fields.f64_or(41, 1.0)?,
            fields.f64_or(42, 1.0)?,
            fields.f64_or(43, 1.0)?,
        ),
        rotation: fields.f64_or(50, 0.0)?,
        attributes,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HatchStage {
    Header,
    Boundary,
    Pattern,
    Seeds,
}

enum EdgeBuilder {
    Line {
        start: Option<Point2>,
        end: Option<Point2>,
    },
    Arc {
        center: Option<Point2>,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
        is_counter_clockwise: bool,
    },
    Ellipse {
        center: Option<Point2>,
        major_axis: Option<Point2>,
        ratio: f64,
        start_angle: f64,
        end_angle: f64,
        is_counter_clockwise: bool,
    },
    Spline {
        control_points: Vec<Point2>,
        fit_points: Vec<Point2>,
    },
}

impl EdgeBuilder {
    fn new(edge_type: i32) -> Result<Self, DxfError> {
        match edge_type {
            1 => Ok(Self::Line {
                start: None,
                end: None,
            }),
            2 => Ok(Self::Arc {
                center: None,
                radius: 0.0,
                start_angle: 0.0,
                end_angle: 360.0,
                is_counter_clockwise: true,
            }),
            3 => Ok(Self::Ellipse {
                center: None,
                major_axis: None,
                ratio: 1.0,
                start_angle: 0.0,
                end_angle: 360.0,
                is_counter_clockwise: true,
            }),
            4 => Ok(Self::Spline {
                control_points: Vec::new(),
                fit_points: Vec::new(),
            }),
            other => Err(DxfError::invalid(format!("HATCH 不支持的边界类型 {other}"))),
        }
    }

    fn finish(self) -> Result<HatchEdge, DxfError> {
        let missing = |what: &str| DxfError::invalid(format!("HATCH 边界缺少{what}"));
        Ok(match self {
            EdgeBuilder::Line { start, end } => HatchEdge::Line {
                start: start.ok_or_else(|| missing("直线起点"))?,
                end: end.ok_or_else(|| missing("直线终点"))?,
            },
            EdgeBuilder::Arc {
                center,
                radius,
                start_angle,
                end_angle,
                is_counter_clockwise,
            } => HatchEdge::Arc {
                center: center.ok_or_else(|| missing("圆弧圆心"))?,
                radius,
                start_angle,
                end_angle,
                is_counter_clockwise,
            },
            EdgeBuilder::Ellipse {
                center,
                major_axis,
                ratio,
                start_angle,
                end_angle,
                is_counter_clockwise,
            } => HatchEdge::Ellipse {
                center: center.ok_or_else(|| missing("椭圆中心"))?,
                major_axis: major_axis.ok_or_else(|| missing("椭圆长轴"))?,
                ratio,
                start_angle,
                end_angle,
                is_counter_clockwise,
            },
            EdgeBuilder::Spline {
                control_points,
                fit_points,
            } => HatchEdge::Spline {
                control_points,
                fit_points,
            },
        })
    }
}

struct PathBuilder {
    path: HatchPath,
    edge: Option<EdgeBuilder>,
    pending_x: Option<(i32, f64)>,
}

impl PathBuilder {
    fn new(flags: i32) -> Self {
        Self {
            path: HatchPath {
                flags,
                is_closed: flags & 0x02 == 0,
                vertices: Vec::new(),
                edges: Vec::new(),
            },
            edge: None,
            pending_x: None,
        }
    }

    fn flush_edge(&mut self) -> Result<(), DxfError> {
        if let Some(edge) = self.edge.take() {
            self.path.edges.push(edge.finish()?);
        }
        Ok(())
    }

    fn finish(mut self) -> Result<HatchPath, DxfError> {
        self.flush_edge()?;
        Ok(self.path)
    }

    /// 处理坐标 Y 分量：与之前缓存的 X 组合成点后分派。
    fn accept_point(&mut self, code: i32, point: Point2) {
        if self.path.is_polyline() {
            if code == 10 {
                self.path.vertices.push(HatchVertex {
                    position: point,
                    bulge: 0.0,
                });
            }
            return;
        }
        match self.edge.as_mut() {
            Some(EdgeBuilder::Line { start, end }) => match code {
                10 => *start = Some(point),
                11 => *end = Some(point),
                _ => {}
            },
            Some(EdgeBuilder::Arc { center, .. }) if code == 10 => *center = Some(point),
            Some(EdgeBuilder::Ellipse {
                center, major_axis, ..
            }) => match code {
                10 => *center = Some(point),
                11 => *major_axis = Some(point),
                _ => {}
            },
            Some(EdgeBuilder::Spline {
                control_points,
                fit_points,
            }) => match code {
                10 => control_points.push(point),
                11 => fit_points.push(point),
                _ => {}
            },
            _ => {}
        }
    }

    fn accept_scalar(&mut self, code: i32, value: f64) {
        if self.path.is_polyline() {
            if code == 42 {
                if let Some(vertex) = self.path.vertices.last_mut() {
                    vertex.bulge = value;
                }
            }
            return;
        }
        match self.edge.as_mut() {
            Some(EdgeBuilder::Arc {
                radius,
                start_angle,
                end_angle,
                ..
            }) => match code {
                40 => *radius = value,
                50 => *start_angle = value,
                51 => *end_angle = value,
                _ => {}
            },
            Some(EdgeBuilder::Ellipse {
                ratio,
                start_angle,
                end_angle,
                ..
            }) => match code {
                40 => *ratio = value,
                50 => *start_angle = value,
                51 => *end_angle = value,
                _ => {}
            },
            _ => {}
        }
    }
}

fn decode_hatch(raw: &RawEntity) -> Result<Hatch, DxfError> {
    let mut hatch = Hatch {
        pattern_name: String::new(),
        pattern_scale: None,
        pattern_angle: None,
        is_solid: false,
        elevation: 0.0,
        paths: Vec::new(),
        seeds: Vec::new(),
    };
    let mut stage = HatchStage::Header;
    let mut current: Option<PathBuilder> = None;
    let mut seed_x: Option<f64> = None;

    for (code, value) in &raw.pairs {
        let code = *code;
        match stage {
            HatchStage::Header => match code {
                30 => hatch.elevation = parse_f64(value, "HATCH 高程（组码 30）")?,
                2 => hatch.pattern_name = value.trim().to_string(),
                70 => hatch.is_solid = parse_i32(value, "HATCH 填充旗标（组码 70）")? & 1 != 0,
                91 => stage = HatchStage::Boundary,
                _ => {}
            },
            HatchStage::Boundary => match code {
                92 => {
                    if let Some(builder) = current.take() {
                        hatch.paths.push(builder.finish()?);
                    }
                    current = Some(PathBuilder::new(parse_i32(
                        value,
                        "HATCH 边界类型（组码 92）",
                    )?));
                }
                75 => {
                    if let Some(builder) = current.take() {
                        hatch.paths.push(builder.finish()?);
                    }
                    stage = HatchStage::Pattern;
                }
                _ => {
                    let Some(builder) = current.as_mut() else {
                        continue;
                    };
                    match code {
                        72 => {
                            let parsed = parse_i32(value, "HATCH 组码 72")?;
                            if !builder.path.is_polyline() {
                                builder.flush_edge()?;
                                builder.edge = Some(EdgeBuilder::new(parsed)?);
                            }
                        }
                        73 => {
                            let flag = parse_i32(value, "HATCH 组码 73")? != 0;
                            match builder.edge.as_mut() {
                                Some(
                                    EdgeBuilder::Arc {
                                        is_counter_clockwise,
                                        ..
                                    }
                                    | EdgeBuilder::Ellipse {
                                        is_counter_clockwise,
                                        ..
                                    },
                                ) => *is_counter_clockwise = flag,
                                None if builder.path.is_polyline() => {
                                    builder.path.is_closed = flag
                                }
                                _ => {}
                            }
                        }
                        10 | 11 => {
                            builder.pending_x =
                                Some((code, parse_f64(value, "HATCH 边界坐标 X")?));
                        }
                        20 | 21 => {
                            if let Some((x_code, x)) = builder.pending_x.take() {
                                if x_code + 10 == code {
                                    let y = parse_f64(value, "HATCH 边界坐标 Y")?;
                                    builder.accept_point(x_code, Point2::new(x, y));
                                }
                            }
                        }
                        40 | 42 | 50 | 51 => {
                            builder.accept_scalar(code, parse_f64(value, "HATCH 边界数值")?);
                        }
                        _ => {}
                    }
                }
            },
            HatchStage::Pattern => match code {
                52 => hatch.pattern_angle = Some(parse_f64(value, "HATCH 图案角度（组码 52）")?),
                41 => hatch.pattern_scale = Some(parse_f64(value, "HATCH 图案比例（组码 41）")?),
                98 => stage = HatchStage::Seeds,
                _ => {}
            },
            HatchStage::Seeds => match code {
                10 => seed_x = Some(parse_f64(value, "HATCH 种子点 X")?),
                20 => {
                    if let Some(x) = seed_x.take() {
                        let y = parse_f64(value, "HATCH 种子点 Y")?;
                        hatch.seeds.push(Point2::new(x, y));
                    }
                }
                _ => {}
            },
        }
    }
    if let Some(builder) = current.take() {
        hatch.paths.push(builder.finish()?);
    }
    Ok(hatch)
}

/// 各类型可探测的定位点组码。
fn anchor_codes(dxf_type: &str) -> &'static [(AnchorRole, i32)] {
    match dxf_type {
        "POINT" | "LIGHT" => &[(AnchorRole::Location, 10)],
        "LINE" | "XLINE" | "RAY" => &[(AnchorRole::Start, 10)],
        "CIRCLE" | "ARC" | "ELLIPSE" | "VIEWPORT" => &[(AnchorRole::Center, 10)],
        "TEXT" | "MTEXT" | "INSERT" | "ATTRIB" | "ATTDEF" | "SHAPE" | "TOLERANCE" | "IMAGE"
        | "WIPEOUT" | "ACAD_TABLE" | "PDFUNDERLAY" | "DWFUNDERLAY" | "DGNUNDERLAY" => {
            &[(AnchorRole::Insert, 10)]
        }
        "DIMENSION" | "ARC_DIMENSION" | "LARGE_RADIAL_DIMENSION" => &[(AnchorRole::Insert, 12)],
        _ => &[],
    }
}

fn salvage(raw: &RawEntity) -> GenericEntity {
    let fields = Fields::new(raw);
    let anchors = anchor_codes(&raw.dxf_type)
        .iter()
        .filter_map(|(role, base)| fields.point(*base).ok().flatten().map(|p| (*role, p)))
        .collect();
    let text = match raw.dxf_type.as_str() {
        "TEXT" | "ATTRIB" | "ATTDEF" => fields.raw(1).map(plain_text),
        "MTEXT" => fields.raw(1).map(plain_mtext),
        _ => None,
    };
    GenericEntity { anchors, text }
}
