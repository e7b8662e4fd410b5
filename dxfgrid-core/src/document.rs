use std::collections::HashMap;
use std::f64::consts::{FRAC_PI_2, PI, TAU};

use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

use crate::geometry::{Bounds2D, Ocs, Placement, Point2, Point3, Vector3};
use crate::text;

/// 模型空间布局的固定名称。
pub const MODEL_SPACE: &str = "Model";

/// INSERT 范围计算时的最大嵌套深度。
const BOUNDS_MAX_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub is_visible: bool,
}

impl Layer {
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_visible: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutKind {
    Model,
    Paper,
}

/// 一个绘图空间（模型空间或某个图纸空间）及其顶层实体。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layout {
    pub name: String,
    pub kind: LayoutKind,
    /// 对应 BLOCK_RECORD 的句柄，用于与 OBJECTS 段中的 LAYOUT 名称关联。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_record: Option<String>,
    entities: Vec<(EntityId, Entity)>,
}

impl Layout {
    pub fn new(name: impl Into<String>, kind: LayoutKind) -> Self {
        Self {
            name: name.into(),
            kind,
            block_record: None,
            entities: Vec::new(),
        }
    }

    #[inline]
    pub fn entities(&self) -> impl Iterator<Item = &(EntityId, Entity)> {
        self.entities.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// 所有实体共有的 DXF 公共字段。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityHeader {
    /// DXF 类型名（组码 0），例如 `LWPOLYLINE`。
    pub dxf_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub layer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extrusion: Option<Vector3>,
    #[serde(default)]
    pub paper_space: bool,
}

impl EntityHeader {
    pub fn new(dxf_type: impl Into<String>, layer: impl Into<String>) -> Self {
        Self {
            dxf_type: dxf_type.into(),
            handle: None,
            owner: None,
            layer: layer.into(),
            linetype: None,
            extrusion: None,
            paper_space: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub header: EntityHeader,
    pub kind: EntityKind,
}

/// 按实体类型区分的几何数据。未建模的类型统一落入 `Generic`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EntityKind {
    Point(PointEntity),
    Line(Line),
    LwPolyline(LwPolyline),
    Polyline(Polyline),
    Mesh(Mesh),
    Face3D(ThreeDFace),
    Circle(Circle),
    Arc(Arc),
    Ellipse(Ellipse),
    Spline(Spline),
    Text(Text),
    MText(MText),
    Insert(BlockReference),
    Hatch(Hatch),
    Generic(GenericEntity),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointEntity {
    pub location: Point3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Line {
    pub start: Point3,
    pub end: Point3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LwVertex {
    pub position: Point2,
    pub start_width: f64,
    pub end_width: f64,
    pub bulge: f64,
}

impl LwVertex {
    #[inline]
    pub fn new(position: Point2) -> Self {
        Self {
            position,
            start_width: 0.0,
            end_width: 0.0,
            bulge: 0.0,
        }
    }
}

/// 轻量多段线，顶点位于 OCS，`elevation` 为统一高程。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LwPolyline {
    pub vertices: Vec<LwVertex>,
    pub elevation: f64,
    pub is_closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolylineMode {
    Polyline2d,
    Polyline3d,
    PolygonMesh,
    PolyfaceMesh,
}

/// 旧式 POLYLINE（VERTEX 序列）。多面网格仅保留坐标顶点，不含面记录。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Polyline {
    pub mode: PolylineMode,
    pub vertices: Vec<Point3>,
    pub is_closed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mesh {
    pub vertices: Vec<Point3>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreeDFace {
    pub vertices: [Point3; 4],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Circle {
    pub center: Point3,
    pub radius: f64,
}

/// 圆弧，角度单位为度（与 DXF 一致），逆时针方向。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arc {
    pub center: Point3,
    pub radius: f64,
    pub start_angle: f64,
    pub end_angle: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ellipse {
    pub center: Point3,
    pub major_axis: Vector3,
    pub ratio: f64,
    pub start_parameter: f64,
    pub end_parameter: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spline {
    pub degree: i32,
    pub is_closed: bool,
    pub control_points: Vec<Point3>,
    pub fit_points: Vec<Point3>,
}

/// 单行文字。`rotation` 单位为度；对齐方式非默认时以 `align_point` 为定位点。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Text {
    pub insert: Point3,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align_point: Option<Point3>,
    pub content: String,
    pub height: f64,
    pub rotation: f64,
    pub width_factor: f64,
    pub horizontal_align: i16,
    pub vertical_align: i16,
}

/// 多行文字，`content` 已剥离格式码。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MText {
    pub insert: Point3,
    pub content: String,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Vector3>,
    pub rotation: f64,
    pub attachment_point: i16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribute {
    pub tag: String,
    pub text: String,
    pub insert: Point3,
    pub height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockReference {
    pub name: String,
    pub insert: Point3,
    pub scale: Vector3,
    pub rotation: f64,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HatchVertex {
    pub position: Point2,
    pub bulge: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HatchEdge {
    Line {
        start: Point2,
        end: Point2,
    },
    Arc {
        center: Point2,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
        is_counter_clockwise: bool,
    },
    Ellipse {
        center: Point2,
        major_axis: Point2,
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

impl HatchEdge {
    /// 边的起点，用于代表点及伪顶点生成。
    pub fn start_point(&self) -> Option<Point2> {
        match self {
            HatchEdge::Line { start, .. } => Some(*start),
            HatchEdge::Arc {
                center,
                radius,
                start_angle,
                ..
            } => {
                let angle = start_angle.to_radians();
                Some(Point2::new(
                    center.x() + radius * angle.cos(),
                    center.y() + radius * angle.sin(),
                ))
            }
            HatchEdge::Ellipse {
                center,
                major_axis,
                ratio,
                start_angle,
                ..
            } => {
                let major = major_axis.as_vec2();
                let minor = DVec2::new(-major.y, major.x) * *ratio;
                let t = start_angle.to_radians();
                Some(Point2::from(
                    center.as_vec2() + major * t.cos() + minor * t.sin(),
                ))
            }
            HatchEdge::Spline {
                control_points,
                fit_points,
            } => control_points.first().or(fit_points.first()).copied(),
        }
    }

    /// 直线边的终点；曲线边不提供终点。
    pub fn line_end(&self) -> Option<Point2> {
        match self {
            HatchEdge::Line { end, .. } => Some(*end),
            _ => None,
        }
    }

    /// 圆弧/椭圆边的中心。
    pub fn center(&self) -> Option<Point2> {
        match self {
            HatchEdge::Arc { center, .. } | HatchEdge::Ellipse { center, .. } => Some(*center),
            _ => None,
        }
    }
}

/// HATCH 边界路径。组码 92 的标志位：1 外部、2 多段线、16 最外层。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HatchPath {
    pub flags: i32,
    pub is_closed: bool,
    pub vertices: Vec<HatchVertex>,
    pub edges: Vec<HatchEdge>,
}

impl HatchPath {
    #[inline]
    pub fn is_polyline(&self) -> bool {
        self.flags & 0x02 != 0
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        self.flags & 0x01 != 0
    }

    #[inline]
    pub fn is_outermost(&self) -> bool {
        self.flags & 0x10 != 0
    }

    #[inline]
    pub fn is_boundary(&self) -> bool {
        self.is_external() || self.is_outermost()
    }

    /// 路径的代表点：首条边的起点（或中心），否则首个顶点。
    pub fn representative_point(&self) -> Option<Point2> {
        if let Some(edge) = self.edges.first() {
            let point = match edge {
                HatchEdge::Line { start, .. } => Some(*start),
                HatchEdge::Arc { center, .. } | HatchEdge::Ellipse { center, .. } => {
                    Some(*center)
                }
                HatchEdge::Spline { .. } => edge.start_point(),
            };
            if point.is_some() {
                return point;
            }
        }
        self.vertices.first().map(|vertex| vertex.position)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hatch {
    pub pattern_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_angle: Option<f64>,
    pub is_solid: bool,
    pub elevation: f64,
    pub paths: Vec<HatchPath>,
    pub seeds: Vec<Point2>,
}

impl Hatch {
    /// 非外部路径在存在外部边界时视为孔洞。
    pub fn path_is_hole(&self, index: usize) -> bool {
        let Some(path) = self.paths.get(index) else {
            return false;
        };
        !path.is_boundary() && self.paths.iter().any(HatchPath::is_boundary)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnchorRole {
    Insert,
    Location,
    Center,
    Start,
}

/// 未建模实体：保留类型名、可能的文字以及按角色标记的定位点。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenericEntity {
    pub anchors: Vec<(AnchorRole, Point3)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl GenericEntity {
    /// 依次探测 insert → location → center → start。
    pub fn probe(&self) -> Option<Point3> {
        [
            AnchorRole::Insert,
            AnchorRole::Location,
            AnchorRole::Center,
            AnchorRole::Start,
        ]
        .into_iter()
        .find_map(|role| {
            self.anchors
                .iter()
                .find(|(candidate, _)| *candidate == role)
                .map(|(_, point)| *point)
        })
    }
}

impl Entity {
    pub fn new(header: EntityHeader, kind: EntityKind) -> Self {
        Self { header, kind }
    }

    pub fn point(layer: impl Into<String>, location: Point3) -> Self {
        Self::new(
            EntityHeader::new("POINT", layer),
            EntityKind::Point(PointEntity { location }),
        )
    }

    pub fn line(layer: impl Into<String>, start: Point3, end: Point3) -> Self {
        Self::new(
            EntityHeader::new("LINE", layer),
            EntityKind::Line(Line { start, end }),
        )
    }

    pub fn lwpolyline<I>(layer: impl Into<String>, points: I, is_closed: bool) -> Self
    where
        I: IntoIterator<Item = Point2>,
    {
        Self::new(
            EntityHeader::new("LWPOLYLINE", layer),
            EntityKind::LwPolyline(LwPolyline {
                vertices: points.into_iter().map(LwVertex::new).collect(),
                elevation: 0.0,
                is_closed,
            }),
        )
    }

    pub fn circle(layer: impl Into<String>, center: Point3, radius: f64) -> Self {
        Self::new(
            EntityHeader::new("CIRCLE", layer),
            EntityKind::Circle(Circle { center, radius }),
        )
    }

    pub fn text(
        layer: impl Into<String>,
        insert: Point3,
        content: impl Into<String>,
        height: f64,
    ) -> Self {
        Self::new(
            EntityHeader::new("TEXT", layer),
            EntityKind::Text(Text {
                insert,
                align_point: None,
                content: content.into(),
                height,
                rotation: 0.0,
                width_factor: 1.0,
                horizontal_align: 0,
                vertical_align: 0,
            }),
        )
    }

    pub fn mtext(
        layer: impl Into<String>,
        insert: Point3,
        content: impl Into<String>,
        height: f64,
    ) -> Self {
        Self::new(
            EntityHeader::new("MTEXT", layer),
            EntityKind::MText(MText {
                insert,
                content: content.into(),
                height,
                reference_width: None,
                direction: None,
                rotation: 0.0,
                attachment_point: 1,
            }),
        )
    }

    pub fn insert(layer: impl Into<String>, name: impl Into<String>, insert: Point3) -> Self {
        Self::new(
            EntityHeader::new("INSERT", layer),
            EntityKind::Insert(BlockReference {
                name: name.into(),
                insert,
                scale: Vector3::new(1.0, 1.0, 1.0),
                rotation: 0.0,
                attributes: Vec::new(),
            }),
        )
    }

    pub fn hatch(layer: impl Into<String>, hatch: Hatch) -> Self {
        Self::new(EntityHeader::new("HATCH", layer), EntityKind::Hatch(hatch))
    }

    pub fn generic(dxf_type: impl Into<String>, layer: impl Into<String>) -> Self {
        Self::new(
            EntityHeader::new(dxf_type, layer),
            EntityKind::Generic(GenericEntity::default()),
        )
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.header.handle = Some(handle.into());
        self
    }

    #[inline]
    pub fn dxf_type(&self) -> &str {
        &self.header.dxf_type
    }

    #[inline]
    pub fn layer_name(&self) -> &str {
        &self.header.layer
    }

    #[inline]
    pub fn handle(&self) -> Option<&str> {
        self.header.handle.as_deref()
    }

    /// 实体的坐标系：仅 OCS 类实体使用拉伸方向，其余类型坐标本身即为 WCS。
    pub fn ocs(&self) -> Ocs {
        let uses_ocs = match &self.kind {
            EntityKind::LwPolyline(_)
            | EntityKind::Circle(_)
            | EntityKind::Arc(_)
            | EntityKind::Text(_)
            | EntityKind::Insert(_)
            | EntityKind::Hatch(_) => true,
            EntityKind::Polyline(polyline) => polyline.mode == PolylineMode::Polyline2d,
            _ => false,
        };
        if uses_ocs {
            Ocs::from_extrusion(self.header.extrusion)
        } else {
            Ocs::world()
        }
    }

    #[inline]
    pub fn to_wcs(&self, point: Point3) -> Point3 {
        self.ocs().to_wcs(point)
    }

    /// 文字类实体的纯文本内容。
    pub fn text_content(&self) -> Option<&str> {
        match &self.kind {
            EntityKind::Text(text) => Some(&text.content),
            EntityKind::MText(mtext) => Some(&mtext.content),
            EntityKind::Generic(generic) => generic.text.as_deref(),
            _ => None,
        }
    }

    /// 实体的 WCS 定位点（裁剪与兜底中心点使用）。
    pub fn anchor(&self) -> Option<Point3> {
        let local = match &self.kind {
            EntityKind::Point(point) => Some(point.location),
            EntityKind::Line(line) => Some(line.start),
            EntityKind::LwPolyline(polyline) => polyline
                .vertices
                .first()
                .map(|vertex| vertex.position.with_z(polyline.elevation)),
            EntityKind::Polyline(polyline) => polyline.vertices.first().copied(),
            EntityKind::Mesh(mesh) => mesh.vertices.first().copied(),
            EntityKind::Face3D(face) => Some(face.vertices[0]),
            EntityKind::Circle(circle) => Some(circle.center),
            EntityKind::Arc(arc) => Some(arc.center),
            EntityKind::Ellipse(ellipse) => Some(ellipse.center),
            EntityKind::Spline(spline) => spline
                .control_points
                .first()
                .or(spline.fit_points.first())
                .copied(),
            EntityKind::Text(text) => Some(text.insert),
            EntityKind::MText(mtext) => Some(mtext.insert),
            EntityKind::Insert(reference) => Some(reference.insert),
            EntityKind::Hatch(hatch) => hatch
                .seeds
                .first()
                .copied()
                .or_else(|| hatch.paths.iter().find_map(HatchPath::representative_point))
                .map(|point| point.with_z(hatch.elevation)),
            EntityKind::Generic(generic) => generic.probe(),
        };
        local.map(|point| self.to_wcs(point))
    }

    /// 按块放置变换生成 WCS 副本；结果不再携带拉伸方向。
    pub fn transformed(&self, placement: &Placement) -> Entity {
        let ocs = self.ocs();
        let map = |point: Point3| placement.apply(ocs.to_wcs(point));
        let map_dir = |vector: DVec3| placement.apply_vector(ocs.direction_to_wcs(vector));
        let map_angle = |degrees: f64| {
            let radians = degrees.to_radians();
            let direction = map_dir(DVec3::new(radians.cos(), radians.sin(), 0.0));
            direction.y.atan2(direction.x).to_degrees()
        };
        let scale = placement.mean_scale();
        let mirrored = placement.is_mirrored();

        let kind = match &self.kind {
            EntityKind::Point(point) => EntityKind::Point(PointEntity {
                location: map(point.location),
            }),
            EntityKind::Line(line) => EntityKind::Line(Line {
                start: map(line.start),
                end: map(line.end),
            }),
            EntityKind::LwPolyline(polyline) => {
                let mapped: Vec<Point3> = polyline
                    .vertices
                    .iter()
                    .map(|vertex| map(vertex.position.with_z(polyline.elevation)))
                    .collect();
                let elevation = mapped.first().map(|point| point.z()).unwrap_or(0.0);
                EntityKind::LwPolyline(LwPolyline {
                    vertices: polyline
                        .vertices
                        .iter()
                        .zip(mapped)
                        .map(|(vertex, point)| LwVertex {
                            position: point.xy(),
                            start_width: vertex.start_width * scale,
                            end_width: vertex.end_width * scale,
                            bulge: if mirrored { -vertex.bulge } else { vertex.bulge },
                        })
                        .collect(),
                    elevation,
                    is_closed: polyline.is_closed,
                })
            }
            EntityKind::Polyline(polyline) => EntityKind::Polyline(Polyline {
                mode: polyline.mode,
                vertices: polyline.vertices.iter().map(|point| map(*point)).collect(),
                is_closed: polyline.is_closed,
            }),
            EntityKind::Mesh(mesh) => EntityKind::Mesh(Mesh {
                vertices: mesh.vertices.iter().map(|point| map(*point)).collect(),
            }),
            EntityKind::Face3D(face) => EntityKind::Face3D(ThreeDFace {
                vertices: face.vertices.map(map),
            }),
            EntityKind::Circle(circle) => EntityKind::Circle(Circle {
                center: map(circle.center),
                radius: circle.radius * scale,
            }),
            EntityKind::Arc(arc) => {
                let (start_angle, end_angle) = if mirrored {
                    (map_angle(arc.end_angle), map_angle(arc.start_angle))
                } else {
                    (map_angle(arc.start_angle), map_angle(arc.end_angle))
                };
                EntityKind::Arc(Arc {
                    center: map(arc.center),
                    radius: arc.radius * scale,
                    start_angle,
                    end_angle,
                })
            }
            EntityKind::Ellipse(ellipse) => EntityKind::Ellipse(Ellipse {
                center: map(ellipse.center),
                major_axis: Vector3::from(map_dir(ellipse.major_axis.as_vec3())),
                ratio: ellipse.ratio,
                start_parameter: ellipse.start_parameter,
                end_parameter: ellipse.end_parameter,
            }),
            EntityKind::Spline(spline) => EntityKind::Spline(Spline {
                degree: spline.degree,
                is_closed: spline.is_closed,
                control_points: spline.control_points.iter().map(|p| map(*p)).collect(),
                fit_points: spline.fit_points.iter().map(|p| map(*p)).collect(),
            }),
            EntityKind::Text(text) => EntityKind::Text(Text {
                insert: map(text.insert),
                align_point: text.align_point.map(map),
                content: text.content.clone(),
                height: text.height * scale,
                rotation: map_angle(text.rotation),
                width_factor: text.width_factor,
                horizontal_align: text.horizontal_align,
                vertical_align: text.vertical_align,
            }),
            EntityKind::MText(mtext) => {
                let direction = mtext_direction(mtext);
                EntityKind::MText(MText {
                    insert: map(mtext.insert),
                    content: mtext.content.clone(),
                    height: mtext.height * scale,
                    reference_width: mtext.reference_width.map(|width| width * scale),
                    direction: Some(Vector3::from(map_dir(direction))),
                    rotation: 0.0,
                    attachment_point: mtext.attachment_point,
                })
            }
            EntityKind::Insert(reference) => {
                let factors = placement.axis_scales();
                EntityKind::Insert(BlockReference {
                    name: reference.name.clone(),
                    insert: map(reference.insert),
                    scale: Vector3::new(
                        reference.scale.0.x * factors.0.x,
                        reference.scale.0.y * factors.0.y,
                        reference.scale.0.z * factors.0.z,
                    ),
                    rotation: map_angle(reference.rotation),
                    attributes: reference
                        .attributes
                        .iter()
                        .map(|attribute| Attribute {
                            tag: attribute.tag.clone(),
                            text: attribute.text.clone(),
                            insert: map(attribute.insert),
                            height: attribute.height * scale,
                        })
                        .collect(),
                })
            }
            EntityKind::Hatch(hatch) => {
                let elevation = hatch.elevation;
                let map2 = |point: Point2| map(point.with_z(elevation)).xy();
                let map_axis = |axis: Point2| {
                    let mapped = map_dir(DVec3::new(axis.x(), axis.y(), 0.0));
                    Point2::new(mapped.x, mapped.y)
                };
                let paths = hatch
                    .paths
                    .iter()
                    .map(|path| HatchPath {
                        flags: path.flags,
                        is_closed: path.is_closed,
                        vertices: path
                            .vertices
                            .iter()
                            .map(|vertex| HatchVertex {
                                position: map2(vertex.position),
                                bulge: if mirrored { -vertex.bulge } else { vertex.bulge },
                            })
                            .collect(),
                        edges: path
                            .edges
                            .iter()
                            .map(|edge| match edge {
                                HatchEdge::Line { start, end } => HatchEdge::Line {
                                    start: map2(*start),
                                    end: map2(*end),
                                },
                                HatchEdge::Arc {
                                    center,
                                    radius,
                                    start_angle,
                                    end_angle,
                                    is_counter_clockwise,
                                } => HatchEdge::Arc {
                                    center: map2(*center),
                                    radius: radius * scale,
                                    start_angle: map_angle(*start_angle),
                                    end_angle: map_angle(*end_angle),
                                    is_counter_clockwise: *is_counter_clockwise != mirrored,
                                },
                                HatchEdge::Ellipse {
                                    center,
                                    major_axis,
                                    ratio,
                                    start_angle,
                                    end_angle,
                                    is_counter_clockwise,
                                } => HatchEdge::Ellipse {
                                    center: map2(*center),
                                    major_axis: map_axis(*major_axis),
                                    ratio: *ratio,
                                    start_angle: *start_angle,
                                    end_angle: *end_angle,
                                    is_counter_clockwise: *is_counter_clockwise != mirrored,
                                },
                                HatchEdge::Spline {
                                    control_points,
                                    fit_points,
                                } => HatchEdge::Spline {
                                    control_points: control_points
                                        .iter()
                                        .map(|p| map2(*p))
                                        .collect(),
                                    fit_points: fit_points.iter().map(|p| map2(*p)).collect(),
                                },
                            })
                            .collect(),
                    })
                    .collect();
                EntityKind::Hatch(Hatch {
                    pattern_name: hatch.pattern_name.clone(),
                    pattern_scale: hatch.pattern_scale,
                    pattern_angle: hatch.pattern_angle,
                    is_solid: hatch.is_solid,
                    elevation: map(Point3::new(0.0, 0.0, elevation)).z(),
                    paths,
                    seeds: hatch.seeds.iter().map(|seed| map2(*seed)).collect(),
                })
            }
            EntityKind::Generic(generic) => EntityKind::Generic(GenericEntity {
                anchors: generic
                    .anchors
                    .iter()
                    .map(|(role, point)| (*role, map(*point)))
                    .collect(),
                text: generic.text.clone(),
            }),
        };

        let mut header = self.header.clone();
        header.extrusion = None;
        Entity { header, kind }
    }

    /// WCS 下的 2D 范围。INSERT 仅包含插入点与属性，完整范围见 [`Document::entity_bounds`]。
    pub fn bounds(&self) -> Option<Bounds2D> {
        let ocs = self.ocs();
        let mut bounds = Bounds2D::empty();
        let mut include = |point: Point3| bounds.include_point(ocs.to_wcs(point).xy());
        match &self.kind {
            EntityKind::Point(point) => include(point.location),
            EntityKind::Line(line) => {
                include(line.start);
                include(line.end);
            }
            EntityKind::LwPolyline(polyline) => {
                for vertex in &polyline.vertices {
                    include(vertex.position.with_z(polyline.elevation));
                }
            }
            EntityKind::Polyline(polyline) => polyline.vertices.iter().for_each(|p| include(*p)),
            EntityKind::Mesh(mesh) => mesh.vertices.iter().for_each(|p| include(*p)),
            EntityKind::Face3D(face) => face.vertices.iter().for_each(|p| include(*p)),
            EntityKind::Circle(circle) => {
                let c = circle.center;
                let r = circle.radius.abs();
                include(Point3::new(c.x() - r, c.y() - r, c.z()));
                include(Point3::new(c.x() + r, c.y() + r, c.z()));
            }
            EntityKind::Arc(arc) => {
                for point in arc_extreme_points(arc) {
                    include(point);
                }
            }
            EntityKind::Ellipse(ellipse) => {
                for point in ellipse_samples(ellipse) {
                    include(point);
                }
            }
            EntityKind::Spline(spline) => {
                spline.control_points.iter().for_each(|p| include(*p));
                spline.fit_points.iter().for_each(|p| include(*p));
            }
            EntityKind::Text(text) => {
                for corner in text_box(text) {
                    include(corner);
                }
            }
            EntityKind::MText(mtext) => {
                for corner in mtext_box(mtext) {
                    include(corner);
                }
            }
            EntityKind::Insert(reference) => {
                include(reference.insert);
                for attribute in &reference.attributes {
                    include(attribute.insert);
                }
            }
            EntityKind::Hatch(hatch) => {
                let z = hatch.elevation;
                for seed in &hatch.seeds {
                    include(seed.with_z(z));
                }
                for path in &hatch.paths {
                    for vertex in &path.vertices {
                        include(vertex.position.with_z(z));
                    }
                    for edge in &path.edges {
                        match edge {
                            HatchEdge::Line { start, end } => {
                                include(start.with_z(z));
                                include(end.with_z(z));
                            }
                            HatchEdge::Arc {
                                center,
                                radius,
                                start_angle,
                                end_angle,
                                is_counter_clockwise,
                            } => {
                                let (start, end) = if *is_counter_clockwise {
                                    (*start_angle, *end_angle)
                                } else {
                                    (-*end_angle, -*start_angle)
                                };
                                let arc = Arc {
                                    center: center.with_z(z),
                                    radius: *radius,
                                    start_angle: start,
                                    end_angle: end,
                                };
                                for point in arc_extreme_points(&arc) {
                                    include(point);
                                }
                            }
                            HatchEdge::Ellipse { .. } | HatchEdge::Spline { .. } => {
                                if let Some(point) = edge.start_point() {
                                    include(point.with_z(z));
                                }
                                if let HatchEdge::Spline { control_points, .. } = edge {
                                    control_points.iter().for_each(|p| include(p.with_z(z)));
                                }
                            }
                        }
                    }
                }
            }
            EntityKind::Generic(generic) => {
                for (_, point) in &generic.anchors {
                    include(*point);
                }
            }
        }
        if bounds.is_empty() { None } else { Some(bounds) }
    }
}

fn normalize_angle(angle: f64) -> f64 {
    let mut result = angle % TAU;
    if result < 0.0 {
        result += TAU;
    }
    result
}

fn canonical_interval(start: f64, end: f64) -> (f64, f64) {
    let start = normalize_angle(start);
    let mut end = normalize_angle(end);
    if (end - start).abs() < 1e-9 {
        end = start + TAU;
    } else if end < start {
        end += TAU;
    }
    (start, end)
}

/// 圆弧端点与跨越的象限点（OCS）。
fn arc_extreme_points(arc: &Arc) -> Vec<Point3> {
    let radius = arc.radius.abs();
    let at = |angle: f64| {
        Point3::new(
            arc.center.x() + radius * angle.cos(),
            arc.center.y() + radius * angle.sin(),
            arc.center.z(),
        )
    };
    if radius <= f64::EPSILON {
        return vec![arc.center];
    }
    let (start, end) = canonical_interval(arc.start_angle.to_radians(), arc.end_angle.to_radians());
    let mut points = vec![at(start), at(end)];
    for base in [0.0, FRAC_PI_2, PI, PI + FRAC_PI_2] {
        let mut candidate = base;
        while candidate < start {
            candidate += TAU;
        }
        if candidate <= end {
            points.push(at(candidate));
        }
    }
    points
}

fn ellipse_samples(ellipse: &Ellipse) -> Vec<Point3> {
    let major = ellipse.major_axis.as_vec3();
    let major_length = major.length();
    if major_length <= f64::EPSILON {
        return vec![ellipse.center];
    }
    let minor = DVec3::Z.cross(major) * ellipse.ratio.abs();
    let start = ellipse.start_parameter;
    let mut end = ellipse.end_parameter;
    if (end - start).abs() < 1e-9 {
        end = start + TAU;
    } else {
        while end < start {
            end += TAU;
        }
    }
    let span = end - start;
    let steps = ((span / (TAU / 64.0)).ceil() as usize).max(16);
    (0..=steps)
        .map(|i| {
            let t = start + span * (i as f64 / steps as f64);
            Point3::from(ellipse.center.as_vec3() + major * t.cos() + minor * t.sin())
        })
        .collect()
}

/// TEXT 的近似外框（OCS 角点），字宽按字符类别估算。
fn text_box(text: &Text) -> [Point3; 4] {
    let height = text.height.abs().max(f64::EPSILON);
    let width = text::line_advance(&text.content, height) * text.width_factor.abs().max(0.01);
    let uses_alignment = text.horizontal_align != 0 || text.vertical_align != 0;
    let anchor = if uses_alignment {
        text.align_point.unwrap_or(text.insert)
    } else {
        text.insert
    };
    let dx = match text.horizontal_align {
        1 | 4 => -width / 2.0,
        2 => -width,
        _ => 0.0,
    };
    let dy = match (text.horizontal_align, text.vertical_align) {
        (4, _) | (_, 2) => -height / 2.0,
        (_, 3) => -height,
        _ => 0.0,
    };
    let (sin, cos) = text.rotation.to_radians().sin_cos();
    [
        (dx, dy),
        (dx + width, dy),
        (dx + width, dy + height),
        (dx, dy + height),
    ]
    .map(|(x, y)| {
        Point3::new(
            anchor.x() + x * cos - y * sin,
            anchor.y() + x * sin + y * cos,
            anchor.z(),
        )
    })
}

fn mtext_direction(mtext: &MText) -> DVec3 {
    match mtext.direction.and_then(Vector3::normalize) {
        Some(direction) => direction.as_vec3(),
        None => {
            let radians = mtext.rotation.to_radians();
            DVec3::new(radians.cos(), radians.sin(), 0.0)
        }
    }
}

/// MTEXT 的近似外框（WCS 角点），按附着点 1-9 定位。
fn mtext_box(mtext: &MText) -> [Point3; 4] {
    let height = mtext.height.abs().max(f64::EPSILON);
    let (natural_width, lines) = text::block_extent(&mtext.content, height);
    let width = mtext.reference_width.unwrap_or(natural_width);
    let total_height = height * (1.0 + (lines as f64 - 1.0) * text::MTEXT_LINE_SPACING);
    let attachment = (mtext.attachment_point.clamp(1, 9) - 1) as usize;
    let (row, col) = (attachment / 3, attachment % 3);
    let left = -(col as f64) * width / 2.0;
    let top = match row {
        0 => 0.0,
        1 => total_height / 2.0,
        _ => total_height,
    };
    let x_axis = mtext_direction(mtext);
    let y_axis = DVec3::Z.cross(x_axis);
    let origin = mtext.insert.as_vec3();
    [
        (left, top - total_height),
        (left + width, top - total_height),
        (left + width, top),
        (left, top),
    ]
    .map(|(x, y)| Point3::from(origin + x_axis * x + y_axis * y))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDefinition {
    pub name: String,
    pub base_point: Point3,
    pub entities: Vec<Entity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_handle: Option<String>,
}

impl BlockDefinition {
    pub fn new(name: impl Into<String>, base_point: Point3) -> Self {
        Self {
            name: name.into(),
            base_point,
            entities: Vec::new(),
            handle: None,
            record_handle: None,
        }
    }

    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    layers: HashMap<String, Layer>,
    layouts: Vec<Layout>,
    blocks: HashMap<String, BlockDefinition>,
    next_entity_id: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut doc = Self {
            layers: HashMap::new(),
            layouts: vec![Layout::new(MODEL_SPACE, LayoutKind::Model)],
            blocks: HashMap::new(),
            next_entity_id: 0,
        };
        doc.ensure_layer("0");
        doc
    }

    pub fn ensure_layer(&mut self, name: impl AsRef<str>) {
        let key = name.as_ref();
        self.layers
            .entry(key.to_string())
            .or_insert_with(|| Layer::new(key));
    }

    /// 以图层表中的定义覆盖同名图层。
    pub fn add_layer(&mut self, layer: Layer) {
        self.layers.insert(layer.name.clone(), layer);
    }

    #[inline]
    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.get(name)
    }

    /// 按名称查找或创建布局，返回其下标。
    pub fn ensure_layout(&mut self, name: &str, kind: LayoutKind) -> usize {
        if let Some(index) = self.layouts.iter().position(|layout| layout.name == name) {
            return index;
        }
        self.layouts.push(Layout::new(name, kind));
        self.layouts.len() - 1
    }

    pub fn set_layout_block_record(&mut self, index: usize, record: Option<String>) {
        if let Some(layout) = self.layouts.get_mut(index) {
            layout.block_record = record;
        }
    }

    /// 使用 OBJECTS 段中的 LAYOUT 名称重命名对应图纸空间。
    pub fn rename_layout_by_record(&mut self, record: &str, name: &str) {
        if let Some(layout) = self
            .layouts
            .iter_mut()
            .find(|layout| layout.block_record.as_deref() == Some(record))
        {
            if layout.kind == LayoutKind::Paper {
                layout.name = name.to_string();
            }
        }
    }

    /// 添加到模型空间。
    pub fn add_entity(&mut self, entity: Entity) -> EntityId {
        self.add_entity_to(0, entity)
    }

    pub fn add_entity_to(&mut self, layout_index: usize, entity: Entity) -> EntityId {
        self.ensure_layer(entity.layer_name());
        let id = self.next_id();
        let index = layout_index.min(self.layouts.len() - 1);
        self.layouts[index].entities.push((id, entity));
        id
    }

    #[inline]
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.values()
    }

    #[inline]
    pub fn layouts(&self) -> impl Iterator<Item = &Layout> {
        self.layouts.iter()
    }

    #[inline]
    pub fn layout(&self, name: &str) -> Option<&Layout> {
        self.layouts.iter().find(|layout| layout.name == name)
    }

    #[inline]
    pub fn model_space(&self) -> &Layout {
        &self.layouts[0]
    }

    /// 所有布局中的实体，按布局顺序。
    pub fn entities(&self) -> impl Iterator<Item = &(EntityId, Entity)> {
        self.layouts.iter().flat_map(|layout| layout.entities.iter())
    }

    pub fn add_block_definition(&mut self, definition: BlockDefinition) {
        for entity in &definition.entities {
            self.ensure_layer(entity.layer_name());
        }
        self.blocks.insert(definition.name.clone(), definition);
    }

    #[inline]
    pub fn block(&self, name: &str) -> Option<&BlockDefinition> {
        self.blocks.get(name)
    }

    #[inline]
    pub fn blocks(&self) -> impl Iterator<Item = &BlockDefinition> {
        self.blocks.values()
    }

    /// 将块参照展开为 WCS 下的虚拟实体。非 INSERT 或块定义缺失时返回 None。
    pub fn virtual_entities(&self, entity: &Entity) -> Option<Vec<Entity>> {
        let EntityKind::Insert(reference) = &entity.kind else {
            return None;
        };
        let definition = self.block(&reference.name)?;
        let placement = Placement::for_block_reference(
            reference.insert,
            reference.scale,
            reference.rotation,
            definition.base_point,
            entity.header.extrusion,
        );
        Some(
            definition
                .entities
                .iter()
                .map(|child| child.transformed(&placement))
                .collect(),
        )
    }

    /// 实体范围；INSERT 递归展开（深度有限）后取并集。
    pub fn entity_bounds(&self, entity: &Entity) -> Option<Bounds2D> {
        self.entity_bounds_at(entity, 0)
    }

    fn entity_bounds_at(&self, entity: &Entity, depth: usize) -> Option<Bounds2D> {
        if !matches!(entity.kind, EntityKind::Insert(_)) || depth >= BOUNDS_MAX_DEPTH {
            return entity.bounds();
        }
        let mut bounds = entity.bounds().unwrap_or_else(Bounds2D::empty);
        if let Some(children) = self.virtual_entities(entity) {
            for child in &children {
                if let Some(child_bounds) = self.entity_bounds_at(child, depth + 1) {
                    bounds.include_bounds(&child_bounds);
                }
            }
        }
        if bounds.is_empty() { None } else { Some(bounds) }
    }

    #[inline]
    fn next_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        EntityId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn document_starts_with_model_space() {
        let mut doc = Document::new();
        let id = doc.add_entity(Entity::line(
            "GEOM",
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(10.0, 0.0, 0.0),
        ));
        let paper = doc.ensure_layout("Layout1", LayoutKind::Paper);
        doc.add_entity_to(paper, Entity::point("0", Point3::new(1.0, 1.0, 0.0)));

        assert_eq!(id.get(), 0);
        assert_eq!(doc.model_space().name, MODEL_SPACE);
        assert_eq!(doc.layouts().count(), 2);
        assert_eq!(doc.entities().count(), 2);
        assert_eq!(doc.layout("Layout1").map(Layout::len), Some(1));
        assert!(doc.layers().any(|layer| layer.name == "GEOM"));
        assert_eq!(doc.ensure_layout("Layout1", LayoutKind::Paper), paper);
    }

    #[test]
    fn virtual_entities_apply_block_placement() {
        let mut doc = Document::new();
        doc.add_block_definition(
            BlockDefinition::new("PILE", Point3::new(0.0, 0.0, 0.0))
                .with_entity(Entity::circle("PILE", Point3::new(1.0, 0.0, 0.0), 0.5))
                .with_entity(Entity::text("TEXT", Point3::new(0.0, 1.0, 0.0), "Z1", 0.3)),
        );
        let mut insert = Entity::insert("0", "PILE", Point3::new(100.0, 200.0, 0.0));
        if let EntityKind::Insert(reference) = &mut insert.kind {
            reference.scale = Vector3::new(2.0, 2.0, 1.0);
            reference.rotation = 90.0;
        }

        let children = doc.virtual_entities(&insert).expect("block exists");
        assert_eq!(children.len(), 2);
        match &children[0].kind {
            EntityKind::Circle(circle) => {
                assert!(approx(circle.center.x(), 100.0));
                assert!(approx(circle.center.y(), 202.0));
                assert!(approx(circle.radius, 1.0));
            }
            other => panic!("expected circle, got {other:?}"),
        }
        match &children[1].kind {
            EntityKind::Text(text) => {
                assert!(approx(text.insert.x(), 98.0));
                assert!(approx(text.insert.y(), 200.0));
                assert!(approx(text.rotation, 90.0));
            }
            other => panic!("expected text, got {other:?}"),
        }
        assert_eq!(children[1].layer_name(), "TEXT");

        let missing = Entity::insert("0", "NOPE", Point3::new(0.0, 0.0, 0.0));
        assert!(doc.virtual_entities(&missing).is_none());
    }

    #[test]
    fn nested_insert_accumulates_rotation_and_scale() {
        let mut doc = Document::new();
        doc.add_block_definition(
            BlockDefinition::new("OUTER", Point3::new(0.0, 0.0, 0.0)).with_entity(
                Entity::insert("0", "INNER", Point3::new(10.0, 0.0, 0.0)),
            ),
        );
        let mut outer = Entity::insert("0", "OUTER", Point3::new(0.0, 0.0, 0.0));
        if let EntityKind::Insert(reference) = &mut outer.kind {
            reference.rotation = 90.0;
            reference.scale = Vector3::new(3.0, 3.0, 1.0);
        }
        let children = doc.virtual_entities(&outer).expect("outer block");
        match &children[0].kind {
            EntityKind::Insert(inner) => {
                assert!(approx(inner.insert.x(), 0.0));
                assert!(approx(inner.insert.y(), 30.0));
                assert!(approx(inner.rotation, 90.0));
                assert!(approx(inner.scale.0.x, 3.0));
            }
            other => panic!("expected nested insert, got {other:?}"),
        }
    }

    #[test]
    fn insert_bounds_cover_expanded_geometry() {
        let mut doc = Document::new();
        doc.add_block_definition(
            BlockDefinition::new("BOX", Point3::new(0.0, 0.0, 0.0)).with_entity(
                Entity::lwpolyline(
                    "0",
                    [
                        Point2::new(0.0, 0.0),
                        Point2::new(4.0, 0.0),
                        Point2::new(4.0, 2.0),
                        Point2::new(0.0, 2.0),
                    ],
                    true,
                ),
            ),
        );
        let insert = Entity::insert("0", "BOX", Point3::new(10.0, 10.0, 0.0));
        let bounds = doc.entity_bounds(&insert).expect("bounds");
        assert!(approx(bounds.center().x(), 12.0));
        assert!(approx(bounds.center().y(), 11.0));
    }

    #[test]
    fn self_referencing_block_bounds_terminate() {
        let mut doc = Document::new();
        doc.add_block_definition(
            BlockDefinition::new("LOOP", Point3::new(0.0, 0.0, 0.0))
                .with_entity(Entity::insert("0", "LOOP", Point3::new(1.0, 0.0, 0.0))),
        );
        let insert = Entity::insert("0", "LOOP", Point3::new(0.0, 0.0, 0.0));
        let bounds = doc.entity_bounds(&insert).expect("bounds");
        assert!(bounds.max().x() >= 9.0);
    }

    #[test]
    fn text_bounds_follow_alignment() {
        let mut entity = Entity::text("TEXT", Point3::new(0.0, 0.0, 0.0), "AB", 10.0);
        let bounds = entity.bounds().expect("text bounds");
        assert!(approx(bounds.center().x(), 6.0));
        assert!(approx(bounds.center().y(), 5.0));

        if let EntityKind::Text(text) = &mut entity.kind {
            text.horizontal_align = 4;
            text.align_point = Some(Point3::new(50.0, 50.0, 0.0));
        }
        let centred = entity.bounds().expect("aligned text bounds");
        assert!(approx(centred.center().x(), 50.0));
        assert!(approx(centred.center().y(), 50.0));
    }

    #[test]
    fn mtext_bounds_use_attachment_point() {
        let mut entity = Entity::mtext("TEXT", Point3::new(0.0, 10.0, 0.0), "桩", 2.0);
        if let EntityKind::MText(mtext) = &mut entity.kind {
            mtext.attachment_point = 5;
        }
        let bounds = entity.bounds().expect("mtext bounds");
        assert!(approx(bounds.center().x(), 0.0));
        assert!(approx(bounds.center().y(), 10.0));
    }

    #[test]
    fn generic_probe_priority() {
        let generic = GenericEntity {
            anchors: vec![
                (AnchorRole::Start, Point3::new(1.0, 0.0, 0.0)),
                (AnchorRole::Center, Point3::new(2.0, 0.0, 0.0)),
            ],
            text: None,
        };
        assert_eq!(generic.probe(), Some(Point3::new(2.0, 0.0, 0.0)));
        assert!(GenericEntity::default().probe().is_none());
    }

    #[test]
    fn hatch_hole_requires_external_boundary() {
        let path = |flags| HatchPath {
            flags,
            is_closed: true,
            vertices: Vec::new(),
            edges: Vec::new(),
        };
        let hatch = Hatch {
            pattern_name: "SOLID".to_string(),
            pattern_scale: None,
            pattern_angle: None,
            is_solid: true,
            elevation: 0.0,
            paths: vec![path(0x03), path(0x02)],
            seeds: Vec::new(),
        };
        assert!(!hatch.path_is_hole(0));
        assert!(hatch.path_is_hole(1));
        assert!(!hatch.path_is_hole(5));
    }
}
