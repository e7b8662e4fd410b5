//! 表格隔离：横竖线段按相交关系聚类，每个连通分量视为一张候选表格。

use std::collections::VecDeque;

use dxfgrid_core::document::{Document, Entity, EntityKind, Layout};
use dxfgrid_core::geometry::{Bounds2D, Point2};
use tracing::{debug, info};

use crate::table::{Segment, Segments, TableMatrix, TableOptions, extract_segments, reconstruct, snap_positions};

/// 候选表格区域。
#[derive(Debug, Clone, PartialEq)]
pub struct TableRegion {
    /// 聚类后归并的竖线 x 坐标（升序）。
    pub xs: Vec<f64>,
    /// 聚类后归并的横线 y 坐标（升序）。
    pub ys: Vec<f64>,
    pub bounds: Bounds2D,
    pub segments: Segments,
}

impl TableRegion {
    #[inline]
    pub fn area(&self) -> f64 {
        self.bounds.area()
    }
}

/// 竖线与横线在容差内相交。
pub fn intersects(vertical: &Segment, horizontal: &Segment, tolerance: f64) -> bool {
    let x = vertical.position;
    let y = horizontal.position;
    x >= horizontal.start - tolerance
        && x <= horizontal.end + tolerance
        && y >= vertical.start - tolerance
        && y <= vertical.end + tolerance
}

/// 以横竖线为二部图节点、相交为边，返回同时含横线与竖线的连通分量。
pub fn cluster_segments(segments: &Segments, tolerance: f64) -> Vec<Segments> {
    let verticals = &segments.vertical;
    let horizontals = &segments.horizontal;
    let mut v_to_h = vec![Vec::new(); verticals.len()];
    let mut h_to_v = vec![Vec::new(); horizontals.len()];
    for (i, v) in verticals.iter().enumerate() {
        for (j, h) in horizontals.iter().enumerate() {
            if intersects(v, h, tolerance) {
                v_to_h[i].push(j);
                h_to_v[j].push(i);
            }
        }
    }

    #[derive(Clone, Copy)]
    enum Node {
        V(usize),
        H(usize),
    }

    let mut seen_v = vec![false; verticals.len()];
    let mut seen_h = vec![false; horizontals.len()];
    let mut clusters = Vec::new();
    for start in 0..verticals.len() {
        if seen_v[start] || v_to_h[start].is_empty() {
            continue;
        }
        seen_v[start] = true;
        let mut component = Segments::default();
        let mut queue = VecDeque::from([Node::V(start)]);
        while let Some(node) = queue.pop_front() {
            match node {
                Node::V(i) => {
                    component.vertical.push(verticals[i]);
                    for &j in &v_to_h[i] {
                        if !seen_h[j] {
                            seen_h[j] = true;
                            queue.push_back(Node::H(j));
                        }
                    }
                }
                Node::H(j) => {
                    component.horizontal.push(horizontals[j]);
                    for &i in &h_to_v[j] {
                        if !seen_v[i] {
                            seen_v[i] = true;
                            queue.push_back(Node::V(i));
                        }
                    }
                }
            }
        }
        if !component.vertical.is_empty() && !component.horizontal.is_empty() {
            clusters.push(component);
        }
    }
    clusters
}

fn layer_matches(entity: &Entity, filter: Option<&str>) -> bool {
    match filter.map(str::trim).filter(|f| !f.is_empty()) {
        Some(filter) => entity.layer_name().trim().eq_ignore_ascii_case(filter),
        None => true,
    }
}

/// 检测候选表格，按发现顺序返回每个能形成有效网格的分量。
pub fn detect_tables<'a, I>(entities: I, options: &TableOptions) -> Vec<TableRegion>
where
    I: IntoIterator<Item = &'a Entity>,
{
    let filter = options.layer_filter.as_deref();
    let segments = extract_segments(
        entities
            .into_iter()
            .filter(|entity| layer_matches(entity, filter)),
        options.axis_tolerance,
    );
    let clusters = cluster_segments(&segments, options.cluster_tolerance);
    debug!(
        vertical = segments.vertical.len(),
        horizontal = segments.horizontal.len(),
        clusters = clusters.len(),
        "线段聚类完成"
    );

    clusters
        .into_iter()
        .filter_map(|component| {
            let xs: Vec<f64> = component.vertical.iter().map(|s| s.position).collect();
            let ys: Vec<f64> = component.horizontal.iter().map(|s| s.position).collect();
            let xs = snap_positions(&xs, options.cluster_snap_tolerance);
            let ys = snap_positions(&ys, options.cluster_snap_tolerance);
            if xs.len() < 3 || ys.len() < 3 {
                return None;
            }
            let bounds = Bounds2D::new(
                Point2::new(xs[0], ys[0]),
                Point2::new(xs[xs.len() - 1], ys[ys.len() - 1]),
            );
            Some(TableRegion {
                xs,
                ys,
                bounds,
                segments: component,
            })
        })
        .collect()
}

/// 取面积最小的候选区域，用于在外框内挑出内层数据表。
pub fn select_inner_table(regions: &[TableRegion]) -> Option<&TableRegion> {
    regions
        .iter()
        .filter(|region| region.area() > 0.0)
        .fold(None, |best: Option<&TableRegion>, region| match best {
            Some(current) if current.area() <= region.area() => Some(current),
            _ => Some(region),
        })
}

/// 裁剪判定使用的定位点（WCS）。
fn clip_points(entity: &Entity) -> Vec<Point2> {
    let wcs = |point| entity.to_wcs(point).xy();
    match &entity.kind {
        EntityKind::Text(text) => vec![wcs(text.insert)],
        EntityKind::MText(mtext) => vec![wcs(mtext.insert)],
        EntityKind::Insert(reference) => vec![wcs(reference.insert)],
        EntityKind::Line(line) => vec![wcs(line.start), wcs(line.end)],
        EntityKind::LwPolyline(polyline) => polyline
            .vertices
            .iter()
            .map(|vertex| wcs(vertex.position.with_z(polyline.elevation)))
            .collect(),
        EntityKind::Polyline(polyline) => polyline.vertices.iter().map(|p| wcs(*p)).collect(),
        EntityKind::Circle(circle) => vec![wcs(circle.center)],
        EntityKind::Arc(arc) => vec![wcs(arc.center)],
        EntityKind::Ellipse(ellipse) => vec![wcs(ellipse.center)],
        _ => Vec::new(),
    }
}

/// 保留定位点落在区域内的实体（不限图层）。
pub fn clip_entities<'a, I>(entities: I, bounds: &Bounds2D, tolerance: f64) -> Vec<&'a Entity>
where
    I: IntoIterator<Item = &'a Entity>,
{
    entities
        .into_iter()
        .filter(|entity| {
            clip_points(entity)
                .into_iter()
                .any(|point| bounds.contains(point, tolerance))
        })
        .collect()
}

/// 隔离出的表格。
#[derive(Debug, Clone)]
pub struct IsolatedTable {
    pub region: TableRegion,
    pub matrix: TableMatrix,
}

const CLIP_TOLERANCE: f64 = 1e-6;

fn isolate(document: &Document, entities: &[&Entity], region: TableRegion, options: &TableOptions) -> IsolatedTable {
    let clipped = clip_entities(entities.iter().copied(), &region.bounds, CLIP_TOLERANCE);
    let matrix = reconstruct(document, &clipped, options);
    IsolatedTable { region, matrix }
}

/// 布局中的每个候选表格分别裁剪并重建。
pub fn extract_tables(document: &Document, layout: &Layout, options: &TableOptions) -> Vec<IsolatedTable> {
    let entities: Vec<&Entity> = layout.entities().map(|(_, entity)| entity).collect();
    let tables: Vec<IsolatedTable> = detect_tables(entities.iter().copied(), options)
        .into_iter()
        .map(|region| isolate(document, &entities, region, options))
        .collect();
    info!(layout = %layout.name, tables = tables.len(), "表格检测完成");
    tables
}

/// 在布局中挑出内层表格并重建；没有候选时返回 None。
pub fn extract_inner_table(
    document: &Document,
    layout: &Layout,
    options: &TableOptions,
) -> Option<IsolatedTable> {
    let entities: Vec<&Entity> = layout.entities().map(|(_, entity)| entity).collect();
    let regions = detect_tables(entities.iter().copied(), options);
    let region = select_inner_table(&regions)?.clone();
    debug!(
        min_x = region.bounds.min().x(),
        min_y = region.bounds.min().y(),
        max_x = region.bounds.max().x(),
        max_y = region.bounds.max().y(),
        "选定内层表格"
    );
    Some(isolate(document, &entities, region, options))
}
