//! 表格网格重建：由水平/竖直线段推断网格线与单元格边界，
//! 按开放边界合并单元格，再把文字与块名归入所在区域。

use std::collections::{HashMap, HashSet, VecDeque};

use dxfgrid_core::document::{Document, Entity, EntityKind, Layout};
use dxfgrid_core::geometry::{Bounds2D, Point2};
use serde::Serialize;
use tracing::debug;

/// 网格重建参数。
#[derive(Debug, Clone, PartialEq)]
pub struct TableOptions {
    /// 判定水平/竖直线的容差。
    pub axis_tolerance: f64,
    /// 网格坐标归并容差，同时用作落点越界容差。
    pub merge_tolerance: f64,
    /// 线段覆盖单元格边长的最小比例。
    pub edge_cover_ratio: f64,
    /// 聚类时判定横竖线相交的容差。
    pub cluster_tolerance: f64,
    /// 聚类后网格坐标的归并容差。
    pub cluster_snap_tolerance: f64,
    /// 隔离表格时只考虑该图层（不区分大小写）。
    pub layer_filter: Option<String>,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            axis_tolerance: 0.5,
            merge_tolerance: 1.0,
            edge_cover_ratio: 0.6,
            cluster_tolerance: 2.0,
            cluster_snap_tolerance: 0.5,
            layer_filter: Some("TEXT".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Vertical,
    Horizontal,
}

/// 轴对齐线段：竖线的 `position` 为 x、跨度为 y；横线反之。`start <= end`。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub orientation: Orientation,
    pub position: f64,
    pub start: f64,
    pub end: f64,
}

impl Segment {
    /// 按容差归类两点连线；斜线与过短线段返回 None。
    pub fn classify(a: Point2, b: Point2, tolerance: f64) -> Option<Self> {
        let dx = (b.x() - a.x()).abs();
        let dy = (b.y() - a.y()).abs();
        if dx <= tolerance && dy > tolerance {
            Some(Self {
                orientation: Orientation::Vertical,
                position: (a.x() + b.x()) * 0.5,
                start: a.y().min(b.y()),
                end: a.y().max(b.y()),
            })
        } else if dy <= tolerance && dx > tolerance {
            Some(Self {
                orientation: Orientation::Horizontal,
                position: (a.y() + b.y()) * 0.5,
                start: a.x().min(b.x()),
                end: a.x().max(b.x()),
            })
        } else {
            None
        }
    }

    /// 与区间 `[lo, hi]` 的重叠长度。
    pub fn overlap(&self, lo: f64, hi: f64) -> f64 {
        (self.end.min(hi) - self.start.max(lo)).max(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segments {
    pub vertical: Vec<Segment>,
    pub horizontal: Vec<Segment>,
}

impl Segments {
    pub fn push(&mut self, segment: Segment) {
        match segment.orientation {
            Orientation::Vertical => self.vertical.push(segment),
            Orientation::Horizontal => self.horizontal.push(segment),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vertical.is_empty() && self.horizontal.is_empty()
    }

    fn extend_classified(&mut self, a: Point2, b: Point2, tolerance: f64) {
        if let Some(segment) = Segment::classify(a, b, tolerance) {
            self.push(segment);
        }
    }
}

/// 从 LINE 与 LWPOLYLINE（闭合时含收尾边）提取轴对齐线段。
pub fn extract_segments<'a, I>(entities: I, tolerance: f64) -> Segments
where
    I: IntoIterator<Item = &'a Entity>,
{
    let mut segments = Segments::default();
    for entity in entities {
        match &entity.kind {
            EntityKind::Line(line) => {
                let a = entity.to_wcs(line.start).xy();
                let b = entity.to_wcs(line.end).xy();
                segments.extend_classified(a, b, tolerance);
            }
            EntityKind::LwPolyline(polyline) => {
                let points: Vec<Point2> = polyline
                    .vertices
                    .iter()
                    .map(|vertex| entity.to_wcs(vertex.position.with_z(polyline.elevation)).xy())
                    .collect();
                for pair in points.windows(2) {
                    segments.extend_classified(pair[0], pair[1], tolerance);
                }
                if polyline.is_closed && points.len() > 2 {
                    segments.extend_classified(points[points.len() - 1], points[0], tolerance);
                }
            }
            _ => {}
        }
    }
    segments
}

/// 排序后把相邻差值不超过容差的坐标归为一组，取均值。
pub fn snap_positions(values: &[f64], tolerance: f64) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);

    let mut snapped = Vec::new();
    let mut group: Vec<f64> = Vec::new();
    for value in sorted {
        if let Some(last) = group.last() {
            if value - last > tolerance {
                snapped.push(mean(&group));
                group.clear();
            }
        }
        group.push(value);
    }
    if !group.is_empty() {
        snapped.push(mean(&group));
    }
    snapped
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn nearest_index(lines: &[f64], value: f64) -> usize {
    lines
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - value).abs().total_cmp(&(*b - value).abs()))
        .map(|(index, _)| index)
        .unwrap_or(0)
}

/// 网格：`xs` 升序、`ys_desc` 自上而下降序。
/// 竖边 `(i, j)` 位于 `xs[i]`、覆盖第 `j` 行；横边 `(i, j)` 位于 `ys_desc[j]`、覆盖第 `i` 列。
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    xs: Vec<f64>,
    ys_desc: Vec<f64>,
    vertical_edges: HashSet<(usize, usize)>,
    horizontal_edges: HashSet<(usize, usize)>,
}

impl Grid {
    /// 由线段构造网格；任一方向不足 3 条网格线时返回 None。
    pub fn build(segments: &Segments, options: &TableOptions) -> Option<Self> {
        let x_values: Vec<f64> = segments.vertical.iter().map(|s| s.position).collect();
        let y_values: Vec<f64> = segments.horizontal.iter().map(|s| s.position).collect();
        let xs = snap_positions(&x_values, options.merge_tolerance);
        let mut ys_desc = snap_positions(&y_values, options.merge_tolerance);
        ys_desc.reverse();
        if xs.len() < 3 || ys_desc.len() < 3 {
            debug!(xs = xs.len(), ys = ys_desc.len(), "网格线不足，放弃重建");
            return None;
        }

        let mut grid = Self {
            xs,
            ys_desc,
            vertical_edges: HashSet::new(),
            horizontal_edges: HashSet::new(),
        };
        grid.detect_edges(segments, options);
        Some(grid)
    }

    fn detect_edges(&mut self, segments: &Segments, options: &TableOptions) {
        let mut by_x: HashMap<usize, Vec<&Segment>> = HashMap::new();
        for segment in &segments.vertical {
            by_x.entry(nearest_index(&self.xs, segment.position))
                .or_default()
                .push(segment);
        }
        let mut by_y: HashMap<usize, Vec<&Segment>> = HashMap::new();
        for segment in &segments.horizontal {
            by_y.entry(nearest_index(&self.ys_desc, segment.position))
                .or_default()
                .push(segment);
        }

        let covered = |candidates: Option<&Vec<&Segment>>, lo: f64, hi: f64| {
            let required = options.edge_cover_ratio * options.axis_tolerance.max(hi - lo);
            candidates.is_some_and(|list| list.iter().any(|s| s.overlap(lo, hi) >= required))
        };

        for i in 0..self.xs.len() {
            for j in 0..self.rows() {
                let (bottom, top) = (self.ys_desc[j + 1], self.ys_desc[j]);
                if covered(by_x.get(&i), bottom, top) {
                    self.vertical_edges.insert((i, j));
                }
            }
        }
        for j in 0..self.ys_desc.len() {
            for i in 0..self.cols() {
                let (left, right) = (self.xs[i], self.xs[i + 1]);
                if covered(by_y.get(&j), left, right) {
                    self.horizontal_edges.insert((i, j));
                }
            }
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.ys_desc.len() - 1
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.xs.len() - 1
    }

    #[inline]
    pub fn xs(&self) -> &[f64] {
        &self.xs
    }

    #[inline]
    pub fn ys_desc(&self) -> &[f64] {
        &self.ys_desc
    }

    #[inline]
    pub fn has_vertical_edge(&self, line: usize, row: usize) -> bool {
        self.vertical_edges.contains(&(line, row))
    }

    #[inline]
    pub fn has_horizontal_edge(&self, col: usize, line: usize) -> bool {
        self.horizontal_edges.contains(&(col, line))
    }

    /// 网格外框。
    pub fn bounds(&self) -> Bounds2D {
        Bounds2D::new(
            Point2::new(self.xs[0], self.ys_desc[self.ys_desc.len() - 1]),
            Point2::new(self.xs[self.xs.len() - 1], self.ys_desc[0]),
        )
    }

    /// 单元格矩形。
    pub fn cell_rect(&self, col: usize, row: usize) -> Bounds2D {
        Bounds2D::new(
            Point2::new(self.xs[col], self.ys_desc[row + 1]),
            Point2::new(self.xs[col + 1], self.ys_desc[row]),
        )
    }

    /// 二分查找点所在单元格 `(col, row)`；超出外框容差时返回 None。
    pub fn point_to_cell(&self, point: Point2, tolerance: f64) -> Option<(usize, usize)> {
        if !self.bounds().contains(point, tolerance) {
            return None;
        }
        let col = self
            .xs
            .partition_point(|&x| x <= point.x())
            .saturating_sub(1)
            .min(self.cols() - 1);
        let row = self
            .ys_desc
            .partition_point(|&y| y >= point.y())
            .saturating_sub(1)
            .min(self.rows() - 1);
        Some((col, row))
    }

    /// 与相邻单元格之间没有边界线的邻居。
    fn open_neighbors(&self, col: usize, row: usize) -> Vec<(usize, usize)> {
        let mut neighbors = Vec::with_capacity(4);
        if col + 1 < self.cols() && !self.has_vertical_edge(col + 1, row) {
            neighbors.push((col + 1, row));
        }
        if col > 0 && !self.has_vertical_edge(col, row) {
            neighbors.push((col - 1, row));
        }
        if row + 1 < self.rows() && !self.has_horizontal_edge(col, row + 1) {
            neighbors.push((col, row + 1));
        }
        if row > 0 && !self.has_horizontal_edge(col, row) {
            neighbors.push((col, row - 1));
        }
        neighbors
    }

    /// 广度优先得到合并单元格区域，按行优先的种子顺序输出。
    pub fn regions(&self) -> Vec<Vec<(usize, usize)>> {
        let mut visited = vec![vec![false; self.cols()]; self.rows()];
        let mut regions = Vec::new();
        for row in 0..self.rows() {
            for col in 0..self.cols() {
                if visited[row][col] {
                    continue;
                }
                visited[row][col] = true;
                let mut queue = VecDeque::from([(col, row)]);
                let mut cells = Vec::new();
                while let Some((c, r)) = queue.pop_front() {
                    cells.push((c, r));
                    for (nc, nr) in self.open_neighbors(c, r) {
                        if !visited[nr][nc] {
                            visited[nr][nc] = true;
                            queue.push_back((nc, nr));
                        }
                    }
                }
                regions.push(cells);
            }
        }
        regions
    }
}

/// 行优先的单元格文字矩阵，JSON 序列化为二维数组。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TableMatrix {
    cells: Vec<Vec<String>>,
}

impl TableMatrix {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_rows(cells: Vec<Vec<String>>) -> Self {
        Self { cells }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    pub fn row_count(&self) -> usize {
        self.cells.len()
    }

    pub fn col_count(&self) -> usize {
        self.cells.first().map_or(0, Vec::len)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&str> {
        self.cells.get(row)?.get(col).map(String::as_str)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[String]> {
        self.cells.iter().map(Vec::as_slice)
    }

    pub fn into_rows(self) -> Vec<Vec<String>> {
        self.cells
    }
}

/// 单元格内容实体的文字：TEXT/MTEXT 取纯文本，INSERT 取块名。
fn content_text(entity: &Entity) -> Option<&str> {
    let text = match &entity.kind {
        EntityKind::Text(text) => text.content.as_str(),
        EntityKind::MText(mtext) => mtext.content.as_str(),
        EntityKind::Insert(reference) => reference.name.as_str(),
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then_some(text)
}

/// 内容实体的落点：范围中心，取不到范围时退回定位点。
fn content_point(document: &Document, entity: &Entity) -> Option<Point2> {
    document
        .entity_bounds(entity)
        .map(|bounds| bounds.center())
        .or_else(|| entity.anchor().map(|anchor| anchor.xy()))
}

/// 把文字归入原始单元格，同一单元格按出现顺序收集。
pub fn cell_contents(
    document: &Document,
    entities: &[&Entity],
    grid: &Grid,
    tolerance: f64,
) -> HashMap<(usize, usize), Vec<String>> {
    let mut contents: HashMap<(usize, usize), Vec<String>> = HashMap::new();
    for entity in entities {
        let Some(text) = content_text(entity) else {
            continue;
        };
        let Some(point) = content_point(document, entity) else {
            continue;
        };
        match grid.point_to_cell(point, tolerance) {
            Some(cell) => contents.entry(cell).or_default().push(text.to_string()),
            None => debug!(text, x = point.x(), y = point.y(), "内容落在网格外"),
        }
    }
    contents
}

/// 合并区域内的文字去重后以空格连接，并复制到区域内每个单元格。
pub fn assemble(grid: &Grid, contents: &HashMap<(usize, usize), Vec<String>>) -> TableMatrix {
    let mut cells = vec![vec![String::new(); grid.cols()]; grid.rows()];
    for region in grid.regions() {
        let mut seen = HashSet::new();
        let mut texts: Vec<&str> = Vec::new();
        for cell in &region {
            for text in contents.get(cell).into_iter().flatten() {
                let text = text.trim();
                if !text.is_empty() && seen.insert(text) {
                    texts.push(text);
                }
            }
        }
        let joined = texts.join(" ");
        for (col, row) in region {
            cells[row][col] = joined.clone();
        }
    }
    TableMatrix::from_rows(cells)
}

/// 从实体集合重建表格；没有可用网格时返回空矩阵。
pub fn reconstruct(document: &Document, entities: &[&Entity], options: &TableOptions) -> TableMatrix {
    let segments = extract_segments(entities.iter().copied(), options.axis_tolerance);
    debug!(
        vertical = segments.vertical.len(),
        horizontal = segments.horizontal.len(),
        "提取表格线段"
    );
    let Some(grid) = Grid::build(&segments, options) else {
        return TableMatrix::empty();
    };
    let contents = cell_contents(document, entities, &grid, options.merge_tolerance);
    debug!(
        rows = grid.rows(),
        cols = grid.cols(),
        filled = contents.len(),
        "网格重建完成"
    );
    assemble(&grid, &contents)
}

/// 以整个布局为输入重建表格。
pub fn reconstruct_layout(document: &Document, layout: &Layout, options: &TableOptions) -> TableMatrix {
    let entities: Vec<&Entity> = layout.entities().map(|(_, entity)| entity).collect();
    reconstruct(document, &entities, options)
}

#[cfg(test)]
mod tests {
    use dxfgrid_core::geometry::Point3;

    use super::*;

    fn line(x1: f64, y1: f64, x2: f64, y2: f64) -> Entity {
        Entity::line("TABLE", Point3::new(x1, y1, 0.0), Point3::new(x2, y2, 0.0))
    }

    fn segment(orientation: Orientation, position: f64, start: f64, end: f64) -> Segment {
        Segment {
            orientation,
            position,
            start,
            end,
        }
    }

    #[test]
    fn classify_separates_axis_lines_from_diagonals() {
        let v = Segment::classify(Point2::new(1.0, 0.0), Point2::new(1.2, 10.0), 0.5).unwrap();
        assert_eq!(v.orientation, Orientation::Vertical);
        assert!((v.position - 1.1).abs() < 1e-9);
        assert_eq!((v.start, v.end), (0.0, 10.0));

        let h = Segment::classify(Point2::new(8.0, 3.0), Point2::new(2.0, 3.0), 0.5).unwrap();
        assert_eq!(h.orientation, Orientation::Horizontal);
        assert_eq!((h.start, h.end), (2.0, 8.0));

        assert!(Segment::classify(Point2::new(0.0, 0.0), Point2::new(5.0, 5.0), 0.5).is_none());
        assert!(Segment::classify(Point2::new(0.0, 0.0), Point2::new(0.1, 0.2), 0.5).is_none());
    }

    #[test]
    fn closed_polyline_contributes_closing_edge() {
        let rect = Entity::lwpolyline(
            "TABLE",
            [
                Point2::new(0.0, 0.0),
                Point2::new(10.0, 0.0),
                Point2::new(10.0, 5.0),
                Point2::new(0.0, 5.0),
            ],
            true,
        );
        let segments = extract_segments([&rect], 0.5);
        assert_eq!(segments.vertical.len(), 2);
        assert_eq!(segments.horizontal.len(), 2);
    }

    #[test]
    fn snapping_merges_chained_values_to_mean() {
        let snapped = snap_positions(&[10.4, 0.0, 10.0, 0.3, 20.0, 10.8], 0.5);
        let expected = [0.15, 10.4, 20.0];
        assert_eq!(snapped.len(), expected.len());
        for (value, want) in snapped.iter().zip(expected) {
            assert!((value - want).abs() < 1e-9, "{value} != {want}");
        }
        assert!(snap_positions(&[], 0.5).is_empty());
    }

    #[test]
    fn point_lookup_uses_descending_rows() {
        let segments = Segments {
            vertical: vec![
                segment(Orientation::Vertical, 0.0, 0.0, 20.0),
                segment(Orientation::Vertical, 10.0, 0.0, 20.0),
                segment(Orientation::Vertical, 30.0, 0.0, 20.0),
            ],
            horizontal: vec![
                segment(Orientation::Horizontal, 0.0, 0.0, 30.0),
                segment(Orientation::Horizontal, 10.0, 0.0, 30.0),
                segment(Orientation::Horizontal, 20.0, 0.0, 30.0),
            ],
        };
        let grid = Grid::build(&segments, &TableOptions::default()).expect("grid");
        assert_eq!(grid.ys_desc(), [20.0, 10.0, 0.0]);
        assert_eq!(grid.point_to_cell(Point2::new(5.0, 15.0), 1.0), Some((0, 0)));
        assert_eq!(grid.point_to_cell(Point2::new(25.0, 5.0), 1.0), Some((1, 1)));
        assert_eq!(grid.point_to_cell(Point2::new(30.5, 20.5), 1.0), Some((1, 0)));
        assert_eq!(grid.point_to_cell(Point2::new(35.0, 5.0), 1.0), None);
        assert!(grid.has_vertical_edge(0, 0));
        assert!(grid.has_horizontal_edge(1, 2));
    }

    #[test]
    fn l_shaped_merge_forms_one_region() {
        // 3x2 网格：上排中、右两格与右下格连通
        let segments = Segments {
            vertical: vec![
                segment(Orientation::Vertical, 0.0, 0.0, 20.0),
                segment(Orientation::Vertical, 10.0, 0.0, 20.0),
                segment(Orientation::Vertical, 30.0, 0.0, 20.0),
                segment(Orientation::Vertical, 20.0, 0.0, 10.0),
            ],
            horizontal: vec![
                segment(Orientation::Horizontal, 0.0, 0.0, 30.0),
                segment(Orientation::Horizontal, 20.0, 0.0, 30.0),
                segment(Orientation::Horizontal, 10.0, 0.0, 20.0),
            ],
        };
        let grid = Grid::build(&segments, &TableOptions::default()).expect("grid");
        assert_eq!((grid.rows(), grid.cols()), (2, 3));
        let regions = grid.regions();
        assert_eq!(regions.len(), 4);
        let mut merged = regions[1].clone();
        merged.sort();
        assert_eq!(merged, [(1, 0), (2, 0), (2, 1)]);
    }

    #[test]
    fn region_text_is_deduplicated_in_order() {
        let segments = Segments {
            vertical: vec![
                segment(Orientation::Vertical, 0.0, 0.0, 10.0),
                segment(Orientation::Vertical, 10.0, 0.0, 10.0),
                segment(Orientation::Vertical, 20.0, 0.0, 10.0),
            ],
            horizontal: vec![
                segment(Orientation::Horizontal, 0.0, 0.0, 20.0),
                segment(Orientation::Horizontal, 5.0, 0.0, 20.0),
                segment(Orientation::Horizontal, 10.0, 0.0, 20.0),
            ],
        };
        let grid = Grid::build(&segments, &TableOptions::default()).expect("grid");
        let mut contents = HashMap::new();
        contents.insert(
            (0, 0),
            vec!["PHC".to_string(), " 500 ".to_string(), "PHC".to_string()],
        );
        let matrix = assemble(&grid, &contents);
        assert_eq!(matrix.get(0, 0), Some("PHC 500"));
        assert_eq!(matrix.get(0, 1), Some(""));
    }

    #[test]
    fn insert_content_uses_block_name() {
        let mut doc = Document::new();
        let mut entities = vec![
            line(0.0, 0.0, 20.0, 0.0),
            line(0.0, 10.0, 20.0, 10.0),
            line(0.0, 20.0, 20.0, 20.0),
            line(0.0, 0.0, 0.0, 20.0),
            line(10.0, 0.0, 10.0, 20.0),
            line(20.0, 0.0, 20.0, 20.0),
        ];
        entities.push(Entity::insert("0", "SYMBOL-A", Point3::new(15.0, 5.0, 0.0)));
        for entity in &entities {
            doc.add_entity(entity.clone());
        }

        let matrix = reconstruct_layout(&doc, doc.model_space(), &TableOptions::default());
        assert_eq!(matrix.row_count(), 2);
        assert_eq!(matrix.get(1, 1), Some("SYMBOL-A"));
    }

    #[test]
    fn diagonal_only_input_yields_empty_matrix() {
        let doc = Document::new();
        let entities = [line(0.0, 0.0, 10.0, 10.0), line(0.0, 10.0, 10.0, 0.0)];
        let refs: Vec<&Entity> = entities.iter().collect();
        assert!(reconstruct(&doc, &refs, &TableOptions::default()).is_empty());
    }
}
