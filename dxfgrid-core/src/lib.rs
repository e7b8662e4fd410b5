pub mod document;
pub mod text;

pub mod geometry {
    use glam::{DAffine3, DMat3, DVec2, DVec3};
    use serde::{Deserialize, Serialize};

    /// 二维点，内部以 `glam::DVec2` 表示。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        /// 以给定高程提升为三维点（OCS 内的 2D 顶点常用）。
        #[inline]
        pub fn with_z(self, z: f64) -> Point3 {
            Point3::new(self.0.x, self.0.y, z)
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    /// 三维点。所有实体坐标最终都以该类型进入世界坐标系（WCS）。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point3(pub DVec3);

    impl Point3 {
        #[inline]
        pub fn new(x: f64, y: f64, z: f64) -> Self {
            Self(DVec3::new(x, y, z))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn z(self) -> f64 {
            self.0.z
        }

        #[inline]
        pub fn xy(self) -> Point2 {
            Point2::new(self.0.x, self.0.y)
        }

        #[inline]
        pub fn as_vec3(self) -> DVec3 {
            self.0
        }

        #[inline]
        pub fn is_finite(self) -> bool {
            self.0.is_finite()
        }
    }

    impl From<DVec3> for Point3 {
        fn from(value: DVec3) -> Self {
            Self(value)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector3(pub DVec3);

    impl Vector3 {
        #[inline]
        pub fn new(x: f64, y: f64, z: f64) -> Self {
            Self(DVec3::new(x, y, z))
        }

        #[inline]
        pub fn as_vec3(self) -> DVec3 {
            self.0
        }

        #[inline]
        pub fn length_squared(self) -> f64 {
            self.0.length_squared()
        }

        #[inline]
        pub fn normalize(self) -> Option<Self> {
            let len = self.0.length();
            if len <= f64::EPSILON {
                None
            } else {
                Some(Self(self.0 / len))
            }
        }
    }

    impl From<DVec3> for Vector3 {
        fn from(value: DVec3) -> Self {
            Self(value)
        }
    }

    /// 轴对齐边界框，用于估算实体范围及表格外框。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn new(min: Point2, max: Point2) -> Self {
            Self { min, max }
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f64::INFINITY, f64::INFINITY),
                max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn min(&self) -> Point2 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point2 {
            self.max
        }

        pub fn include_point(&mut self, point: Point2) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            self.min = Point2::from(self.min.as_vec2().min(point.as_vec2()));
            self.max = Point2::from(self.max.as_vec2().max(point.as_vec2()));
        }

        pub fn include_bounds(&mut self, other: &Bounds2D) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        #[inline]
        pub fn center(&self) -> Point2 {
            debug_assert!(!self.is_empty());
            Point2::from((self.min.as_vec2() + self.max.as_vec2()) * 0.5)
        }

        #[inline]
        pub fn width(&self) -> f64 {
            (self.max.x() - self.min.x()).max(0.0)
        }

        #[inline]
        pub fn height(&self) -> f64 {
            (self.max.y() - self.min.y()).max(0.0)
        }

        #[inline]
        pub fn area(&self) -> f64 {
            if self.is_empty() {
                0.0
            } else {
                self.width() * self.height()
            }
        }

        /// 点是否落在边界框内（允许 `tolerance` 的外扩）。
        pub fn contains(&self, point: Point2, tolerance: f64) -> bool {
            !self.is_empty()
                && point.x() >= self.min.x() - tolerance
                && point.x() <= self.max.x() + tolerance
                && point.y() >= self.min.y() - tolerance
                && point.y() <= self.max.y() + tolerance
        }
    }

    /// 实体坐标系（OCS）。按 DXF 任意轴算法由拉伸方向推导 X/Y 轴。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Ocs {
        basis: DMat3,
        identity: bool,
    }

    impl Ocs {
        const ARBITRARY_AXIS_LIMIT: f64 = 1.0 / 64.0;

        pub fn world() -> Self {
            Self {
                basis: DMat3::IDENTITY,
                identity: true,
            }
        }

        /// 由拉伸方向构造 OCS；零向量或与 +Z 相同时退化为 WCS。
        pub fn from_extrusion(extrusion: Option<Vector3>) -> Self {
            let Some(normal) = extrusion.and_then(Vector3::normalize) else {
                return Self::world();
            };
            let az = normal.as_vec3();
            if (az - DVec3::Z).length_squared() <= 1e-24 {
                return Self::world();
            }
            let ax = if az.x.abs() < Self::ARBITRARY_AXIS_LIMIT
                && az.y.abs() < Self::ARBITRARY_AXIS_LIMIT
            {
                DVec3::Y.cross(az).normalize()
            } else {
                DVec3::Z.cross(az).normalize()
            };
            let ay = az.cross(ax).normalize();
            Self {
                basis: DMat3::from_cols(ax, ay, az),
                identity: false,
            }
        }

        #[inline]
        pub fn is_world(&self) -> bool {
            self.identity
        }

        #[inline]
        pub fn to_wcs(&self, point: Point3) -> Point3 {
            if self.identity {
                point
            } else {
                Point3(self.basis * point.0)
            }
        }

        #[inline]
        pub fn direction_to_wcs(&self, vector: DVec3) -> DVec3 {
            if self.identity {
                vector
            } else {
                self.basis * vector
            }
        }

        fn as_affine(&self) -> DAffine3 {
            DAffine3::from_mat3(self.basis)
        }
    }

    /// 块参照的放置变换：基点平移 → 缩放 → 绕 Z 旋转 → 插入点平移 → 参照自身 OCS。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Placement {
        affine: DAffine3,
    }

    impl Placement {
        pub fn identity() -> Self {
            Self {
                affine: DAffine3::IDENTITY,
            }
        }

        pub fn for_block_reference(
            insert: Point3,
            scale: Vector3,
            rotation_deg: f64,
            base_point: Point3,
            extrusion: Option<Vector3>,
        ) -> Self {
            let local = DAffine3::from_translation(insert.0)
                * DAffine3::from_rotation_z(rotation_deg.to_radians())
                * DAffine3::from_scale(scale.0)
                * DAffine3::from_translation(-base_point.0);
            let ocs = Ocs::from_extrusion(extrusion);
            Self {
                affine: ocs.as_affine() * local,
            }
        }

        #[inline]
        pub fn apply(&self, point: Point3) -> Point3 {
            Point3(self.affine.transform_point3(point.0))
        }

        #[inline]
        pub fn apply_vector(&self, vector: DVec3) -> DVec3 {
            self.affine.transform_vector3(vector)
        }

        /// 变换后 X 轴在 XY 平面上的方向角（度）。
        pub fn rotation_deg(&self) -> f64 {
            let x_axis = self.affine.transform_vector3(DVec3::X);
            x_axis.y.atan2(x_axis.x).to_degrees()
        }

        /// XY 平面内的平均线性缩放，用于半径、字高、线宽等标量。
        pub fn mean_scale(&self) -> f64 {
            let sx = self.affine.transform_vector3(DVec3::X).truncate().length();
            let sy = self.affine.transform_vector3(DVec3::Y).truncate().length();
            (sx + sy) * 0.5
        }

        /// X/Y/Z 各轴的缩放长度；镜像时 X 取负。
        pub fn axis_scales(&self) -> Vector3 {
            let sx = self.affine.transform_vector3(DVec3::X).length();
            let sy = self.affine.transform_vector3(DVec3::Y).length();
            let sz = self.affine.transform_vector3(DVec3::Z).length();
            let sign = if self.is_mirrored() { -1.0 } else { 1.0 };
            Vector3::new(sx * sign, sy, sz)
        }

        #[inline]
        pub fn is_mirrored(&self) -> bool {
            self.affine.matrix3.determinant() < 0.0
        }

        pub fn is_finite(&self) -> bool {
            self.affine.is_finite()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn assert_point(actual: Point3, x: f64, y: f64, z: f64) {
            assert!(
                (actual.x() - x).abs() < 1e-9
                    && (actual.y() - y).abs() < 1e-9
                    && (actual.z() - z).abs() < 1e-9,
                "expected ({x}, {y}, {z}), got {actual:?}"
            );
        }

        #[test]
        fn default_extrusion_is_world() {
            let ocs = Ocs::from_extrusion(Some(Vector3::new(0.0, 0.0, 1.0)));
            assert!(ocs.is_world());
            assert_point(ocs.to_wcs(Point3::new(1.0, 2.0, 3.0)), 1.0, 2.0, 3.0);
            assert!(Ocs::from_extrusion(None).is_world());
        }

        #[test]
        fn mirrored_extrusion_flips_x() {
            let ocs = Ocs::from_extrusion(Some(Vector3::new(0.0, 0.0, -1.0)));
            assert!(!ocs.is_world());
            assert_point(ocs.to_wcs(Point3::new(5.0, 2.0, 0.0)), -5.0, 2.0, 0.0);
        }

        #[test]
        fn placement_applies_base_scale_rotation_and_insert() {
            let placement = Placement::for_block_reference(
                Point3::new(100.0, 50.0, 0.0),
                Vector3::new(2.0, 2.0, 1.0),
                90.0,
                Point3::new(1.0, 0.0, 0.0),
                None,
            );
            // (2,0) - base (1,0) = (1,0) → 缩放 (2,0) → 旋转 (0,2) → 平移
            assert_point(placement.apply(Point3::new(2.0, 0.0, 0.0)), 100.0, 52.0, 0.0);
            assert!((placement.rotation_deg() - 90.0).abs() < 1e-9);
            assert!((placement.mean_scale() - 2.0).abs() < 1e-9);
            assert!(!placement.is_mirrored());
        }

        #[test]
        fn bounds_contains_with_tolerance() {
            let mut bounds = Bounds2D::empty();
            assert!(!bounds.contains(Point2::new(0.0, 0.0), 1.0));
            bounds.include_point(Point2::new(0.0, 0.0));
            bounds.include_point(Point2::new(10.0, 5.0));
            assert!(bounds.contains(Point2::new(10.4, 5.0), 0.5));
            assert!(!bounds.contains(Point2::new(10.6, 5.0), 0.5));
            assert!((bounds.area() - 50.0).abs() < 1e-9);
        }
    }
}
