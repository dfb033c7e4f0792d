use nalgebra::{RealField, SMatrix, SMatrixViewMut, SVector, convert};

use crate::constraint::{Constraint, DynConstraint};

/// Can project a series of points into their feasible region.
pub trait Project<T, const N: usize, const H: usize> {
    /// Applies the projection to a series of points, modifying them in place
    fn project(&self, points: SMatrixViewMut<T, N, H>);
}

impl<T, const N: usize, const H: usize> Project<T, N, H> for &dyn Project<T, N, H> {
    fn project(&self, points: SMatrixViewMut<T, N, H>) {
        (**self).project(points);
    }
}

impl<P: Project<T, N, H>, T, const N: usize, const H: usize> Project<T, N, H> for &P {
    fn project(&self, points: SMatrixViewMut<T, N, H>) {
        (**self).project(points);
    }
}

/// No constraint. The slack variables still act as a proximal term.
impl<T, const N: usize, const H: usize> Project<T, N, H> for () {
    fn project(&self, mut _points: SMatrixViewMut<T, N, H>) {}
}

impl<P: Project<T, N, H>, T, const N: usize, const H: usize, const NUM: usize> Project<T, N, H>
    for [P; NUM]
{
    fn project(&self, mut points: SMatrixViewMut<T, N, H>) {
        for projector in self {
            projector.project(points.as_view_mut());
        }
    }
}

macro_rules! derive_tuple_project {
    ($($project:ident: $number:tt),+) => {
        impl<$($project: Project<T, N, H>),+, T, const N: usize, const H: usize> Project<T, N, H>
            for ( $($project,)+ )
        {
            fn project(&self, mut points: SMatrixViewMut<T, N, H>) {
                $(
                    self.$number.project(points.as_view_mut());
                )+
            }
        }
    };
}

derive_tuple_project! {P0: 0}
derive_tuple_project! {P0: 0, P1: 1}
derive_tuple_project! {P0: 0, P1: 1, P2: 2}
derive_tuple_project! {P0: 0, P1: 1, P2: 2, P3: 3}
derive_tuple_project! {P0: 0, P1: 1, P2: 2, P3: 3, P4: 4}
derive_tuple_project! {P0: 0, P1: 1, P2: 2, P3: 3, P4: 4, P5: 5}

/// Extension trait for types implementing [`Project`] to convert it directly
/// into a [`Constraint`] or a trait object.
pub trait ProjectExt<T: RealField + Copy, const N: usize, const H: usize>:
    Project<T, N, H> + Sized
{
    fn dynamic(&self) -> &dyn Project<T, N, H> {
        self
    }

    fn constraint(self) -> Constraint<T, Self, N, H> {
        Constraint::new(self)
    }

    fn dyn_constraint(&self) -> DynConstraint<'_, T, N, H> {
        Constraint::new(self as &dyn Project<T, N, H>)
    }
}

impl<P: Project<T, N, H>, T: RealField + Copy, const N: usize, const H: usize> ProjectExt<T, N, H>
    for P
{
}

/// Elementwise clamp, with `upper` taking precedence when the bounds cross
#[inline(always)]
fn clamp<T: RealField + Copy>(x: T, lower: T, upper: T) -> T {
    x.max(lower).min(upper)
}

/// A box constraint that is constant throughout the horizon.
///
/// Elements without a bound are left untouched.
#[derive(Debug, Copy, Clone)]
pub struct Box<T, const N: usize> {
    pub lower: SVector<Option<T>, N>,
    pub upper: SVector<Option<T>, N>,
}

impl<T: RealField + Copy, const N: usize> Default for Box<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RealField + Copy, const N: usize> Box<T, N> {
    /// Construct a new box without any bounds
    pub fn new() -> Self {
        Self {
            lower: SVector::from_element(None),
            upper: SVector::from_element(None),
        }
    }

    /// Construct a box bounding every element in `[lower, upper]`
    pub fn from_bounds(lower: SVector<T, N>, upper: SVector<T, N>) -> Self {
        Self {
            lower: lower.map(Some),
            upper: upper.map(Some),
        }
    }

    /// Construct a box bounding every element in `[-bound, bound]`
    pub fn symmetric(bound: SVector<T, N>) -> Self {
        Self::from_bounds(-bound, bound)
    }

    pub fn with_upper(self, upper: impl Into<SVector<Option<T>, N>>) -> Self {
        Self {
            upper: upper.into(),
            ..self
        }
    }

    pub fn with_lower(self, lower: impl Into<SVector<Option<T>, N>>) -> Self {
        Self {
            lower: lower.into(),
            ..self
        }
    }
}

impl<T: RealField + Copy, const N: usize, const H: usize> Project<T, N, H> for Box<T, N> {
    fn project(&self, mut points: SMatrixViewMut<T, N, H>) {
        for n in 0..N {
            if self.lower[n].is_none() && self.upper[n].is_none() {
                continue;
            }

            points.row_mut(n).apply(|x| {
                *x = match (self.lower[n], self.upper[n]) {
                    (Some(min), Some(max)) => clamp(*x, min, max),
                    (Some(min), None) => (*x).max(min),
                    (None, Some(max)) => (*x).min(max),
                    (None, None) => *x,
                }
            });
        }
    }
}

/// A box constraint with separate bounds for every stage of the horizon.
///
/// Unbounded elements hold `-inf` / `+inf`.
#[derive(Debug, Copy, Clone)]
pub struct BoxSeries<T, const N: usize, const H: usize> {
    pub lower: SMatrix<T, N, H>,
    pub upper: SMatrix<T, N, H>,
}

impl<T: RealField + Copy, const N: usize, const H: usize> Default for BoxSeries<T, N, H> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<T: RealField + Copy, const N: usize, const H: usize> BoxSeries<T, N, H> {
    pub fn unbounded() -> Self {
        Self {
            lower: SMatrix::from_element(convert(f64::NEG_INFINITY)),
            upper: SMatrix::from_element(convert(f64::INFINITY)),
        }
    }

    /// Repeats the same bounds for every stage
    pub fn from_constant(lower: SVector<T, N>, upper: SVector<T, N>) -> Self {
        let mut series = Self::unbounded();
        for h in 0..H {
            series.set_stage(h, lower, upper);
        }
        series
    }

    /// Sets the bounds of a single stage
    ///
    /// # Panics
    ///
    /// if `stage` is out of bounds
    pub fn set_stage(&mut self, stage: usize, lower: SVector<T, N>, upper: SVector<T, N>) {
        self.lower.set_column(stage, &lower);
        self.upper.set_column(stage, &upper);
    }
}

impl<T: RealField + Copy, const N: usize, const H: usize> Project<T, N, H> for BoxSeries<T, N, H> {
    fn project(&self, mut points: SMatrixViewMut<T, N, H>) {
        points.zip_zip_apply(&self.lower, &self.upper, |x, min, max| {
            *x = clamp(*x, min, max)
        });
    }
}

/// A circular second-order cone `|d_perp| <= mu * (d . axis)` around `axis`,
/// with `d` the offset from `vertex`.
///
/// Only dimensions with a defined vertex coordinate take part in the cone.
/// A zero axis, or a negative or NaN `mu`, describes a degenerate cone and
/// every point is snapped to the vertex. `mu = 0` is the ray along the axis.
#[derive(Debug, Copy, Clone)]
pub struct Cone<T, const N: usize> {
    pub vertex: SVector<Option<T>, N>,
    pub axis: SVector<T, N>,
    pub mu: T,
}

impl<T: RealField + Copy, const N: usize> Default for Cone<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RealField + Copy, const N: usize> Cone<T, N> {
    /// A 45 degree cone around the first dimension with its vertex at the origin
    pub fn new() -> Self {
        let mut axis = SVector::zeros();
        if N > 0 {
            axis[0] = T::one();
        }
        Self {
            vertex: SVector::from_element(Some(T::zero())),
            axis,
            mu: T::one(),
        }
    }

    pub fn axis(self, axis: SVector<T, N>) -> Self {
        Self { axis, ..self }
    }

    pub fn vertex(self, vertex: SVector<T, N>) -> Self {
        Self {
            vertex: vertex.map(Some),
            ..self
        }
    }

    /// Restrict the cone to the dimensions where `vertex` is `Some`
    pub fn partial_vertex(self, vertex: SVector<Option<T>, N>) -> Self {
        Self { vertex, ..self }
    }

    /// Tangent of the half-aperture angle
    pub fn mu(self, mu: T) -> Self {
        Self { mu, ..self }
    }

    /// The axis restricted to the cone's dimensions and normalized, or `None` if degenerate
    pub(crate) fn unit_axis(&self) -> Option<SVector<T, N>> {
        let mut axis = self.axis;
        for n in 0..N {
            if self.vertex[n].is_none() {
                axis[n] = T::zero();
            }
        }

        let norm = axis.norm();
        (norm > T::zero() && self.mu >= T::zero()).then(|| axis.unscale(norm))
    }
}

impl<T: RealField + Copy, const N: usize, const H: usize> Project<T, N, H> for Cone<T, N> {
    fn project(&self, mut points: SMatrixViewMut<T, N, H>) {
        let Some(axis) = self.unit_axis() else {
            // Degenerate cone, snap onto the vertex
            for h in 0..H {
                let mut point = points.column_mut(h);
                for n in 0..N {
                    if let Some(vertex) = self.vertex[n] {
                        point[n] = vertex;
                    }
                }
            }
            return;
        };

        for h in 0..H {
            let mut point = points.column_mut(h);

            let mut offset = SVector::<T, N>::zeros();
            for n in 0..N {
                if let Some(vertex) = self.vertex[n] {
                    offset[n] = point[n] - vertex;
                }
            }

            // Split into axial and tangential components
            let axial = offset.dot(&axis);
            let tangent = offset - axis.scale(axial);
            let radial = tangent.norm();

            let projected = if radial <= self.mu * axial && axial >= T::zero() {
                continue;
            } else if self.mu * radial <= -axial {
                SVector::zeros()
            } else {
                let axial = (self.mu * radial + axial) / (T::one() + self.mu * self.mu);
                axis.scale(axial) + tangent.scale(self.mu * axial / radial)
            };

            for n in 0..N {
                if let Some(vertex) = self.vertex[n] {
                    point[n] = vertex + projected[n];
                }
            }
        }
    }
}

/// A spherical constraint that is constant throughout the horizon
#[derive(Debug, Copy, Clone)]
pub struct Sphere<T, const N: usize> {
    pub center: SVector<Option<T>, N>,
    pub radius: T,
}

impl<T: RealField + Copy, const N: usize, const H: usize> Project<T, N, H> for Sphere<T, N> {
    fn project(&self, mut points: SMatrixViewMut<T, N, H>) {
        // Special case, just snap the points to the center coordinate
        if self.radius.is_zero() {
            for h in 0..H {
                let mut point = points.column_mut(h);
                for n in 0..N {
                    if let Some(center) = self.center[n] {
                        point[n] = center
                    }
                }
            }
            return;
        }

        for h in 0..H {
            let mut point = points.column_mut(h);

            let mut squared_dist = T::zero();
            let mut has_constraint = false;

            for n in 0..N {
                if let Some(center) = self.center[n] {
                    has_constraint = true;
                    let diff = point[n] - center;
                    squared_dist += diff * diff;
                }
            }

            if !has_constraint || squared_dist <= self.radius * self.radius {
                continue;
            }

            let scale = self.radius / squared_dist.sqrt();

            for n in 0..N {
                if let Some(center) = self.center[n] {
                    point[n] = center + (point[n] - center) * scale;
                }
            }
        }
    }
}

/// A half-space constraint `(normal / |normal|) . x <= distance`.
///
/// `distance` is measured along the unit normal, so scaling `normal` does not
/// change the set. A zero normal leaves points untouched.
#[derive(Debug, Copy, Clone)]
pub struct Affine<T, const N: usize> {
    pub normal: SVector<T, N>,
    pub distance: T,
}

impl<T: RealField + Copy, const N: usize, const H: usize> Project<T, N, H> for Affine<T, N> {
    fn project(&self, mut points: SMatrixViewMut<T, N, H>) {
        if self.normal.norm_squared().is_zero() {
            return;
        }
        let normal = self.normal.normalize();

        for h in 0..H {
            let mut point = points.column_mut(h);
            let dot = point.dot(&normal);

            if dot > self.distance {
                point -= normal.scale(dot - self.distance);
            }
        }
    }
}
