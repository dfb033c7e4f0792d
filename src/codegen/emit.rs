use std::fmt::Write;

use nalgebra::{RealField, SMatrix, SVector, convert};

use super::CodegenError;
use crate::project::{Box, BoxSeries, Cone};

/// A projector that can be written out as standalone code.
///
/// The generated projection operates on `v: &mut [[F; N]; H]`, one array per stage,
/// with the constants it needs declared in the data file under `prefix`.
pub trait Emit<T, const N: usize, const H: usize> {
    /// Writes the constants of this projector into the data file
    fn emit_data(&self, prefix: &str, out: &mut String) -> Result<(), CodegenError>;

    /// Writes statements projecting `v` in place
    fn emit_projection(&self, prefix: &str, out: &mut String) -> Result<(), CodegenError>;
}

/// Formats a finite value as a literal that reads back to the same scalar
pub(crate) fn literal<T: RealField + Copy>(value: T, name: &'static str) -> Result<String, CodegenError> {
    let value: f64 = nalgebra::try_convert(value).ok_or(CodegenError::NonFinite(name))?;
    if !value.is_finite() {
        return Err(CodegenError::NonFinite(name));
    }
    Ok(format!("{value:?}"))
}

/// Like [`literal`], but infinite bounds are allowed
fn bound_literal<T: RealField + Copy>(value: T, name: &'static str) -> Result<String, CodegenError> {
    let value: f64 = nalgebra::try_convert(value).ok_or(CodegenError::NonFinite(name))?;
    if value == f64::INFINITY {
        Ok(String::from("F::INFINITY"))
    } else if value == f64::NEG_INFINITY {
        Ok(String::from("F::NEG_INFINITY"))
    } else if value.is_nan() {
        Err(CodegenError::NonFinite(name))
    } else {
        Ok(format!("{value:?}"))
    }
}

/// Writes `pub const NAME: [[F; C]; R]` in row-major order
pub(crate) fn write_matrix<T: RealField + Copy, const R: usize, const C: usize>(
    out: &mut String,
    name: &'static str,
    matrix: &SMatrix<T, R, C>,
) -> Result<(), CodegenError> {
    let _ = writeln!(out, "pub const {name}: [[F; {C}]; {R}] = [");
    for r in 0..R {
        out.push_str("    [");
        for c in 0..C {
            if c > 0 {
                out.push_str(", ");
            }
            out.push_str(&literal(matrix[(r, c)], name)?);
        }
        out.push_str("],\n");
    }
    out.push_str("];\n\n");
    Ok(())
}

fn write_array(out: &mut String, name: &str, ty: &str, items: impl IntoIterator<Item = String>) {
    let items: Vec<String> = items.into_iter().collect();
    let _ = writeln!(
        out,
        "pub const {name}: [{ty}; {}] = [{}];",
        items.len(),
        items.join(", ")
    );
}

/// Writes the per-stage bounds of a box as `[[F; N]; H]`
fn write_stage_bounds<T: RealField + Copy, const N: usize, const H: usize>(
    out: &mut String,
    name: &str,
    bounds: &SMatrix<T, N, H>,
) -> Result<(), CodegenError> {
    let _ = writeln!(out, "pub const {name}: [[F; {N}]; {H}] = [");
    for h in 0..H {
        let stage = (0..N)
            .map(|n| bound_literal(bounds[(n, h)], "box bound"))
            .collect::<Result<Vec<_>, _>>()?;
        let _ = writeln!(out, "    [{}],", stage.join(", "));
    }
    out.push_str("];\n");
    Ok(())
}

impl<T, const N: usize, const H: usize> Emit<T, N, H> for () {
    fn emit_data(&self, _prefix: &str, _out: &mut String) -> Result<(), CodegenError> {
        Ok(())
    }

    fn emit_projection(&self, _prefix: &str, _out: &mut String) -> Result<(), CodegenError> {
        Ok(())
    }
}

impl<T, E: Emit<T, N, H>, const N: usize, const H: usize> Emit<T, N, H> for &E {
    fn emit_data(&self, prefix: &str, out: &mut String) -> Result<(), CodegenError> {
        (**self).emit_data(prefix, out)
    }

    fn emit_projection(&self, prefix: &str, out: &mut String) -> Result<(), CodegenError> {
        (**self).emit_projection(prefix, out)
    }
}

impl<T: RealField + Copy, const N: usize, const H: usize> Emit<T, N, H> for Box<T, N> {
    fn emit_data(&self, prefix: &str, out: &mut String) -> Result<(), CodegenError> {
        let neg_inf: T = convert(f64::NEG_INFINITY);
        let pos_inf: T = convert(f64::INFINITY);

        let lower = (0..N)
            .map(|n| bound_literal(self.lower[n].unwrap_or(neg_inf), "box lower bound"))
            .collect::<Result<Vec<_>, _>>()?;
        let upper = (0..N)
            .map(|n| bound_literal(self.upper[n].unwrap_or(pos_inf), "box upper bound"))
            .collect::<Result<Vec<_>, _>>()?;

        write_array(out, &format!("{prefix}_LOWER"), "F", lower);
        write_array(out, &format!("{prefix}_UPPER"), "F", upper);
        Ok(())
    }

    fn emit_projection(&self, prefix: &str, out: &mut String) -> Result<(), CodegenError> {
        let _ = writeln!(
            out,
            "    for p in v.iter_mut() {{
        for n in 0..{N} {{
            p[n] = min(max(p[n], {prefix}_LOWER[n]), {prefix}_UPPER[n]);
        }}
    }}"
        );
        Ok(())
    }
}

impl<T: RealField + Copy, const N: usize, const H: usize> Emit<T, N, H> for BoxSeries<T, N, H> {
    fn emit_data(&self, prefix: &str, out: &mut String) -> Result<(), CodegenError> {
        write_stage_bounds(out, &format!("{prefix}_LOWER"), &self.lower)?;
        write_stage_bounds(out, &format!("{prefix}_UPPER"), &self.upper)
    }

    fn emit_projection(&self, prefix: &str, out: &mut String) -> Result<(), CodegenError> {
        let _ = writeln!(
            out,
            "    for (h, p) in v.iter_mut().enumerate() {{
        for n in 0..{N} {{
            p[n] = min(max(p[n], {prefix}_LOWER[h][n]), {prefix}_UPPER[h][n]);
        }}
    }}"
        );
        Ok(())
    }
}

impl<T: RealField + Copy, const N: usize, const H: usize> Emit<T, N, H> for Cone<T, N> {
    fn emit_data(&self, prefix: &str, out: &mut String) -> Result<(), CodegenError> {
        let vertex = (0..N)
            .map(|n| literal(self.vertex[n].unwrap_or_else(T::zero), "cone vertex"))
            .collect::<Result<Vec<_>, _>>()?;
        write_array(out, &format!("{prefix}_VERTEX"), "F", vertex);
        write_array(
            out,
            &format!("{prefix}_MASK"),
            "bool",
            (0..N).map(|n| format!("{}", self.vertex[n].is_some())),
        );

        // The axis is normalized here so the generated code never divides by its norm
        if let Some(axis) = self.unit_axis() {
            let axis = axis_literals(&axis)?;
            write_array(out, &format!("{prefix}_AXIS"), "F", axis);
            let _ = writeln!(out, "pub const {prefix}_MU: F = {};", literal(self.mu, "cone mu")?);
        }
        Ok(())
    }

    fn emit_projection(&self, prefix: &str, out: &mut String) -> Result<(), CodegenError> {
        if self.unit_axis().is_none() {
            // Degenerate cone, snap onto the vertex
            let _ = writeln!(
                out,
                "    for p in v.iter_mut() {{
        for n in 0..{N} {{
            if {prefix}_MASK[n] {{
                p[n] = {prefix}_VERTEX[n];
            }}
        }}
    }}"
            );
            return Ok(());
        }

        let _ = writeln!(
            out,
            "    for p in v.iter_mut() {{
        let mut offset = [0.0 as F; {N}];
        for n in 0..{N} {{
            if {prefix}_MASK[n] {{
                offset[n] = p[n] - {prefix}_VERTEX[n];
            }}
        }}

        let mut axial = 0.0 as F;
        for n in 0..{N} {{
            axial += offset[n] * {prefix}_AXIS[n];
        }}

        let mut tangent = [0.0 as F; {N}];
        let mut radial = 0.0 as F;
        for n in 0..{N} {{
            tangent[n] = offset[n] - {prefix}_AXIS[n] * axial;
            radial += tangent[n] * tangent[n];
        }}
        let radial = sqrt(radial);

        if radial <= {prefix}_MU * axial && axial >= 0.0 {{
            continue;
        }}

        let mut projected = [0.0 as F; {N}];
        if {prefix}_MU * radial > -axial {{
            let axial = ({prefix}_MU * radial + axial) / (1.0 + {prefix}_MU * {prefix}_MU);
            for n in 0..{N} {{
                projected[n] = {prefix}_AXIS[n] * axial + tangent[n] * ({prefix}_MU * axial / radial);
            }}
        }}

        for n in 0..{N} {{
            if {prefix}_MASK[n] {{
                p[n] = {prefix}_VERTEX[n] + projected[n];
            }}
        }}
    }}"
        );
        Ok(())
    }
}

fn axis_literals<T: RealField + Copy, const N: usize>(
    axis: &SVector<T, N>,
) -> Result<Vec<String>, CodegenError> {
    axis.iter().map(|a| literal(*a, "cone axis")).collect()
}

macro_rules! derive_tuple_emit {
    ($($emit:ident: $number:tt),+) => {
        impl<$($emit: Emit<T, N, H>),+, T, const N: usize, const H: usize> Emit<T, N, H>
            for ( $($emit,)+ )
        {
            fn emit_data(&self, prefix: &str, out: &mut String) -> Result<(), CodegenError> {
                $(
                    self.$number.emit_data(&format!("{prefix}_{}", $number), out)?;
                )+
                Ok(())
            }

            fn emit_projection(&self, prefix: &str, out: &mut String) -> Result<(), CodegenError> {
                $(
                    self.$number.emit_projection(&format!("{prefix}_{}", $number), out)?;
                )+
                Ok(())
            }
        }
    };
}

derive_tuple_emit! {E0: 0}
derive_tuple_emit! {E0: 0, E1: 1}
derive_tuple_emit! {E0: 0, E1: 1, E2: 2}
derive_tuple_emit! {E0: 0, E1: 1, E2: 2, E3: 3}
