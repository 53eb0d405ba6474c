use crate::foundation::core::Matrix4;

/// Reverses the low bits of `x`, using as many bits as needed to count below
/// `max_val_plus_one`.
pub(crate) fn bit_reverse(x: usize, max_val_plus_one: usize) -> usize {
    let mut input = x;
    let mut result = 0;
    let mut placeholder = 1;
    while placeholder < max_val_plus_one {
        result = (result << 1) | (input & 1);
        input >>= 1;
        placeholder <<= 1;
    }
    result
}

/// Largest power of two `<= x`, or 0 for 0.
pub(crate) fn largest_pow2(x: usize) -> usize {
    if x == 0 { 0 } else { 1 << x.ilog2() }
}

#[inline]
fn at(m: &Matrix4, row: usize, col: usize) -> f64 {
    m[col * 4 + row]
}

/// The identity matrix.
pub fn matrix_identity() -> Matrix4 {
    let mut m = [0.0; 16];
    m[0] = 1.0;
    m[5] = 1.0;
    m[10] = 1.0;
    m[15] = 1.0;
    m
}

/// `a * b` for column-major matrices.
pub fn matrix_multiply(a: &Matrix4, b: &Matrix4) -> Matrix4 {
    let mut c = [0.0; 16];
    for row in 0..4 {
        for col in 0..4 {
            c[col * 4 + row] = (0..4).map(|k| at(a, row, k) * at(b, k, col)).sum();
        }
    }
    c
}

/// `m * v` for a homogeneous column vector.
pub fn matrix_vector_multiply(m: &Matrix4, v: &[f64; 4]) -> [f64; 4] {
    let mut out = [0.0; 4];
    for (row, o) in out.iter_mut().enumerate() {
        *o = (0..4).map(|k| at(m, row, k) * v[k]).sum();
    }
    out
}

/// Orthographic projection, same convention as `glOrtho`.
pub fn matrix_ortho(left: f64, right: f64, bottom: f64, top: f64, znear: f64, zfar: f64) -> Matrix4 {
    let mut m = [0.0; 16];
    m[0] = 2.0 / (right - left);
    m[5] = 2.0 / (top - bottom);
    m[10] = -2.0 / (zfar - znear);
    m[12] = -(right + left) / (right - left);
    m[13] = -(top + bottom) / (top - bottom);
    m[14] = -(zfar + znear) / (zfar - znear);
    m[15] = 1.0;
    m
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/math.rs"]
mod tests;
