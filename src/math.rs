use itertools::izip;
use multiversion::multiversion;

#[multiversion(targets("x86_64+avx+avx2+fma", "x86_64+sse4.1", "aarch64+neon"))]
pub(crate) fn vector_dot(a: &[f64], b: &[f64]) -> f64 {
    assert!(a.len() == b.len());

    a.iter().zip(b).map(|(&a, &b)| a * b).sum()
}

/// `out = y + a * x`
#[multiversion(targets("x86_64+avx+avx2+fma", "x86_64+sse4.1", "aarch64+neon"))]
pub(crate) fn axpy_out(x: &[f64], y: &[f64], a: f64, out: &mut [f64]) {
    let n = x.len();
    assert!(y.len() == n);
    assert!(out.len() == n);

    izip!(x, y, out).for_each(|(&x, &y, out)| {
        *out = a.mul_add(x, y);
    });
}

/// `out = x - y`
pub(crate) fn sub_out(x: &[f64], y: &[f64], out: &mut [f64]) {
    let n = x.len();
    assert!(y.len() == n);
    assert!(out.len() == n);

    izip!(x, y, out).for_each(|(&x, &y, out)| {
        *out = x - y;
    });
}

/// Fold `point` into the running mean `center` of `count` previous points.
///
/// Uses `center_{k+1} = (k * center_k + x) / (k + 1)`.
#[multiversion(targets("x86_64+avx+avx2+fma", "x86_64+sse4.1", "aarch64+neon"))]
pub(crate) fn fold_mean(center: &mut [f64], point: &[f64], count: u64) {
    assert!(center.len() == point.len());

    let k = count as f64;
    let scale = (k + 1.).recip();
    center.iter_mut().zip(point).for_each(|(c, &x)| {
        *c = k.mul_add(*c, x) * scale;
    });
}

pub(crate) fn max_abs(x: &[f64]) -> f64 {
    x.iter().fold(0f64, |acc, &val| acc.max(val.abs()))
}
