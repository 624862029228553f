//! Dense vector primitives used by the CG loop: dot, axpy, xpay, nrm2.
//!
//! Each comes in a plain scalar form and a `wide::f64x4` form with a scalar
//! tail. Summation order differs between the variants; callers must not rely
//! on bit-identical reductions.

use wide::f64x4;

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len());
    let mut s = 0.0;
    for i in 0..a.len() {
        s += a[i] * b[i];
    }
    s
}

/// y += a * x
pub fn axpy(a: f64, x: &[f64], y: &mut [f64]) {
    assert_eq!(x.len(), y.len());
    for i in 0..x.len() {
        y[i] += a * x[i];
    }
}

/// y = x + a * y
pub fn xpay(x: &[f64], a: f64, y: &mut [f64]) {
    assert_eq!(x.len(), y.len());
    for i in 0..x.len() {
        y[i] = x[i] + a * y[i];
    }
}

pub fn nrm2(x: &[f64]) -> f64 {
    dot(x, x).sqrt()
}

pub fn dot_simd(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len());
    let n = a.len();
    let mut sum = f64x4::splat(0.0);
    let mut i = 0;
    while i + 4 <= n {
        let va = f64x4::from(&a[i..i + 4]);
        let vb = f64x4::from(&b[i..i + 4]);
        sum += va * vb;
        i += 4;
    }
    let mut s = sum.reduce_add();
    while i < n {
        s += a[i] * b[i];
        i += 1;
    }
    s
}

pub fn axpy_simd(a: f64, x: &[f64], y: &mut [f64]) {
    assert_eq!(x.len(), y.len());
    let n = x.len();
    let v_a = f64x4::splat(a);
    let mut i = 0;
    while i + 4 <= n {
        let vx = f64x4::from(&x[i..i + 4]);
        let vy = f64x4::from(&y[i..i + 4]);
        let res = vy + v_a * vx;
        let res_arr: [f64; 4] = res.into();
        y[i..i + 4].copy_from_slice(&res_arr);
        i += 4;
    }
    while i < n {
        y[i] += a * x[i];
        i += 1;
    }
}

pub fn xpay_simd(x: &[f64], a: f64, y: &mut [f64]) {
    assert_eq!(x.len(), y.len());
    let n = x.len();
    let v_a = f64x4::splat(a);
    let mut i = 0;
    while i + 4 <= n {
        let vx = f64x4::from(&x[i..i + 4]);
        let vy = f64x4::from(&y[i..i + 4]);
        let res = vx + v_a * vy;
        let res_arr: [f64; 4] = res.into();
        y[i..i + 4].copy_from_slice(&res_arr);
        i += 4;
    }
    while i < n {
        y[i] = x[i] + a * y[i];
        i += 1;
    }
}

pub fn nrm2_simd(x: &[f64]) -> f64 {
    dot_simd(x, x).sqrt()
}
