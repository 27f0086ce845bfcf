use itertools::izip;
use multiversion::multiversion;
use ndarray::{ArrayView1, ArrayViewMut1, Zip};

/// Move `dest` towards `target` by `weight`: `dest += weight * (target - dest)`.
///
/// This is both the precision weighted fusion of two gaussian means and one
/// step of an exponential moving average.
#[multiversion(targets("x86_64+avx+avx2+fma", "x86+sse"))]
pub(crate) fn lerp(dest: &mut [f64], target: &[f64], weight: f64) {
    let n = dest.len();
    assert!(target.len() == n);

    izip!(dest.iter_mut(), target.iter()).for_each(|(dest, &target)| {
        *dest += weight * (target - *dest);
    });
}

/// `dest = shift + scale * dest`
#[multiversion(targets("x86_64+avx+avx2+fma", "x86+sse"))]
pub(crate) fn scale_shift(dest: &mut [f64], shift: &[f64], scale: f64) {
    let n = dest.len();
    assert!(shift.len() == n);

    izip!(dest.iter_mut(), shift.iter()).for_each(|(dest, &shift)| {
        *dest = shift + scale * *dest;
    });
}

#[multiversion(targets("x86_64+avx+avx2+fma", "x86+sse"))]
pub(crate) fn squared_distance(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len();
    assert!(y.len() == n);

    izip!(x.iter(), y.iter())
        .map(|(&x, &y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

pub(crate) fn lerp_row(mut dest: ArrayViewMut1<f64>, target: ArrayView1<f64>, weight: f64) {
    // Keeps an infinitely far target from turning a no-op into NaN
    if weight == 0. {
        return;
    }
    if let (Some(dest), Some(target)) = (dest.as_slice_mut(), target.as_slice()) {
        lerp(dest, target, weight);
        return;
    }
    Zip::from(&mut dest)
        .and(&target)
        .for_each(|dest, &target| *dest += weight * (target - *dest));
}

pub(crate) fn scale_shift_row(mut dest: ArrayViewMut1<f64>, shift: ArrayView1<f64>, scale: f64) {
    if let (Some(dest), Some(shift)) = (dest.as_slice_mut(), shift.as_slice()) {
        scale_shift(dest, shift, scale);
        return;
    }
    Zip::from(&mut dest)
        .and(&shift)
        .for_each(|dest, &shift| *dest = shift + scale * *dest);
}

pub(crate) fn squared_distance_row(x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    if let (Some(x), Some(y)) = (x.as_slice(), y.as_slice()) {
        return squared_distance(x, y);
    }
    Zip::from(&x).and(&y).fold(0., |acc, &x, &y| {
        let diff = x - y;
        acc + diff * diff
    })
}
