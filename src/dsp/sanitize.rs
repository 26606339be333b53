//! Floating-point hygiene for values leaving the engine.

/*
Why Sanitize?
=============

Envelope and modulation math runs millions of times per second. Three kinds
of numeric trouble show up in practice:

  denormals   Values like 1e-39 that are too small for the normal float
              encoding. Many FPUs handle them in microcode, 10-100x slower.
              An exponential release decaying toward zero produces them
              naturally unless they are snapped to exact zero.

  NaN / inf   Pathological parameter combinations (zero-length stages,
              0 * inf in a coefficient) can poison a value. Once a NaN is
              inside a recursive formula like `v = base + v * coef` it never
              leaves, so it must be stopped at the block boundary.

  drift       Repeated multiply-adds accumulate rounding error, nudging a
              value slightly outside its valid range (1.0000001, -1e-8).


The Policy
----------

  1. snap |x| < DENORMAL_THRESHOLD to 0.0
  2. replace non-finite values with the neutral value of the caller
  3. clamp to the legal range of the quantity

All helpers are branch-light and allocation-free so they can run on every
sample of every block.
*/

/// Values with a magnitude below this are flushed to exact zero.
pub const DENORMAL_THRESHOLD: f32 = 1e-10;

/// Flush tiny magnitudes to zero.
#[inline]
pub fn snap_to_zero(value: f32) -> f32 {
    if value.abs() < DENORMAL_THRESHOLD {
        0.0
    } else {
        value
    }
}

/// Replace NaN/inf with `fallback`, flush denormals, clamp to `[min, max]`.
#[inline]
pub fn sanitize(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if !value.is_finite() {
        return fallback;
    }

    snap_to_zero(value).clamp(min, max)
}

/// Sanitize a unipolar value into `[0, 1]`. Non-finite values become 0.
#[inline]
pub fn sanitize_unipolar(value: f32) -> f32 {
    sanitize(value, 0.0, 1.0, 0.0)
}

/// Sanitize a whole block in place.
pub fn sanitize_block(buffer: &mut [f32], min: f32, max: f32, fallback: f32) {
    for sample in buffer.iter_mut() {
        *sample = sanitize(*sample, min, max, fallback);
    }
}
