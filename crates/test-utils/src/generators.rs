//! Synthetic field generators.
//!
//! These create predictable values so tests can check that data reaches
//! sinks unchanged.

/// Creates temperature-like values in Kelvin for a `nj` x `ni` lat/lon grid.
///
/// Warmest at the equator row, coldest at the poles: roughly 230K to 300K.
pub fn create_temperature_field(nj: usize, ni: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(nj * ni);
    let rows = nj.saturating_sub(1).max(1) as f32;
    for row in 0..nj {
        // -1 at the first pole, 0 at the equator, 1 at the last pole
        let lat_factor = (row as f32 / rows) * 2.0 - 1.0;
        let temp = 300.0 - 70.0 * lat_factor.abs();
        data.extend(std::iter::repeat(temp).take(ni));
    }
    data
}

/// Creates a field with every value set to `value`.
pub fn create_constant_field(len: usize, value: f32) -> Vec<f32> {
    vec![value; len]
}

/// Creates a field where every `stride`-th value is missing (NaN).
pub fn create_field_with_missing(len: usize, stride: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            if stride > 0 && i % stride == 0 {
                f32::NAN
            } else {
                i as f32
            }
        })
        .collect()
}
