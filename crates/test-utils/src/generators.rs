//! Value generators for synthetic grids, in scan order.

/// Each point holds its own flat index, so a decoded value identifies the cell.
pub fn index_grid(width: usize, height: usize) -> Vec<f32> {
    (0..width * height).map(|i| i as f32).collect()
}

/// Kelvin temperatures decreasing poleward from 283 K in the first row.
pub fn temperature_grid(width: usize, height: usize) -> Vec<f32> {
    (0..height)
        .flat_map(|row| (0..width).map(move |_| 283.0 - row as f32 * 0.5))
        .collect()
}

/// Replace the listed flat indices with NaN.
pub fn with_missing(mut values: Vec<f32>, missing: &[usize]) -> Vec<f32> {
    for &i in missing {
        if let Some(v) = values.get_mut(i) {
            *v = f32::NAN;
        }
    }
    values
}
