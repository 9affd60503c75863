/// Smallest power value passed to the logarithm.
pub(crate) const AMIN: f32 = 1e-10;

/// Convert power values to decibels in place, relative to a reference of 1.0.
///
/// With `top_db`, everything more than `top_db` below the loudest value is
/// raised to that floor.
pub(crate) fn power_to_db_in_place(values: &mut [f32], top_db: Option<f32>) {
    for value in values.iter_mut() {
        *value = 10.0 * value.max(AMIN).log10();
    }
    let Some(top_db) = top_db else {
        return;
    };
    let peak = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !peak.is_finite() {
        return;
    }
    let floor = peak - top_db.max(0.0);
    for value in values.iter_mut() {
        *value = value.max(floor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_power_and_clamps_silence() {
        let mut values = vec![1.0_f32, 0.01, 0.0];
        power_to_db_in_place(&mut values, None);
        assert!((values[0] - 0.0).abs() < 1e-6);
        assert!((values[1] + 20.0).abs() < 1e-4);
        assert!((values[2] + 100.0).abs() < 1e-4);
    }

    #[test]
    fn top_db_floors_relative_to_peak() {
        let mut values = vec![100.0_f32, 1.0, 1e-9];
        power_to_db_in_place(&mut values, Some(80.0));
        assert!((values[0] - 20.0).abs() < 1e-4);
        assert!((values[1] - 0.0).abs() < 1e-4);
        assert!((values[2] + 60.0).abs() < 1e-4);
    }
}
