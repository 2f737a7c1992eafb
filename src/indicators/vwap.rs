/// Volume-weighted average price over (price, volume) pairs.
///
/// `None` on empty input or zero total volume.
pub fn calculate_vwap(data: &[(f64, f64)]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }

    let total_volume: f64 = data.iter().map(|(_, v)| v).sum();
    if total_volume == 0.0 {
        return None;
    }

    let weighted: f64 = data.iter().map(|(p, v)| p * v).sum();
    Some(weighted / total_volume)
}
