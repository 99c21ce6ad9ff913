// Per-cell statistics to CSV

use std::collections::BTreeMap;

use crate::core::errors::ExportError;

/// Features with a fixed column position and display label
const KNOWN_FEATURES: [(&str, &str); 3] = [
    ("size", "Size"),
    ("shape", "Sides"),
    ("pointiness", "Pointiness"),
];

/// Header label for a feature key. Unknown keys are used verbatim.
pub fn column_label(feature: &str) -> &str {
    KNOWN_FEATURES
        .iter()
        .find(|(key, _)| *key == feature)
        .map(|(_, label)| *label)
        .unwrap_or(feature)
}

/// Known features first in their fixed order, then everything else by key.
fn ordered_features(stats: &BTreeMap<String, Vec<f64>>) -> Vec<(&str, &[f64])> {
    let mut ordered: Vec<(&str, &[f64])> = KNOWN_FEATURES
        .iter()
        .filter_map(|(key, _)| stats.get_key_value(*key))
        .map(|(key, values)| (key.as_str(), values.as_slice()))
        .collect();

    ordered.extend(
        stats
            .iter()
            .filter(|(key, _)| !KNOWN_FEATURES.iter().any(|(known, _)| *known == key.as_str()))
            .map(|(key, values)| (key.as_str(), values.as_slice())),
    );
    ordered
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Render one row per cell with a leading 1-based `Cell #` column.
///
/// Every feature must hold exactly `total_cells` values, and a non-zero
/// count needs at least one feature to back it.
pub fn to_csv(stats: &BTreeMap<String, Vec<f64>>, total_cells: usize) -> Result<String, ExportError> {
    let features = ordered_features(stats);

    if features.is_empty() && total_cells > 0 {
        return Err(ExportError::NoFeatures { total_cells });
    }

    for (feature, values) in &features {
        if values.len() != total_cells {
            return Err(ExportError::LengthMismatch {
                feature: feature.to_string(),
                expected: total_cells,
                actual: values.len(),
            });
        }
    }

    // rows are bounded by the validated column lengths
    let mut lines = Vec::with_capacity(total_cells.saturating_add(1));

    let mut header = vec!["Cell #".to_string()];
    header.extend(features.iter().map(|(feature, _)| escape_field(column_label(feature))));
    lines.push(header.join(","));

    for cell in 0..total_cells {
        let mut row = vec![(cell + 1).to_string()];
        // f64 Display already drops the fraction of integral values
        row.extend(features.iter().map(|(_, values)| values[cell].to_string()));
        lines.push(row.join(","));
    }

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(pairs: &[(&str, Vec<f64>)]) -> BTreeMap<String, Vec<f64>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_two_features() {
        let csv = to_csv(&stats(&[("size", vec![10.0, 20.0]), ("shape", vec![4.0, 5.0])]), 2).unwrap();
        assert_eq!(csv, "Cell #,Size,Sides\n1,10,4\n2,20,5");
    }

    #[test]
    fn test_line_count_is_cells_plus_header() {
        let values: Vec<f64> = (0..17).map(|v| v as f64 * 1.5).collect();
        let csv = to_csv(&stats(&[("pointiness", values)]), 17).unwrap();
        assert_eq!(csv.lines().count(), 18);
        assert!(csv.starts_with("Cell #,Pointiness\n1,0\n2,1.5\n"));
    }

    #[test]
    fn test_canonical_column_order() {
        let csv = to_csv(
            &stats(&[
                ("zeta", vec![1.0]),
                ("pointiness", vec![2.0]),
                ("area", vec![3.0]),
                ("size", vec![4.0]),
            ]),
            1,
        )
        .unwrap();
        assert_eq!(csv.lines().next().unwrap(), "Cell #,Size,Pointiness,area,zeta");
        assert_eq!(csv.lines().nth(1).unwrap(), "1,4,2,3,1");
    }

    #[test]
    fn test_length_mismatch() {
        let err = to_csv(&stats(&[("size", vec![10.0, 20.0]), ("shape", vec![4.0])]), 2).unwrap_err();
        assert_eq!(
            err,
            ExportError::LengthMismatch {
                feature: "shape".into(),
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_zero_cells() {
        assert_eq!(to_csv(&stats(&[("size", vec![])]), 0).unwrap(), "Cell #,Size");
    }

    #[test]
    fn test_cell_count_without_features() {
        assert_eq!(
            to_csv(&BTreeMap::new(), usize::MAX).unwrap_err(),
            ExportError::NoFeatures { total_cells: usize::MAX }
        );
        assert_eq!(
            to_csv(&BTreeMap::new(), 3).unwrap_err(),
            ExportError::NoFeatures { total_cells: 3 }
        );
        assert_eq!(to_csv(&BTreeMap::new(), 0).unwrap(), "Cell #");
    }

    #[test]
    fn test_unknown_label_is_quoted() {
        let csv = to_csv(&stats(&[("a,b", vec![1.0])]), 1).unwrap();
        assert_eq!(csv.lines().next().unwrap(), "Cell #,\"a,b\"");
    }
}
