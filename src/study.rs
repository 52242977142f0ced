//! Parses a study's entry in a `timescale_update`/`du` payload into named
//! output values, using the owning study's descriptor to translate
//! `plot_N` indices into friendly names (`"macd"`, `"signal"`, ...).
//!
//! Grounded on the original client's study value parser, which reads
//! whichever of `st`/`s` is present, keeps only the latest point, and maps
//! each plot index (offset by one, since index 0 is the point's own
//! timestamp) through the indicator's known output table.

use serde_json::Value;

use crate::entities::StudyRecord;

/// Updates `record.values` in place from one study entry. Frames with no
/// usable point are ignored rather than clearing prior values — a study
/// that temporarily has nothing to report keeps showing its last known
/// reading. Returns `true` if any value was applied.
pub fn apply_update(record: &mut StudyRecord, payload: &Value) -> bool {
    let points = payload
        .get("st")
        .or_else(|| payload.get("s"))
        .and_then(Value::as_array);
    let Some(points) = points else { return false };
    let Some(latest) = points.last() else { return false };
    let Some(values) = latest.get("v").and_then(Value::as_array) else { return false };
    if values.len() < 2 {
        return false;
    }

    let mut applied = false;
    for (plot_index, value) in values.iter().skip(1).enumerate() {
        let Some(v) = value.as_f64() else { continue };
        let plot_key = format!("plot_{plot_index}");
        let name = record
            .descriptor
            .output_mapping
            .get(&plot_key)
            .cloned()
            .unwrap_or(plot_key);
        record.values.insert(name, v);
        applied = true;
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::IndicatorDescriptor;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn macd_record() -> StudyRecord {
        let mut output_mapping = HashMap::new();
        output_mapping.insert("plot_0".to_string(), "macd".to_string());
        output_mapping.insert("plot_1".to_string(), "signal".to_string());
        output_mapping.insert("plot_2".to_string(), "histogram".to_string());
        let descriptor = Arc::new(IndicatorDescriptor {
            pine_id: "STD;MACD".to_string(),
            pine_version: "last".to_string(),
            inputs: vec![],
            plots: vec![],
            output_mapping,
        });
        StudyRecord::new("STD;MACD", "st1", descriptor, HashMap::new())
    }

    #[test]
    fn maps_plot_indices_to_friendly_output_names() {
        let mut record = macd_record();
        // v[0] is the point's own timestamp; plot values start at v[1].
        let payload = json!({"st": [{"i": 0, "v": [1_700_000_000.0, 1.2, 0.9, 0.3]}]});
        assert!(apply_update(&mut record, &payload));
        assert_eq!(record.values.get("macd"), Some(&1.2));
        assert_eq!(record.values.get("signal"), Some(&0.9));
        assert_eq!(record.values.get("histogram"), Some(&0.3));
    }

    #[test]
    fn only_the_latest_point_is_kept() {
        let mut record = macd_record();
        let payload = json!({"st": [{"i": 0, "v": [1.0, 1.0, 1.0, 1.0]}, {"i": 1, "v": [2.0, 2.0, 2.0, 2.0]}]});
        apply_update(&mut record, &payload);
        assert_eq!(record.values.get("macd"), Some(&2.0));
    }

    #[test]
    fn an_empty_frame_leaves_prior_values_untouched() {
        let mut record = macd_record();
        record.values.insert("macd".to_string(), 5.0);
        apply_update(&mut record, &json!({"st": []}));
        assert_eq!(record.values.get("macd"), Some(&5.0));
    }
}
