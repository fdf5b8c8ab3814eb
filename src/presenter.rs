//! Renders frame records into the HTML attribute payload.

use crate::layer::{FeatureId, LayerError, VectorLayer};
use crate::projector::FrameRecord;
use serde_json::Value;
use std::fmt::Write;

/// Render records as a linked thumbnail list, newest first.
///
/// Sorting is strictly by timestamp descending; rendering is deterministic
/// given the input set. An empty record list renders an empty container, not
/// nothing, so a processed feature always carries a payload.
pub fn render(records: &[FrameRecord]) -> String {
    let mut sorted: Vec<&FrameRecord> = records.iter().collect();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let mut html = String::from("<div class=\"skyfetch-frames\">");
    for record in sorted {
        let path = record.image_path.display();
        // fmt::Write on String cannot fail.
        let _ = write!(
            html,
            "<div class=\"frame\">\
             <a href=\"file://{path}\"><img src=\"file://{path}\" width=\"200\"/></a>\
             <p>{timestamp}</p>\
             </div>",
            timestamp = record.timestamp.to_rfc3339(),
        );
    }
    html.push_str("</div>");
    html
}

/// Buffer the rendered payload into the feature's attribute slot,
/// overwriting any previous value.
pub fn apply(
    layer: &mut VectorLayer,
    feature: FeatureId,
    field: &str,
    payload: String,
) -> Result<(), LayerError> {
    layer.set_attribute(feature, field, Value::String(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    fn record(seconds: i64) -> FrameRecord {
        FrameRecord {
            image_path: PathBuf::from(format!("/frames/seq/keyframes/{seconds}.jpg")),
            timestamp: Utc.timestamp_opt(seconds, 0).unwrap(),
            sequence: "seq".to_string(),
            lat: 0.0,
            lon: 0.0,
        }
    }

    #[test]
    fn test_render_sorts_by_timestamp_descending() {
        let html = render(&[record(10), record(30), record(20)]);

        let pos_30 = html.find("30.jpg").unwrap();
        let pos_20 = html.find("20.jpg").unwrap();
        let pos_10 = html.find("10.jpg").unwrap();
        assert!(pos_30 < pos_20 && pos_20 < pos_10);
    }

    #[test]
    fn test_render_is_deterministic() {
        let records = [record(1), record(2)];

        assert_eq!(render(&records), render(&records));
    }

    #[test]
    fn test_empty_records_render_empty_container() {
        assert_eq!(render(&[]), "<div class=\"skyfetch-frames\"></div>");
    }

    #[test]
    fn test_entry_links_image_and_carries_timestamp() {
        let html = render(&[record(5)]);

        assert!(html.contains("<a href=\"file:///frames/seq/keyframes/5.jpg\">"));
        assert!(html.contains("<img src=\"file:///frames/seq/keyframes/5.jpg\""));
        assert!(html.contains(&Utc.timestamp_opt(5, 0).unwrap().to_rfc3339()));
    }
}
