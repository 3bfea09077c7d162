mod common;

use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use wavepool::queue::Priority;
use wavepool::sink::{BatchWriter, RecordSchema};
use wavepool::transform::{PulseAnalyzer, Transform, FEATURE_FIELDS};

fn schema() -> RecordSchema {
    let fields = FEATURE_FIELDS
        .iter()
        .map(|name| format!("        <field name=\"{name}\" type=\"float32\"/>"))
        .collect::<Vec<_>>()
        .join("\n");
    let xml = format!(
        "<model>\n    <group name=\"DL2\"/>\n    <dataset name=\"GF\"/>\n{fields}\n</model>"
    );
    RecordSchema::from_xml_str(&xml).unwrap()
}

#[test]
fn estimates_the_area_of_a_single_spike() {
    // Flat baseline of 100 with one sample at 1100: the baseline-subtracted
    // integral over any window containing the spike is exactly 1000.
    let frame = common::waveform_frame(1, &common::spike_samples(100, 1100, 500));
    let mut analyzer = PulseAnalyzer::new(None);
    let out = analyzer.process(&frame, Priority::Low);
    assert_eq!(out.len(), 4);
    let area = f32::from_le_bytes([out[0], out[1], out[2], out[3]]);
    assert!((area - 1000.0).abs() < 1e-3, "area {area}");
}

#[test]
fn housekeeping_yields_no_result() {
    let frame = common::housekeeping_frame(1);
    let mut analyzer = PulseAnalyzer::new(None);
    assert!(analyzer.process(&frame, Priority::Low).is_empty());
}

#[test]
fn malformed_input_yields_no_result() {
    let mut analyzer = PulseAnalyzer::new(None);
    assert!(analyzer.process(&[0, 1, 2], Priority::Low).is_empty());
    // Well-framed but truncated waveform body.
    let short = wavepool::packet::frame(&{
        let mut payload = vec![0u8; 20];
        payload[0] = 0x8D;
        payload[12] = 0xA1;
        payload[13] = 0x02;
        payload
    });
    assert!(analyzer.process(&short, Priority::Low).is_empty());
}

#[test]
fn feature_rows_reach_the_record_sink() {
    let dir = tempdir().unwrap();
    let writer = BatchWriter::new(schema(), dir.path(), 2).unwrap();
    let writer = Arc::new(Mutex::new(writer));
    let mut analyzer = PulseAnalyzer::new(Some(Arc::clone(&writer)));

    let frame = common::waveform_frame(1, &common::spike_samples(100, 1100, 500));
    analyzer.process(&frame, Priority::Low);
    assert_eq!(writer.lock().unwrap().buffered_rows(), 1);
    analyzer.process(&frame, Priority::Low);

    // The second row completed a batch and flushed it.
    let guard = writer.lock().unwrap();
    assert_eq!(guard.buffered_rows(), 0);
    assert_eq!(guard.batches_written(), 1);
    assert!(dir.path().join("DL2_GF_00000.wpc").exists());
}

#[test]
fn configuration_reshapes_the_windows() {
    let mut analyzer = PulseAnalyzer::new(None);
    let cfg = serde_json::json!({
        "header": { "type": 3, "subtype": "config" },
        "body": { "baseline_window": 32, "windows": [8, 32, 128] }
    });
    analyzer.configure(&cfg);
    // Still produces a sane area after reconfiguration.
    let frame = common::waveform_frame(1, &common::spike_samples(100, 1100, 500));
    let out = analyzer.process(&frame, Priority::Low);
    let area = f32::from_le_bytes([out[0], out[1], out[2], out[3]]);
    assert!((area - 1000.0).abs() < 1e-3);
}
