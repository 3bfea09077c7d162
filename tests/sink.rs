use std::fs;
use tempfile::tempdir;
use wavepool::sink::{BatchWriter, RecordSchema, SinkError, BATCH_MAGIC};

const MODEL: &str = r#"<?xml version="1.0"?>
<model>
    <group name="DL2">
        <dataset name="GF">
            <field name="peak" type="float32"/>
            <field name="area" type="float32"/>
            <field name="tstart" type="float32"/>
        </dataset>
    </group>
</model>
"#;

#[test]
fn parses_the_descriptor() {
    let schema = RecordSchema::from_xml_str(MODEL).unwrap();
    assert_eq!(schema.group, "DL2");
    assert_eq!(schema.dataset, "GF");
    assert_eq!(schema.fields.len(), 3);
    assert_eq!(schema.fields[0].name, "peak");
    assert_eq!(schema.fields[2].dtype, "float32");
}

#[test]
fn rejects_a_descriptor_without_fields() {
    let broken = "<model><group name=\"G\"/><dataset name=\"D\"/></model>";
    assert!(matches!(
        RecordSchema::from_xml_str(broken),
        Err(SinkError::Schema(_))
    ));
}

#[test]
fn writes_one_columnar_file_per_batch() {
    let dir = tempdir().unwrap();
    let schema = RecordSchema::from_xml_str(MODEL).unwrap();
    let mut writer = BatchWriter::new(schema, dir.path(), 2).unwrap();

    writer.push_row(&[1.0, 10.0, 100.0]).unwrap();
    assert_eq!(writer.batches_written(), 0);
    writer.push_row(&[2.0, 20.0, 200.0]).unwrap();
    assert_eq!(writer.batches_written(), 1);

    let bytes = fs::read(dir.path().join("DL2_GF_00000.wpc")).unwrap();
    assert_eq!(&bytes[..4], BATCH_MAGIC);
    assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 3);

    // Field names: u16 length then the bytes.
    let mut at = 8;
    let mut names = Vec::new();
    for _ in 0..3 {
        let len = u16::from_le_bytes(bytes[at..at + 2].try_into().unwrap()) as usize;
        at += 2;
        names.push(String::from_utf8(bytes[at..at + len].to_vec()).unwrap());
        at += len;
    }
    assert_eq!(names, ["peak", "area", "tstart"]);

    let rows = u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap());
    at += 8;
    assert_eq!(rows, 2);

    // Column-major data: peak column first.
    let column = |at: usize| {
        let a = f32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
        let b = f32::from_le_bytes(bytes[at + 4..at + 8].try_into().unwrap());
        (a, b)
    };
    assert_eq!(column(at), (1.0, 2.0));
    assert_eq!(column(at + 8), (10.0, 20.0));
    assert_eq!(column(at + 16), (100.0, 200.0));
}

#[test]
fn short_final_batch_flushes_on_drop() {
    let dir = tempdir().unwrap();
    let schema = RecordSchema::from_xml_str(MODEL).unwrap();
    {
        let mut writer = BatchWriter::new(schema, dir.path(), 100).unwrap();
        writer.push_row(&[1.0, 2.0, 3.0]).unwrap();
    }
    assert!(dir.path().join("DL2_GF_00000.wpc").exists());
}

#[test]
fn arity_mismatch_is_rejected() {
    let dir = tempdir().unwrap();
    let schema = RecordSchema::from_xml_str(MODEL).unwrap();
    let mut writer = BatchWriter::new(schema, dir.path(), 10).unwrap();
    assert!(matches!(
        writer.push_row(&[1.0]),
        Err(SinkError::Arity {
            expected: 3,
            got: 1
        })
    ));
}
