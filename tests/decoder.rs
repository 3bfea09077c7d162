mod common;

use std::io::Write;
use tempfile::NamedTempFile;
use wavepool::supervisor::{BinaryDecoder, DataDecoder, FilenameDecoder, StringDecoder};

#[test]
fn binary_decoder_passes_waveforms_framed() {
    let decoder = BinaryDecoder::new("test");
    let frame = common::waveform_frame(1, &[0; 8]);
    let items = decoder.decode(&frame);
    assert_eq!(items, vec![frame]);
}

#[test]
fn binary_decoder_drops_housekeeping_and_garbage() {
    let decoder = BinaryDecoder::new("test");
    assert!(decoder.decode(&common::housekeeping_frame(1)).is_empty());
    assert!(decoder.decode(&[1, 2, 3]).is_empty());
    // Framed but of unknown type.
    let mut unknown = common::housekeeping_frame(1);
    unknown[16] = 0x55;
    assert!(decoder.decode(&unknown).is_empty());
}

#[test]
fn filename_decoder_loads_records_line_by_line() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "record one").unwrap();
    writeln!(file).unwrap();
    writeln!(file, "record two").unwrap();
    file.flush().unwrap();

    let decoder = FilenameDecoder::new("test");
    let items = decoder.decode(file.path().to_str().unwrap().as_bytes());
    assert_eq!(items, vec![b"record one".to_vec(), b"record two".to_vec()]);
}

#[test]
fn filename_decoder_survives_missing_files() {
    let decoder = FilenameDecoder::new("test");
    assert!(decoder.decode(b"/nonexistent/file").is_empty());
}

#[test]
fn filename_decoder_accepts_a_custom_opener() {
    let decoder = FilenameDecoder::with_opener(
        "test",
        Box::new(|path| Ok(vec![path.as_bytes().to_vec()])),
    );
    assert_eq!(decoder.decode(b"anything"), vec![b"anything".to_vec()]);
}

#[test]
fn string_decoder_is_verbatim() {
    let decoder = StringDecoder;
    assert_eq!(decoder.decode(b"payload"), vec![b"payload".to_vec()]);
}
