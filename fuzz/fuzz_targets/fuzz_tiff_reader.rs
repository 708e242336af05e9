#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Write;

fuzz_target!(|data: &[u8]| {
    // The reader works on paths, so stage the input in a temporary file
    let Ok(mut file) = tempfile::Builder::new().suffix(".ome.tif").tempfile() else {
        return;
    };
    if file.write_all(data).is_err() || file.flush().is_err() {
        return;
    }

    // Opening either succeeds (index map or IFD-chain recovery) or fails
    // gracefully. It must NEVER panic.
    let Ok(reader) = mptiff::tiff::TiffReader::open(file.path()) else {
        return;
    };

    // Every indexed plane must be readable or report an error
    for label in reader.labels().into_iter().take(100) {
        let _ = reader.read_image(&label);
        let _ = reader.read_tags(&label);
    }
    let _ = reader.summary_metadata();
    let _ = reader.display_and_comments();
    if let Ok(xml) = reader.ome_xml() {
        let _ = mptiff::metadata::OmeDocument::classify(&xml);
    }
    reader.close();
});
