#![no_main]
use libfuzzer_sys::fuzz_target;

use beamcov::ingest::{IngestOptions, Ingestor};

fuzz_target!(|data: &[u8]| {
    let mut ingestor = Ingestor::new(IngestOptions::default());
    if ingestor.fold_reader("fuzz", data).is_ok() {
        // Aggregation over whatever was folded must not panic either.
        let _ = ingestor.tree().root().results();
    }
});
