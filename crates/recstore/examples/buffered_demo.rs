//! Walk through the buffered record store on a temporary file.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=debug cargo run --example buffered_demo -p recstore
//! ```

use anyhow::Result;
use recstore::{BufferConfig, BufferedRecordStore, RecordFile};
use std::time::Instant;

fn show(label: &str, record: &[u8]) {
    println!("{label}: {}", String::from_utf8_lossy(record));
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let dir = tempfile::tempdir()?;
    let file = RecordFile::create(dir.path().join("demo.rec"), 8)?;
    let store = BufferedRecordStore::new(file, BufferConfig::new().with_max_entries(4));

    store.add(b"01234567")?;
    store.add(b"ABCDEFGH")?;
    store.add(b"abcdefgh")?;
    store.add(b"--------")?;
    store.add(b"********")?;
    for _ in 0..1000 {
        store.add(b"++++++++")?;
    }
    store.add(b"=======0")?;
    store.add(b"=======1")?;
    store.add(b"=======2")?;

    let mut buf = [0u8; 8];
    store.truncate_last_into(&mut buf)?;
    show("removed", &buf);
    store.truncate_last_into(&mut buf)?;
    show("removed", &buf);

    store.get(1, &mut buf)?;
    show("record 1", &buf);
    store.put(1, b"AbCdEfGh")?;
    store.get(1, &mut buf)?;
    show("record 1 after put", &buf);
    store.get(3, &mut buf)?;
    show("record 3", &buf);
    store.get(4, &mut buf)?;
    show("record 4", &buf);
    println!("size = {}", store.size()?);

    store.truncate_last()?;
    let start = Instant::now();
    let mut size = 0;
    for _ in 0..100_000 {
        size = store.size()?;
    }
    println!("size() needs {} nanoseconds", start.elapsed().as_nanos() / 100_000);
    println!("size = {size}");
    println!("{:#?}", store.stats());

    let report = store.close();
    println!("closed, {} buffered records written back", report.into_result()?);
    Ok(())
}
