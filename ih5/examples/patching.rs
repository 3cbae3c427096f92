//! Build a record over several patches and inspect the merged view.
//!
//! Run with: `cargo run --example patching`

use ih5::{OpenMode, Record, Result};

fn main() -> Result<()> {
    let dir = std::env::temp_dir().join("ih5-patching-example");
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir)?;
    let record = dir.join("experiment");

    // base container
    let mut rec = Record::create(&record)?;
    rec.set("samples/run1", vec![0.5, 0.7, 0.65])?;
    rec.set("samples/run2", vec![0.9, 0.8])?;
    rec.attrs()?.set("instrument", "spectrometer-3")?;
    rec.close(true)?;

    // first patch: fix a bad run, add a new one
    let mut rec = Record::open(&record, OpenMode::ReadWrite)?;
    rec.delete("samples/run2")?;
    rec.set("samples/run2", vec![0.91, 0.79])?;
    rec.set("samples/run3", vec![0.4, 0.45, 0.5])?;
    rec.close(true)?;

    // read the merged view
    let rec = Record::open(&record, OpenMode::Read)?;
    println!("record {} consists of:", rec.ih5_uuid()?);
    for (path, ub) in rec.ih5_files()?.iter().zip(rec.ih5_meta()?) {
        println!("  patch {}: {}", ub.patch_index, path.display());
    }
    println!("merged tree:");
    rec.visititems(|path, node| {
        if let ih5::Node::Dataset(ds) = node {
            println!("  /{path} = {:?}", ds.value()?);
        } else {
            println!("  /{path}/");
        }
        Ok(())
    })?;
    Ok(())
}
