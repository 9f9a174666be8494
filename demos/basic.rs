//! Basic usage example for prefixkv
//!
//! This example demonstrates the fundamental operations:
//! - Opening a database
//! - Writing key-value pairs
//! - Reading values
//! - Scanning a range in both directions
//! - Deleting keys
//!
//! Set `PREFIXKV_PD` to a comma separated list of PD endpoints (and build
//! with `--features tikv`) to run against a TiKV cluster instead of the
//! in-process backend.

use prefixkv::{BackendKind, Options, DB};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::init();

    let options = match std::env::var("PREFIXKV_PD") {
        Ok(endpoints) => Options::default()
            .backend(BackendKind::Tikv)
            .pd_endpoints(endpoints.split(',').map(str::to_string).collect()),
        Err(_) => Options::default(),
    };

    // Open (and claim) the namespace "demo/basic"
    let db = DB::open("basic", "demo", options)?;
    println!("Database opened with prefix {:?}", String::from_utf8_lossy(db.prefix()));

    // Write some key-value pairs
    println!("Writing data...");
    for i in 0..10u64 {
        db.set(&i.to_be_bytes(), format!("value{}", i).as_bytes())?;
    }

    // Read values
    println!("Reading data...");
    if let Some(value) = db.get(&3u64.to_be_bytes())? {
        println!("3 => {:?}", String::from_utf8_lossy(&value));
    }

    // Scan [2, 6) forward and backward
    println!("Forward scan over [2, 6):");
    let mut iter = db.iterator(Some(&2u64.to_be_bytes()), Some(&6u64.to_be_bytes()))?;
    while iter.valid() {
        println!("  {:?} => {}", iter.key(), String::from_utf8_lossy(iter.value()));
        iter.next();
    }
    drop(iter);

    println!("Reverse scan over [2, 6):");
    let mut iter = db.reverse_iterator(Some(&2u64.to_be_bytes()), Some(&6u64.to_be_bytes()))?;
    while iter.valid() {
        println!("  {:?} => {}", iter.key(), String::from_utf8_lossy(iter.value()));
        iter.next();
    }
    if let Some(err) = iter.error() {
        println!("Scan stopped early: {}", err);
    }
    drop(iter);

    // Delete a key
    println!("Deleting 3...");
    db.delete_sync(&3u64.to_be_bytes())?;
    match db.get(&3u64.to_be_bytes())? {
        Some(_) => println!("3 still exists (unexpected)"),
        None => println!("3 was successfully deleted"),
    }

    // Release the namespace
    db.close()?;
    println!("Database closed");

    Ok(())
}
