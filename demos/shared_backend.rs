//! Several databases sharing one backend
//!
//! Each database claims its own namespace; a second open of a claimed
//! namespace is refused until the holder closes it.

use anyhow::Result;
use prefixkv::backend::MemoryBackend;
use prefixkv::{Error, DB};
use std::sync::Arc;

fn main() -> Result<()> {
    env_logger::init();

    let backend = MemoryBackend::new();

    let accounts = DB::open_with_client("accounts", "ledger", Arc::new(backend.clone()))?;
    let blocks = DB::open_with_client("blocks", "ledger", Arc::new(backend.clone()))?;

    accounts.set(b"alice", b"100")?;
    blocks.set(b"alice", b"not an account")?;

    // Same logical key, different namespaces.
    println!("accounts/alice = {:?}", accounts.get(b"alice")?.map(String::from_utf8));
    println!("blocks/alice   = {:?}", blocks.get(b"alice")?.map(String::from_utf8));

    match DB::open_with_client("accounts", "ledger", Arc::new(backend.clone())) {
        Err(Error::AlreadyInUse(label)) => println!("{} is held by another handle", label),
        Ok(db) => {
            db.close()?;
            anyhow::bail!("namespace was opened twice");
        }
        Err(err) => return Err(err.into()),
    }

    // Apply several writes atomically.
    let mut batch = accounts.new_batch();
    batch.set(b"bob", b"50")?;
    batch.set(b"carol", b"75")?;
    batch.delete(b"alice")?;
    batch.write_sync()?;
    drop(batch);

    let mut out = Vec::new();
    accounts.dump(&mut out)?;
    print!("{}", String::from_utf8_lossy(&out));

    println!("backend stats: {:?}", accounts.stats());
    println!("versions stored: {}", backend.version_count());

    accounts.close()?;
    blocks.close()?;

    // The namespace is free again.
    let reopened = DB::open_with_client("accounts", "ledger", Arc::new(backend))?;
    println!("bob = {:?}", reopened.get(b"bob")?.map(String::from_utf8));
    reopened.close()?;

    Ok(())
}
