//! TiKV backend.
//!
//! Bridges the asynchronous `tikv-client` API to the blocking backend traits
//! through a private tokio runtime. Calls must not be made from inside
//! another tokio runtime.
//!
//! Every cursor of a transaction reads the same snapshot, taken at a read
//! timestamp fetched once when the transaction opens its first cursor.
//! Cursors fetch `scan_batch_size` entries per request.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tikv_client::{Config, KvPair, Snapshot, Timestamp, TransactionClient, TransactionOptions};
use tokio::runtime::Runtime;

use super::{CommitMode, RawIterator, Transaction, TxnClient};
use crate::{Options, Result};

/// A connection to a TiKV cluster.
pub struct TikvClient {
    runtime: Arc<Runtime>,
    client: Arc<TransactionClient>,
    scan_batch_size: u32,
}

impl std::fmt::Debug for TikvClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TikvClient").field("scan_batch_size", &self.scan_batch_size).finish()
    }
}

impl TikvClient {
    /// Connects to the placement driver endpoints in `options`.
    pub fn connect(options: &Options) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

        let mut config = Config::default();
        if let Some(timeout_ms) = options.timeout_ms {
            config = config.with_timeout(Duration::from_millis(timeout_ms));
        }

        let client = runtime.block_on(TransactionClient::new_with_config(
            options.pd_endpoints.clone(),
            config,
        ))?;

        Ok(Self {
            runtime: Arc::new(runtime),
            client: Arc::new(client),
            scan_batch_size: options.scan_batch_size,
        })
    }
}

impl TxnClient for TikvClient {
    fn begin(&self, mode: CommitMode) -> Result<Box<dyn Transaction>> {
        let mut options = TransactionOptions::new_optimistic();
        if mode == CommitMode::Async {
            options = options.use_async_commit();
        }
        let inner = self.runtime.block_on(self.client.begin_with_options(options))?;
        Ok(Box::new(TikvTransaction {
            inner,
            runtime: Arc::clone(&self.runtime),
            client: Arc::clone(&self.client),
            scan_batch_size: self.scan_batch_size,
            read_ts: None,
        }))
    }

    fn name(&self) -> &'static str {
        "tikv"
    }
}

struct TikvTransaction {
    inner: tikv_client::Transaction,
    runtime: Arc<Runtime>,
    client: Arc<TransactionClient>,
    scan_batch_size: u32,
    /// Shared by every cursor this transaction opens.
    read_ts: Option<Timestamp>,
}

impl TikvTransaction {
    fn snapshot(&mut self) -> Result<Snapshot> {
        let ts = match self.read_ts.clone() {
            Some(ts) => ts,
            None => {
                let ts = self.runtime.block_on(self.client.current_timestamp())?;
                self.read_ts = Some(ts.clone());
                ts
            }
        };
        Ok(self.client.snapshot(ts, TransactionOptions::new_optimistic().read_only()))
    }
}

impl Transaction for TikvTransaction {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.runtime.block_on(self.inner.get(key.to_vec()))?)
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        Ok(self.runtime.block_on(self.inner.put(key, value))?)
    }

    fn delete(&mut self, key: Vec<u8>) -> Result<()> {
        Ok(self.runtime.block_on(self.inner.delete(key))?)
    }

    fn iter(&mut self, lower: &[u8], upper: &[u8]) -> Result<Box<dyn RawIterator>> {
        let cursor = TikvCursor {
            runtime: Arc::clone(&self.runtime),
            snapshot: self.snapshot()?,
            reverse: false,
            lower: lower.to_vec(),
            upper: upper.to_vec(),
            page_size: self.scan_batch_size,
            buffered: VecDeque::new(),
            exhausted: false,
            current: None,
        };
        Ok(Box::new(cursor.start()?))
    }

    fn iter_reverse(&mut self, upper: &[u8]) -> Result<Box<dyn RawIterator>> {
        let cursor = TikvCursor {
            runtime: Arc::clone(&self.runtime),
            snapshot: self.snapshot()?,
            reverse: true,
            lower: Vec::new(),
            upper: upper.to_vec(),
            page_size: self.scan_batch_size,
            buffered: VecDeque::new(),
            exhausted: false,
            current: None,
        };
        Ok(Box::new(cursor.start()?))
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        this.runtime.block_on(this.inner.commit())?;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        this.runtime.block_on(this.inner.rollback())?;
        Ok(())
    }
}

/// Pages through a snapshot, one scan request per `page_size` entries.
struct TikvCursor {
    runtime: Arc<Runtime>,
    snapshot: Snapshot,
    reverse: bool,
    /// Next forward page starts here (inclusive).
    lower: Vec<u8>,
    /// Forward pages end here; reverse pages start below it.
    upper: Vec<u8>,
    page_size: u32,
    buffered: VecDeque<(Vec<u8>, Vec<u8>)>,
    exhausted: bool,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl TikvCursor {
    fn start(mut self) -> Result<Self> {
        self.advance()?;
        Ok(self)
    }

    fn fetch_page(&mut self) -> Result<()> {
        let pairs: Vec<KvPair> = if self.reverse {
            let range = ..self.upper.clone();
            self.runtime.block_on(self.snapshot.scan_reverse(range, self.page_size))?.collect()
        } else {
            let range = self.lower.clone()..self.upper.clone();
            self.runtime.block_on(self.snapshot.scan(range, self.page_size))?.collect()
        };

        if pairs.len() < self.page_size as usize {
            self.exhausted = true;
        }
        for KvPair(key, value) in pairs {
            self.buffered.push_back((Vec::from(key), value));
        }

        if let Some((last, _)) = self.buffered.back() {
            if self.reverse {
                self.upper = last.clone();
            } else {
                // Smallest key strictly greater than `last`.
                self.lower = last.clone();
                self.lower.push(0);
            }
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<()> {
        if self.buffered.is_empty() && !self.exhausted {
            self.fetch_page()?;
        }
        self.current = self.buffered.pop_front();
        Ok(())
    }
}

impl RawIterator for TikvCursor {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map_or(&[][..], |(key, _)| key.as_slice())
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map_or(&[][..], |(_, value)| value.as_slice())
    }

    fn next(&mut self) -> Result<()> {
        if self.current.is_none() {
            return Ok(());
        }
        self.advance()
    }

    fn close(&mut self) {
        self.current = None;
        self.buffered.clear();
        self.exhausted = true;
    }
}
