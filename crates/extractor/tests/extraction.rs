//! End-to-end tests of the extraction drivers over mock collaborators.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tonic::Status;
use yaci_extractor::{
    drive_range, fetch_block, repair_gaps, tail, ChainClient, Error, ExtractConfig,
    GET_BLOCK_RESULTS_METHOD, GET_BLOCK_WITH_TXS_METHOD,
};
use yaci_primitives::{Block, BlockHeight, BlockResults, Transaction};
use yaci_storage::Sink;

/// Builds a `GetBlockWithTxs`-shaped payload carrying the given raw
/// transactions.
fn block_payload(height: u64, raw_txs: &[&[u8]]) -> Vec<u8> {
    let encoded: Vec<String> = raw_txs.iter().map(|tx| STANDARD.encode(tx)).collect();
    let decoded: Vec<Value> =
        raw_txs.iter().enumerate().map(|(i, _)| json!({ "body": { "memo": format!("tx-{i}") } })).collect();

    serde_json::to_vec(&json!({
        "txs": decoded,
        "block_id": { "hash": format!("hash-{height}") },
        "block": {
            "header": { "height": height.to_string() },
            "data": { "txs": encoded },
        },
    }))
    .unwrap()
}

/// Mock chain endpoint with configurable payloads and failure injection.
#[derive(Default)]
struct MockChain {
    /// Pre-configured block payloads; heights without an entry get a
    /// single-transaction payload derived from the height.
    blocks: Mutex<HashMap<u64, Vec<u8>>>,
    /// Heights that fail with a transient status the given number of times.
    transient_failures: Mutex<HashMap<u64, u32>>,
    /// Heights that always fail with a terminal error.
    terminal_failures: Mutex<HashSet<u64>>,
    /// Whether the block-results method answers `Unimplemented`.
    results_unsupported: bool,
    /// Artificial latency per invocation.
    delay: Option<Duration>,
    /// Scripted responses for `latest_height`; when drained the mock cancels
    /// `on_drained` (if set) and keeps answering the last value.
    latest_script: Mutex<VecDeque<u64>>,
    last_latest: AtomicU64,
    on_drained: Mutex<Option<CancellationToken>>,
    /// Heights fetched through the block method, in completion order.
    fetched: Mutex<Vec<u64>>,
}

impl MockChain {
    fn with_latest(self, heights: &[u64]) -> Self {
        *self.latest_script.lock().unwrap() = heights.iter().copied().collect();
        if let Some(last) = heights.last() {
            self.last_latest.store(*last, Ordering::SeqCst);
        }
        self
    }

    fn cancel_when_drained(self, token: CancellationToken) -> Self {
        *self.on_drained.lock().unwrap() = Some(token);
        self
    }

    fn fail_transiently(self, height: u64, times: u32) -> Self {
        self.transient_failures.lock().unwrap().insert(height, times);
        self
    }

    fn fail_terminally(self, height: u64) -> Self {
        self.terminal_failures.lock().unwrap().insert(height);
        self
    }

    fn fetched_heights(&self) -> Vec<u64> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn invoke(
        &self,
        method_full_name: &str,
        params: &Value,
    ) -> Result<Vec<u8>, yaci_grpc::Error> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let height = params["height"].as_u64().expect("height param");
        match method_full_name {
            GET_BLOCK_WITH_TXS_METHOD => {
                if self.terminal_failures.lock().unwrap().contains(&height) {
                    return Err(yaci_grpc::Error::MalformedParams("injected".into()));
                }
                if let Some(remaining) = self.transient_failures.lock().unwrap().get_mut(&height) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(Status::unavailable("injected").into());
                    }
                }

                self.fetched.lock().unwrap().push(height);
                let payload = self.blocks.lock().unwrap().get(&height).cloned();
                Ok(payload.unwrap_or_else(|| block_payload(height, &[b"default tx"])))
            }
            GET_BLOCK_RESULTS_METHOD => {
                if self.results_unsupported {
                    Err(Status::unimplemented("unknown method GetBlockResults").into())
                } else {
                    Ok(serde_json::to_vec(&json!({
                        "height": height.to_string(),
                        "finalizeBlockEvents": [],
                    }))
                    .unwrap())
                }
            }
            other => panic!("unexpected method {other}"),
        }
    }

    async fn latest_height(&self, _max_retries: u32) -> Result<u64, yaci_grpc::Error> {
        let mut script = self.latest_script.lock().unwrap();
        match script.pop_front() {
            Some(height) => {
                self.last_latest.store(height, Ordering::SeqCst);
                Ok(height)
            }
            None => {
                if let Some(token) = self.on_drained.lock().unwrap().take() {
                    token.cancel();
                }
                Ok(self.last_latest.load(Ordering::SeqCst))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct StoredBlock {
    data: Vec<u8>,
    tx_count: usize,
    tx_hashes: Vec<String>,
}

#[derive(Debug, Default)]
struct SinkState {
    blocks: BTreeMap<u64, StoredBlock>,
    transactions: BTreeMap<String, Vec<u8>>,
    results: BTreeMap<u64, Vec<u8>>,
    block_writes: u64,
}

/// In-memory sink mirroring the idempotent write semantics of the Postgres
/// implementation.
#[derive(Debug, Default)]
struct MemorySink {
    state: Mutex<SinkState>,
}

impl MemorySink {
    fn heights(&self) -> Vec<u64> {
        self.state.lock().unwrap().blocks.keys().copied().collect()
    }

    fn result_heights(&self) -> Vec<u64> {
        self.state.lock().unwrap().results.keys().copied().collect()
    }

    fn block_writes(&self) -> u64 {
        self.state.lock().unwrap().block_writes
    }

    /// Every stored block must have all of its transactions visible and a
    /// matching count: blocks and transactions are written atomically.
    fn assert_atomicity(&self) {
        let state = self.state.lock().unwrap();
        for (height, block) in &state.blocks {
            assert_eq!(
                block.tx_count,
                block.tx_hashes.len(),
                "tx_count mismatch at height {height}"
            );
            for hash in &block.tx_hashes {
                assert!(
                    state.transactions.contains_key(hash),
                    "missing transaction {hash} of block {height}"
                );
            }
        }
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn write_block_with_transactions(
        &self,
        block: &Block,
        transactions: &[Transaction],
    ) -> Result<(), yaci_storage::Error> {
        let mut state = self.state.lock().unwrap();
        state.block_writes += 1;

        let stored = StoredBlock {
            data: block.data.clone(),
            tx_count: transactions.len(),
            tx_hashes: transactions.iter().map(|tx| tx.hash.clone()).collect(),
        };
        state.blocks.entry(block.height).or_insert(stored);

        for tx in transactions {
            state.transactions.entry(tx.hash.clone()).or_insert_with(|| tx.data.clone());
        }
        Ok(())
    }

    async fn write_block_results(
        &self,
        results: &BlockResults,
    ) -> Result<(), yaci_storage::Error> {
        self.state.lock().unwrap().results.insert(results.height, results.data.clone());
        Ok(())
    }

    async fn latest_block(&self) -> Result<Option<Block>, yaci_storage::Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .blocks
            .last_key_value()
            .map(|(height, block)| Block::new(*height, block.data.clone())))
    }

    async fn earliest_block(&self) -> Result<Option<Block>, yaci_storage::Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .blocks
            .first_key_value()
            .map(|(height, block)| Block::new(*height, block.data.clone())))
    }

    async fn missing_heights(&self) -> Result<Vec<BlockHeight>, yaci_storage::Error> {
        let state = self.state.lock().unwrap();
        let (Some(first), Some(last)) =
            (state.blocks.keys().next(), state.blocks.keys().next_back())
        else {
            return Ok(Vec::new());
        };
        Ok((*first..=*last).filter(|h| !state.blocks.contains_key(h)).collect())
    }

    async fn close(&self) -> Result<(), yaci_storage::Error> {
        Ok(())
    }
}

fn config() -> ExtractConfig {
    ExtractConfig { block_time: Duration::from_millis(50), ..Default::default() }
}

#[tokio::test(start_paused = true)]
async fn drive_range_writes_every_height() {
    let chain = Arc::new(MockChain::default());
    let sink = Arc::new(MemorySink::default());
    let token = CancellationToken::new();

    drive_range(Arc::clone(&chain), Arc::clone(&sink), 1, 20, &config(), &token).await.unwrap();

    assert_eq!(sink.heights(), (1..=20).collect::<Vec<_>>());
    assert!(sink.missing_heights().await.unwrap().is_empty());
    sink.assert_atomicity();
}

#[tokio::test(start_paused = true)]
async fn drive_range_retries_transient_failures() {
    let chain = Arc::new(MockChain::default().fail_transiently(3, 2));
    let sink = Arc::new(MemorySink::default());
    let token = CancellationToken::new();

    drive_range(Arc::clone(&chain), Arc::clone(&sink), 1, 5, &config(), &token).await.unwrap();

    assert_eq!(sink.heights(), vec![1, 2, 3, 4, 5]);
}

#[tokio::test(start_paused = true)]
async fn drive_range_surfaces_first_error_and_cancels_peers() {
    let chain = Arc::new(MockChain::default().fail_terminally(4));
    let sink = Arc::new(MemorySink::default());
    let token = CancellationToken::new();

    let cfg = ExtractConfig { concurrency: 2, ..config() };
    let err =
        drive_range(Arc::clone(&chain), Arc::clone(&sink), 1, 100, &cfg, &token).await.unwrap_err();

    assert_eq!(err.height(), Some(4));
    // Peers were cancelled: nowhere near the whole range was fetched.
    assert!(chain.fetched_heights().len() < 100);
    sink.assert_atomicity();
}

#[tokio::test]
async fn drive_range_is_clean_under_cancellation() {
    let chain = Arc::new(MockChain { delay: Some(Duration::from_millis(20)), ..Default::default() });
    let sink = Arc::new(MemorySink::default());
    let token = CancellationToken::new();

    let cfg = ExtractConfig { concurrency: 3, ..config() };
    let driver = tokio::spawn({
        let chain = Arc::clone(&chain);
        let sink = Arc::clone(&sink);
        let token = token.clone();
        async move { drive_range(chain, sink, 1, 1000, &cfg, &token).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();
    let err = driver.await.unwrap().unwrap_err();

    assert!(yaci_grpc::RetryClass::is_cancelled(&err));
    // No new fetches were started after the signal was observed.
    assert!(chain.fetched_heights().len() < 1000);
    sink.assert_atomicity();
}

#[tokio::test]
async fn repeated_writes_are_idempotent() {
    let chain = MockChain::default();
    let sink = MemorySink::default();
    let cfg = config();

    let snapshot = |sink: &MemorySink| {
        let state = sink.state.lock().unwrap();
        (state.blocks.clone(), state.transactions.clone(), state.results.clone())
    };

    fetch_block(&chain, &sink, 7, &cfg).await.unwrap();
    let before = snapshot(&sink);

    fetch_block(&chain, &sink, 7, &cfg).await.unwrap();
    assert_eq!(sink.block_writes(), 2);
    assert_eq!(snapshot(&sink), before);
}

#[tokio::test]
async fn transaction_hashes_follow_raw_bytes() {
    let chain = MockChain::default();
    chain.blocks.lock().unwrap().insert(5, block_payload(5, &[b"alpha", b"beta"]));
    let sink = MemorySink::default();

    fetch_block(&chain, &sink, 5, &config()).await.unwrap();

    let state = sink.state.lock().unwrap();
    let block = &state.blocks[&5];
    assert_eq!(block.tx_count, 2);
    assert_eq!(block.tx_hashes[0], hex::encode_upper(Sha256::digest(b"alpha")));
    assert_eq!(block.tx_hashes[1], hex::encode_upper(Sha256::digest(b"beta")));
}

#[tokio::test]
async fn unsupported_block_results_are_swallowed() {
    let chain = MockChain { results_unsupported: true, ..Default::default() };
    let sink = MemorySink::default();
    let cfg = ExtractConfig { enable_block_results: true, ..config() };

    fetch_block(&chain, &sink, 9, &cfg).await.unwrap();

    assert_eq!(sink.heights(), vec![9]);
    assert!(sink.result_heights().is_empty());
}

#[tokio::test]
async fn supported_block_results_are_written() {
    let chain = MockChain::default();
    let sink = MemorySink::default();
    let cfg = ExtractConfig { enable_block_results: true, ..config() };

    fetch_block(&chain, &sink, 9, &cfg).await.unwrap();

    assert_eq!(sink.result_heights(), vec![9]);
}

#[tokio::test(start_paused = true)]
async fn tail_follows_the_tip() {
    let token = CancellationToken::new();
    let chain = Arc::new(
        MockChain::default().with_latest(&[5, 8]).cancel_when_drained(token.clone()),
    );
    let sink = Arc::new(MemorySink::default());

    tail(Arc::clone(&chain), Arc::clone(&sink), 3, &config(), &token).await.unwrap();

    assert_eq!(sink.heights(), vec![3, 4, 5, 6, 7, 8]);
    assert_eq!(sink.block_writes(), 6, "each new block is written exactly once");
}

#[tokio::test(start_paused = true)]
async fn tail_returns_driver_errors() {
    let token = CancellationToken::new();
    let chain = Arc::new(MockChain::default().with_latest(&[7]).fail_terminally(6));
    let sink = Arc::new(MemorySink::default());

    let err = tail(Arc::clone(&chain), Arc::clone(&sink), 6, &config(), &token)
        .await
        .unwrap_err();

    assert_eq!(err.height(), Some(6));
}

#[tokio::test]
async fn repair_gaps_fetches_only_missing_heights() {
    let chain = MockChain::default();
    let sink = MemorySink::default();
    let cfg = config();
    let token = CancellationToken::new();

    for height in [1, 2, 4, 5] {
        fetch_block(&chain, &sink, height, &cfg).await.unwrap();
    }
    chain.fetched.lock().unwrap().clear();

    repair_gaps(&chain, &sink, &cfg, &token).await.unwrap();

    assert_eq!(chain.fetched_heights(), vec![3]);
    assert!(sink.missing_heights().await.unwrap().is_empty());
}

#[tokio::test]
async fn repair_gaps_short_circuits_on_failure() {
    let chain = MockChain::default().fail_terminally(3);
    let sink = MemorySink::default();
    let cfg = config();
    let token = CancellationToken::new();

    for height in [1, 2, 4, 5, 8] {
        fetch_block(&chain, &sink, height, &cfg).await.unwrap();
    }
    chain.fetched.lock().unwrap().clear();

    let err = repair_gaps(&chain, &sink, &cfg, &token).await.unwrap_err();

    assert_eq!(err.height(), Some(3));
    // Heights after the failing one were never attempted.
    assert!(chain.fetched_heights().is_empty());
}

#[tokio::test]
async fn errors_carry_no_height_outside_block_context() {
    let err = Error::Unexpected("boom".into());
    assert_eq!(err.height(), None);
}
