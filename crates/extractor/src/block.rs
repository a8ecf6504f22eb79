//! Fetching and persisting a single block.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{trace, warn};
use yaci_primitives::{Block, BlockResults, Transaction};
use yaci_storage::Sink;

use crate::{
    ChainClient, Error, ExtractConfig, GET_BLOCK_RESULTS_METHOD, GET_BLOCK_WITH_TXS_METHOD,
};

/// Fetches one block, extracts its transactions, and writes both atomically.
///
/// With `enable_block_results` set, the consensus results of the block are
/// fetched afterwards; that sub-call is best-effort (see
/// [`fetch_block_results`]).
pub async fn fetch_block<C, S>(
    client: &C,
    sink: &S,
    height: u64,
    cfg: &ExtractConfig,
) -> Result<(), Error>
where
    C: ChainClient + ?Sized,
    S: Sink + ?Sized,
{
    let params = json!({ "height": height });
    let data = client.invoke(GET_BLOCK_WITH_TXS_METHOD, &params).await?;

    let transactions = extract_transactions(height, &data)?;
    let block = Block::new(height, data);

    sink.write_block_with_transactions(&block, &transactions).await?;
    trace!(target: "extractor", height, txs = transactions.len(), "Processed block.");

    if cfg.enable_block_results {
        fetch_block_results(client, sink, height).await?;
    }

    Ok(())
}

/// Fetches and persists the consensus results of a block.
///
/// A fetch failure is logged and swallowed: older nodes do not implement the
/// block-results method and the block itself is already persisted. A failure
/// writing successfully fetched results does fail the block.
async fn fetch_block_results<C, S>(client: &C, sink: &S, height: u64) -> Result<(), Error>
where
    C: ChainClient + ?Sized,
    S: Sink + ?Sized,
{
    let params = json!({ "height": height });
    match client.invoke(GET_BLOCK_RESULTS_METHOD, &params).await {
        Ok(data) => {
            sink.write_block_results(&BlockResults { height, data }).await?;
            Ok(())
        }
        Err(error) => {
            warn!(
                target: "extractor",
                height,
                %error,
                "Failed to fetch block results; node may not support the method."
            );
            Ok(())
        }
    }
}

/// Extracts the transactions of a block from its JSON payload.
///
/// The payload carries the decoded transactions at the top-level `txs` array
/// and the raw transaction bytes at `block.data.txs`, in the same order. The
/// hash of a transaction is the upper-hex SHA-256 of its raw bytes; its
/// stored payload is the decoded JSON.
fn extract_transactions(height: u64, data: &[u8]) -> Result<Vec<Transaction>, Error> {
    let malformed = |reason: String| Error::BlockFormat { height, reason };

    let payload: Value =
        serde_json::from_slice(data).map_err(|err| malformed(format!("invalid JSON: {err}")))?;

    let decoded = match payload.get("txs").and_then(Value::as_array) {
        Some(txs) if !txs.is_empty() => txs,
        _ => return Ok(Vec::new()),
    };

    let raw = payload
        .pointer("/block/data/txs")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("missing block.data.txs".to_owned()))?;

    if decoded.len() != raw.len() {
        return Err(malformed(format!(
            "decoded tx count {} does not match raw tx count {}",
            decoded.len(),
            raw.len()
        )));
    }

    decoded
        .iter()
        .zip(raw)
        .map(|(tx, encoded)| {
            let encoded = encoded
                .as_str()
                .ok_or_else(|| malformed("raw transaction is not a string".to_owned()))?;
            let bytes = STANDARD
                .decode(encoded)
                .map_err(|err| malformed(format!("invalid base64 transaction: {err}")))?;

            let hash = hex::encode_upper(Sha256::digest(&bytes));
            let data = serde_json::to_vec(tx).map_err(|err| malformed(err.to_string()))?;

            Ok(Transaction { hash, data })
        })
        .collect()
}
