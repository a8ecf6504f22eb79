//! Height probes built on the dynamic caller.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;
use tracing::debug;

use crate::field::{get_nested_field, scalar_to_string};
use crate::retry::with_retries;
use crate::{Error, GrpcClient};

/// Node status method; its response carries the latest committed height.
pub const STATUS_METHOD: &str = "cosmos.base.node.v1beta1.Service.Status";

/// Block-by-height method used to probe the earliest available height.
pub const GET_BLOCK_BY_HEIGHT_METHOD: &str =
    "cosmos.base.tendermint.v1beta1.Service.GetBlockByHeight";

/// Field path of the height within the status response.
const STATUS_HEIGHT_FIELD: &str = "height";

impl GrpcClient {
    /// Returns the latest committed block height of the node.
    ///
    /// A response whose height field does not parse as `u64` is fatal.
    pub async fn latest_height(&self, max_retries: u32) -> Result<u64, Error> {
        let params = json!({});
        let response = with_retries(
            || self.invoke_dynamic(STATUS_METHOD, &params),
            max_retries,
            self.cancellation(),
        )
        .await?;

        let value = get_nested_field(&response, STATUS_HEIGHT_FIELD)?;
        let text = scalar_to_string(&value)
            .ok_or_else(|| Error::InvalidHeight(format!("{value:?}")))?;
        text.parse().map_err(|_| Error::InvalidHeight(text))
    }

    /// Determines the earliest height retained by the node.
    ///
    /// Archive nodes serve block 1 and yield 1. Pruned nodes reject the probe
    /// and name their lowest retained height in the error text, which is the
    /// only signal they give.
    pub async fn earliest_height(&self, max_retries: u32) -> Result<u64, Error> {
        let params = json!({"height": "1"});

        let probe = with_retries(
            || self.invoke_dynamic(GET_BLOCK_BY_HEIGHT_METHOD, &params),
            1,
            self.cancellation(),
        )
        .await;
        let err = match probe {
            Ok(_) => return Ok(1),
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => err,
        };

        let lowest = parse_lowest_height_from_error(&err.to_string());
        if lowest > 0 {
            debug!(target: "grpc", lowest, "Node is pruned; earliest height taken from error text.");
            return Ok(lowest);
        }

        // The failure was not the pruned-node rejection; retry with the full
        // budget before giving up.
        match with_retries(
            || self.invoke_dynamic(GET_BLOCK_BY_HEIGHT_METHOD, &params),
            max_retries,
            self.cancellation(),
        )
        .await
        {
            Ok(_) => Ok(1),
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => Err(Error::EarliestHeightUnknown(Box::new(err))),
        }
    }
}

/// Extracts the lowest retained height from a pruned node's error message,
/// e.g. `height 1 is not available, lowest height is 28566001`. Returns 0
/// when the pattern is absent.
///
/// The pattern is part of the contract with the upstream node version; it is
/// kept in this one function so it is trivially replaceable should the node
/// grow a structured field.
pub fn parse_lowest_height_from_error(message: &str) -> u64 {
    static PATTERN: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"lowest height is (\d+)").expect("valid literal regex"));

    PATTERN
        .captures(&message.to_lowercase())
        .and_then(|captures| captures.get(1))
        .and_then(|height| height.as_str().parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::pruned("height 1 is not available, lowest height is 28566001", 28566001)]
    #[case::uppercase("Height 1 is not available, LOWEST HEIGHT IS 42", 42)]
    #[case::no_pattern("rpc error: code = Internal desc = something broke", 0)]
    #[case::empty("", 0)]
    #[case::no_digits("lowest height is unknown", 0)]
    fn parses_lowest_height(#[case] message: &str, #[case] expected: u64) {
        assert_eq!(parse_lowest_height_from_error(message), expected);
    }
}
