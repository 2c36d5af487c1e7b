//! Page tokens: `base64(json({"offset": N}))` with standard padding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken {
    pub offset: i32,
}

/// Decodes a page token into a row offset. The empty token is offset 0.
pub fn decode(token: &str) -> Result<u64> {
    if token.is_empty() {
        return Ok(0);
    }
    let invalid = || SearchError::BadRequest(format!("invalid page_token '{}'", token));

    let bytes = STANDARD.decode(token).map_err(|_| invalid())?;
    // Tokens from older servers carry a trailing newline after the JSON.
    let parsed: PageToken = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
    u64::try_from(parsed.offset).map_err(|_| invalid())
}

/// Encodes the offset of the next page.
pub fn encode(offset: u64) -> Result<String> {
    let offset = i32::try_from(offset).map_err(|e| {
        SearchError::internal(
            format!("error encoding 'nextPageToken' value for offset {}", offset),
            e,
        )
    })?;
    let json = serde_json::to_vec(&PageToken { offset })
        .map_err(|e| SearchError::internal("error encoding 'nextPageToken' value", e))?;
    Ok(STANDARD.encode(json))
}
