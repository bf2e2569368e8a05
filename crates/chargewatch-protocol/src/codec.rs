//! Decoding of API response bodies.
//!
//! Every endpoint answers with a `{"data": ...}` envelope. These helpers
//! unwrap the envelope and apply the per-endpoint shape rules.

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::models::{Envelope, LoginData, PileBox, StationState, StationSummary};

/// Errors produced while decoding a response body.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Body is not valid JSON for the expected shape.
    #[error("Decoding error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Envelope carried no `data` field.
    #[error("Missing data in response: {0}")]
    MissingData(String),

    /// Envelope carried an empty payload where one was required.
    #[error("No data found in response: {0}")]
    EmptyData(String),
}

/// Decode an envelope and return its payload.
///
/// # Errors
///
/// Returns an error if the body is invalid or has no `data`.
pub fn decode_data<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProtocolError> {
    let envelope: Envelope<T> = serde_json::from_slice(body)?;
    envelope
        .data
        .ok_or_else(|| ProtocolError::MissingData(snippet(body)))
}

/// Decode a login response.
///
/// # Errors
///
/// Returns an error if the body carries no token.
pub fn decode_login(body: &[u8]) -> Result<LoginData, ProtocolError> {
    decode_data(body)
}

/// Decode a per-station response, flattening all boxes into one pile list.
///
/// # Errors
///
/// Returns an error if the body is invalid or lists no boxes.
pub fn decode_station_state(body: &[u8]) -> Result<StationState, ProtocolError> {
    let boxes: Vec<PileBox> = serde_json::from_slice::<Envelope<Vec<PileBox>>>(body)?
        .data
        .unwrap_or_default();
    if boxes.is_empty() {
        return Err(ProtocolError::EmptyData(snippet(body)));
    }
    let piles = boxes.into_iter().flat_map(|b| b.piles).collect();
    Ok(StationState::new(piles))
}

/// Decode a directory listing. A missing payload is an empty directory.
///
/// # Errors
///
/// Returns an error if the body is invalid.
pub fn decode_directory(body: &[u8]) -> Result<Vec<StationSummary>, ProtocolError> {
    let envelope: Envelope<Vec<StationSummary>> = serde_json::from_slice(body)?;
    Ok(envelope.data.unwrap_or_default())
}

/// Short printable excerpt of a body for error messages.
fn snippet(body: &[u8]) -> String {
    const MAX: usize = 200;
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.into_owned(),
    }
}
