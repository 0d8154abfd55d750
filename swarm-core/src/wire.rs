//! Coordination-channel framing. Every message between a peer and the server travels as one
//! frame: `u32` little-endian payload length, then the JSON object for a [`Message`].

use crate::protocol::Message;

/// Bytes in the length header.
pub const LEN_SIZE: usize = 4;

/// Largest payload a peer may declare.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Serialize `msg` as JSON and prepend its length header.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = serde_json::to_vec(msg)?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&len| len <= MAX_FRAME_LEN)
        .ok_or(FrameEncodeError::TooLarge)?;
    let mut frame = Vec::with_capacity(LEN_SIZE + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("serializing message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("message exceeds the frame limit")]
    TooLarge,
}

/// Payload length announced by a header. Streaming readers call this before reading the body.
pub fn frame_len(header: [u8; LEN_SIZE]) -> Result<usize, FrameDecodeError> {
    let len = u32::from_le_bytes(header);
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    Ok(len as usize)
}

/// Parse a frame body. An unknown `type` tag is a decode error like malformed JSON.
pub fn decode_payload(payload: &[u8]) -> Result<Message, FrameDecodeError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Take one message off the front of a buffer, returning it with the bytes consumed.
/// `NeedMore` means the buffer holds only part of a frame.
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    let header: [u8; LEN_SIZE] = bytes
        .get(..LEN_SIZE)
        .and_then(|h| h.try_into().ok())
        .ok_or(FrameDecodeError::NeedMore)?;
    let end = LEN_SIZE + frame_len(header)?;
    let payload = bytes.get(LEN_SIZE..end).ok_or(FrameDecodeError::NeedMore)?;
    Ok((decode_payload(payload)?, end))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("incomplete frame")]
    NeedMore,
    #[error("declared frame length over limit")]
    TooLarge,
    #[error("invalid message: {0}")]
    Decode(#[from] serde_json::Error),
}
