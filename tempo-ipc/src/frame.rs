//! Fixed-size versioned frame codec.
//!
//! Every [`Message`] variant encodes to exactly [`FRAME_SIZE`] bytes:
//! a 2-byte protocol version, a 2-byte payload length, the bincode payload,
//! and zero padding. Fixed frames keep the transport trivial — a peer
//! always reads exactly one frame's worth of bytes per message, on both
//! stream and datagram transports.

use crate::{Message, PROTOCOL_VERSION};
use thiserror::Error;

/// Size in bytes of every encoded frame.
pub const FRAME_SIZE: usize = 128;

/// Bytes reserved for the version + length header.
const HEADER_SIZE: usize = 4;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is {0} bytes, expected {FRAME_SIZE}")]
    WrongSize(usize),
    #[error("peer speaks protocol version {got}, this build speaks {expected}")]
    VersionMismatch { got: u16, expected: u16 },
    #[error("payload length {0} exceeds frame capacity")]
    Oversized(usize),
    #[error("malformed payload: {0}")]
    Payload(#[from] bincode::Error),
}

/// Encodes `msg` into one fixed-size frame.
pub fn encode_frame(msg: &Message) -> Result<[u8; FRAME_SIZE], FrameError> {
    let payload = bincode::serialize(msg)?;
    if payload.len() > FRAME_SIZE - HEADER_SIZE {
        return Err(FrameError::Oversized(payload.len()));
    }

    let mut frame = [0u8; FRAME_SIZE];
    frame[0..2].copy_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    frame[2..4].copy_from_slice(&(payload.len() as u16).to_le_bytes());
    frame[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(&payload);
    Ok(frame)
}

/// Decodes one fixed-size frame back into a [`Message`].
pub fn decode_frame(frame: &[u8]) -> Result<Message, FrameError> {
    if frame.len() != FRAME_SIZE {
        return Err(FrameError::WrongSize(frame.len()));
    }

    let version = u16::from_le_bytes([frame[0], frame[1]]);
    if version != PROTOCOL_VERSION {
        return Err(FrameError::VersionMismatch {
            got: version,
            expected: PROTOCOL_VERSION,
        });
    }

    let len = u16::from_le_bytes([frame[2], frame[3]]) as usize;
    if len > FRAME_SIZE - HEADER_SIZE {
        return Err(FrameError::Oversized(len));
    }

    Ok(bincode::deserialize(&frame[HEADER_SIZE..HEADER_SIZE + len])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_stop_ack() {
        let frame = encode_frame(&Message::StopAck).unwrap();
        assert_eq!(decode_frame(&frame).unwrap(), Message::StopAck);
    }

    #[test]
    fn rejects_foreign_version() {
        let mut frame = encode_frame(&Message::StopAck).unwrap();
        frame[0] = 0xFF;
        assert!(matches!(
            decode_frame(&frame),
            Err(FrameError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn rejects_truncated_frame() {
        let frame = encode_frame(&Message::StopAck).unwrap();
        assert!(matches!(
            decode_frame(&frame[..FRAME_SIZE - 1]),
            Err(FrameError::WrongSize(_))
        ));
    }

    #[test]
    fn rejects_length_past_capacity() {
        let mut frame = encode_frame(&Message::StopAck).unwrap();
        frame[2..4].copy_from_slice(&(FRAME_SIZE as u16).to_le_bytes());
        assert!(matches!(decode_frame(&frame), Err(FrameError::Oversized(_))));
    }
}
