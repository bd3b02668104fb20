use common::errors::*;

use crate::errors::RpcError;

/// Bit 0: the server's partition assignment differs from what it last
/// reported to this client; the client should refresh before routing its
/// next request.
pub const FLAG_PARTITION_ASSIGNMENT_CHANGED: u8 = 0x1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: u16,
    pub request_id: u64,
    pub flags: u8,
}

impl FrameHeader {
    pub fn partition_assignment_changed(&self) -> bool {
        self.flags & FLAG_PARTITION_ASSIGNMENT_CHANGED != 0
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

/// `[len: u32 BE][message_type: u16 BE][request_id: u64 BE][flags: u8][payload]`.
/// `len` covers everything after itself.
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let body_len = 2 + 8 + 1 + frame.payload.len();
    let mut out = Vec::with_capacity(4 + body_len);
    out.extend_from_slice(&(body_len as u32).to_be_bytes());
    out.extend_from_slice(&frame.header.message_type.to_be_bytes());
    out.extend_from_slice(&frame.header.request_id.to_be_bytes());
    out.push(frame.header.flags);
    out.extend_from_slice(&frame.payload);
    out
}

/// Decodes one frame from the front of `input`, returning the frame and the
/// remaining bytes. `input` must contain the length prefix plus a complete
/// body -- callers reading off a socket buffer until a full frame arrives.
pub fn decode_frame(input: &[u8]) -> Result<(Frame, &[u8])> {
    if input.len() < 4 {
        return Err(RpcError::Malformed("frame length prefix truncated".into()).into());
    }
    let body_len = u32::from_be_bytes(input[0..4].try_into().unwrap()) as usize;
    let rest = &input[4..];
    if rest.len() < body_len {
        return Err(RpcError::Malformed("frame body truncated".into()).into());
    }
    if body_len < 11 {
        return Err(RpcError::Malformed("frame body shorter than header".into()).into());
    }

    let message_type = u16::from_be_bytes(rest[0..2].try_into().unwrap());
    let request_id = u64::from_be_bytes(rest[2..10].try_into().unwrap());
    let flags = rest[10];
    let payload = rest[11..body_len].to_vec();

    Ok((
        Frame {
            header: FrameHeader {
                message_type,
                request_id,
                flags,
            },
            payload,
        },
        &rest[body_len..],
    ))
}
