use common::errors::*;
use hlc::Timestamp;

use crate::errors::RpcError;

/// The payload-level wrapper every reply carries: an optional HLC
/// observation (only ever present on heartbeat-adjacent replies -- see
/// `raft::AppendEntriesResponse`) and either a body or an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaResponseEnvelope {
    pub timestamp: Option<Timestamp>,
    pub result: std::result::Result<Vec<u8>, String>,
}

pub fn encode_envelope(envelope: &ReplicaResponseEnvelope) -> Vec<u8> {
    let mut out = Vec::new();
    match envelope.timestamp {
        Some(ts) => {
            out.push(1);
            out.extend_from_slice(&ts.physical_ms.to_be_bytes());
            out.extend_from_slice(&ts.logical.to_be_bytes());
        }
        None => out.push(0),
    }
    match &envelope.result {
        Ok(body) => {
            out.push(0);
            out.extend_from_slice(&(body.len() as u32).to_be_bytes());
            out.extend_from_slice(body);
        }
        Err(message) => {
            out.push(1);
            let bytes = message.as_bytes();
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(bytes);
        }
    }
    out
}

pub fn decode_envelope(input: &[u8]) -> Result<ReplicaResponseEnvelope> {
    if input.is_empty() {
        return Err(RpcError::Malformed("empty envelope".into()).into());
    }
    let mut offset = 0;
    let has_timestamp = input[offset] != 0;
    offset += 1;

    let timestamp = if has_timestamp {
        if input.len() < offset + 12 {
            return Err(RpcError::Malformed("timestamp truncated".into()).into());
        }
        let physical_ms = u64::from_be_bytes(input[offset..offset + 8].try_into().unwrap());
        let logical = u32::from_be_bytes(input[offset + 8..offset + 12].try_into().unwrap());
        offset += 12;
        Some(Timestamp { physical_ms, logical })
    } else {
        None
    };

    if input.len() < offset + 1 + 4 {
        return Err(RpcError::Malformed("result tag/length truncated".into()).into());
    }
    let is_error = input[offset] != 0;
    offset += 1;
    let len = u32::from_be_bytes(input[offset..offset + 4].try_into().unwrap()) as usize;
    offset += 4;
    if input.len() < offset + len {
        return Err(RpcError::Malformed("result body truncated".into()).into());
    }
    let body = input[offset..offset + len].to_vec();

    let result = if is_error {
        Err(String::from_utf8_lossy(&body).into_owned())
    } else {
        Ok(body)
    };

    Ok(ReplicaResponseEnvelope { timestamp, result })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_roundtrips_with_timestamp_and_ok_body() {
        let envelope = ReplicaResponseEnvelope {
            timestamp: Some(Timestamp { physical_ms: 5, logical: 2 }),
            result: Ok(vec![1, 2, 3]),
        };
        let bytes = encode_envelope(&envelope);
        assert_eq!(decode_envelope(&bytes).unwrap(), envelope);
    }

    #[test]
    fn envelope_roundtrips_error_without_timestamp() {
        let envelope = ReplicaResponseEnvelope {
            timestamp: None,
            result: Err("group not started".into()),
        };
        let bytes = encode_envelope(&envelope);
        assert_eq!(decode_envelope(&bytes).unwrap(), envelope);
    }
}
