use common::errors::*;

use crate::errors::RpcError;

pub const MAGIC: [u8; 4] = *b"PTKV";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHandshake {
    pub version: Version,
    pub feature_flags: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandshake {
    pub version: Version,
    pub node_id: u64,
    pub node_name: String,
    pub idle_timeout_ms: u32,
    pub feature_flags: u32,
}

fn encode_version(version: &Version, out: &mut Vec<u8>) {
    out.extend_from_slice(&version.major.to_be_bytes());
    out.extend_from_slice(&version.minor.to_be_bytes());
    out.extend_from_slice(&version.patch.to_be_bytes());
}

fn decode_version(input: &[u8]) -> Result<(Version, &[u8])> {
    if input.len() < 6 {
        return Err(RpcError::Malformed("version triple truncated".into()).into());
    }
    let version = Version {
        major: u16::from_be_bytes(input[0..2].try_into().unwrap()),
        minor: u16::from_be_bytes(input[2..4].try_into().unwrap()),
        patch: u16::from_be_bytes(input[4..6].try_into().unwrap()),
    };
    Ok((version, &input[6..]))
}

pub fn encode_client_handshake(hs: &ClientHandshake) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 6 + 4);
    out.extend_from_slice(&MAGIC);
    encode_version(&hs.version, &mut out);
    out.extend_from_slice(&hs.feature_flags.to_be_bytes());
    out
}

pub fn decode_client_handshake(input: &[u8]) -> Result<ClientHandshake> {
    if input.len() < 4 || input[0..4] != MAGIC {
        return Err(RpcError::Malformed("bad magic".into()).into());
    }
    let (version, rest) = decode_version(&input[4..])?;
    if rest.len() < 4 {
        return Err(RpcError::Malformed("feature flags truncated".into()).into());
    }
    let feature_flags = u32::from_be_bytes(rest[0..4].try_into().unwrap());
    Ok(ClientHandshake { version, feature_flags })
}

pub fn encode_server_handshake(hs: &ServerHandshake) -> Vec<u8> {
    let name_bytes = hs.node_name.as_bytes();
    let mut out = Vec::with_capacity(4 + 6 + 8 + 4 + name_bytes.len() + 4 + 4);
    out.extend_from_slice(&MAGIC);
    encode_version(&hs.version, &mut out);
    out.extend_from_slice(&hs.node_id.to_be_bytes());
    out.extend_from_slice(&(name_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(name_bytes);
    out.extend_from_slice(&hs.idle_timeout_ms.to_be_bytes());
    out.extend_from_slice(&hs.feature_flags.to_be_bytes());
    out
}

pub fn decode_server_handshake(input: &[u8]) -> Result<ServerHandshake> {
    if input.len() < 4 || input[0..4] != MAGIC {
        return Err(RpcError::Malformed("bad magic".into()).into());
    }
    let (version, rest) = decode_version(&input[4..])?;
    if rest.len() < 8 {
        return Err(RpcError::Malformed("node id truncated".into()).into());
    }
    let node_id = u64::from_be_bytes(rest[0..8].try_into().unwrap());
    let rest = &rest[8..];

    if rest.len() < 4 {
        return Err(RpcError::Malformed("node name length truncated".into()).into());
    }
    let name_len = u32::from_be_bytes(rest[0..4].try_into().unwrap()) as usize;
    let rest = &rest[4..];
    if rest.len() < name_len {
        return Err(RpcError::Malformed("node name truncated".into()).into());
    }
    let node_name = String::from_utf8(rest[..name_len].to_vec())
        .map_err(|e| RpcError::Malformed(e.to_string()))?;
    let rest = &rest[name_len..];

    if rest.len() < 8 {
        return Err(RpcError::Malformed("idle timeout/feature flags truncated".into()).into());
    }
    let idle_timeout_ms = u32::from_be_bytes(rest[0..4].try_into().unwrap());
    let feature_flags = u32::from_be_bytes(rest[4..8].try_into().unwrap());

    Ok(ServerHandshake {
        version,
        node_id,
        node_name,
        idle_timeout_ms,
        feature_flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_handshake_roundtrips() {
        let hs = ClientHandshake {
            version: Version { major: 1, minor: 2, patch: 3 },
            feature_flags: 0xAB,
        };
        let bytes = encode_client_handshake(&hs);
        assert_eq!(decode_client_handshake(&bytes).unwrap(), hs);
    }

    #[test]
    fn server_handshake_roundtrips() {
        let hs = ServerHandshake {
            version: Version { major: 1, minor: 0, patch: 0 },
            node_id: 42,
            node_name: "node-a".into(),
            idle_timeout_ms: 30_000,
            feature_flags: 0,
        };
        let bytes = encode_server_handshake(&hs);
        assert_eq!(decode_server_handshake(&bytes).unwrap(), hs);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let bytes = vec![0, 0, 0, 0];
        assert!(decode_client_handshake(&bytes).is_err());
    }
}
