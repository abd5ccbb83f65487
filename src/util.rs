//! Small utilities: host:port parsing.

use crate::error::ClientError;

/// Parse a `"host:port"` address string.
///
/// Rejects anything without exactly one `:` separator or with a non-numeric
/// port, mirroring the reference implementation's `parse_address`.
pub fn parse_address(address: &str) -> Result<(String, u16), ClientError> {
    let mut parts = address.splitn(2, ':');
    let host = parts
        .next()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ClientError::InvalidConfig(format!("address format is host:port ({address})")))?;
    let port_str = parts
        .next()
        .ok_or_else(|| ClientError::InvalidConfig(format!("address format is host:port ({address})")))?;

    if port_str.is_empty() || port_str.contains(':') {
        return Err(ClientError::InvalidConfig(format!(
            "address format is host:port ({address})"
        )));
    }

    let port: u16 = port_str
        .parse()
        .map_err(|_| ClientError::InvalidConfig(format!("invalid port in address: {address}")))?;

    Ok((host.to_string(), port))
}
