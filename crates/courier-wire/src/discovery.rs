use serde::Deserialize;

use courier_core::errors::WireError;
use courier_core::wire::ProtocolVersion;

#[derive(Deserialize)]
struct VersionResponse {
    version: [u32; 3],
}

pub(crate) fn parse_version(body: &[u8]) -> Result<ProtocolVersion, WireError> {
    let resp: VersionResponse =
        serde_json::from_slice(body).map_err(|e| WireError::Discovery(e.to_string()))?;
    Ok(ProtocolVersion(
        resp.version[0],
        resp.version[1],
        resp.version[2],
    ))
}

/// Ask the gateway which protocol version it currently speaks. Failures
/// propagate; the caller decides whether setup continues.
pub async fn fetch_latest_version(
    http: &reqwest::Client,
    url: &str,
) -> Result<ProtocolVersion, WireError> {
    let resp = http
        .get(url)
        .send()
        .await
        .map_err(|e| WireError::Discovery(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(WireError::Discovery(format!(
            "discovery endpoint returned {}",
            resp.status()
        )));
    }

    let body = resp
        .bytes()
        .await
        .map_err(|e| WireError::Discovery(e.to_string()))?;
    parse_version(&body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version_triple() {
        let v = parse_version(br#"{"version": [2, 3000, 12]}"#).unwrap();
        assert_eq!(v, ProtocolVersion(2, 3000, 12));
    }

    #[test]
    fn rejects_malformed_body() {
        let err = parse_version(b"<html>not json</html>").unwrap_err();
        assert!(matches!(err, WireError::Discovery(_)));
    }

    #[test]
    fn rejects_short_tuple() {
        let err = parse_version(br#"{"version": [2, 3000]}"#).unwrap_err();
        assert!(matches!(err, WireError::Discovery(_)));
    }
}
