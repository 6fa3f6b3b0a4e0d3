//! RFC 7617 Basic authentication header construction.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Generate a Basic Auth header value (RFC 7617).
///
/// Returns "Basic " followed by base64-encoded credentials. The standard
/// engine emits no padding line breaks, so the value is always header-safe.
pub fn basic_auth(username: &str, password: &str) -> String {
    let plain = format!("{}:{}", username, password);
    let encoded = BASE64.encode(plain);
    format!("Basic {}", encoded)
}

/// Parse a Basic Auth header value.
///
/// Returns (username, password) or None if invalid.
pub fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?.trim();
    let decoded_vec = BASE64.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded_vec).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_round_trip() {
        let header = basic_auth("alice", "open sesame");
        assert_eq!(header, "Basic YWxpY2U6b3BlbiBzZXNhbWU=");
        assert_eq!(
            parse_basic_auth(&header),
            Some(("alice".to_string(), "open sesame".to_string()))
        );
    }

    #[test]
    fn test_basic_auth_empty_password() {
        let header = basic_auth("alice", "");
        assert_eq!(parse_basic_auth(&header), Some(("alice".to_string(), String::new())));
    }

    #[test]
    fn test_basic_auth_no_line_breaks() {
        // Long userinfo must not produce CR or LF in the header value.
        let long_user = "u".repeat(300);
        let long_pass = "p".repeat(300);
        let header = basic_auth(&long_user, &long_pass);
        assert!(!header.contains('\r'));
        assert!(!header.contains('\n'));
    }
}
