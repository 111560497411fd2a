//! Utility functions for the lobby service

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use uuid::Uuid;

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Generate a new unique socket/session id
pub fn generate_socket_id() -> String {
    Uuid::new_v4().to_string()
}

/// Random password of 6 bytes, base64url encoded (8 characters)
pub fn generate_password() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE.encode(bytes)
}

/// Room that every viewer of a lobby is subscribed to
pub fn public_room(lobby_id: u64) -> String {
    format!("{}_public", lobby_id)
}

/// Room that only occupants of a lobby are subscribed to
pub fn private_room(lobby_id: u64) -> String {
    format!("{}_private", lobby_id)
}

/// Check for an `address:port` pair with a non-empty address and numeric port
pub fn is_valid_server_address(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty() && !port.is_empty() && port.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Extract the group name from a `steamcommunity.com/groups/<name>` URL
pub fn parse_steam_group(url: &str) -> Option<String> {
    const MARKER: &str = "steamcommunity.com/groups/";
    let start = url.find(MARKER)? + MARKER.len();
    let name = url[start..].trim_end_matches('/');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Host part of an `address:port` string
pub fn host_of(address: &str) -> &str {
    address
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_password() {
        let a = generate_password();
        let b = generate_password();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_rooms() {
        assert_eq!(public_room(12), "12_public");
        assert_eq!(private_room(12), "12_private");
    }

    #[test]
    fn test_server_address_validation() {
        assert!(is_valid_server_address("192.168.0.1:27015"));
        assert!(is_valid_server_address("tf.example.com:27015"));
        assert!(!is_valid_server_address("192.168.0.1"));
        assert!(!is_valid_server_address(":27015"));
        assert!(!is_valid_server_address("host:port"));
    }

    #[test]
    fn test_parse_steam_group() {
        assert_eq!(
            parse_steam_group("https://steamcommunity.com/groups/tf2stadium"),
            Some("tf2stadium".to_string())
        );
        assert_eq!(
            parse_steam_group("steamcommunity.com/groups/mix/"),
            Some("mix".to_string())
        );
        assert_eq!(parse_steam_group("https://example.com/groups/x"), None);
        assert_eq!(parse_steam_group("steamcommunity.com/groups/"), None);
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("10.0.0.1:27015"), "10.0.0.1");
        assert_eq!(host_of("10.0.0.1"), "10.0.0.1");
    }
}
