use super::*;

#[test]
fn ws_url_maps_http_to_ws() {
    let config = SyncConfig {
        base_url: "http://localhost:3000".to_owned(),
        ..SyncConfig::default()
    };
    assert_eq!(config.ws_url().expect("url"), "ws://localhost:3000/api/ws");
}

#[test]
fn ws_url_maps_https_to_wss_and_trims_trailing_slash() {
    let config = SyncConfig {
        base_url: "https://rooms.example.com/".to_owned(),
        ..SyncConfig::default()
    };
    assert_eq!(
        config.ws_url().expect("url"),
        "wss://rooms.example.com/api/ws"
    );
}

#[test]
fn ws_url_rejects_unknown_scheme() {
    let config = SyncConfig {
        base_url: "ftp://rooms.example.com".to_owned(),
        ..SyncConfig::default()
    };
    assert!(matches!(config.ws_url(), Err(SyncError::InvalidBaseUrl(_))));
}

#[test]
fn closure_credential_source_is_fetched_per_call() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    static CALLS: AtomicUsize = AtomicUsize::new(0);
    let source = || {
        CALLS.fetch_add(1, Ordering::SeqCst);
        Some("tok".to_owned())
    };

    assert_eq!(CredentialSource::token(&source).as_deref(), Some("tok"));
    assert_eq!(CredentialSource::token(&source).as_deref(), Some("tok"));
    assert_eq!(CALLS.load(Ordering::SeqCst), 2);
}

#[test]
fn static_credential_debug_hides_token() {
    let source = StaticCredential("sq-secret".to_owned());
    assert_eq!(format!("{source:?}"), "StaticCredential(..)");
    assert_eq!(source.token().as_deref(), "sq-secret".into());
}
