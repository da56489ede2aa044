use super::*;

// =============================================================================
// Env-driven tests use unique variable names where possible; the shared
// CAMPUSMART_* names are only touched by `gateway_from_env_*`, which restore
// them before returning.
// =============================================================================

/// # Safety
/// Callers must not race other tests on the same variables.
unsafe fn clear_gateway_env() {
    unsafe {
        for var in [
            "CAMPUSMART_AUTH_URL",
            "CAMPUSMART_AUTH_ANON_KEY",
            "CAMPUSMART_API_URL",
            "CAMPUSMART_SITE_URL",
            "CAMPUSMART_REQUEST_TIMEOUT_SECS",
            "CAMPUSMART_CONNECT_TIMEOUT_SECS",
        ] {
            std::env::remove_var(var);
        }
    }
}

#[test]
fn gateway_from_env_requires_auth_url_and_key() {
    unsafe { clear_gateway_env() };
    assert!(matches!(GatewayConfig::from_env(), Err(ConfigError::Missing("CAMPUSMART_AUTH_URL"))));

    unsafe {
        std::env::set_var("CAMPUSMART_AUTH_URL", "https://auth.example.com/");
    }
    assert!(matches!(GatewayConfig::from_env(), Err(ConfigError::Missing("CAMPUSMART_AUTH_ANON_KEY"))));

    unsafe {
        std::env::set_var("CAMPUSMART_AUTH_ANON_KEY", "anon");
        std::env::set_var("CAMPUSMART_REQUEST_TIMEOUT_SECS", "30");
    }
    let config = GatewayConfig::from_env().unwrap();
    assert_eq!(config.auth_url, "https://auth.example.com");
    assert_eq!(config.api_url, DEFAULT_API_URL);
    assert_eq!(config.timeouts.request_secs, 30);
    assert_eq!(config.timeouts.connect_secs, DEFAULT_CONNECT_TIMEOUT_SECS);

    unsafe {
        std::env::set_var("CAMPUSMART_API_URL", "ftp://nope");
    }
    assert!(matches!(GatewayConfig::from_env(), Err(ConfigError::Invalid { var: "CAMPUSMART_API_URL", .. })));

    unsafe { clear_gateway_env() };
}

#[test]
fn validate_url_trims_trailing_slash() {
    assert_eq!(validate_url("X", "http://localhost:4000/api/".into()).unwrap(), "http://localhost:4000/api");
}

#[test]
fn validate_url_rejects_bare_host() {
    assert!(validate_url("X", "localhost:4000".into()).is_err());
}

#[test]
fn env_parse_falls_back_on_garbage() {
    let key = "__TEST_CFG_PARSE_GARBAGE_311__";
    unsafe { std::env::set_var(key, "ten") };
    assert_eq!(env_parse(key, 7_u64), 7);
    unsafe { std::env::remove_var(key) };
}

#[test]
fn env_parse_reads_trimmed_value() {
    let key = "__TEST_CFG_PARSE_OK_312__";
    unsafe { std::env::set_var(key, " 42 ") };
    assert_eq!(env_parse(key, 0_u64), 42);
    unsafe { std::env::remove_var(key) };
}

#[test]
fn env_bool_variants() {
    for (i, (val, expected)) in [("1", Some(true)), ("ON", Some(true)), ("no", Some(false)), ("maybe", None)]
        .iter()
        .enumerate()
    {
        let key = format!("__TEST_CFG_BOOL_{i}__");
        unsafe { std::env::set_var(&key, val) };
        assert_eq!(env_bool(&key), *expected, "{val:?}");
        unsafe { std::env::remove_var(&key) };
    }
}

#[test]
fn default_timeouts() {
    let t = HttpTimeouts::default();
    assert_eq!(t.request_secs, 15);
    assert_eq!(t.connect_secs, 5);
}
