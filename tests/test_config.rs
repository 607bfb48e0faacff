use std::time::Duration;

use plow::config::{Config, ServerConfig, TransportConfig, DEFAULT_MAX_MESSAGE_SIZE};

#[test]
fn test_config_defaults() {
    let cfg = Config::default();

    assert_eq!(cfg.listen_addr, "127.0.0.1:8080");
    assert_eq!(cfg.server.server_name, "plow");
    assert_eq!(cfg.server.read_line_max_length, 4096);
    assert_eq!(cfg.server.head_max_length, 8192);
    assert!(!cfg.server.disable_keep_alive);
    assert!(cfg.transport.proxy.is_none());
    assert!(!cfg.upgrader.enable_compression);
}

#[test]
fn test_config_listen_override_from_env() {
    unsafe {
        std::env::remove_var("PLOW_CONFIG");
        std::env::set_var("PLOW_LISTEN", "0.0.0.0:3000");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.listen_addr, "0.0.0.0:3000");
    unsafe {
        std::env::remove_var("PLOW_LISTEN");
    }
}

#[test]
fn test_config_partial_yaml_keeps_defaults() {
    let cfg = Config::from_yaml(
        "listen_addr: 127.0.0.1:9000\nserver:\n  server_name: edge\n  read_timeout: 2500\n",
    )
    .unwrap();

    assert_eq!(cfg.listen_addr, "127.0.0.1:9000");
    assert_eq!(cfg.server.server_name, "edge");
    assert_eq!(cfg.server.read_timeout, Some(Duration::from_millis(2500)));
    assert_eq!(cfg.server.head_max_length, ServerConfig::default().head_max_length);
    assert_eq!(cfg.transport, TransportConfig::default());
}

#[test]
fn test_config_transport_section() {
    let cfg = Config::from_yaml(
        "transport:\n  proxy: socks5://127.0.0.1:1080\n  proxy_dial_timeout: 0\n  max_body_size: 1024\n",
    )
    .unwrap();

    assert_eq!(cfg.transport.proxy.as_deref(), Some("socks5://127.0.0.1:1080"));
    assert_eq!(cfg.transport.proxy_dial_timeout, None);
    assert_eq!(cfg.transport.max_body_size, 1024);
}

#[test]
fn test_config_upgrader_section() {
    let cfg = Config::from_yaml("upgrader:\n  enable_compression: true\n  max_frame_size: 65536\n")
        .unwrap();

    assert!(cfg.upgrader.enable_compression);
    assert_eq!(cfg.upgrader.max_frame_size, 65536);
    assert_eq!(cfg.upgrader.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
}

#[test]
fn test_config_rejects_bad_yaml() {
    assert!(Config::from_yaml("server: [not, a, map]").is_err());
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::default();
    let cfg2 = cfg1.clone();
    assert_eq!(cfg1.listen_addr, cfg2.listen_addr);
    assert_eq!(cfg1.server, cfg2.server);
}
