//! Metrics listener address handling.

use microseg_core::config::MetricsConfig;
use microseg_daemon::metrics_server;

fn config(listen_addr: &str, port: u16) -> MetricsConfig {
    MetricsConfig {
        enabled: true,
        listen_addr: listen_addr.to_owned(),
        port,
    }
}

#[test]
fn listen_addr_parses_ipv4() {
    let addr = metrics_server::listen_addr(&config("127.0.0.1", 19100)).unwrap();
    assert_eq!(addr.port(), 19100);
    assert!(addr.ip().is_loopback());
}

#[test]
fn invalid_address_is_rejected_before_install() {
    let result = metrics_server::install_metrics_recorder(&config("999.999.999.999", 9100));
    assert!(result.is_err());
}

#[test]
fn install_succeeds_on_loopback() {
    let result = metrics_server::install_metrics_recorder(&config("127.0.0.1", 19187));
    assert!(
        result.is_ok(),
        "install_metrics_recorder should succeed: {:?}",
        result.err()
    );
}
