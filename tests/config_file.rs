use std::fs;
use std::path::Path;

use bond_sync_client::bond::BondId;
use bond_sync_client::config::ClientConfig;
use bond_sync_client::network::NetworkId;
use tempfile::tempdir;

#[test]
fn bundled_example_config_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/client.example.toml");
    let config = ClientConfig::load(&path).expect("example config");
    assert_eq!(config.network.default_network, NetworkId::TargetChain);
    assert_eq!(config.bonds.enabled, vec![BondId::Mim]);
    assert_eq!(config.logging.filter, "info,bond_sync_client=debug");
}

#[test]
fn loading_reports_the_offending_file() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("client.toml");
    let example = fs::read_to_string(
        Path::new(env!("CARGO_MANIFEST_DIR")).join("config/client.example.toml"),
    )
    .expect("read example");
    fs::write(&path, example.replace("[sync]", "[sync]\nretries = 3")).expect("write config");

    let err = ClientConfig::load(&path).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("client.toml"), "{message}");
    assert!(message.contains("sync.retries"), "{message}");
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempdir().expect("tempdir");
    let err = ClientConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("unable to read client config"));
}
