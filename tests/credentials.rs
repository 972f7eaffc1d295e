use std::fs;

use camino::Utf8PathBuf;

use cheesegrader::credentials::{Credentials, TokenStore};

fn store(dir: &tempfile::TempDir) -> TokenStore {
    let path = Utf8PathBuf::from_path_buf(dir.path().join(".cheesegrader_token")).unwrap();
    TokenStore::with_path(path)
}

#[test]
fn saved_token_loads_back() {
    let temp = tempfile::tempdir().unwrap();
    let store = store(&temp);
    let credentials = Credentials::new(" abc123 ").unwrap();

    store.save(&credentials).unwrap();

    let raw = fs::read_to_string(store.path()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["token"], "abc123");
    assert_eq!(store.load().unwrap(), Some(credentials));
}

#[test]
fn missing_or_garbled_file_loads_as_none() {
    let temp = tempfile::tempdir().unwrap();
    let store = store(&temp);
    assert_eq!(store.load().unwrap(), None);

    fs::write(store.path(), "not json").unwrap();
    assert_eq!(store.load().unwrap(), None);
}

#[test]
fn delete_reports_whether_a_file_existed() {
    let temp = tempfile::tempdir().unwrap();
    let store = store(&temp);
    store.save(&Credentials::new("t").unwrap()).unwrap();

    assert!(store.delete().unwrap());
    assert!(!store.exists());
    assert!(!store.delete().unwrap());
}

#[test]
fn configured_token_file_wins() {
    let temp = tempfile::tempdir().unwrap();
    let config = cheesegrader::config::ResolvedConfig {
        token_file: Some(temp.path().join("custom_token")),
        ..Default::default()
    };

    let store = TokenStore::for_config(&config).unwrap();

    assert_eq!(store.path().as_std_path(), temp.path().join("custom_token"));
}
