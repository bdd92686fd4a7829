mod common;

use std::sync::Arc;

use serde_json::json;

use plexus_core::capabilities::safety;
use plexus_core::{CapabilityRegistry, Dispatcher, ErrorKind, KernelConfig};

fn dispatcher() -> Dispatcher {
    let registry = CapabilityRegistry::builtin(&KernelConfig::default().capabilities);
    Dispatcher::new(Arc::new(registry))
}

#[tokio::test]
async fn write_file_twice_overwrites_with_same_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/out.txt");
    let args = json!({"path": path.to_str().unwrap(), "content": "same bytes\n"});
    let dispatcher = dispatcher();

    let first = dispatcher.invoke("write_file", &args).await;
    let second = dispatcher.invoke("write_file", &args).await;

    assert!(first.succeeded && second.succeeded);
    assert_eq!(first.payload["bytesWritten"], second.payload["bytesWritten"]);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "same bytes\n");
}

#[tokio::test]
async fn root_delete_is_blocked_before_spawn() {
    assert!(safety::forbidden_command("rm -rf /").is_some());

    let result = dispatcher()
        .invoke("execute_command", &json!({"command": "rm -rf /"}))
        .await;
    assert!(!result.succeeded);
    assert!(result.is_kind(ErrorKind::SafetyBlocked));
    assert_eq!(result.to_envelope()["errorKind"], "safety_blocked");
}

#[cfg(unix)]
#[tokio::test]
async fn blocked_command_never_runs_any_part() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let command = format!("touch {}; dd if=/dev/zero of=/dev/sda bs=1M", marker.display());

    let result = dispatcher()
        .invoke("execute_command", &json!({"command": command}))
        .await;
    assert!(result.is_kind(ErrorKind::SafetyBlocked));
    assert!(!marker.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn shell_success_reports_output_and_elapsed_time() {
    let result = dispatcher()
        .invoke("execute_command", &json!({"command": "echo plexus"}))
        .await;
    assert!(result.succeeded);
    assert_eq!(result.payload["stdout"].as_str().unwrap().trim(), "plexus");
    assert_eq!(result.payload["exitCode"], 0);
    assert!(result.to_envelope().get("executionTime").is_some());
}

#[tokio::test]
async fn system_paths_are_refused() {
    let dispatcher = dispatcher();
    let read = dispatcher
        .invoke("read_file", &json!({"path": "/etc/passwd"}))
        .await;
    assert!(read.is_kind(ErrorKind::SafetyBlocked));

    let write = dispatcher
        .invoke("write_file", &json!({"path": "/usr/local/plexus-test", "content": "x"}))
        .await;
    assert!(write.is_kind(ErrorKind::SafetyBlocked));
}

#[cfg(unix)]
#[tokio::test]
async fn dangling_link_into_denied_directory_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let denied = root.join("denied");
    std::fs::create_dir(&denied).unwrap();
    let link = root.join("link.txt");
    std::os::unix::fs::symlink(denied.join("planted.txt"), &link).unwrap();

    let mut config = KernelConfig::default();
    config.capabilities.extra_denied_paths = vec![denied.clone()];
    let dispatcher = Dispatcher::new(Arc::new(CapabilityRegistry::builtin(&config.capabilities)));

    let direct = dispatcher
        .invoke(
            "write_file",
            &json!({"path": denied.join("direct.txt").to_str().unwrap(), "content": "x"}),
        )
        .await;
    assert!(direct.is_kind(ErrorKind::SafetyBlocked));

    let through_link = dispatcher
        .invoke("write_file", &json!({"path": link.to_str().unwrap(), "content": "x"}))
        .await;
    assert!(through_link.is_kind(ErrorKind::SafetyBlocked));
    assert!(!denied.join("planted.txt").exists());
}

#[tokio::test]
async fn quoted_root_delete_is_blocked() {
    let dispatcher = dispatcher();
    for command in [r#"rm -rf "/""#, "rm -rf '/'"] {
        let result = dispatcher
            .invoke("execute_command", &json!({"command": command}))
            .await;
        assert!(result.is_kind(ErrorKind::SafetyBlocked), "should block: {command}");
    }
}

#[tokio::test]
async fn binary_file_is_not_returned_as_text() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blob.bin");
    std::fs::write(&path, [0xff, 0xfe, 0x00, 0x80]).unwrap();

    let result = dispatcher()
        .invoke("read_file", &json!({"path": path.to_str().unwrap()}))
        .await;
    assert!(!result.succeeded);
    assert!(result.is_kind(ErrorKind::InputValidation));
    assert!(result.error.as_deref().unwrap().contains("not valid UTF-8"));
}

#[tokio::test]
async fn missing_and_mistyped_arguments_are_input_errors() {
    let dispatcher = dispatcher();

    let missing = dispatcher.invoke("write_file", &json!({"path": "/tmp/x"})).await;
    assert!(missing.is_kind(ErrorKind::InputValidation));
    assert_eq!(missing.payload["code"], "missing_argument");

    let mistyped = dispatcher.invoke("read_file", &json!({"path": 42})).await;
    assert_eq!(mistyped.payload["code"], "invalid_argument");
}

#[test]
fn catalog_matches_registered_handlers() {
    let (registry, _spans) = common::registry_with_delay();
    registry.validate().unwrap();
    let catalog = registry.catalog();
    assert_eq!(catalog.len(), registry.len());
    for schema in &catalog {
        assert!(registry.contains(&schema.name));
        for key in &schema.parameters.required {
            assert!(schema.parameters.properties.contains_key(key));
        }
    }
}
