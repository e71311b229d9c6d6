use assert_cmd::prelude::*;
use color_eyre::Result;
use std::process::Command;

#[test]
fn test_generate_hardware_prints_json() -> Result<()> {
    let output = Command::cargo_bin("tackle")?
        .args(["generate", "hardware", "--name", "node-7", "--interfaces", "2"])
        .output()?;
    assert!(
        output.status.success(),
        "generate hardware failed. Stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let hardware: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(hardware["kind"], "Hardware");
    assert_eq!(hardware["apiVersion"], "tinkerbell.org/v1alpha1");
    assert_eq!(hardware["metadata"]["name"], "node-7");

    let interfaces = hardware["spec"]["interfaces"]
        .as_array()
        .expect("interfaces array");
    assert_eq!(interfaces.len(), 2);
    assert_eq!(interfaces[0]["dhcp"]["ip"]["gateway"], "192.0.2.1");
    assert_eq!(interfaces[1]["dhcp"]["ip"]["gateway"], "198.51.100.1");
    Ok(())
}

#[test]
fn test_generate_template_defaults_to_hello_world() -> Result<()> {
    let output = Command::cargo_bin("tackle")?
        .args(["generate", "template"])
        .output()?;
    assert!(output.status.success());

    let template: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(template["kind"], "Template");
    assert_eq!(template["metadata"]["name"], "hello-world");
    assert!(
        template["spec"]["data"]
            .as_str()
            .unwrap_or_default()
            .contains("hello_world_workflow")
    );
    Ok(())
}

#[test]
fn test_run_completes_seeded_workflows() -> Result<()> {
    let output = Command::cargo_bin("tackle")?
        .args(["run", "--workflows", "2", "--tick-ms", "20"])
        .env_remove("TACKLE_CONFIG")
        .output()?;
    assert!(
        output.status.success(),
        "run failed. Stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2 of 2 workflows completed"), "stdout: {}", stdout);
    Ok(())
}

#[test]
fn test_run_rejects_invalid_config_file() -> Result<()> {
    let path = std::env::temp_dir().join(format!("tackle-invalid-{}.yaml", std::process::id()));
    std::fs::write(&path, "workers: 0\n")?;

    let output = Command::cargo_bin("tackle")?
        .args(["run", "--workflows", "1", "--config"])
        .arg(&path)
        .output()?;
    std::fs::remove_file(&path)?;

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("workers must be at least 1"));
    Ok(())
}
