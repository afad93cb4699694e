use kagami::KagamiError;
use kagami::executor::{CommandExecutor, CommandSpec, RealCommandExecutor};

#[test]
fn nonexistent_command_is_reported() {
    let executor = RealCommandExecutor;
    let spec = CommandSpec::new("this-command-should-not-exist", Vec::new());

    let result = executor.execute(&spec);

    assert!(result.is_err());
    if let Err(e) = result {
        let msg = format!("{:#}", e);
        assert!(
            msg.contains("command not found: this-command-should-not-exist"),
            "Expected 'command not found' in error, got: {}",
            msg
        );
    }
}

#[test]
fn captured_stdout_is_returned() {
    let executor = RealCommandExecutor;
    let spec = CommandSpec::new("echo", vec!["kagami".to_string()]).capturing();

    let result = executor.execute(&spec).expect("echo should run");
    assert!(result.success());
    assert_eq!(result.stdout_lossy(), "kagami\n");
}

#[test]
fn stdin_is_fed_to_the_child() {
    let executor = RealCommandExecutor;
    let spec = CommandSpec::new("cat", Vec::new())
        .with_stdin("-----BEGIN PGP PUBLIC KEY BLOCK-----\n")
        .capturing();

    let result = executor.execute(&spec).expect("cat should run");
    assert_eq!(result.stdout_lossy(), "-----BEGIN PGP PUBLIC KEY BLOCK-----\n");
}

#[test]
fn working_directory_and_environment_apply() {
    let temp = tempfile::tempdir().unwrap();
    let dir = camino::Utf8PathBuf::from_path_buf(std::fs::canonicalize(temp.path()).unwrap())
        .unwrap();
    let executor = RealCommandExecutor;
    let spec = CommandSpec::new(
        "sh",
        vec!["-c".to_string(), "printf '%s %s' \"$PWD\" \"$KAGAMI_TEST\"".to_string()],
    )
    .with_cwd(dir.clone())
    .with_env("KAGAMI_TEST", "set")
    .capturing();

    let result = executor.execute(&spec).expect("sh should run");
    assert_eq!(result.stdout_lossy(), format!("{} set", dir));
}

#[test]
fn nonzero_exit_becomes_execution_error() {
    let executor = RealCommandExecutor;
    let spec = CommandSpec::new("sh", vec!["-c".to_string(), "exit 3".to_string()]);

    let result = executor.execute(&spec).expect("sh should run");
    assert_eq!(result.code(), Some(3));

    let err = executor.execute_checked(&spec).unwrap_err();
    let typed = err.downcast_ref::<KagamiError>();
    assert!(
        matches!(typed, Some(KagamiError::Execution { .. })),
        "Expected Execution variant, got: {:?}",
        typed
    );
}
