use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use svcboot_models::{BootstrapError, Config, Recipe};
use svcboot_packaging::{CommandOutput, CommandRunner, Provisioner};

/// Records every command and fails the ones whose command line contains a
/// configured marker.
struct FakeRunner {
    calls: Mutex<Vec<String>>,
    fail_on: Vec<String>,
}

impl FakeRunner {
    fn new(fail_on: &[&str]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on: fail_on.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        cwd: &Path,
        program: &str,
        args: &[&str],
    ) -> anyhow::Result<CommandOutput> {
        // A real spawn fails outright when the working directory does not
        // exist, so treat that as a hard error here too.
        assert!(
            cwd.is_dir(),
            "command dispatched with missing cwd {}",
            cwd.display()
        );
        let line = format!("{} {}", program, args.join(" "));
        self.calls.lock().unwrap().push(line.clone());
        if self.fail_on.iter().any(|marker| line.contains(marker)) {
            Ok(CommandOutput {
                exit_code: Some(1),
                stderr: format!("simulated failure: {line}"),
            })
        } else {
            Ok(CommandOutput {
                exit_code: Some(0),
                stderr: String::new(),
            })
        }
    }
}

fn fixture_source(with_scripts: bool) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("app")).unwrap();
    std::fs::write(dir.path().join("app/main.py"), "app = object()").unwrap();
    std::fs::write(dir.path().join("pyproject.toml"), "[project]\nname = \"app\"").unwrap();
    if with_scripts {
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/migrate.sh"), "#!/bin/sh\n").unwrap();
        std::fs::write(dir.path().join("bin/notes.txt"), "not a script").unwrap();
    }
    dir
}

fn provisioner(runner: FakeRunner, source: &Path, target: &Path) -> Provisioner<FakeRunner> {
    Provisioner::new(runner, source.to_path_buf(), target.to_path_buf())
}

#[tokio::test]
async fn commands_run_in_contract_order() {
    let source = fixture_source(true);
    let target = tempfile::tempdir().unwrap();
    let p = provisioner(FakeRunner::new(&[]), source.path(), target.path());
    p.apply(&Recipe::for_config(&Config::default()))
        .await
        .unwrap();

    let calls = p.runner().calls();
    let calls: Vec<&str> = calls.iter().map(String::as_str).collect();
    assert_eq!(
        calls,
        vec![
            "apt-get update",
            "apt-get install -y git",
            "pip install --upgrade pip",
            "pip install --no-cache-dir .",
            "fc-cache -f -v",
        ]
    );
}

fn p_calls(p: &Provisioner<FakeRunner>) -> Vec<String> {
    p.runner().calls()
}

#[tokio::test]
async fn fallback_never_runs_when_primary_succeeds() {
    let source = fixture_source(false);
    let target = tempfile::tempdir().unwrap();
    let p = provisioner(FakeRunner::new(&[]), source.path(), target.path());
    p.apply(&Recipe::for_config(&Config::default()))
        .await
        .unwrap();

    let legacy_calls = p_calls(&p)
        .iter()
        .filter(|c| c.contains("legacy-resolver"))
        .count();
    assert_eq!(legacy_calls, 0);
}

#[tokio::test]
async fn fallback_runs_exactly_once_after_primary_failure() {
    let source = fixture_source(false);
    let target = tempfile::tempdir().unwrap();
    // Fail the plain install, let the legacy-resolver retry succeed.
    let p = Provisioner::new(
        FailPrimaryRunner::new(FakeRunner::new(&[])),
        source.path().to_path_buf(),
        target.path().to_path_buf(),
    );
    p.apply(&Recipe::for_config(&Config::default()))
        .await
        .unwrap();

    let calls = p.runner().inner.calls();
    let installs: Vec<&String> = calls
        .iter()
        .filter(|c| c.contains("pip install --no-cache-dir ."))
        .collect();
    assert_eq!(installs.len(), 2);
    assert!(!installs[0].contains("legacy-resolver"));
    assert!(installs[1].contains("--use-deprecated=legacy-resolver"));
}

/// Fails any pip install that does not carry the legacy-resolver flag.
struct FailPrimaryRunner {
    inner: FakeRunner,
}

impl FailPrimaryRunner {
    fn new(inner: FakeRunner) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CommandRunner for FailPrimaryRunner {
    async fn run(
        &self,
        cwd: &Path,
        program: &str,
        args: &[&str],
    ) -> anyhow::Result<CommandOutput> {
        let output = self.inner.run(cwd, program, args).await?;
        let line = format!("{} {}", program, args.join(" "));
        if line.contains("pip install --no-cache-dir .") && !line.contains("legacy-resolver") {
            return Ok(CommandOutput {
                exit_code: Some(1),
                stderr: "ResolutionImpossible".to_string(),
            });
        }
        Ok(output)
    }
}

#[tokio::test]
async fn both_install_failures_surface_combined_error() {
    let source = fixture_source(false);
    let target = tempfile::tempdir().unwrap();
    let p = provisioner(
        FakeRunner::new(&["pip install --no-cache-dir ."]),
        source.path(),
        target.path(),
    );
    let err = p
        .apply(&Recipe::for_config(&Config::default()))
        .await
        .unwrap_err();

    match err {
        BootstrapError::DependencyInstallFailed { primary, fallback } => {
            assert!(primary.contains("simulated failure"));
            assert!(fallback.contains("legacy-resolver"));
        }
        other => panic!("expected DependencyInstallFailed, got {other}"),
    }
    // Nothing after the install may have run.
    assert!(!p_calls(&p).iter().any(|c| c.contains("fc-cache")));
}

#[tokio::test]
async fn failing_step_aborts_the_rest_of_the_pipeline() {
    let source = fixture_source(false);
    let target = tempfile::tempdir().unwrap();
    let p = provisioner(FakeRunner::new(&["apt-get update"]), source.path(), target.path());
    let err = p
        .apply(&Recipe::for_config(&Config::default()))
        .await
        .unwrap_err();

    assert!(matches!(err, BootstrapError::StepFailed { .. }));
    assert_eq!(p_calls(&p), vec!["apt-get update".to_string()]);
    // The source tree was never copied.
    assert!(!target.path().join("app/main.py").exists());
}

#[tokio::test]
async fn logs_dir_created_and_scripts_marked_executable() {
    let source = fixture_source(true);
    let target = tempfile::tempdir().unwrap();
    let p = provisioner(FakeRunner::new(&[]), source.path(), target.path());
    p.apply(&Recipe::for_config(&Config::default()))
        .await
        .unwrap();

    let logs = target.path().join("logs");
    assert!(logs.is_dir());
    assert_eq!(std::fs::read_dir(&logs).unwrap().count(), 0);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let script = target.path().join("bin/migrate.sh");
        let mode = std::fs::metadata(&script).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0);
        // Non-matching files are left alone.
        let other = target.path().join("bin/notes.txt");
        let mode = std::fs::metadata(&other).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0);
    }
}

#[tokio::test]
async fn provisions_into_a_not_yet_existing_target() {
    let source = fixture_source(false);
    let scratch = tempfile::tempdir().unwrap();
    let target = scratch.path().join("fresh");
    let p = Provisioner::new(
        FakeRunner::new(&[]),
        source.path().to_path_buf(),
        target.clone(),
    );
    p.apply(&Recipe::for_config(&Config::default()))
        .await
        .unwrap();

    assert!(target.join("app/main.py").exists());
    assert!(target.join("logs").is_dir());
}

#[cfg(unix)]
#[tokio::test]
async fn chmod_adds_only_execute_bits() {
    use std::os::unix::fs::PermissionsExt;

    let source = fixture_source(true);
    std::fs::set_permissions(
        source.path().join("bin/migrate.sh"),
        std::fs::Permissions::from_mode(0o600),
    )
    .unwrap();

    let target = tempfile::tempdir().unwrap();
    let p = provisioner(FakeRunner::new(&[]), source.path(), target.path());
    p.apply(&Recipe::for_config(&Config::default()))
        .await
        .unwrap();

    let mode = std::fs::metadata(target.path().join("bin/migrate.sh"))
        .unwrap()
        .permissions()
        .mode();
    // Execute added everywhere, read/write bits untouched.
    assert_eq!(mode & 0o777, 0o711);
}

#[tokio::test]
async fn missing_script_dir_is_not_an_error() {
    let source = fixture_source(false);
    let target = tempfile::tempdir().unwrap();
    let p = provisioner(FakeRunner::new(&[]), source.path(), target.path());
    let report = p
        .apply(&Recipe::for_config(&Config::default()))
        .await
        .unwrap();
    assert!(!target.path().join("bin").exists());
    assert_eq!(report.declared_port, Some(8500));
}

#[tokio::test]
async fn pre_existing_logs_dir_is_not_an_error() {
    let source = fixture_source(false);
    let target = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(target.path().join("logs")).unwrap();
    let p = provisioner(FakeRunner::new(&[]), source.path(), target.path());
    p.apply(&Recipe::for_config(&Config::default()))
        .await
        .unwrap();
    assert!(target.path().join("logs").is_dir());
}

#[tokio::test]
async fn report_carries_launch_plan_and_env() {
    let source = fixture_source(false);
    let target = tempfile::tempdir().unwrap();
    let p = provisioner(FakeRunner::new(&[]), source.path(), target.path());
    let report = p
        .apply(&Recipe::for_config(&Config::default()))
        .await
        .unwrap();

    assert_eq!(report.launch.program, "uvicorn");
    assert_eq!(
        report.launch.args,
        vec!["app.main:app", "--host", "0.0.0.0", "--port", "8000"]
    );
    assert_eq!(
        report.launch.env,
        vec![
            ("PYTHONPATH".to_string(), "/app".to_string()),
            ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
        ]
    );
    // The declared metadata port is reported as-is, mismatch included.
    assert_eq!(report.declared_port, Some(8500));
}
