// system-tests/tests/suites/python_targets.rs
// ============================================================================
// Module: Python Target Tests
// Description: Route requests to named callables of one Python application.
// Purpose: Verify target dispatch and prefix handling of SCRIPT_NAME/PATH_INFO.
// Dependencies: system-tests helpers, unit-harness
// ============================================================================

//! ## Overview
//! One Python application exposes several targets; routes pick a target per
//! request. The prefix scenario checks that a target's `prefix` moves the
//! matching part of the path into `SCRIPT_NAME`.

use serde_json::json;
use system_tests::config::SystemTestConfig;
use unit_harness::ApplicationDescriptor;
use unit_harness::PythonTarget;

use crate::helpers;
use crate::helpers::artifacts::TestReporter;
use crate::helpers::harness::Setup;
use crate::helpers::harness::UnitSandbox;

/// Starts the daemon and loads `app`; `None` means the reporter recorded a skip.
async fn load_app(
    reporter: &mut TestReporter,
    app: &ApplicationDescriptor,
) -> Result<Option<UnitSandbox>, Box<dyn std::error::Error>> {
    let config = SystemTestConfig::load()?;
    let mut unit = match helpers::harness::start_unit(&config).await? {
        Setup::Ready(unit) => unit,
        Setup::Skip(reason) => {
            reporter.skip(&reason)?;
            return Ok(None);
        }
    };
    if let Setup::Skip(reason) = unit.load(app).await? {
        reporter.skip(&reason)?;
        return Ok(None);
    }
    Ok(Some(unit))
}

/// Asserts a `200` response with `body` for `path`.
async fn check_body(
    unit: &UnitSandbox,
    path: &str,
    body: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = unit.app.get(path).await?;
    assert_eq!(response.status(), 200, "status for {path}");
    assert_eq!(response.body_text()?, body, "body for {path}");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn python_targets() -> Result<(), Box<dyn std::error::Error>> {
    let _serial = helpers::harness::serial().await;
    let mut reporter = TestReporter::new("python_targets")?;
    let app = ApplicationDescriptor::python("targets", "wsgi")
        .with_target(PythonTarget::new("1", "wsgi", "wsgi_target_a"))
        .with_target(PythonTarget::new("2", "wsgi", "wsgi_target_b"));
    let Some(unit) = load_app(&mut reporter, &app).await? else {
        return Ok(());
    };

    check_body(&unit, "/1", "1").await?;
    check_body(&unit, "/2", "2").await?;
    unit.shutdown().await?;

    reporter.pass(vec!["routes /1 and /2 reached their targets".to_string()], &[])?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn python_targets_prefix() -> Result<(), Box<dyn std::error::Error>> {
    let _serial = helpers::harness::serial().await;
    let mut reporter = TestReporter::new("python_targets_prefix")?;
    let app = ApplicationDescriptor::python("targets", "wsgi")
        .with_protocol("wsgi")
        .with_target(PythonTarget::new("app", "wsgi", "wsgi_target_prefix").with_prefix("/app/"))
        .with_target(PythonTarget::new("catchall", "wsgi", "wsgi_target_prefix").with_prefix("/api"));
    let Some(unit) = load_app(&mut reporter, &app).await? else {
        return Ok(());
    };

    let routes = json!([
        {"match": {"uri": ["/app*"]}, "action": {"pass": app.pass(Some("app"))}},
        {"match": {"uri": "*"}, "action": {"pass": app.pass(Some("catchall"))}}
    ]);
    let reply = unit.app.conf(&routes, "/routes").await?;
    assert!(reply.get("success").is_some(), "routes accepted");

    let cases = [
        ("/app", "/app "),
        ("/app/", "/app /"),
        ("/app/rest/user/", "/app /rest/user/"),
        ("/catchall", "No Script Name /catchall"),
        ("/api", "/api "),
        ("/api/", "/api /"),
        ("/apis", "No Script Name /apis"),
        ("/api/users/", "/api /users/"),
    ];
    for (path, body) in cases {
        check_body(&unit, path, body).await?;
    }
    unit.shutdown().await?;

    reporter.pass(vec![format!("{} prefixed paths split as expected", cases.len())], &[])?;
    Ok(())
}
