// system-tests/tests/suites/node_es_modules.rs
// ============================================================================
// Module: Node ES Module Tests
// Description: Load ES-module applications through the require shim.
// Purpose: Verify HTTP responses and WebSocket echo for ESM applications.
// Dependencies: system-tests helpers, unit-harness
// ============================================================================

//! ## Overview
//! Loads the `require_shim` fixtures as ES modules and checks the response
//! header, body, and a WebSocket echo on one connection.
//! Invariants:
//! - Node older than 14.16.0 skips every scenario instead of failing it.
//! - One application is loaded per daemon.

use serde::Serialize;
use system_tests::config::SystemTestConfig;
use unit_harness::ApplicationDescriptor;
use unit_harness::Opcode;
use unit_harness::websocket::CLOSE_NORMAL;

use crate::helpers;
use crate::helpers::artifacts::TestReporter;
use crate::helpers::harness::Setup;
use crate::helpers::harness::UnitSandbox;

/// Message echoed by the WebSocket application.
const MESSAGE: &str = "blah";

/// Size that forces the 64-bit length encoding.
const LARGE_MESSAGE_LEN: usize = 70_000;

/// One exchanged frame in the echo transcript.
#[derive(Debug, Serialize)]
struct TranscriptEntry {
    label: &'static str,
    sent_len: usize,
    received_len: usize,
    opcode: u8,
}

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

/// Asserts the plain-text greeting served by the HTTP fixtures.
async fn assert_basic_application(unit: &UnitSandbox) -> Result<(), Box<dyn std::error::Error>> {
    let response = unit.app.get("/").await?;
    assert_eq!(response.status(), 200, "basic status");
    assert_eq!(response.header("Content-Type"), Some("text/plain"), "basic header");
    assert_eq!(response.body_text()?, "Hello World\n", "basic body");
    Ok(())
}

/// Runs the greeting check against one HTTP fixture.
async fn run_basic(
    test_name: &str,
    module_path: &str,
    entry: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let _serial = helpers::harness::serial().await;
    let mut reporter = TestReporter::new(test_name)?;
    let app = ApplicationDescriptor::node_es_module(module_path, entry);
    let Some(unit) = load_app(&mut reporter, &app).await? else {
        return Ok(());
    };

    assert_basic_application(&unit).await?;
    unit.shutdown().await?;

    reporter.pass(vec![format!("{module_path}/{entry} served the greeting")], &[])?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn node_es_modules_require_shim_http() -> Result<(), Box<dyn std::error::Error>> {
    run_basic("node_es_modules_require_shim_http", "require_shim/es_modules_http", "app.mjs").await
}

#[tokio::test(flavor = "multi_thread")]
async fn node_es_modules_require_shim_http_indirect() -> Result<(), Box<dyn std::error::Error>> {
    run_basic(
        "node_es_modules_require_shim_http_indirect",
        "require_shim/es_modules_http_indirect",
        "app.js",
    )
    .await
}

#[tokio::test(flavor = "multi_thread")]
async fn node_es_modules_require_shim_websockets() -> Result<(), Box<dyn std::error::Error>> {
    let _serial = helpers::harness::serial().await;
    let mut reporter = TestReporter::new("node_es_modules_require_shim_websockets")?;
    let app = ApplicationDescriptor::node_es_module("require_shim/es_modules_websocket", "app.mjs");
    let Some(unit) = load_app(&mut reporter, &app).await? else {
        return Ok(());
    };
    let mut transcript = Vec::new();

    let (response, mut sock, _key) = unit.ws.upgrade().await?;
    assert_eq!(response.status(), 101, "upgrade status");

    for label in ["mirror", "mirror 2"] {
        unit.ws.frame_write(&mut sock, Opcode::Text, MESSAGE.as_bytes()).await?;
        let frame = unit.ws.frame_read(&mut sock).await?;
        assert_eq!(frame.opcode, Opcode::Text, "{label} opcode");
        assert_eq!(frame.text()?, MESSAGE, "{label}");
        transcript.push(TranscriptEntry {
            label,
            sent_len: MESSAGE.len(),
            received_len: frame.payload.len(),
            opcode: frame.opcode.as_u8(),
        });
    }

    let large = "x".repeat(LARGE_MESSAGE_LEN);
    unit.ws.frame_write(&mut sock, Opcode::Text, large.as_bytes()).await?;
    let (opcode, echoed) = sock.message_read().await?;
    assert_eq!(opcode, Opcode::Text, "mirror large opcode");
    assert!(echoed == large.as_bytes(), "mirror large");
    transcript.push(TranscriptEntry {
        label: "mirror large",
        sent_len: LARGE_MESSAGE_LEN,
        received_len: echoed.len(),
        opcode: opcode.as_u8(),
    });

    sock.close(CLOSE_NORMAL, "").await?;
    sock.check_close(Some(CLOSE_NORMAL)).await?;
    sock.shutdown().await?;
    unit.shutdown().await?;

    reporter.artifacts().write_json("ws_transcript.json", &transcript)?;
    reporter.pass(
        vec![format!("{} frames echoed on one connection", transcript.len())],
        &["ws_transcript.json"],
    )?;
    Ok(())
}
