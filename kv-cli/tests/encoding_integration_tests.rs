use std::io::Cursor;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;

use kvcli::config::ConfigLoad;
use kvcli::session::Session;

/// Integration tests for the REPL's `ENCODE`/`DECODE` commands.

fn test_config(dir: &TempDir) -> ConfigLoad {
    let mut config = ConfigLoad::default();
    config.set_storage_path(dir.path().to_path_buf());
    config
}

#[tokio::test]
async fn test_encode_command_basic() -> Result<()> {
    let dir = TempDir::new()?;
    let running = Arc::new(AtomicBool::new(true));
    let mut session = Session::try_new(test_config(&dir), false, true, running).await?;

    session.handle_reader(Cursor::new("SET test_key hello_world")).await?;

    session.handle_reader(Cursor::new("ENCODE test_key base64")).await?;
    session.handle_reader(Cursor::new("ENCODE test_key hex")).await?;
    session.handle_reader(Cursor::new("ENCODE test_key json")).await?;

    Ok(())
}

#[tokio::test]
async fn test_decode_command_basic() -> Result<()> {
    let dir = TempDir::new()?;
    let running = Arc::new(AtomicBool::new(true));
    let mut session = Session::try_new(test_config(&dir), false, true, running).await?;

    // "Hello World" re-encoded under each format.
    session.handle_reader(Cursor::new("SET encoded_base64 SGVsbG8gV29ybGQ=")).await?;
    session.handle_reader(Cursor::new("SET encoded_hex 48656c6c6f20576f726c64")).await?;
    session.handle_reader(Cursor::new(r#"SET encoded_json "Hello World""#)).await?;

    session.handle_reader(Cursor::new("DECODE encoded_base64 base64")).await?;
    session.handle_reader(Cursor::new("DECODE encoded_hex hex")).await?;
    session.handle_reader(Cursor::new("DECODE encoded_json json")).await?;

    // Auto-detected format, no explicit third token.
    session.handle_reader(Cursor::new("DECODE encoded_base64")).await?;

    Ok(())
}

#[tokio::test]
async fn test_encoding_error_handling() -> Result<()> {
    let dir = TempDir::new()?;
    let running = Arc::new(AtomicBool::new(true));
    let mut session = Session::try_new(test_config(&dir), false, true, running).await?;

    let result = session.handle_reader(Cursor::new("ENCODE")).await;
    assert!(result.is_err());

    let result = session.handle_reader(Cursor::new("ENCODE key1")).await;
    assert!(result.is_err());

    session.handle_reader(Cursor::new("SET test_key test_value")).await?;
    let result = session.handle_reader(Cursor::new("ENCODE test_key invalid_format")).await;
    assert!(result.is_err());

    let result = session.handle_reader(Cursor::new("DECODE non_existent_key")).await;
    assert!(result.is_err());

    session.handle_reader(Cursor::new("SET invalid_base64 not*valid*base64")).await?;
    let result = session.handle_reader(Cursor::new("DECODE invalid_base64 base64")).await;
    assert!(result.is_err());

    Ok(())
}
