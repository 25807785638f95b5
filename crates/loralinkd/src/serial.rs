//! Serial transport for the modem.

use std::time::Duration;

use loralink_core::LinkError;

/// Open `port` at `baud` and wait `settle` before handing it out. Many modem
/// boards reset when the port opens and drop whatever arrives meanwhile.
#[cfg(feature = "serial")]
pub async fn open(port: &str, baud: u32, settle: Duration) -> Result<tokio_serial::SerialStream, LinkError> {
    use tokio_serial::SerialPortBuilderExt;

    let stream = tokio_serial::new(port, baud)
        .open_native_async()
        .map_err(|e| LinkError::ConnectFailed {
            port: port.to_string(),
            reason: e.to_string(),
        })?;
    tracing::info!(port, baud, settle_ms = settle.as_millis() as u64, "serial port opened");

    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }
    Ok(stream)
}

#[cfg(not(feature = "serial"))]
pub async fn open(port: &str, _baud: u32, _settle: Duration) -> Result<tokio::io::DuplexStream, LinkError> {
    Err(LinkError::ConnectFailed {
        port: port.to_string(),
        reason: "built without the `serial` feature".into(),
    })
}
