//! Human-readable output for `listen`.

use loralink_services::{DisplaySink, ReceivedMessage, SessionEvent};

/// Prints received messages to stdout.
pub struct ConsoleSink;

impl DisplaySink for ConsoleSink {
    fn display(&self, message: &ReceivedMessage) {
        println!(
            "[{} #{}] sq={} dist={}",
            message.origin,
            message.sequence,
            metric(message.signal_quality),
            metric(message.distance),
        );
        for line in message.text.lines() {
            println!("  {line}");
        }
    }
}

fn metric(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "?".into())
}

/// One-line summary of the events the console sink does not already print.
pub fn describe(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::MessageReceived(_) => None,
        SessionEvent::FileReceived(f) => Some(format!(
            "[{} #{}] file saved: {} ({} bytes, {:?})",
            f.origin,
            f.sequence,
            f.path.display(),
            f.bytes,
            f.kind
        )),
        SessionEvent::TransferExpired {
            origin,
            sequence,
            received,
            total,
            ..
        } => Some(format!(
            "[{origin} #{sequence}] transfer expired with {received}/{total} fragments"
        )),
        SessionEvent::DecodeFailed {
            origin,
            sequence,
            error,
        } => Some(format!("[{origin} #{sequence}] transfer corrupt: {error}")),
        SessionEvent::DispatchFailed {
            origin,
            sequence,
            error,
        } => Some(format!("[{origin} #{sequence}] could not store payload: {error}")),
        SessionEvent::ChannelClosed { reason } => Some(format!("channel closed: {reason}")),
    }
}
