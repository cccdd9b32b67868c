use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::bot::ChatProvider;

/// Chat messages are capped well below the provider limit.
const MAX_LEN: usize = 4000;
const FLUSH_AT: usize = 50;

/// Log message with priority.
enum LogMessage {
    /// WARN/ERROR - send immediately
    Urgent(String),
    /// INFO - batched
    Info(String),
}

/// Mirrors this crate's log lines into a chat thread.
pub struct ChatLogLayer {
    tx: mpsc::UnboundedSender<LogMessage>,
}

impl ChatLogLayer {
    pub fn new(provider: Arc<dyn ChatProvider>, thread_id: String) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogMessage>();

        tokio::spawn(async move {
            let mut info_buffer: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(Duration::from_secs(5));

            loop {
                tokio::select! {
                    msg = rx.recv() => {
                        match msg {
                            Some(LogMessage::Urgent(text)) => {
                                send_log(provider.as_ref(), &thread_id, &text).await;
                            }
                            Some(LogMessage::Info(text)) => {
                                info_buffer.push(text);
                                if info_buffer.len() >= FLUSH_AT {
                                    flush_buffer(provider.as_ref(), &thread_id, &mut info_buffer).await;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = interval.tick() => {
                        if !info_buffer.is_empty() {
                            flush_buffer(provider.as_ref(), &thread_id, &mut info_buffer).await;
                        }
                    }
                }
            }
        });

        Self { tx }
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() > MAX_LEN {
        let truncated: String = text.chars().take(MAX_LEN).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

async fn send_log(provider: &dyn ChatProvider, thread_id: &str, text: &str) {
    if let Err(e) = provider.send_message(truncate(text).into(), thread_id, None).await {
        eprintln!("Failed to send log to chat: {e}");
    }
}

async fn flush_buffer(provider: &dyn ChatProvider, thread_id: &str, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let combined = buffer.join("\n");
    buffer.clear();
    send_log(provider, thread_id, &combined).await;
}

/// Only our own events are mirrored, minus the provider module whose
/// failures would otherwise feed back into the log thread.
fn forwarded(target: &str) -> bool {
    target.starts_with(env!("CARGO_CRATE_NAME")) && !target.ends_with("::telegram")
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for ChatLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();
        if level > Level::INFO || !forwarded(metadata.target()) {
            return;
        }

        let mut visitor = MessageVisitor { message: String::new() };
        event.record(&mut visitor);

        let msg = match level {
            Level::ERROR => LogMessage::Urgent(format!("❌ {}", visitor.message)),
            Level::WARN => LogMessage::Urgent(format!("⚠️ {}", visitor.message)),
            _ => LogMessage::Info(visitor.message),
        };

        if self.tx.send(msg).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
