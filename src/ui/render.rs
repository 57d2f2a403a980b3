use crate::common::{Message, MessageBody};

/// One terminal line per message: `[HH:MM] name: body`.
pub fn format_message(message: &Message, storage_bucket: &str) -> String {
    let body = match &message.body {
        MessageBody::Text(text) => text.clone(),
        MessageBody::FileReference(file) => {
            let kind = if file.is_image() { "image" } else { "file" };
            match file.download_url(storage_bucket) {
                Some(url) => format!("[{kind}] {} <{url}>", file.name),
                None => format!("[{kind}] {}", file.name),
            }
        }
    };
    format!(
        "[{}] {}: {}",
        message.local_time_label(),
        message.sender_display_name,
        body
    )
}
