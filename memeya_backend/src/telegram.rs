//! Telegram bridge for operator commands.
//!
//! When a bot token is configured, spawns a long-polling task that:
//! - Forwards each incoming message to the agent's operator queue.
//! - Waits for the agent's reply and sends it back to the same chat.
//!
//! Set `TELEGRAM_CHAT_ID` to restrict the bot to a single authorized chat.

use flume::Sender;
use serde::Deserialize;
use tokio::time::Duration;

use crate::agent::OperatorMessage;
use crate::config::AgentConfig;
use crate::http_client::build_http_client_with_timeout;

/// Telegram enforces a 4096-character limit per message.
const MAX_MESSAGE_CHARS: usize = 4096;
const LONG_POLL_SECS: u64 = 30;
/// Code generation with backoff can take minutes.
const REPLY_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
}

#[derive(Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TelegramMessage>,
}

#[derive(Deserialize)]
struct TelegramMessage {
    chat: TelegramChat,
    text: Option<String>,
}

#[derive(Deserialize)]
struct TelegramChat {
    id: i64,
}

/// Spawn the bridge if a bot token is configured. No-op otherwise.
pub fn spawn_telegram_bridge(config: &AgentConfig, operator_tx: Sender<OperatorMessage>) {
    let token = match config.telegram_bot_token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => token.to_string(),
        _ => {
            tracing::info!("Telegram bridge disabled (no bot token)");
            return;
        }
    };
    let allowed_chat_id = config.telegram_chat_id;

    tokio::spawn(async move {
        tracing::info!(
            "Telegram bridge active (allowed_chat_id: {:?})",
            allowed_chat_id
        );
        run_bridge(token, allowed_chat_id, operator_tx).await;
    });
}

async fn run_bridge(token: String, allowed_chat_id: Option<i64>, operator_tx: Sender<OperatorMessage>) {
    let api_base = format!("https://api.telegram.org/bot{}", token);
    // The long poll itself holds the request open for LONG_POLL_SECS.
    let client = match build_http_client_with_timeout(Some(Duration::from_secs(LONG_POLL_SECS + 15))) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("Telegram: failed to build HTTP client: {}", e);
            return;
        }
    };
    let mut offset: i64 = 0;

    loop {
        let Some(updates) = poll_updates(&client, &api_base, offset).await else {
            continue;
        };

        for update in updates {
            offset = update.update_id + 1;

            let Some(message) = update.message else {
                continue;
            };
            let chat_id = message.chat.id;

            if !is_authorized(chat_id, allowed_chat_id) {
                tracing::debug!("Telegram: ignoring message from unauthorized chat {}", chat_id);
                continue;
            }

            let text = match message.text {
                Some(text) if !text.trim().is_empty() => text.trim().to_string(),
                _ => continue,
            };

            tracing::info!("Telegram [chat {}]: {:?}", chat_id, text);

            let (operator_message, reply_rx) = OperatorMessage::with_reply(text);
            if operator_tx.send_async(operator_message).await.is_err() {
                tracing::error!("Telegram: agent queue closed, stopping bridge");
                return;
            }

            match tokio::time::timeout(REPLY_TIMEOUT, reply_rx).await {
                Ok(Ok(reply)) if !reply.trim().is_empty() => {
                    send_message(&client, &api_base, chat_id, &reply).await;
                }
                Ok(Ok(_)) => {}
                Ok(Err(_)) => tracing::warn!("Telegram: agent dropped the reply"),
                Err(_) => tracing::warn!("Telegram: timed out waiting for reply"),
            }
        }
    }
}

fn is_authorized(chat_id: i64, allowed_chat_id: Option<i64>) -> bool {
    allowed_chat_id.map(|allowed| allowed == chat_id).unwrap_or(true)
}

async fn poll_updates(client: &reqwest::Client, api_base: &str, offset: i64) -> Option<Vec<Update>> {
    let url = format!("{}/getUpdates", api_base);
    let params = serde_json::json!({
        "offset": offset,
        "timeout": LONG_POLL_SECS,
        "allowed_updates": ["message"]
    });

    let resp = match client.post(&url).json(&params).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Telegram getUpdates error: {}", e);
            tokio::time::sleep(Duration::from_secs(5)).await;
            return None;
        }
    };

    let body: TelegramResponse<Vec<Update>> = match resp.json().await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!("Telegram getUpdates parse error: {}", e);
            tokio::time::sleep(Duration::from_secs(5)).await;
            return None;
        }
    };

    if !body.ok {
        tracing::warn!("Telegram API returned ok=false");
        tokio::time::sleep(Duration::from_secs(10)).await;
        return None;
    }

    Some(body.result.unwrap_or_default())
}

async fn send_message(client: &reqwest::Client, api_base: &str, chat_id: i64, text: &str) {
    let url = format!("{}/sendMessage", api_base);

    for chunk in split_message(text, MAX_MESSAGE_CHARS) {
        let payload = serde_json::json!({ "chat_id": chat_id, "text": chunk });
        match client.post(&url).json(&payload).send().await {
            Ok(r) if r.status().is_success() => {
                tracing::debug!("Telegram: sent reply to chat {}", chat_id);
            }
            Ok(r) => {
                tracing::warn!("Telegram sendMessage failed: HTTP {}", r.status());
                return;
            }
            Err(e) => {
                tracing::error!("Telegram sendMessage error: {}", e);
                return;
            }
        }
    }
}

/// Split on character (not byte) boundaries into chunks of at most `max_chars`.
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_keeps_multibyte_chars_intact() {
        let text = "日本語".repeat(3);
        let chunks = split_message(&text, 4);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
        assert_eq!(split_message("short", MAX_MESSAGE_CHARS), vec!["short".to_string()]);
    }

    #[test]
    fn authorization_is_open_without_chat_id() {
        assert!(is_authorized(42, None));
        assert!(is_authorized(42, Some(42)));
        assert!(!is_authorized(7, Some(42)));
    }

    #[test]
    fn parses_update_payload() {
        let raw = r##"{"ok":true,"result":[{"update_id":10,"message":{"chat":{"id":5},"text":"#status"}},{"update_id":11}]}"##;
        let parsed: TelegramResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        let updates = parsed.result.unwrap();
        assert_eq!(updates.len(), 2);
        let message = updates[0].message.as_ref().unwrap();
        assert_eq!(message.chat.id, 5);
        assert_eq!(message.text.as_deref(), Some("#status"));
        assert!(updates[1].message.is_none());
    }
}
