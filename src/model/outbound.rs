use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl KeyboardButton {
    pub fn callback(text: &str, data: String) -> Self {
        Self { text: text.to_string(), callback_data: Some(data), url: None }
    }

    pub fn link(text: &str, url: String) -> Self {
        Self { text: text.to_string(), callback_data: None, url: Some(url) }
    }
}

/// Telegram inline keyboard，按行排列。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Keyboard {
    pub inline_keyboard: Vec<Vec<KeyboardButton>>,
}

/// 一条待发送的通知。延迟发送模式下会被序列化进 `send_queue`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub target: String,
    pub text: String,
    #[serde(default)]
    pub keyboard: Option<Keyboard>,
}

impl OutboundMessage {
    pub fn text(target: &str, text: impl Into<String>) -> Self {
        Self { target: target.to_string(), text: text.into(), keyboard: None }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}
