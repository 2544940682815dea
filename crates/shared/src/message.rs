use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

pub const NO_NETWORK_TEXT: &str = "No Network Connection";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColorToken(pub String);

impl ColorToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Icon {
    pub name: String,
    pub set: String,
}

impl Icon {
    pub fn new(name: impl Into<String>, set: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            set: set.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    Absolute,
    Relative,
}

/// Button rendered on a notification.
#[derive(Clone)]
pub struct MessageAction {
    pub label: String,
    on_press: Arc<dyn Fn() + Send + Sync>,
}

impl MessageAction {
    pub fn new(label: impl Into<String>, on_press: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            label: label.into(),
            on_press: Arc::new(on_press),
        }
    }

    pub fn press(&self) {
        (self.on_press)()
    }
}

impl fmt::Debug for MessageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageAction")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Notification content. Unset fields fall back to the template the message
/// is merged over; the core never interprets them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct MessageConfig {
    pub title: Option<String>,
    pub message: Option<String>,
    pub auto_dismiss: Option<bool>,
    pub dismiss_on_screen_press: Option<bool>,
    pub disable_screen_touch: Option<bool>,
    pub z_index: Option<i32>,
    pub icon: Option<Icon>,
    pub background_color: Option<ColorToken>,
    pub layout: Option<Layout>,
    #[serde(skip)]
    pub actions: Vec<MessageAction>,
}

impl MessageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn icon(mut self, icon: Icon) -> Self {
        self.icon = Some(icon);
        self
    }

    pub fn action(mut self, action: MessageAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn find_action(&self, label: &str) -> Option<&MessageAction> {
        self.actions.iter().find(|action| action.label == label)
    }
}

/// Overlays every field set in `overrides` onto `base`.
pub fn merge_defaults(base: &MessageConfig, overrides: &MessageConfig) -> MessageConfig {
    MessageConfig {
        title: overrides.title.clone().or_else(|| base.title.clone()),
        message: overrides.message.clone().or_else(|| base.message.clone()),
        auto_dismiss: overrides.auto_dismiss.or(base.auto_dismiss),
        dismiss_on_screen_press: overrides
            .dismiss_on_screen_press
            .or(base.dismiss_on_screen_press),
        disable_screen_touch: overrides.disable_screen_touch.or(base.disable_screen_touch),
        z_index: overrides.z_index.or(base.z_index),
        icon: overrides.icon.clone().or_else(|| base.icon.clone()),
        background_color: overrides
            .background_color
            .clone()
            .or_else(|| base.background_color.clone()),
        layout: overrides.layout.or(base.layout),
        actions: if overrides.actions.is_empty() {
            base.actions.clone()
        } else {
            overrides.actions.clone()
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Theme {
    pub warn: ColorToken,
    pub error: ColorToken,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            warn: ColorToken::new("orange"),
            error: ColorToken::new("red"),
        }
    }
}

/// Default notification templates, resolved against a theme once.
#[derive(Debug, Clone)]
pub struct MessageTemplates {
    pub no_network: MessageConfig,
    pub submitting: MessageConfig,
    pub error: MessageConfig,
}

impl MessageTemplates {
    pub fn from_theme(theme: &Theme) -> Self {
        Self {
            no_network: MessageConfig {
                auto_dismiss: Some(false),
                background_color: Some(theme.warn.clone()),
                z_index: Some(1),
                layout: Some(Layout::Relative),
                message: Some(NO_NETWORK_TEXT.to_string()),
                ..MessageConfig::default()
            },
            submitting: MessageConfig {
                auto_dismiss: Some(false),
                dismiss_on_screen_press: Some(true),
                ..MessageConfig::default()
            },
            error: MessageConfig {
                auto_dismiss: Some(false),
                background_color: Some(theme.error.clone()),
                disable_screen_touch: Some(true),
                z_index: Some(3),
                icon: Some(Icon::new("error-outline", "MaterialIcons")),
                ..MessageConfig::default()
            },
        }
    }
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self::from_theme(&Theme::default())
    }
}
