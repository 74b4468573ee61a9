use serde::Serialize;

use crate::config::NotificationConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// A user notification rendered from a push payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub actions: Vec<NotificationAction>,
}

pub const EXPLORE_ACTION: &str = "explore";
pub const CLOSE_ACTION: &str = "close";

impl Notification {
  /// Render a push payload, falling back to the configured body when it is empty.
  pub fn from_push(config: &NotificationConfig, body: Option<&str>) -> Self {
    let body = body
      .map(str::trim)
      .filter(|b| !b.is_empty())
      .unwrap_or(config.default_body.as_str());

    Self {
      title: config.title.clone(),
      body: body.to_string(),
      icon: config.icon.clone(),
      actions: vec![
        NotificationAction {
          action: EXPLORE_ACTION.to_string(),
          title: "Explore".to_string(),
        },
        NotificationAction {
          action: CLOSE_ACTION.to_string(),
          title: "Close".to_string(),
        },
      ],
    }
  }
}
