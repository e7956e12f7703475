use serde::Deserialize;

/// What the platform intends to do with the instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
  Terminate,
  Stop,
  Hibernate,
  #[serde(other)]
  Other,
}

/// A spot interruption notice.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstanceAction {
  pub action: ActionKind,
  #[serde(default)]
  pub time: Option<String>,
}

impl InstanceAction {
  pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(body)
  }

  /// Whether the notice means the instance is about to disappear.
  pub fn is_termination(&self) -> bool {
    self.action == ActionKind::Terminate
  }
}
