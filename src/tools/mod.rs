//! Function calling for the live session
//!
//! The model may request any of a closed set of local actions. Requests are
//! parsed into a typed [`ToolCall`] and executed by the [`ToolDispatcher`];
//! every request yields exactly one [`ToolCallResult`].

mod actions;
mod executor;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{Error, Result};

pub use actions::{Actions, SystemActions, describe_delay};
pub use executor::ToolDispatcher;

/// Default alarm label when the model omits one
pub const DEFAULT_ALARM_LABEL: &str = "Alarm";

/// Names of the tools the model can call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    SearchWeb,
    PlaySongOnYoutube,
    SetAlarm,
    GetCurrentTime,
    TellJoke,
}

impl ToolName {
    /// Every known tool, in declaration order
    pub const ALL: [Self; 5] = [
        Self::SearchWeb,
        Self::PlaySongOnYoutube,
        Self::SetAlarm,
        Self::GetCurrentTime,
        Self::TellJoke,
    ];

    /// Wire name used in declarations and calls
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SearchWeb => "searchWeb",
            Self::PlaySongOnYoutube => "playSongOnYoutube",
            Self::SetAlarm => "setAlarm",
            Self::GetCurrentTime => "getCurrentTime",
            Self::TellJoke => "tellJoke",
        }
    }

    /// Look up a tool by wire name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Function declaration advertised to the model at session open
    #[must_use]
    pub fn declaration(self) -> Value {
        match self {
            Self::SearchWeb => json!({
                "name": self.as_str(),
                "description": "Searches the web for a given query and opens the results in a new tab. Use this when the user explicitly asks to \"open\" a search or see results.",
                "parameters": {
                    "type": "OBJECT",
                    "properties": {
                        "query": { "type": "STRING", "description": "The search query" }
                    },
                    "required": ["query"]
                }
            }),
            Self::PlaySongOnYoutube => json!({
                "name": self.as_str(),
                "description": "Searches for a song or video on YouTube and opens it in a new tab.",
                "parameters": {
                    "type": "OBJECT",
                    "properties": {
                        "query": { "type": "STRING", "description": "The song or artist to search for" }
                    },
                    "required": ["query"]
                }
            }),
            Self::SetAlarm => json!({
                "name": self.as_str(),
                "description": "Sets an alarm or timer.",
                "parameters": {
                    "type": "OBJECT",
                    "properties": {
                        "delayInSeconds": { "type": "NUMBER", "description": "The delay in seconds until the alarm goes off." },
                        "label": { "type": "STRING", "description": "A label for the alarm." }
                    },
                    "required": ["delayInSeconds"]
                }
            }),
            Self::GetCurrentTime => json!({
                "name": self.as_str(),
                "description": "Gets the current time."
            }),
            Self::TellJoke => json!({
                "name": self.as_str(),
                "description": "Tells a random joke."
            }),
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarations for the enabled tools
#[must_use]
pub fn tool_declarations(tools: &[ToolName]) -> Vec<Value> {
    tools.iter().map(|t| t.declaration()).collect()
}

/// Function call requested by the model
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCallRequest {
    /// Correlation id echoed back in the result
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Result returned to the model for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallResult {
    pub id: String,
    pub name: String,
    pub result: String,
}

#[derive(Debug, Deserialize)]
struct QueryArgs {
    query: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlarmArgs {
    delay_in_seconds: f64,
    #[serde(default)]
    label: Option<String>,
}

/// A parsed tool call with typed arguments
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    SearchWeb { query: String },
    PlaySongOnYoutube { query: String },
    SetAlarm { delay_in_seconds: f64, label: String },
    GetCurrentTime,
    TellJoke,
}

impl ToolCall {
    /// Parse the arguments of a known tool
    ///
    /// # Errors
    ///
    /// Returns `Error::Tool` if a required argument is missing or mistyped
    pub fn parse(tool: ToolName, args: &Map<String, Value>) -> Result<Self> {
        let args = Value::Object(args.clone());
        let invalid = |e: serde_json::Error| Error::Tool(format!("invalid arguments for {tool}: {e}"));

        Ok(match tool {
            ToolName::SearchWeb => {
                let a: QueryArgs = serde_json::from_value(args).map_err(invalid)?;
                Self::SearchWeb { query: a.query }
            }
            ToolName::PlaySongOnYoutube => {
                let a: QueryArgs = serde_json::from_value(args).map_err(invalid)?;
                Self::PlaySongOnYoutube { query: a.query }
            }
            ToolName::SetAlarm => {
                let a: AlarmArgs = serde_json::from_value(args).map_err(invalid)?;
                Self::SetAlarm {
                    delay_in_seconds: a.delay_in_seconds,
                    label: a
                        .label
                        .filter(|l| !l.trim().is_empty())
                        .unwrap_or_else(|| DEFAULT_ALARM_LABEL.to_string()),
                }
            }
            ToolName::GetCurrentTime => Self::GetCurrentTime,
            ToolName::TellJoke => Self::TellJoke,
        })
    }

    /// Which tool this call targets
    #[must_use]
    pub const fn name(&self) -> ToolName {
        match self {
            Self::SearchWeb { .. } => ToolName::SearchWeb,
            Self::PlaySongOnYoutube { .. } => ToolName::PlaySongOnYoutube,
            Self::SetAlarm { .. } => ToolName::SetAlarm,
            Self::GetCurrentTime => ToolName::GetCurrentTime,
            Self::TellJoke => ToolName::TellJoke,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_name_round_trip() {
        for tool in ToolName::ALL {
            assert_eq!(ToolName::from_name(tool.as_str()), Some(tool));
        }
        assert_eq!(ToolName::from_name("foo"), None);
        assert_eq!(ToolName::from_name("searchweb"), None);
    }

    #[test]
    fn test_parse_alarm_defaults_label() {
        let call = ToolCall::parse(ToolName::SetAlarm, &args(json!({ "delayInSeconds": 90 }))).unwrap();
        assert_eq!(
            call,
            ToolCall::SetAlarm {
                delay_in_seconds: 90.0,
                label: "Alarm".to_string()
            }
        );
    }

    #[test]
    fn test_parse_missing_query_fails() {
        let err = ToolCall::parse(ToolName::SearchWeb, &Map::new()).unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
        assert!(err.to_string().contains("searchWeb"));
    }

    #[test]
    fn test_declarations_cover_enabled_tools() {
        let decls = tool_declarations(&[ToolName::SetAlarm, ToolName::TellJoke]);
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0]["name"], "setAlarm");
        assert_eq!(decls[0]["parameters"]["required"][0], "delayInSeconds");
        assert!(decls[1].get("parameters").is_none());
    }

    #[test]
    fn test_request_deserializes_without_args() {
        let req: ToolCallRequest =
            serde_json::from_value(json!({ "id": "c1", "name": "tellJoke" })).unwrap();
        assert_eq!(req.id, "c1");
        assert!(req.args.is_empty());
    }
}
