//! Tool dispatcher: routes parsed tool calls to local actions

use std::sync::Arc;

use super::{Actions, ToolCall, ToolCallRequest, ToolCallResult, ToolName};
use crate::Result;

/// Executes tool calls against an [`Actions`] implementation
///
/// Dispatch never fails: unknown tools, bad arguments and action errors all
/// become result text for the model.
#[derive(Clone)]
pub struct ToolDispatcher {
    actions: Arc<dyn Actions>,
}

impl ToolDispatcher {
    /// Create a dispatcher over the given actions
    pub fn new(actions: Arc<dyn Actions>) -> Self {
        Self { actions }
    }

    /// Execute one request, producing exactly one correlated result
    #[must_use]
    pub fn dispatch(&self, request: &ToolCallRequest) -> ToolCallResult {
        let result = match ToolName::from_name(&request.name) {
            Some(tool) => match self.execute(tool, request) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(tool = %request.name, id = %request.id, error = %e, "tool execution failed");
                    format!("Error executing tool: {e}")
                }
            },
            None => {
                tracing::warn!(tool = %request.name, id = %request.id, "unknown function call");
                format!("I am not familiar with the function {}.", request.name)
            }
        };

        ToolCallResult {
            id: request.id.clone(),
            name: request.name.clone(),
            result,
        }
    }

    /// Execute every request of a batch independently, preserving order
    #[must_use]
    pub fn dispatch_batch(&self, requests: &[ToolCallRequest]) -> Vec<ToolCallResult> {
        requests.iter().map(|r| self.dispatch(r)).collect()
    }

    fn execute(&self, tool: ToolName, request: &ToolCallRequest) -> Result<String> {
        let call = ToolCall::parse(tool, &request.args)?;
        tracing::debug!(tool = %tool, id = %request.id, "executing tool");

        match call {
            ToolCall::SearchWeb { query } => self.actions.search_web(&query),
            ToolCall::PlaySongOnYoutube { query } => self.actions.play_song_on_youtube(&query),
            ToolCall::SetAlarm {
                delay_in_seconds,
                label,
            } => self.actions.set_alarm(delay_in_seconds, &label),
            ToolCall::GetCurrentTime => self.actions.current_time(),
            ToolCall::TellJoke => self.actions.tell_joke(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingActions {
        calls: Mutex<Vec<String>>,
    }

    impl Actions for RecordingActions {
        fn search_web(&self, query: &str) -> Result<String> {
            self.calls.lock().unwrap().push(format!("search:{query}"));
            Ok(format!("searched {query}"))
        }

        fn play_song_on_youtube(&self, _query: &str) -> Result<String> {
            Err(Error::Tool("browser unavailable".to_string()))
        }

        fn set_alarm(&self, delay: f64, label: &str) -> Result<String> {
            self.calls.lock().unwrap().push(format!("alarm:{delay}:{label}"));
            Ok("alarm set".to_string())
        }

        fn current_time(&self) -> Result<String> {
            Ok("noon".to_string())
        }

        fn tell_joke(&self) -> Result<String> {
            Ok("joke".to_string())
        }
    }

    fn request(id: &str, name: &str, args: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            args: args.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_unknown_tool_is_reported_for_its_id() {
        let dispatcher = ToolDispatcher::new(Arc::new(RecordingActions::default()));
        let result = dispatcher.dispatch(&request("call-7", "foo", json!({})));

        assert_eq!(result.id, "call-7");
        assert_eq!(result.name, "foo");
        assert_eq!(result.result, "I am not familiar with the function foo.");
    }

    #[test]
    fn test_action_failure_is_contained() {
        let dispatcher = ToolDispatcher::new(Arc::new(RecordingActions::default()));
        let result =
            dispatcher.dispatch(&request("c1", "playSongOnYoutube", json!({ "query": "x" })));

        assert!(result.result.starts_with("Error executing tool:"));
        assert!(result.result.contains("browser unavailable"));
    }

    #[test]
    fn test_bad_arguments_are_contained() {
        let dispatcher = ToolDispatcher::new(Arc::new(RecordingActions::default()));
        let result = dispatcher.dispatch(&request("c1", "searchWeb", json!({ "q": 1 })));
        assert!(result.result.starts_with("Error executing tool:"));
    }

    #[test]
    fn test_batch_preserves_order_and_ids() {
        let actions = Arc::new(RecordingActions::default());
        let dispatcher = ToolDispatcher::new(actions.clone());

        let results = dispatcher.dispatch_batch(&[
            request("a", "searchWeb", json!({ "query": "rust" })),
            request("b", "setAlarm", json!({ "delayInSeconds": 30, "label": "Tea" })),
            request("c", "getCurrentTime", json!({})),
        ]);

        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(results[2].result, "noon");
        assert_eq!(
            *actions.calls.lock().unwrap(),
            vec!["search:rust".to_string(), "alarm:30:Tea".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_alarm_is_refused() {
        let dispatcher = ToolDispatcher::new(Arc::new(crate::tools::SystemActions));
        let result = dispatcher.dispatch(&request("c1", "setAlarm", json!({ "delayInSeconds": 1e20 })));

        assert_eq!(result.id, "c1");
        assert_eq!(result.result, "That is too far in the future for me to set an alarm.");
    }
}
