//! Gemini Live `BidiGenerateContent` wire format

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ServerMessage, SessionSetup};
use crate::tools::{ToolCallRequest, ToolCallResult, tool_declarations};
use crate::voice::Pcm16Payload;
use crate::{Error, Result};

/// MIME type of camera frames
pub const JPEG_MIME_TYPE: &str = "image/jpeg";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum ClientMessage<'a> {
    Setup(Setup<'a>),
    RealtimeInput(RealtimeInput<'a>),
    ToolResponse(ToolResponse<'a>),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup<'a> {
    model: &'a str,
    generation_config: GenerationConfig<'a>,
    system_instruction: Content<'a>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSet>,
    input_audio_transcription: Empty,
    output_audio_transcription: Empty,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: [&'static str; 1],
    speech_config: SpeechConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig<'a> {
    voice_name: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolSet {
    function_declarations: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct Empty {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum RealtimeInput<'a> {
    Audio(Blob<'a>),
    Video(Blob<'a>),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Blob<'a> {
    data: &'a str,
    mime_type: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolResponse<'a> {
    function_responses: Vec<FunctionResponse<'a>>,
}

#[derive(Debug, Serialize)]
struct FunctionResponse<'a> {
    id: &'a str,
    name: &'a str,
    response: FunctionResult<'a>,
}

#[derive(Debug, Serialize)]
struct FunctionResult<'a> {
    result: &'a str,
}

/// Serialize the opening handshake
///
/// # Errors
///
/// Returns error if serialization fails
pub fn encode_setup(setup: &SessionSetup) -> Result<String> {
    let declarations = tool_declarations(&setup.tools);
    let tools = if declarations.is_empty() {
        Vec::new()
    } else {
        vec![ToolSet {
            function_declarations: declarations,
        }]
    };

    let message = ClientMessage::Setup(Setup {
        model: &setup.model,
        generation_config: GenerationConfig {
            response_modalities: ["AUDIO"],
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: &setup.voice,
                    },
                },
            },
        },
        system_instruction: Content {
            parts: [TextPart {
                text: &setup.instructions,
            }],
        },
        tools,
        input_audio_transcription: Empty {},
        output_audio_transcription: Empty {},
    });
    Ok(serde_json::to_string(&message)?)
}

/// Serialize one microphone frame
///
/// # Errors
///
/// Returns error if serialization fails
pub fn encode_audio(payload: &Pcm16Payload) -> Result<String> {
    let message = ClientMessage::RealtimeInput(RealtimeInput::Audio(Blob {
        data: &payload.data,
        mime_type: payload.mime_type,
    }));
    Ok(serde_json::to_string(&message)?)
}

/// Serialize one camera frame
///
/// # Errors
///
/// Returns error if serialization fails
pub fn encode_video_frame(jpeg_base64: &str) -> Result<String> {
    let message = ClientMessage::RealtimeInput(RealtimeInput::Video(Blob {
        data: jpeg_base64,
        mime_type: JPEG_MIME_TYPE,
    }));
    Ok(serde_json::to_string(&message)?)
}

/// Serialize one tool result
///
/// # Errors
///
/// Returns error if serialization fails
pub fn encode_tool_result(result: &ToolCallResult) -> Result<String> {
    let message = ClientMessage::ToolResponse(ToolResponse {
        function_responses: vec![FunctionResponse {
            id: &result.id,
            name: &result.name,
            response: FunctionResult {
                result: &result.result,
            },
        }],
    });
    Ok(serde_json::to_string(&message)?)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerFrame {
    setup_complete: Option<Value>,
    server_content: Option<ServerContent>,
    tool_call: Option<ToolCallFrame>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallFrame {
    #[serde(default)]
    function_calls: Vec<ToolCallRequest>,
}

/// Everything one server frame carried, in processing order
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DecodedFrame {
    pub setup_complete: bool,
    pub messages: Vec<ServerMessage>,
}

/// Decode one server frame
///
/// A frame may carry several parts; they are emitted as tool call, input
/// transcription, output transcription, audio, interrupted, turn complete.
/// Unknown fields are ignored.
///
/// # Errors
///
/// Returns `Error::Protocol` if the frame is not a JSON object of the
/// expected shape
pub fn decode_server_frame(bytes: &[u8]) -> Result<DecodedFrame> {
    let frame: ServerFrame =
        serde_json::from_slice(bytes).map_err(|e| Error::Protocol(e.to_string()))?;

    let mut decoded = DecodedFrame {
        setup_complete: frame.setup_complete.is_some(),
        messages: Vec::new(),
    };

    if let Some(call) = frame.tool_call
        && !call.function_calls.is_empty()
    {
        decoded
            .messages
            .push(ServerMessage::ToolCall(call.function_calls));
    }

    if let Some(content) = frame.server_content {
        if let Some(t) = content.input_transcription
            && !t.text.is_empty()
        {
            decoded
                .messages
                .push(ServerMessage::InputTranscription(t.text));
        }
        if let Some(t) = content.output_transcription
            && !t.text.is_empty()
        {
            decoded
                .messages
                .push(ServerMessage::OutputTranscription(t.text));
        }
        if let Some(turn) = content.model_turn {
            decoded.messages.extend(
                turn.parts
                    .into_iter()
                    .filter_map(|p| p.inline_data)
                    .filter(|d| !d.data.is_empty())
                    .map(|d| ServerMessage::Audio(d.data)),
            );
        }
        if content.interrupted {
            decoded.messages.push(ServerMessage::Interrupted);
        }
        if content.turn_complete {
            decoded.messages.push(ServerMessage::TurnComplete);
        }
    }

    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolName;
    use serde_json::json;

    fn decode(value: &Value) -> DecodedFrame {
        decode_server_frame(value.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn test_setup_shape() {
        let setup = SessionSetup {
            model: "models/test".to_string(),
            voice: "Kore".to_string(),
            instructions: "Be brief.".to_string(),
            tools: vec![ToolName::TellJoke],
        };
        let json: Value = serde_json::from_str(&encode_setup(&setup).unwrap()).unwrap();

        let s = &json["setup"];
        assert_eq!(s["model"], "models/test");
        assert_eq!(s["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            s["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert_eq!(s["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(s["tools"][0]["functionDeclarations"][0]["name"], "tellJoke");
        assert_eq!(s["inputAudioTranscription"], json!({}));
        assert_eq!(s["outputAudioTranscription"], json!({}));
    }

    #[test]
    fn test_setup_without_tools_omits_field() {
        let setup = SessionSetup {
            model: "m".to_string(),
            voice: "v".to_string(),
            instructions: String::new(),
            tools: Vec::new(),
        };
        let json: Value = serde_json::from_str(&encode_setup(&setup).unwrap()).unwrap();
        assert!(json["setup"].get("tools").is_none());
    }

    #[test]
    fn test_realtime_and_tool_messages() {
        let audio = Pcm16Payload {
            data: "AAA=".to_string(),
            mime_type: crate::voice::PCM_MIME_TYPE,
        };
        let json: Value = serde_json::from_str(&encode_audio(&audio).unwrap()).unwrap();
        assert_eq!(json["realtimeInput"]["audio"]["data"], "AAA=");
        assert_eq!(json["realtimeInput"]["audio"]["mimeType"], "audio/pcm;rate=16000");

        let json: Value = serde_json::from_str(&encode_video_frame("/9j/").unwrap()).unwrap();
        assert_eq!(json["realtimeInput"]["video"]["mimeType"], "image/jpeg");

        let result = ToolCallResult {
            id: "c1".to_string(),
            name: "tellJoke".to_string(),
            result: "ha".to_string(),
        };
        let json: Value = serde_json::from_str(&encode_tool_result(&result).unwrap()).unwrap();
        assert_eq!(
            json["toolResponse"]["functionResponses"][0],
            json!({ "id": "c1", "name": "tellJoke", "response": { "result": "ha" } })
        );
    }

    #[test]
    fn test_decode_setup_complete() {
        let frame = decode(&json!({ "setupComplete": {} }));
        assert!(frame.setup_complete);
        assert!(frame.messages.is_empty());
    }

    #[test]
    fn test_decode_orders_parts() {
        let frame = decode(&json!({
            "serverContent": {
                "turnComplete": true,
                "outputTranscription": { "text": "Sure" },
                "modelTurn": { "parts": [
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAAA" } },
                    { "text": "ignored" }
                ] },
                "inputTranscription": { "text": "hi" }
            }
        }));

        assert_eq!(
            frame.messages,
            vec![
                ServerMessage::InputTranscription("hi".to_string()),
                ServerMessage::OutputTranscription("Sure".to_string()),
                ServerMessage::Audio("AAAA".to_string()),
                ServerMessage::TurnComplete,
            ]
        );
    }

    #[test]
    fn test_decode_tool_call() {
        let frame = decode(&json!({
            "toolCall": { "functionCalls": [
                { "id": "c1", "name": "setAlarm", "args": { "delayInSeconds": 5 } },
                { "id": "c2", "name": "tellJoke" }
            ] }
        }));

        let [ServerMessage::ToolCall(calls)] = frame.messages.as_slice() else {
            panic!("expected one tool call message, got {:?}", frame.messages);
        };
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].args["delayInSeconds"], 5);
        assert_eq!(calls[1].id, "c2");
    }

    #[test]
    fn test_decode_interrupted() {
        let frame = decode(&json!({ "serverContent": { "interrupted": true } }));
        assert_eq!(frame.messages, vec![ServerMessage::Interrupted]);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(matches!(
            decode_server_frame(b"not json"),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(decode_server_frame(b"[1,2]"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_decode_ignores_unknown_frames() {
        let frame = decode(&json!({ "usageMetadata": { "totalTokenCount": 12 } }));
        assert_eq!(frame, DecodedFrame::default());
    }
}
