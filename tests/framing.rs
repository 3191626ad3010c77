//! Wire protocol integration tests
//!
//! Covers newline-delimited framing, the engine response schemas, and the
//! readiness handshake markers for both supervised engines

use lumen_core::{EngineConfig, FrameBuffer, LanguageFrame, VisionFrame};

#[test]
fn test_two_frames_in_one_read() {
    let mut buffer = FrameBuffer::new();

    let frames = buffer.push(b"{\"type\":\"ready\"}\n{\"type\":\"x\"}\n");

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0], "{\"type\":\"ready\"}");
    assert_eq!(frames[1], "{\"type\":\"x\"}");
    assert!(buffer.is_empty());
}

#[test]
fn test_split_frame_not_handled_until_newline() {
    let mut buffer = FrameBuffer::new();

    let frames = buffer.push(b"{\"intent\":\"identify\",\"pay");
    assert!(frames.is_empty());
    assert!(!buffer.is_empty());

    let frames = buffer.push(b"load\":\"what is this\"}\n");
    assert_eq!(
        frames,
        vec!["{\"intent\":\"identify\",\"payload\":\"what is this\"}".to_string()]
    );
    assert!(buffer.is_empty());
}

#[test]
fn test_frame_split_across_three_reads() {
    let mut buffer = FrameBuffer::new();

    assert!(buffer.push(b"{\"type\":").is_empty());
    assert!(buffer.push(b"\"ready\"").is_empty());

    let frames = buffer.push(b"}\n");
    assert_eq!(frames, vec!["{\"type\":\"ready\"}".to_string()]);
}

#[test]
fn test_blank_lines_are_skipped() {
    let mut buffer = FrameBuffer::new();

    let frames = buffer.push(b"\n\n{\"intent\":\"ready\"}\n\n");

    assert_eq!(frames, vec!["{\"intent\":\"ready\"}".to_string()]);
    assert!(buffer.is_empty());
}

#[test]
fn test_vision_response_schema() {
    let frame: VisionFrame = serde_json::from_str(
        r#"{"type":"identify","text":{"answer":"a red bicycle","time":"1.42s"}}"#,
    )
    .unwrap();

    assert_eq!(frame.kind, "identify");
    let text = frame.text.unwrap();
    assert_eq!(text.answer, "a red bicycle");
    assert_eq!(text.time, "1.42s");
}

#[test]
fn test_vision_ready_frame_has_no_text() {
    let frame: VisionFrame = serde_json::from_str(r#"{"type":"ready"}"#).unwrap();

    assert_eq!(frame.kind, "ready");
    assert!(frame.text.is_none());
}

#[test]
fn test_language_response_schema() {
    let frame: LanguageFrame =
        serde_json::from_str(r#"{"intent":"system","payload":"volume_set 40"}"#).unwrap();

    assert_eq!(frame.intent, "system");
    assert_eq!(frame.payload, "volume_set 40");
}

#[test]
fn test_language_payload_defaults_to_empty() {
    let frame: LanguageFrame = serde_json::from_str(r#"{"intent":"ready"}"#).unwrap();

    assert_eq!(frame.intent, "ready");
    assert_eq!(frame.payload, "");
}

#[test]
fn test_request_encoding_is_one_json_string_per_line() {
    let mut line = serde_json::to_string("what am i looking at").unwrap();
    line.push('\n');

    assert_eq!(line, "\"what am i looking at\"\n");
}

#[test]
fn test_vision_ready_marker_uses_type_field() {
    let config = EngineConfig::new("vision", "lumen-vision", "/tmp/test_vision.sock");

    let ready: serde_json::Value = serde_json::from_str(r#"{"type":"ready"}"#).unwrap();
    let answer: serde_json::Value =
        serde_json::from_str(r#"{"type":"identify","text":{"answer":"a chair"}}"#).unwrap();

    assert!(config.is_ready_frame(&ready));
    assert!(!config.is_ready_frame(&answer));
}

#[test]
fn test_language_ready_marker_uses_intent_field() {
    let mut config = EngineConfig::new("brain", "lumen-brain", "/tmp/test_brain.sock");
    config.ready_field = "intent".to_string();

    let ready: serde_json::Value =
        serde_json::from_str(r#"{"intent":"ready","payload":""}"#).unwrap();
    let command: serde_json::Value =
        serde_json::from_str(r#"{"intent":"system","payload":"mute"}"#).unwrap();

    assert!(config.is_ready_frame(&ready));
    assert!(!config.is_ready_frame(&command));
}

#[test]
fn test_ready_marker_ignores_non_string_values() {
    let config = EngineConfig::new("vision", "lumen-vision", "/tmp/test_vision.sock");

    let numeric: serde_json::Value = serde_json::from_str(r#"{"type":1}"#).unwrap();
    let missing: serde_json::Value = serde_json::from_str(r#"{"other":"ready"}"#).unwrap();

    assert!(!config.is_ready_frame(&numeric));
    assert!(!config.is_ready_frame(&missing));
}
