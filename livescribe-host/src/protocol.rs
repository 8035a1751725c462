//! JSON-lines wire format.
//!
//! ```text
//! stdin  {"id":1,"method":"init","modelPath":"/models/en","sampleRate":16000}
//! stdout {"type":"response","id":1,"ok":true,"status":"ready"}
//! stdin  {"id":2,"method":"listen"}
//! stdout {"type":"event","event":{"type":"recognition","seq":0,"text":"he","isFinal":false,"raw":{...}}}
//! ```
//!
//! `listen` / `cancel` attach and detach the event stream; every other known
//! method is a session `Command`.

use livescribe_core::{Command, CommandResponse, ErrorKind, ErrorPayload, SessionEvent};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, PartialEq, Eq)]
pub enum Request {
    Session(Command),
    Listen,
    Cancel,
}

/// Values substituted into an `init` request that omits them.
#[derive(Debug, Clone)]
pub struct InitDefaults {
    pub model_path: String,
    pub sample_rate: u32,
}

#[derive(Debug)]
pub struct Inbound {
    pub id: Option<Value>,
    pub request: Result<Request, ErrorPayload>,
}

pub fn parse_line(line: &str, defaults: &InitDefaults) -> Inbound {
    let mut value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            return Inbound {
                id: None,
                request: Err(internal(format!("malformed request: {e}"))),
            }
        }
    };

    let Some(map) = value.as_object_mut() else {
        return Inbound {
            id: None,
            request: Err(internal("request must be a JSON object".into())),
        };
    };
    let id = map.remove("id");
    let method = map
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let request = match method.as_str() {
        "listen" => Ok(Request::Listen),
        "cancel" => Ok(Request::Cancel),
        "init" | "start" | "stop" | "dispose" => {
            if method == "init" {
                map.entry("modelPath")
                    .or_insert_with(|| Value::from(defaults.model_path.clone()));
                map.entry("sampleRate")
                    .or_insert_with(|| Value::from(defaults.sample_rate));
            }
            serde_json::from_value::<Command>(value)
                .map(Request::Session)
                .map_err(|e| internal(format!("invalid {method} request: {e}")))
        }
        "" => Err(internal("request has no method".into())),
        other => Err(ErrorPayload {
            kind: ErrorKind::NotImplemented,
            message: format!("method not implemented: {other}"),
        }),
    };

    Inbound { id, request }
}

fn internal(message: String) -> ErrorPayload {
    ErrorPayload {
        kind: ErrorKind::Internal,
        message,
    }
}

#[derive(Serialize)]
struct ResponseLine<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    id: Option<&'a Value>,
    #[serde(flatten)]
    response: &'a CommandResponse,
}

#[derive(Serialize)]
struct EventLine<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    event: &'a SessionEvent,
}

pub fn response_line(id: Option<&Value>, response: &CommandResponse) -> serde_json::Result<String> {
    serde_json::to_string(&ResponseLine {
        kind: "response",
        id,
        response,
    })
}

pub fn event_line(event: &SessionEvent) -> serde_json::Result<String> {
    serde_json::to_string(&EventLine {
        kind: "event",
        event,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use livescribe_core::{RecognitionEvent, SessionStatus};
    use serde_json::json;

    fn defaults() -> InitDefaults {
        InitDefaults {
            model_path: "/models/default".into(),
            sample_rate: 16_000,
        }
    }

    #[test]
    fn init_without_arguments_uses_host_defaults() {
        let inbound = parse_line(r#"{"id":7,"method":"init"}"#, &defaults());
        assert_eq!(inbound.id, Some(json!(7)));
        assert_eq!(
            inbound.request.expect("request"),
            Request::Session(Command::Init {
                model_path: "/models/default".into(),
                sample_rate: 16_000,
            })
        );
    }

    #[test]
    fn explicit_init_arguments_win() {
        let inbound = parse_line(
            r#"{"id":"a","method":"init","modelPath":"/m","sampleRate":8000}"#,
            &defaults(),
        );
        assert_eq!(
            inbound.request.expect("request"),
            Request::Session(Command::Init {
                model_path: "/m".into(),
                sample_rate: 8_000,
            })
        );
    }

    #[test]
    fn listen_cancel_and_commands_parse() {
        let d = defaults();
        assert_eq!(parse_line(r#"{"method":"listen"}"#, &d).request, Ok(Request::Listen));
        assert_eq!(parse_line(r#"{"method":"cancel"}"#, &d).request, Ok(Request::Cancel));
        assert_eq!(
            parse_line(r#"{"id":3,"method":"stop"}"#, &d).request,
            Ok(Request::Session(Command::Stop))
        );
    }

    #[test]
    fn unknown_method_is_not_implemented() {
        let inbound = parse_line(r#"{"id":9,"method":"pause"}"#, &defaults());
        let err = inbound.request.expect_err("unknown");
        assert_eq!(err.kind, ErrorKind::NotImplemented);
        assert_eq!(inbound.id, Some(json!(9)));
    }

    #[test]
    fn malformed_input_is_internal_error() {
        let d = defaults();
        assert_eq!(
            parse_line("{not json", &d).request.expect_err("malformed").kind,
            ErrorKind::Internal
        );
        assert_eq!(
            parse_line("[1,2]", &d).request.expect_err("array").kind,
            ErrorKind::Internal
        );
        assert_eq!(
            parse_line(r#"{"method":"init","sampleRate":-5}"#, &d)
                .request
                .expect_err("negative rate")
                .kind,
            ErrorKind::Internal
        );
    }

    #[test]
    fn lines_are_tagged() {
        let id = json!(1);
        let line = response_line(Some(&id), &CommandResponse::success(SessionStatus::Ready))
            .expect("serialize");
        let v: Value = serde_json::from_str(&line).expect("json");
        assert_eq!(v, json!({ "type": "response", "id": 1, "ok": true, "status": "ready" }));

        let event = SessionEvent::Recognition(RecognitionEvent::from_payload(
            2,
            true,
            json!({ "text": "hello" }),
        ));
        let v: Value = serde_json::from_str(&event_line(&event).expect("serialize")).expect("json");
        assert_eq!(v["type"], "event");
        assert_eq!(v["event"]["type"], "recognition");
        assert_eq!(v["event"]["text"], "hello");
        assert_eq!(v["event"]["isFinal"], true);
    }
}
