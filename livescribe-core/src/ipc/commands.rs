//! Request/response command surface.
//!
//! ```json
//! {"method":"init","modelPath":"/models/vosk-small-en","sampleRate":16000}
//! {"method":"start"}
//! → {"ok":true,"status":"recording"}
//! → {"ok":false,"status":"uninitialized","error":{"kind":"NotReady","message":"recognizer not initialized"}}
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::events::{ErrorPayload, SessionStatus};
use crate::config::DEFAULT_SAMPLE_RATE;
use crate::error::LivescribeError;
use crate::session::RecognitionSession;

/// A session command, tagged by `method`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum Command {
    /// Missing arguments fall back to an empty path and 16 kHz.
    #[serde(rename_all = "camelCase")]
    Init {
        #[serde(default)]
        model_path: String,
        #[serde(default = "default_sample_rate")]
        sample_rate: u32,
    },
    Start,
    Stop,
    Dispose,
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Dispose => "dispose",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub ok: bool,
    /// Session status after the command ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl CommandResponse {
    pub fn success(status: SessionStatus) -> Self {
        Self {
            ok: true,
            status: Some(status),
            error: None,
        }
    }

    pub fn failure(status: Option<SessionStatus>, error: ErrorPayload) -> Self {
        Self {
            ok: false,
            status,
            error: Some(error),
        }
    }
}

/// Run `command` against `session`, folding any error into the response.
pub fn dispatch(session: &RecognitionSession, command: &Command) -> CommandResponse {
    debug!(method = command.name(), "dispatching command");
    let result: Result<(), LivescribeError> = match command {
        Command::Init {
            model_path,
            sample_rate,
        } => session.init(model_path, *sample_rate),
        Command::Start => session.start(),
        Command::Stop => {
            session.stop();
            Ok(())
        }
        Command::Dispose => {
            session.dispose();
            Ok(())
        }
    };

    let status = session.status();
    match result {
        Ok(()) => CommandResponse::success(status),
        Err(e) => CommandResponse::failure(Some(status), ErrorPayload::from(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::audio::PcmFeed;
    use crate::config::SessionConfig;
    use crate::inference::stub::StubEngine;
    use crate::ipc::events::ErrorKind;

    #[test]
    fn init_defaults_match_host_defaults() {
        let cmd: Command = serde_json::from_str(r#"{"method":"init"}"#).expect("parse");
        assert_eq!(
            cmd,
            Command::Init {
                model_path: String::new(),
                sample_rate: 16_000
            }
        );

        let cmd: Command =
            serde_json::from_str(r#"{"method":"init","modelPath":"/m","sampleRate":8000}"#)
                .expect("parse");
        assert_eq!(
            cmd,
            Command::Init {
                model_path: "/m".into(),
                sample_rate: 8_000
            }
        );
    }

    #[test]
    fn unknown_method_is_a_parse_error() {
        assert!(serde_json::from_str::<Command>(r#"{"method":"pause"}"#).is_err());
    }

    #[test]
    fn failure_response_serializes_kind_and_message() {
        let resp = CommandResponse::failure(
            Some(SessionStatus::Uninitialized),
            ErrorPayload::from(&LivescribeError::NotReady),
        );
        let json = serde_json::to_value(&resp).expect("serialize");
        assert_eq!(json["ok"], false);
        assert_eq!(json["status"], "uninitialized");
        assert_eq!(json["error"]["kind"], "NotReady");
        assert_eq!(json["error"]["message"], "recognizer not initialized");
    }

    #[test]
    fn dispatch_walks_the_lifecycle() {
        let (feed, _writer) = PcmFeed::new(1024);
        let session =
            RecognitionSession::new(Arc::new(StubEngine), Arc::new(feed), SessionConfig::default())
                .expect("session");

        let resp = dispatch(&session, &Command::Start);
        assert!(!resp.ok);
        assert_eq!(resp.error.map(|e| e.kind), Some(ErrorKind::NotReady));

        let resp = dispatch(
            &session,
            &Command::Init {
                model_path: String::new(),
                sample_rate: 16_000,
            },
        );
        assert_eq!(resp.error.map(|e| e.kind), Some(ErrorKind::EngineInitError));

        let init = Command::Init {
            model_path: "models/stub".into(),
            sample_rate: 16_000,
        };
        assert_eq!(dispatch(&session, &init).status, Some(SessionStatus::Ready));
        assert_eq!(
            dispatch(&session, &Command::Start).status,
            Some(SessionStatus::Recording)
        );
        assert_eq!(
            dispatch(&session, &Command::Stop).status,
            Some(SessionStatus::Ready)
        );
        assert!(dispatch(&session, &Command::Dispose).ok);
        assert!(dispatch(&session, &Command::Dispose).ok);

        let resp = dispatch(&session, &init);
        assert_eq!(resp.error.map(|e| e.kind), Some(ErrorKind::DisposedError));
    }
}
