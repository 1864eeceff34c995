//! Content Message Bridge.
//!
//! Content scripts run isolated from the add-on and talk to it over one
//! named message channel. Two actions are understood: `set-prefs` is
//! handed to the preference gateway and `get-login-status` is answered on
//! a reply channel. Anything else is ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::host::{ContentChannel, HostError, MessageTarget, PreferenceStore};
use crate::login_tracker::LoginTracker;
use crate::preferences::{PrefWrite, PreferenceError, PreferenceGateway, PreferenceWriteReport};

pub const CONTENT_MESSAGE_CHANNEL: &str = "Onboarding:OnContentMessage";
pub const LOGIN_STATUS_REPLY_CHANNEL: &str = "Onboarding:ResponseLoginStatus";
/// Frame script injected into every content process once the UI is ready.
pub const ONBOARDING_FRAME_SCRIPT: &str = "resource://onboarding/onboarding.js";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ContentRequest {
    SetPrefs { params: Vec<PrefWrite> },
    GetLoginStatus,
}

impl ContentRequest {
    pub const fn action(&self) -> &'static str {
        match self {
            Self::SetPrefs { .. } => "set-prefs",
            Self::GetLoginStatus => "get-login-status",
        }
    }
}

/// Result of decoding a message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedMessage {
    Request(ContentRequest),
    Unknown { action: String },
}

/// A message as delivered by the host, with the frame that sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub target: MessageTarget,
    pub data: Value,
}

impl InboundMessage {
    pub fn new(target: MessageTarget, data: Value) -> Self {
        Self { target, data }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginStatusReply {
    #[serde(rename = "isLoggedIn")]
    pub is_logged_in: bool,
}

impl LoginStatusReply {
    pub fn to_value(self) -> Result<Value, BridgeError> {
        serde_json::to_value(self).map_err(|err| BridgeError::Encode {
            detail: err.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IgnoreReason {
    NotListening,
    StudyEnding,
    UnknownAction { action: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BridgeOutcome {
    PrefsApplied { report: PreferenceWriteReport },
    LoginStatusSent { is_logged_in: bool },
    Ignored { reason: IgnoreReason },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("malformed content message: {detail}")]
    Malformed { detail: String },
    #[error(transparent)]
    Preference(#[from] PreferenceError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("failed to encode reply: {detail}")]
    Encode { detail: String },
}

impl BridgeError {
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "STUDY-BRIDGE-0001",
            Self::Preference(_) => "STUDY-BRIDGE-0002",
            Self::Host(_) => "STUDY-BRIDGE-0003",
            Self::Encode { .. } => "STUDY-BRIDGE-0004",
        }
    }

    fn malformed(detail: impl Into<String>) -> Self {
        Self::Malformed {
            detail: detail.into(),
        }
    }
}

/// Decode a message body. A body without a string `action` is malformed;
/// an unrecognized action is not an error.
pub fn decode_request(data: &Value) -> Result<DecodedMessage, BridgeError> {
    let Some(body) = data.as_object() else {
        return Err(BridgeError::malformed("message body is not an object"));
    };
    let Some(action) = body.get("action").and_then(Value::as_str) else {
        return Err(BridgeError::malformed("missing string `action`"));
    };
    match action {
        "set-prefs" => {
            let params = body
                .get("params")
                .ok_or_else(|| BridgeError::malformed("set-prefs without `params`"))?;
            let params: Vec<PrefWrite> = serde_json::from_value(params.clone())
                .map_err(|err| BridgeError::malformed(format!("set-prefs params: {err}")))?;
            Ok(DecodedMessage::Request(ContentRequest::SetPrefs { params }))
        }
        "get-login-status" => Ok(DecodedMessage::Request(ContentRequest::GetLoginStatus)),
        other => Ok(DecodedMessage::Unknown {
            action: other.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentMessageBridge {
    listening: bool,
}

impl ContentMessageBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Returns `false` if already listening.
    pub fn start<C: ContentChannel + ?Sized>(&mut self, channel: &mut C) -> Result<bool, HostError> {
        if self.listening {
            return Ok(false);
        }
        channel.add_message_listener(CONTENT_MESSAGE_CHANNEL)?;
        self.listening = true;
        Ok(true)
    }

    pub fn stop<C: ContentChannel + ?Sized>(&mut self, channel: &mut C) -> Result<bool, HostError> {
        if !self.listening {
            return Ok(false);
        }
        channel.remove_message_listener(CONTENT_MESSAGE_CHANNEL)?;
        self.listening = false;
        Ok(true)
    }

    pub fn dispatch<H>(
        &self,
        host: &mut H,
        gateway: &PreferenceGateway,
        tracker: &LoginTracker,
        message: &InboundMessage,
    ) -> Result<BridgeOutcome, BridgeError>
    where
        H: ContentChannel + PreferenceStore + ?Sized,
    {
        if !self.listening {
            return Ok(BridgeOutcome::Ignored {
                reason: IgnoreReason::NotListening,
            });
        }
        let request = match decode_request(&message.data)? {
            DecodedMessage::Request(request) => request,
            DecodedMessage::Unknown { action } => {
                return Ok(BridgeOutcome::Ignored {
                    reason: IgnoreReason::UnknownAction { action },
                });
            }
        };
        match request {
            ContentRequest::SetPrefs { params } => {
                let report = gateway.set_preferences(host, &params)?;
                Ok(BridgeOutcome::PrefsApplied { report })
            }
            ContentRequest::GetLoginStatus => {
                let reply = LoginStatusReply {
                    is_logged_in: tracker.is_logged_in(),
                };
                host.send_async_message(message.target, LOGIN_STATUS_REPLY_CHANNEL, &reply.to_value()?)?;
                Ok(BridgeOutcome::LoginStatusSent {
                    is_logged_in: reply.is_logged_in,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::host::mocks::RecordingHost;
    use crate::login_tracker::AuthEvent;

    fn listening(host: &mut RecordingHost) -> ContentMessageBridge {
        let mut bridge = ContentMessageBridge::new();
        bridge.start(host).unwrap();
        bridge
    }

    #[test]
    fn decodes_both_actions() {
        let decoded = decode_request(&json!({
            "action": "set-prefs",
            "params": [{"name": "browser.onboarding.hidden", "value": true}]
        }))
        .unwrap();
        assert_eq!(
            decoded,
            DecodedMessage::Request(ContentRequest::SetPrefs {
                params: vec![PrefWrite::new("browser.onboarding.hidden", true)]
            })
        );
        assert_eq!(
            decode_request(&json!({"action": "get-login-status"})).unwrap(),
            DecodedMessage::Request(ContentRequest::GetLoginStatus)
        );
    }

    #[test]
    fn unknown_action_is_not_an_error() {
        assert_eq!(
            decode_request(&json!({"action": "open-tab", "url": "x"})).unwrap(),
            DecodedMessage::Unknown {
                action: "open-tab".to_string()
            }
        );
    }

    #[test]
    fn malformed_bodies_are_rejected() {
        for body in [
            json!("set-prefs"),
            json!({}),
            json!({"action": 3}),
            json!({"action": "set-prefs"}),
            json!({"action": "set-prefs", "params": {"name": "x"}}),
            json!({"action": "set-prefs", "params": [{"name": "x"}]}),
        ] {
            let err = decode_request(&body).unwrap_err();
            assert_eq!(err.error_code(), "STUDY-BRIDGE-0001", "{body}");
        }
    }

    #[test]
    fn request_wire_shape_uses_action_tag() {
        let json = serde_json::to_value(ContentRequest::GetLoginStatus).unwrap();
        assert_eq!(json, json!({"action": "get-login-status"}));
        assert_eq!(ContentRequest::GetLoginStatus.action(), "get-login-status");
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let mut host = RecordingHost::new();
        let mut bridge = ContentMessageBridge::new();
        assert!(bridge.start(&mut host).unwrap());
        assert!(!bridge.start(&mut host).unwrap());
        assert_eq!(host.listener_count(CONTENT_MESSAGE_CHANNEL), 1);
        assert!(bridge.stop(&mut host).unwrap());
        assert!(!bridge.stop(&mut host).unwrap());
        assert_eq!(host.listener_count(CONTENT_MESSAGE_CHANNEL), 0);
    }

    #[test]
    fn set_prefs_goes_through_the_gateway() {
        let mut host = RecordingHost::new();
        let bridge = listening(&mut host);
        let message = InboundMessage::new(
            MessageTarget(7),
            json!({
                "action": "set-prefs",
                "params": [
                    {"name": "browser.onboarding.notification.finished", "value": true},
                    {"name": "browser.startup.homepage", "value": "about:blank"}
                ]
            }),
        );
        let outcome = bridge
            .dispatch(&mut host, &PreferenceGateway::default(), &LoginTracker::new(), &message)
            .unwrap();
        let BridgeOutcome::PrefsApplied { report } = outcome else {
            panic!("expected PrefsApplied, got {outcome:?}");
        };
        assert_eq!(report.skipped, vec!["browser.startup.homepage".to_string()]);
        assert_eq!(
            host.prefs().get_bool("browser.onboarding.notification.finished"),
            Some(true)
        );
        assert!(host.sent_messages(LOGIN_STATUS_REPLY_CHANNEL).is_empty());
    }

    #[test]
    fn type_mismatch_surfaces_as_preference_error() {
        let mut host = RecordingHost::new();
        let bridge = listening(&mut host);
        let message = InboundMessage::new(
            MessageTarget(1),
            json!({
                "action": "set-prefs",
                "params": [{"name": "browser.onboarding.hidden", "value": 1}]
            }),
        );
        let err = bridge
            .dispatch(&mut host, &PreferenceGateway::default(), &LoginTracker::new(), &message)
            .unwrap_err();
        assert_eq!(err.error_code(), "STUDY-BRIDGE-0002");
        assert!(host.prefs().values().is_empty());
    }

    #[test]
    fn login_status_reply_goes_to_the_sender() {
        let mut host = RecordingHost::new();
        let bridge = listening(&mut host);
        let mut tracker = LoginTracker::new();
        tracker.observe(&mut host, AuthEvent::Login).unwrap();

        let message = InboundMessage::new(MessageTarget(42), json!({"action": "get-login-status"}));
        let outcome = bridge
            .dispatch(&mut host, &PreferenceGateway::default(), &tracker, &message)
            .unwrap();

        assert_eq!(outcome, BridgeOutcome::LoginStatusSent { is_logged_in: true });
        assert_eq!(
            host.sent_messages(LOGIN_STATUS_REPLY_CHANNEL),
            vec![(MessageTarget(42), json!({"isLoggedIn": true}))]
        );
    }

    #[test]
    fn messages_before_start_are_ignored() {
        let mut host = RecordingHost::new();
        let bridge = ContentMessageBridge::new();
        let message = InboundMessage::new(MessageTarget(1), json!({"action": "get-login-status"}));
        let outcome = bridge
            .dispatch(&mut host, &PreferenceGateway::default(), &LoginTracker::new(), &message)
            .unwrap();
        assert_eq!(
            outcome,
            BridgeOutcome::Ignored {
                reason: IgnoreReason::NotListening
            }
        );
        assert!(host.sent_messages(LOGIN_STATUS_REPLY_CHANNEL).is_empty());
    }

    #[test]
    fn reply_decodes_with_wire_name() {
        let reply: LoginStatusReply = serde_json::from_value(json!({"isLoggedIn": false})).unwrap();
        assert!(!reply.is_logged_in);
        assert_eq!(reply.to_value().unwrap(), json!({"isLoggedIn": false}));
    }

    #[test]
    fn reply_encoding_uses_the_serde_wire_name() {
        let reply = LoginStatusReply { is_logged_in: true };
        let value = reply.to_value().unwrap();
        assert_eq!(value, json!({"isLoggedIn": true}));
        assert_eq!(value, serde_json::to_value(reply).unwrap());
        assert!(value.get("is_logged_in").is_none());
    }
}
