use crate::payload::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    Leave,
    Kick,
    KickMe,
    Unknown,
}

impl Departure {
    fn from_sub_type(sub_type: Option<&str>) -> Self {
        match sub_type {
            Some("leave") => Departure::Leave,
            Some("kick") => Departure::Kick,
            Some("kick_me") => Departure::KickMe,
            _ => Departure::Unknown,
        }
    }

    pub fn chinese(&self) -> &'static str {
        match self {
            Departure::Leave => "主动退群",
            Departure::Kick => "被踢出",
            Departure::KickMe => "机器人被踢出",
            Departure::Unknown => "离开",
        }
    }
}

/// One of the three join lifecycle events.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinEvent {
    Request {
        user_id: i64,
        group_id: i64,
        sub_type: Option<String>,
        nickname: Option<String>,
        flag: Option<String>,
        comment: Option<String>,
    },
    Increase {
        user_id: i64,
        group_id: i64,
    },
    Decrease {
        user_id: i64,
        group_id: i64,
        departure: Departure,
    },
}

impl JoinEvent {
    /// First match wins; anything else is `None`.
    pub fn classify(payload: &Payload) -> Option<JoinEvent> {
        let user_id = payload.id_field("user_id");
        let group_id = payload.id_field("group_id");
        let owned = |name: &str| payload.text_field(name).map(ToOwned::to_owned);

        match (
            payload.str_field("post_type"),
            payload.str_field("request_type"),
            payload.str_field("notice_type"),
        ) {
            (Some("request"), Some("group"), _) => Some(JoinEvent::Request {
                user_id,
                group_id,
                sub_type: owned("sub_type"),
                nickname: owned("nickname"),
                flag: owned("flag"),
                comment: owned("comment"),
            }),
            (Some("notice"), _, Some("group_increase")) => {
                Some(JoinEvent::Increase { user_id, group_id })
            }
            (Some("notice"), _, Some("group_decrease")) => Some(JoinEvent::Decrease {
                user_id,
                group_id,
                departure: Departure::from_sub_type(payload.str_field("sub_type")),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn classify(value: serde_json::Value) -> Option<JoinEvent> {
        JoinEvent::classify(&Payload::normalize(value))
    }

    #[test]
    fn group_request() {
        let event = classify(json!({
            "post_type": "request",
            "request_type": "group",
            "sub_type": "add",
            "user_id": 1001,
            "group_id": "2002",
            "flag": "abc",
            "comment": "问题：why?\n答案：fun",
        }));
        assert_eq!(
            event,
            Some(JoinEvent::Request {
                user_id: 1001,
                group_id: 2002,
                sub_type: Some("add".to_owned()),
                nickname: None,
                flag: Some("abc".to_owned()),
                comment: Some("问题：why?\n答案：fun".to_owned()),
            })
        );
    }

    #[test]
    fn friend_request_is_ignored() {
        assert_eq!(
            classify(json!({"post_type": "request", "request_type": "friend"})),
            None
        );
    }

    #[test]
    fn increase_and_decrease() {
        assert_eq!(
            classify(json!({"post_type": "notice", "notice_type": "group_increase", "user_id": 1, "group_id": 2})),
            Some(JoinEvent::Increase {
                user_id: 1,
                group_id: 2
            })
        );
        assert_eq!(
            classify(json!({"post_type": "notice", "notice_type": "group_decrease", "sub_type": "kick", "user_id": 1})),
            Some(JoinEvent::Decrease {
                user_id: 1,
                group_id: 0,
                departure: Departure::Kick
            })
        );
    }

    #[test]
    fn unknown_payloads_are_ignored() {
        assert_eq!(classify(json!({"post_type": "message"})), None);
        assert_eq!(classify(json!({"post_type": "notice", "notice_type": "group_ban"})), None);
        assert_eq!(classify(json!("request")), None);
        assert_eq!(classify(json!(42)), None);
    }
}
