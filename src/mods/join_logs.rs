use std::sync::Arc;

use once_cell::sync::OnceCell;
use proc_qq::{
    event, module, GroupLeaveEvent, JoinGroupRequestEvent, MessageChainParseTrait,
    MessageContentTrait, MessageEvent, MessageSendToSourceTrait, Module,
};
use proc_qq::re_exports::ricq::client::event::NewMemberEvent;
use serde_json::{json, Value};

use crate::query::QueryCommand;
use crate::recorder::JoinLogs;

static JOIN_LOGS: OnceCell<Arc<JoinLogs>> = OnceCell::new();

pub fn install(join_logs: Arc<JoinLogs>) -> anyhow::Result<()> {
    JOIN_LOGS
        .set(join_logs)
        .map_err(|_| anyhow::anyhow!("join logs installed twice"))
}

fn join_logs() -> anyhow::Result<&'static JoinLogs> {
    JOIN_LOGS
        .get()
        .map(|join_logs| &**join_logs)
        .ok_or_else(|| anyhow::anyhow!("join logs not installed"))
}

#[event]
async fn join_request(event: &JoinGroupRequestEvent) -> anyhow::Result<bool> {
    tracing::debug!("{:?}", &event.inner);
    let request = &event.inner;
    let payload = json!({
        "time": request.msg_time,
        "post_type": "request",
        "request_type": "group",
        "sub_type": if request.invitor_uin.is_some() { "invite" } else { "add" },
        "user_id": request.req_uin,
        "group_id": request.group_code,
        "nickname": request.req_nick,
        "flag": format!("{}:{}:{}", request.group_code, request.req_uin, request.msg_seq),
        "comment": request.message,
    });
    join_logs()?.on_payload(payload)?;
    Ok(false)
}

#[event]
async fn new_member(event: &NewMemberEvent) -> anyhow::Result<bool> {
    let payload = json!({
        "post_type": "notice",
        "notice_type": "group_increase",
        "user_id": event.inner.member_uin,
        "group_id": event.inner.group_code,
    });
    join_logs()?.on_payload(payload)?;
    Ok(false)
}

#[event]
async fn group_leave(event: &GroupLeaveEvent) -> anyhow::Result<bool> {
    let leave = &event.inner;
    let sub_type = match leave.operator_uin {
        Some(operator) if operator != leave.member_uin => "kick",
        _ => "leave",
    };
    let payload = json!({
        "post_type": "notice",
        "notice_type": "group_decrease",
        "sub_type": sub_type,
        "user_id": leave.member_uin,
        "group_id": leave.group_code,
        "operator_id": leave.operator_uin,
    });
    join_logs()?.on_payload(payload)?;
    Ok(false)
}

fn message_context(event: &MessageEvent) -> (i64, Value) {
    match event {
        MessageEvent::GroupMessage(message) => (
            message.inner.from_uin,
            json!({
                "message_type": "group",
                "user_id": message.inner.from_uin,
                "group_id": message.inner.group_code,
            }),
        ),
        MessageEvent::FriendMessage(message) => (
            message.inner.from_uin,
            json!({
                "message_type": "private",
                "user_id": message.inner.from_uin,
            }),
        ),
        _ => (0, json!({ "message_type": "temp" })),
    }
}

#[event]
async fn check_join(event: &MessageEvent) -> anyhow::Result<bool> {
    let command = match QueryCommand::parse(&event.message_content()) {
        Some(command) => command,
        None => return Ok(false),
    };
    let (invoker, context) = message_context(event);
    let reply = join_logs()?.on_query(invoker, &command, &context);
    event
        .send_message_to_source(reply.parse_message_chain())
        .await?;
    Ok(true)
}

pub fn module() -> Module {
    module!(
        "join_logs",
        "入群记录",
        join_request,
        new_member,
        group_leave,
        check_join
    )
}
