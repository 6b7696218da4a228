use serde_json::Value;

use crate::config::Config;
use crate::event::JoinEvent;
use crate::payload::Payload;
use crate::query::{self, QueryCommand};
use crate::store::JoinLogStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Prepared(u64),
    Joined(u64),
    Removed(usize),
}

/// The join log plugin: owns the store and drives it from inbound events.
pub struct JoinLogs {
    store: JoinLogStore,
    audit: bool,
}

impl JoinLogs {
    pub fn new(store: JoinLogStore, audit: bool) -> Self {
        Self { store, audit }
    }

    pub fn open(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(
            JoinLogStore::open(&config.data_dir)?,
            config.enable_audit,
        ))
    }

    pub fn initialize(&self) {
        tracing::info!("join logs ready, audit: {}", self.audit);
    }

    pub fn terminate(&self) {
        match self.store.flush() {
            Ok(()) => tracing::info!("join logs store flushed"),
            Err(err) => tracing::warn!("flushing join logs store: {:?}", err),
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &JoinLogStore {
        &self.store
    }

    /// Only fresh applications are audited, not invitations.
    fn audits(&self, sub_type: Option<&str>) -> bool {
        self.audit && sub_type == Some("add")
    }

    /// Applies one inbound event. `Ok(None)` means the payload was not a join
    /// lifecycle event and nothing was written.
    pub fn on_payload(&self, value: Value) -> anyhow::Result<Option<Transition>> {
        let payload = Payload::normalize(value);
        let event = match JoinEvent::classify(&payload) {
            Some(event) => event,
            None => {
                if !payload.is_interpreted() {
                    tracing::debug!("uninterpretable payload: {}", payload.to_json_string());
                }
                return Ok(None);
            }
        };
        let raw = payload.to_json_string();

        match event {
            JoinEvent::Request {
                user_id,
                group_id,
                sub_type,
                nickname,
                flag,
                comment,
            } => {
                if self.audits(sub_type.as_deref()) {
                    let mut summary = format!(
                        "[进群申请]\n昵称：{}\nQQ：{}\nflag：{}",
                        nickname.as_deref().unwrap_or("未知昵称"),
                        user_id,
                        flag.as_deref().unwrap_or_default(),
                    );
                    if let Some(comment) = &comment {
                        summary.push('\n');
                        summary.push_str(comment);
                    }
                    tracing::info!("{}", summary);
                }
                let record = self.store.insert_prepared(
                    user_id,
                    group_id,
                    flag.as_deref(),
                    comment.as_deref(),
                    Some(&raw),
                )?;
                tracing::info!(
                    "join request ({}) {} -> {}, record {} prepared",
                    sub_type.as_deref().unwrap_or("-"),
                    user_id,
                    group_id,
                    record.id
                );
                Ok(Some(Transition::Prepared(record.id)))
            }
            JoinEvent::Increase { user_id, group_id } => {
                if user_id == 0 || group_id == 0 {
                    tracing::debug!("group increase without ids: {}", raw);
                    return Ok(None);
                }
                let record = self.store.finalize_join(user_id, group_id, Some(&raw))?;
                tracing::info!("{} joined {}, record {}", user_id, group_id, record.id);
                Ok(Some(Transition::Joined(record.id)))
            }
            JoinEvent::Decrease {
                user_id,
                group_id,
                departure,
            } => {
                if user_id == 0 {
                    tracing::debug!("group decrease without user: {}", raw);
                    return Ok(None);
                }
                let group = Some(group_id).filter(|group_id| *group_id != 0);
                let removed = self.store.delete_records(user_id, group)?;
                tracing::info!(
                    "{} left {} ({}), {} records removed",
                    user_id,
                    group_id,
                    departure.chinese(),
                    removed
                );
                Ok(Some(Transition::Removed(removed)))
            }
        }
    }

    /// Reply text for a query command. Faults are logged and replaced by a
    /// fixed message.
    pub fn on_query(&self, invoker: i64, command: &QueryCommand, context: &Value) -> String {
        let context = Payload::normalize(context.clone());
        match query::answer(&self.store, invoker, command, &context) {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!("join logs query by {} failed: {:?}", invoker, err);
                query::FAILED.to_owned()
            }
        }
    }
}
