use itertools::Itertools;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::payload::{coerce_id, Payload};
use crate::store::{JoinLogStore, JoinRecord};

pub const ALIASES: [&str; 3] = ["查", "查入群", "查进群"];

pub const NO_GROUP: &str = "cannot determine current group; use this command inside a group";
pub const FAILED: &str = "query failed, see logs";

const QUESTION_LABELS: [&str; 2] = ["Question", "问题"];
const ANSWER_LABELS: [&str; 2] = ["Answer", "答案"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryCommand {
    /// `None` looks up the invoker.
    Lookup { target: Option<i64> },
    BadArgument(String),
}

impl QueryCommand {
    /// `None` when the message is not this command.
    pub fn parse(content: &str) -> Option<QueryCommand> {
        let mut words = content.split_whitespace();
        let name = words.next()?;
        if !ALIASES.contains(&name.trim_start_matches('/')) {
            return None;
        }
        Some(match words.next() {
            None => QueryCommand::Lookup { target: None },
            Some(arg) => match arg.trim_start_matches('@').parse::<i64>() {
                Ok(target) if target > 0 => QueryCommand::Lookup {
                    target: Some(target),
                },
                _ => QueryCommand::BadArgument(arg.to_owned()),
            },
        })
    }
}

/// Group the command was sent in. The field moves around depending on where
/// the message came from, so a few shapes are tried in order.
pub fn resolve_group(context: &Payload) -> Option<i64> {
    let non_zero = |id: i64| Some(id).filter(|id| *id != 0);

    non_zero(context.id_field("group_id"))
        .or_else(|| {
            context
                .get("group")
                .and_then(|group| group.get("id"))
                .map(coerce_id)
                .and_then(non_zero)
        })
        .or_else(|| {
            (context.str_field("message_type") == Some("group"))
                .then(|| context.id_field("target_id"))
                .and_then(non_zero)
        })
        .or_else(|| {
            context
                .str_field("session_id")
                .map(|session| session.trim_start_matches("group_"))
                .and_then(|session| session.parse().ok())
                .and_then(non_zero)
        })
}

fn labelled(line: &str, labels: &[&str]) -> Option<String> {
    labels.iter().find_map(|label| {
        let rest = line.strip_prefix(*label)?;
        let rest = rest
            .strip_prefix('：')
            .or_else(|| rest.strip_prefix(':'))?;
        Some(rest.trim().to_owned())
    })
}

fn labelled_pair(lines: &[&str]) -> Option<(Option<String>, Option<String>)> {
    let question = lines.iter().find_map(|line| labelled(line, &QUESTION_LABELS));
    let answer = lines.iter().find_map(|line| labelled(line, &ANSWER_LABELS));
    (question.is_some() || answer.is_some()).then(|| (question, answer))
}

fn split_comment(comment: &str) -> Option<(String, String)> {
    let lines = comment
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>();

    match labelled_pair(&lines) {
        Some((question, answer)) => Some((
            question.unwrap_or_else(|| "-".to_owned()),
            answer.unwrap_or_else(|| "-".to_owned()),
        )),
        None => {
            let (first, rest) = lines.split_first()?;
            Some((first.to_string(), rest.join(" ")))
        }
    }
}

/// Splits a join comment into `(question, answer)`, `-` standing in for
/// anything missing.
pub fn parse_comment(comment: Option<&str>) -> (String, String) {
    let dash = |text: String| if text.is_empty() { "-".to_owned() } else { text };
    match comment {
        None => ("-".to_owned(), "-".to_owned()),
        Some(raw) => match split_comment(raw) {
            Some((question, answer)) => (dash(question), dash(answer)),
            None => (dash(raw.trim().to_owned()), "-".to_owned()),
        },
    }
}

pub fn format_time(timestamp: i64) -> String {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetDateTime::from_unix_timestamp(timestamp)
        .ok()
        .map(|time| time.to_offset(offset))
        .and_then(|time| {
            time.format(format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second]"
            ))
            .ok()
        })
        .unwrap_or_else(|| timestamp.to_string())
}

pub fn render_record(record: &JoinRecord) -> String {
    let (question, answer) = parse_comment(record.comment.as_deref());
    format!(
        "QQ: {qq}\nTime: {time}\nQuestion: {question}\nAnswer: {answer}",
        qq = record.qq,
        time = format_time(record.timestamp),
        question = question,
        answer = answer,
    )
}

/// Builds the reply for one invocation. Store faults come back as `Err`.
pub fn answer(
    store: &JoinLogStore,
    invoker: i64,
    command: &QueryCommand,
    context: &Payload,
) -> anyhow::Result<String> {
    let target = match command {
        QueryCommand::Lookup { target } => target.unwrap_or(invoker),
        QueryCommand::BadArgument(arg) => {
            return Ok(format!("not a QQ number: {}. usage: {} [QQ]", arg, ALIASES[0]))
        }
    };
    let group_id = match resolve_group(context) {
        Some(group_id) => group_id,
        None => return Ok(NO_GROUP.to_owned()),
    };

    let records = store
        .query_by_user(target)?
        .into_iter()
        .filter(|record| record.group_id == group_id)
        .collect::<Vec<_>>();

    if records.is_empty() {
        return Ok(format!(
            "no records for {} in this group ({}).",
            target, group_id
        ));
    }
    Ok(records.iter().map(render_record).join("\n\n"))
}
