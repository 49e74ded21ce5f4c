use anyhow::{Context, Result};
use friendex_core::{format_display, ConversationRecord, FriendSummary, TopicMatch};
use serde_json::{Map, Value};
use time::PrimitiveDateTime;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const SEPARATOR: &str = "-------------------";

/// Collects action results, printing text as it goes or assembling one JSON document.
pub enum Report {
    Text,
    Json(Map<String, Value>),
}

impl Report {
    pub fn new(json: bool) -> Self {
        if json {
            Self::Json(Map::new())
        } else {
            Self::Text
        }
    }

    pub fn added(&mut self, name: &str, last_spoken: PrimitiveDateTime, topic: Option<&str>) {
        match self {
            Self::Text => println!("Added friend: {name}"),
            Self::Json(object) => {
                object.insert("add".to_string(), change_json(name, last_spoken, topic));
            }
        }
    }

    pub fn listed(&mut self, summaries: &[FriendSummary]) -> Result<()> {
        match self {
            Self::Text if summaries.is_empty() => println!("No friends recorded yet."),
            Self::Text => print!("{}", render_summaries(summaries)),
            Self::Json(object) => {
                object.insert("read".to_string(), serde_json::json!({ "friends": to_json(summaries)? }));
            }
        }
        Ok(())
    }

    pub fn updated(&mut self, name: &str, last_spoken: PrimitiveDateTime, topic: Option<&str>) {
        match self {
            Self::Text => println!("Updated last spoken time for {name}"),
            Self::Json(object) => {
                object.insert("update".to_string(), change_json(name, last_spoken, topic));
            }
        }
    }

    pub fn deleted(&mut self, name: &str) {
        match self {
            Self::Text => println!("Deleted friend: {name}"),
            Self::Json(object) => {
                object.insert(
                    "delete".to_string(),
                    serde_json::json!({ "name": name, "deleted": true }),
                );
            }
        }
    }

    pub fn checked(&mut self, summary: &FriendSummary) -> Result<()> {
        match self {
            Self::Text => print!("{}", render_summary(summary)),
            Self::Json(object) => {
                object.insert("check".to_string(), to_json(summary)?);
            }
        }
        Ok(())
    }

    pub fn stale(&mut self, min_days: i64, summaries: &[FriendSummary]) -> Result<()> {
        match self {
            Self::Text if summaries.is_empty() => {
                println!("No friends with at least {min_days} days since last spoken.");
            }
            Self::Text => print!("{}", render_summaries(summaries)),
            Self::Json(object) => {
                object.insert(
                    "days_since".to_string(),
                    serde_json::json!({ "min_days": min_days, "friends": to_json(summaries)? }),
                );
            }
        }
        Ok(())
    }

    pub fn topic_matches(&mut self, query: &str, matches: &[TopicMatch]) -> Result<()> {
        match self {
            Self::Text if matches.is_empty() => println!("No results for {query}"),
            Self::Text => print!("{}", render_topic_matches(matches)),
            Self::Json(object) => {
                object.insert(
                    "topic".to_string(),
                    serde_json::json!({ "query": query, "matches": to_json(matches)? }),
                );
            }
        }
        Ok(())
    }

    /// Record the error that stopped the run. Text mode reports it on stderr instead.
    pub fn failed(&mut self, kind: &str, message: &str) {
        if let Self::Json(object) = self {
            object.insert(
                "error".to_string(),
                serde_json::json!({ "kind": kind, "message": message }),
            );
        }
    }

    /// Flush the JSON document, if any. Text has already been printed.
    pub fn finish(self) -> Result<()> {
        if let Self::Json(mut object) = self {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            println!("{}", serde_json::to_string_pretty(&Value::Object(object))?);
        }
        Ok(())
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("failed to serialize report")
}

fn change_json(name: &str, last_spoken: PrimitiveDateTime, topic: Option<&str>) -> Value {
    serde_json::json!({
        "name": name,
        "last_spoken": format_display(last_spoken),
        "topic": topic,
    })
}

fn render_summaries(summaries: &[FriendSummary]) -> String {
    summaries.iter().map(render_summary).collect()
}

pub fn render_summary(summary: &FriendSummary) -> String {
    let mut out = format!("Friend: {}\n", summary.friend.name);
    match (summary.friend.last_spoken, summary.days_since_spoken) {
        (Some(last_spoken), Some(days)) => {
            out.push_str(&format!("Last Spoken: {}\n", format_display(last_spoken)));
            out.push_str(&format!("Days Since Last Spoken: {days}\n"));
            for record in &summary.records {
                out.push_str(&render_record(record));
            }
        }
        _ => out.push_str("Last Spoken: Not available\n"),
    }
    out.push_str(SEPARATOR);
    out.push('\n');
    out
}

fn render_record(record: &ConversationRecord) -> String {
    format!(
        "Last Spoken: {}\nTopic: {}\n{SEPARATOR}\n",
        format_display(record.spoken_at),
        record.topic.as_deref().unwrap_or("(none)")
    )
}

fn render_topic_matches(matches: &[TopicMatch]) -> String {
    let mut out = String::new();
    for item in matches {
        let last_spoken =
            item.last_spoken.map_or_else(|| "Not available".to_string(), format_display);
        out.push_str(&format!(
            "Friend: {}\nLast Spoken: {last_spoken}\nTopic: {}\nScore: {}\n{SEPARATOR}\n",
            item.name,
            item.topic.as_deref().unwrap_or("(none)"),
            item.score,
        ));
    }
    out
}
