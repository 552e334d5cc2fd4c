//! AUTO-strategy dependency inference: one DEPENDENCY_INFERENCE-purpose
//! provider call over the batch's task titles and descriptions, returning a
//! JSON map that is then validated as a DAG.

use crate::errors::ConductorError;
use crate::provider::{ChatMessage, ChatOptions, ChatProvider, Purpose, chat_with_retry};
use crate::store::models::{Task, TokenUsage};
use crate::util;
use std::collections::{BTreeMap, HashMap};
use tokio_util::sync::CancellationToken;

/// Ask the provider which tasks depend on which. Returns the inferred map
/// keyed by task id (input is keyed by task number for the model's sake)
/// plus the call's token usage.
pub async fn infer_dependency_map(
    provider: &dyn ChatProvider,
    tasks: &[Task],
    cancel: &CancellationToken,
) -> Result<(BTreeMap<String, Vec<String>>, TokenUsage), ConductorError> {
    let listing: String = tasks
        .iter()
        .map(|t| format!("{}. {} — {}\n", t.task_number, t.title, t.description))
        .collect();

    let request = vec![
        ChatMessage::system(
            "You order implementation tasks. Given numbered tasks, return ONLY a JSON object \
             mapping each task number to the list of task numbers it depends on (empty list if \
             none). A task depends on another only when it cannot start before the other \
             finishes, e.g. it edits the same files or consumes its output.",
        ),
        ChatMessage::user(listing),
    ];

    let response = chat_with_retry(
        provider,
        &request,
        &[],
        &ChatOptions::for_purpose(Purpose::DependencyInference),
        cancel,
    )
    .await
    .map_err(|e| ConductorError::Other(e.into()))?;

    let map = parse_inferred_map(&response.text, tasks)?;
    Ok((map, response.usage))
}

/// Parse the model's JSON into an id-keyed map. Unknown task numbers are
/// rejected rather than silently dropped: a hallucinated dependency means
/// the whole map is untrustworthy.
pub fn parse_inferred_map(
    text: &str,
    tasks: &[Task],
) -> Result<BTreeMap<String, Vec<String>>, ConductorError> {
    let json = util::extract_json_object(text).ok_or_else(|| {
        ConductorError::InvalidDependencyMap("response contained no JSON object".into())
    })?;
    let raw: HashMap<String, Vec<serde_json::Value>> = serde_json::from_str(&json)
        .map_err(|e| ConductorError::InvalidDependencyMap(format!("unparseable JSON: {e}")))?;

    let by_number: HashMap<i64, &Task> = tasks.iter().map(|t| (t.task_number, t)).collect();
    let resolve = |value: &str| -> Result<String, ConductorError> {
        let number: i64 = value.trim().parse().map_err(|_| {
            ConductorError::InvalidDependencyMap(format!("'{value}' is not a task number"))
        })?;
        by_number
            .get(&number)
            .map(|t| t.id.clone())
            .ok_or_else(|| {
                ConductorError::InvalidDependencyMap(format!("unknown task number {number}"))
            })
    };

    let mut map = BTreeMap::new();
    for (key, deps) in raw {
        let task_id = resolve(&key)?;
        let mut dep_ids = Vec::new();
        for dep in deps {
            let dep_str = match &dep {
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::String(s) => s.clone(),
                other => {
                    return Err(ConductorError::InvalidDependencyMap(format!(
                        "bad dependency entry: {other}"
                    )));
                }
            };
            dep_ids.push(resolve(&dep_str)?);
        }
        map.insert(task_id, dep_ids);
    }
    // Tasks the model omitted have no dependencies.
    for task in tasks {
        map.entry(task.id.clone()).or_default();
    }
    Ok(map)
}
