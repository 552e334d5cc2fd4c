//! `events tail [-f]`.

use anyhow::Result;
use std::path::Path;
use std::time::Duration;

const DEFAULT_TAIL: usize = 50;

pub async fn cmd_events_tail(project_dir: &Path, follow: bool) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let recent = workspace.events.list_recent(DEFAULT_TAIL)?;
    let mut cursor = 0i64;
    for event in recent {
        cursor = event.seq;
        print_event(&event);
    }

    if !follow {
        return Ok(());
    }
    loop {
        for event in workspace.events.tail(cursor)? {
            cursor = event.seq;
            print_event(&event);
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

fn print_event(event: &crate::events::Event) {
    println!(
        "{}  {:<22} {}  {}",
        event.timestamp, event.event_type, event.subject_id, event.payload
    );
}
