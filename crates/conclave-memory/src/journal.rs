//! Human-readable memory journals: `MEMORY.md` plus `daily/<date>.md`
//! under each user's directory. Append-only and never authoritative — the
//! JSON snapshots are the source of truth and these files can always be
//! regenerated from them.

use std::path::Path;

use tracing::warn;

use crate::types::user_dir_hash;

/// Append one remembered fact to both journal files. Failures are logged
/// and swallowed — journaling must never fail a memory write.
pub async fn append(memory_dir: &str, user_id: &str, content: &str) {
    if let Err(e) = try_append(memory_dir, user_id, content).await {
        warn!(error = %e, "memory journal append failed");
    }
}

async fn try_append(memory_dir: &str, user_id: &str, content: &str) -> std::io::Result<()> {
    let now = chrono::Utc::now();
    let line = format!("- [{}] {}\n", now.format("%Y-%m-%d %H:%M:%S"), content);

    let user_dir = Path::new(memory_dir).join(user_dir_hash(user_id));
    let daily_dir = user_dir.join("daily");
    tokio::fs::create_dir_all(&daily_dir).await?;

    append_line(&user_dir.join("MEMORY.md"), &line).await?;
    let daily = daily_dir.join(format!("{}.md", now.format("%Y-%m-%d")));
    append_line(&daily, &line).await
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_accumulate_in_both_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().display().to_string();

        append(&dir, "alice", "likes green tea").await;
        append(&dir, "alice", "works on compilers").await;

        let user_dir = tmp.path().join(user_dir_hash("alice"));
        let journal = tokio::fs::read_to_string(user_dir.join("MEMORY.md")).await.unwrap();
        assert_eq!(journal.lines().count(), 2);
        assert!(journal.contains("likes green tea"));

        let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let daily = tokio::fs::read_to_string(user_dir.join("daily").join(format!("{date}.md")))
            .await
            .unwrap();
        assert!(daily.contains("works on compilers"));
    }
}
