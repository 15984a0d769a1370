//! Utility helpers — timestamps, filenames, short ids, template copying.

use std::path::{Path, PathBuf};

/// Current ISO-8601 UTC timestamp.
pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Truncate a string to `max_len` characters, adding "..." if truncated.
/// Unicode-safe.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

/// Sanitize a string for use as a filename.
pub fn safe_filename(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Generate a short unique hex id (12 chars from timestamp + counter).
pub fn short_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = nanos
        .wrapping_mul(6364136223846793005)
        .wrapping_add(count as u64);
    format!("{:012x}", (mixed >> 16) & 0xffff_ffff_ffff)
}

/// Recursively copy a directory tree (used to materialize agent templates).
pub fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Expand `~` to the home directory in a path string.
pub fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") || path == "~" {
        let home = home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(path.trim_start_matches("~/"))
    } else {
        PathBuf::from(path)
    }
}

/// Best-effort home directory.
pub fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("USERPROFILE").ok().map(PathBuf::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_string() {
        assert_eq!(truncate_string("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_long_string() {
        let result = truncate_string("hello world, this is a long string", 15);
        assert_eq!(result, "hello world,...");
    }

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("hello world!"), "hello_world_");
        assert_eq!(safe_filename("my-file_v2.txt"), "my-file_v2.txt");
        assert_eq!(safe_filename("a/b/c"), "a_b_c");
    }

    #[test]
    fn test_short_id_shape() {
        let id = short_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_short_id_unique() {
        let ids: Vec<String> = (0..50).map(|_| short_id()).collect();
        let mut deduped = ids.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), ids.len());
    }

    #[test]
    fn test_timestamp_is_valid() {
        chrono::DateTime::parse_from_rfc3339(&timestamp()).unwrap();
    }

    #[test]
    fn test_copy_tree() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir(src.path().join("docs")).unwrap();
        std::fs::write(src.path().join("agent.json"), "{}").unwrap();
        std::fs::write(src.path().join("docs").join("README.md"), "# Agent").unwrap();

        let dst = tempfile::tempdir().unwrap();
        let target = dst.path().join("copy");
        copy_tree(src.path(), &target).unwrap();

        assert!(target.join("agent.json").exists());
        assert_eq!(
            std::fs::read_to_string(target.join("docs/README.md")).unwrap(),
            "# Agent"
        );
    }

    #[test]
    fn test_expand_home_tilde() {
        let expanded = expand_home("~/x");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.ends_with("x"));
    }

    #[test]
    fn test_expand_home_absolute() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
    }
}
