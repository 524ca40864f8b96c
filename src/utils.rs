use std::time::{SystemTime, UNIX_EPOCH};

pub const SERVICE: &str = "basilchat";

pub fn now_millis() -> Result<u64, String> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| e.to_string())?
        .as_millis() as u64)
}

pub fn truncate_for_log(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max).collect();
        format!("{}…", truncated)
    }
}

/// Installs a global `tracing` subscriber honoring `RUST_LOG`. Safe to call
/// more than once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_text_untouched() {
        assert_eq!(truncate_for_log("hello", 16), "hello");
    }

    #[test]
    fn test_truncate_for_log_long_text_marked() {
        let out = truncate_for_log("abcdefghij", 4);
        assert_eq!(out, "abcd…");
    }
}
