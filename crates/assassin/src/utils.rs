//! Small process-level helpers

use std::sync::OnceLock;

/// Name of this instance in logs and alerts, taken from the host name
pub fn instance_name() -> &'static str {
    static NAME: OnceLock<String> = OnceLock::new();
    NAME.get_or_init(|| {
        ["HOSTNAME", "COMPUTERNAME"]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
            .or_else(|| {
                std::fs::read_to_string("/etc/hostname")
                    .ok()
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
            })
            .unwrap_or_else(|| "localhost".to_string())
    })
}

/// Render an error with its full cause chain, one cause per line
pub fn render_error_chain(err: &anyhow::Error) -> String {
    format!("{err:?}")
}
