use crate::container::{UNPRIVILEGED_UID, compute_id_map};
use crate::outln;
use crate::types::Credentials;
use crate::util::set_json_output;
use anyhow::{Context, Result};
use serde_json::json;

/// Prints the `lxc.id_map` lines the container gets for `creds`.
pub fn id_map(creds: Credentials) -> Result<()> {
    let ranges = compute_id_map(&creds, UNPRIVILEGED_UID)
        .with_context(|| format!("Mapping {}", creds))?;

    let mut json_ranges = Vec::new();
    for range in &ranges {
        outln!("lxc.id_map = {}", range);
        json_ranges.push(json!({
            "kind": range.kind.tag(),
            "sandbox_start": range.sandbox_start,
            "host_start": range.host_start,
            "length": range.length,
        }));
    }
    set_json_output("id_map", &json!(json_ranges));
    Ok(())
}
