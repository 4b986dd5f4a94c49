//! Fetches a previously uploaded report from the MemBrowse API and renders
//! it as a human-readable summary.

use serde_json::Value;

pub struct SummaryClient {
    client: reqwest::blocking::Client,
    api_url: String,
    api_key: String,
}

impl SummaryClient {
    pub fn new(api_key: &str, api_url: &str) -> anyhow::Result<Self> {
        Ok(SummaryClient {
            client: reqwest::blocking::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()?,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn fetch_summary(&self, commit_sha: &str) -> anyhow::Result<Value> {
        let url = format!("{}/summary?commit={commit_sha}", self.api_url);
        let response: Value = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()?
            .json()?;

        if !response.get("success").and_then(Value::as_bool).unwrap_or(false) {
            let error = response
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error");
            anyhow::bail!("API request failed: {error}");
        }
        Ok(response)
    }
}

/// Renders a summary response as plain text: one block of region/section
/// deltas per target. Falls back to pretty-printed JSON for any shape this
/// formatter doesn't recognize, rather than failing.
pub fn render_summary(response: &Value) -> String {
    let Some(targets) = response.get("data").and_then(|d| d.get("targets")).and_then(Value::as_array) else {
        return serde_json::to_string_pretty(response).unwrap_or_default();
    };

    let mut out = String::new();
    for target in targets {
        let name = target.get("target_name").and_then(Value::as_str).unwrap_or("Unknown");
        out.push_str(&format!("## {name}\n\n"));

        if let Some(dashboard_url) = target.get("dashboard_url").and_then(Value::as_str) {
            out.push_str(&format!("Dashboard: {dashboard_url}\n\n"));
        }

        render_region_deltas(target, &mut out);
        render_budget_alerts(target, &mut out);
        out.push('\n');
    }
    out
}

fn render_region_deltas(target: &Value, out: &mut String) {
    let regions = target
        .get("changes_summary")
        .and_then(|c| c.get("changes"))
        .and_then(|c| c.get("regions"))
        .and_then(|r| r.get("modified"))
        .and_then(Value::as_array);

    let Some(regions) = regions else { return };
    if regions.is_empty() {
        return;
    }

    out.push_str("Region changes:\n");
    for region in regions {
        let region_name = region.get("name").and_then(Value::as_str).unwrap_or("Unknown");
        let used_size = region.get("used_size").and_then(Value::as_i64).unwrap_or(0);
        let old_used = region.get("old").and_then(|o| o.get("used_size")).and_then(Value::as_i64);

        match old_used {
            Some(old) if old != used_size => {
                let delta = used_size - old;
                let sign = if delta >= 0 { "+" } else { "" };
                out.push_str(&format!("  {region_name}: {used_size} bytes ({sign}{delta})\n"));
            }
            _ => {}
        }
    }
    out.push('\n');
}

fn render_budget_alerts(target: &Value, out: &mut String) {
    let Some(budgets) = target.get("alerts").and_then(|a| a.get("budgets")).and_then(Value::as_array) else {
        return;
    };
    if budgets.is_empty() {
        return;
    }

    out.push_str("Budget alerts:\n");
    for alert in budgets {
        let region = alert.get("region").and_then(Value::as_str).unwrap_or("Unknown");
        let budget_type = alert.get("budget_type").and_then(Value::as_str).unwrap_or("unknown");
        let threshold = alert.get("threshold").and_then(Value::as_i64).unwrap_or(0);
        let current = alert.get("current").and_then(Value::as_i64).unwrap_or(0);
        out.push_str(&format!("  {region} ({budget_type}): {current} / {threshold} bytes\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_region_delta_when_changed() {
        let response = json!({
            "data": {
                "targets": [{
                    "target_name": "esp32",
                    "changes_summary": {
                        "changes": {
                            "regions": {
                                "modified": [{
                                    "name": "FLASH",
                                    "used_size": 1200,
                                    "old": { "used_size": 1000 }
                                }]
                            }
                        }
                    }
                }]
            }
        });
        let text = render_summary(&response);
        assert!(text.contains("esp32"));
        assert!(text.contains("FLASH: 1200 bytes (+200)"));
    }

    #[test]
    fn falls_back_to_json_for_unrecognized_shape() {
        let response = json!({ "something": "else" });
        let text = render_summary(&response);
        assert!(text.contains("something"));
    }

    #[test]
    fn skips_unchanged_regions() {
        let response = json!({
            "data": {
                "targets": [{
                    "target_name": "x",
                    "changes_summary": { "changes": { "regions": { "modified": [{
                        "name": "RAM", "used_size": 500, "old": { "used_size": 500 }
                    }] } } }
                }]
            }
        });
        let text = render_summary(&response);
        assert!(!text.contains("RAM:"));
    }
}
