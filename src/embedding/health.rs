/// Startup check that the Ollama server is reachable and has the configured models
use serde::Deserialize;
use std::collections::BTreeSet;

#[derive(Deserialize, Default)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: Option<String>,
    model: Option<String>,
    #[serde(default)]
    details: Option<TagDetails>,
}

#[derive(Deserialize)]
struct TagDetails {
    parameter_size: Option<String>,
    quantization_level: Option<String>,
}

impl TagEntry {
    fn pretty(&self) -> String {
        let name = self.name.clone().unwrap_or_else(|| "-".to_string());
        let mut extras = Vec::new();
        if let Some(model) = &self.model {
            if Some(model) != self.name.as_ref() {
                extras.push(model.clone());
            }
        }
        if let Some(details) = &self.details {
            extras.extend(details.parameter_size.clone());
            extras.extend(details.quantization_level.clone());
        }
        if extras.is_empty() {
            name
        } else {
            format!("{} ({})", name, extras.join(", "))
        }
    }
}

#[derive(Deserialize)]
struct VersionResponse {
    version: Option<String>,
}

/// Result of probing an Ollama server
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub base_url: String,
    pub version: Option<String>,
    /// Installed models, pretty-printed and sorted
    pub installed: Vec<String>,
    pub embedding_model_ok: bool,
    pub chat_model_ok: bool,
}

impl HealthReport {
    /// Missing models as `ollama pull` hints, empty when everything is installed
    pub fn missing(&self, embedding_model: &str, chat_model: &str) -> Vec<String> {
        let mut out = Vec::new();
        if !self.embedding_model_ok {
            out.push(format!("embedding={}", display(embedding_model)));
        }
        if !self.chat_model_ok {
            out.push(format!("chat={}", display(chat_model)));
        }
        out
    }
}

fn display(s: &str) -> &str {
    if s.trim().is_empty() {
        "-"
    } else {
        s
    }
}

/// Lowercased names plus their tagless and path-tail variants
fn add_canonical(set: &mut BTreeSet<String>, name: Option<&str>) {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return;
    };
    let lc = name.to_lowercase();
    if let Some((base, _)) = lc.split_once(':') {
        if !base.is_empty() {
            set.insert(base.to_string());
        }
    }
    if let Some((_, tail)) = lc.rsplit_once('/') {
        set.insert(tail.to_string());
        if let Some((base, _)) = tail.split_once(':') {
            if !base.is_empty() {
                set.insert(base.to_string());
            }
        }
    }
    set.insert(lc);
}

/// Whether `configured` names one of the installed models, tolerating tags
pub fn is_installed(configured: &str, canonical: &BTreeSet<String>) -> bool {
    let lc = configured.trim().to_lowercase();
    if lc.is_empty() {
        return false;
    }
    if canonical.contains(&lc) {
        return true;
    }
    if let Some((base, _)) = lc.split_once(':') {
        if !base.is_empty() && canonical.contains(base) {
            return true;
        }
    }
    !lc.contains(':') && canonical.contains(&format!("{}:latest", lc))
}

/// Query `GET /api/tags` (falling back to `POST /api/tags {}`) and `/api/version`
pub async fn check_ollama(
    http: &reqwest::Client,
    base_url: &str,
    embedding_model: &str,
    chat_model: &str,
) -> Result<HealthReport, reqwest::Error> {
    let base_url = base_url.trim_end_matches('/');
    let url = format!("{}/api/tags", base_url);
    tracing::info!("Checking Ollama at {}", base_url);

    let resp = http.get(&url).send().await?;
    let tags: TagsResponse = if resp.status().is_success() {
        resp.json().await?
    } else {
        http.post(&url)
            .json(&serde_json::json!({}))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?
    };

    let mut canonical = BTreeSet::new();
    for entry in &tags.models {
        add_canonical(&mut canonical, entry.name.as_deref());
        add_canonical(&mut canonical, entry.model.as_deref());
    }
    tracing::debug!("Canonical model names: {:?}", canonical);

    let mut installed: Vec<String> = tags.models.iter().map(TagEntry::pretty).collect();
    installed.sort();

    let version = match http.get(format!("{}/api/version", base_url)).send().await {
        Ok(resp) => resp.json::<VersionResponse>().await.ok().and_then(|v| v.version),
        Err(_) => None,
    };

    let report = HealthReport {
        base_url: base_url.to_string(),
        version,
        installed,
        embedding_model_ok: is_installed(embedding_model, &canonical),
        chat_model_ok: is_installed(chat_model, &canonical),
    };

    tracing::info!(
        "Configured embedding model: {} [{}]",
        display(embedding_model),
        if report.embedding_model_ok { "OK" } else { "MISSING" }
    );
    tracing::info!(
        "Configured chat model     : {} [{}]",
        display(chat_model),
        if report.chat_model_ok { "OK" } else { "MISSING" }
    );
    if let Some(v) = &report.version {
        tracing::info!("Ollama version: {}", v);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(names: &[&str]) -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        for n in names {
            add_canonical(&mut set, Some(n));
        }
        set
    }

    #[test]
    fn test_tag_matching() {
        let set = canonical(&["llama3:8b", "library/nomic-embed-text:latest"]);
        assert!(is_installed("llama3", &set));
        assert!(is_installed("LLAMA3:8b", &set));
        assert!(is_installed("llama3:70b", &set));
        assert!(is_installed("nomic-embed-text", &set));
        assert!(!is_installed("mistral", &set));
        assert!(!is_installed("", &set));
    }

    #[test]
    fn test_latest_resolution() {
        let mut set = BTreeSet::new();
        set.insert("phi3:latest".to_string());
        assert!(is_installed("phi3", &set));
    }
}
