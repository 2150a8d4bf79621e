//! `mkcorpus sources`: configured sources and a cheap health check.

use anyhow::Result;

use crate::config::Config;

/// One row of `mkcorpus sources`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatus {
    pub name: String,
    pub kind: &'static str,
    pub target: String,
    pub healthy: bool,
    pub notes: Option<String>,
}

/// Inspect every configured source without touching the network.
pub fn get_sources(config: &Config) -> Vec<SourceStatus> {
    let mut statuses = Vec::new();

    for (name, fs) in &config.sources.filesystem {
        let healthy = fs.root.is_dir();
        statuses.push(SourceStatus {
            name: name.clone(),
            kind: "filesystem",
            target: fs.root.display().to_string(),
            healthy,
            notes: (!healthy).then(|| "root does not exist".to_string()),
        });
    }

    for (name, http) in &config.sources.http {
        let probe = http.listing_url.replace("{page}", &http.first_page.to_string());
        let notes = match reqwest::Url::parse(&probe) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => None,
            Ok(url) => Some(format!("unsupported scheme '{}'", url.scheme())),
            Err(e) => Some(format!("invalid listing_url: {}", e)),
        };
        statuses.push(SourceStatus {
            name: name.clone(),
            kind: "http",
            target: http.listing_url.clone(),
            healthy: notes.is_none(),
            notes,
        });
    }

    statuses.sort_by(|a, b| a.name.cmp(&b.name));
    statuses
}

pub fn list_sources(config: &Config) -> Result<()> {
    let statuses = get_sources(config);
    if statuses.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    println!("{:<20} {:<12} {:<8} TARGET", "SOURCE", "KIND", "HEALTHY");
    for s in &statuses {
        let target = match &s.notes {
            Some(note) => format!("{} ({})", s.target, note),
            None => s.target.clone(),
        };
        println!("{:<20} {:<12} {:<8} {}", s.name, s.kind, s.healthy, target);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_missing_roots_and_bad_urls() {
        let config: Config = toml::from_str(
            r#"
[sources.filesystem.acts]
root = "/definitely/not/here"

[sources.http.fca]
listing_url = "ftp://example.test/?page={page}"
pages = 1
document_url = "https://example.test/{id}"

[sources.http.hca]
listing_url = "https://example.test/?page={page}"
pages = 1
document_url = "https://example.test/{id}"
"#,
        )
        .unwrap();

        let statuses = get_sources(&config);
        let names: Vec<_> = statuses.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["acts", "fca", "hca"]);
        assert!(!statuses[0].healthy);
        assert!(!statuses[1].healthy);
        assert!(statuses[1].notes.as_deref().unwrap().contains("ftp"));
        assert!(statuses[2].healthy);
    }
}
