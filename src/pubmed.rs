//! PubMed helpers: PMID detection, E-utilities URLs and response parsing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use url::Url;

use crate::error::{AppError, Result};
use crate::scraper::fragment_text;

static PMID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:pubmed\.ncbi\.nlm\.nih\.gov/|ncbi\.nlm\.nih\.gov/pubmed/)(\d{1,9})(?:[/?#]|$)")
        .expect("Failed to compile PMID pattern")
});

static ARTICLE_TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<ArticleTitle[^>]*>(.*?)</ArticleTitle>").expect("Failed to compile ArticleTitle pattern")
});

static ABSTRACT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<AbstractText(?:\s+[^>]*?Label="([^"]*)")?[^>]*>(.*?)</AbstractText>"#)
        .expect("Failed to compile AbstractText pattern")
});

static JOURNAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<Journal>.*?<Title>(.*?)</Title>").expect("Failed to compile Journal pattern")
});

/// Returns the numeric PMID if `url` points at a PubMed article page.
pub fn detect_pmid(url: &str) -> Option<String> {
    PMID_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn article_url(pmid: &str) -> String {
    format!("https://pubmed.ncbi.nlm.nih.gov/{}/", pmid)
}

pub fn pmc_mirror_url(pmc_base: &str, pmid: &str) -> String {
    format!("{}/{}/", pmc_base.trim_end_matches('/'), pmid)
}

/// Endpoints and credentials for NCBI E-utilities.
#[derive(Debug, Clone)]
pub struct EUtils {
    base_url: String,
    api_key: Option<String>,
}

impl EUtils {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
        }
    }

    fn endpoint(&self, name: &str, params: &[(&str, &str)]) -> Result<String> {
        let raw = format!("{}/{}", self.base_url.trim_end_matches('/'), name);
        let mut pairs: Vec<(&str, &str)> = params.to_vec();
        if let Some(key) = self.api_key.as_deref() {
            pairs.push(("api_key", key));
        }
        Url::parse_with_params(&raw, &pairs)
            .map(String::from)
            .map_err(|e| AppError::ConfigError(format!("Invalid E-utilities URL {}: {}", raw, e)))
    }

    pub fn efetch_url(&self, pmid: &str) -> Result<String> {
        self.endpoint("efetch.fcgi", &[("db", "pubmed"), ("id", pmid), ("retmode", "xml")])
    }

    pub fn esearch_url(&self, term: &str, retmax: usize) -> Result<String> {
        let retmax = retmax.to_string();
        self.endpoint(
            "esearch.fcgi",
            &[
                ("db", "pubmed"),
                ("term", term),
                ("retmax", &retmax),
                ("retmode", "json"),
                ("sort", "relevance"),
            ],
        )
    }

    pub fn esummary_url(&self, ids: &[String]) -> Result<String> {
        let joined = ids.join(",");
        self.endpoint("esummary.fcgi", &[("db", "pubmed"), ("id", &joined), ("retmode", "json")])
    }
}

/// Fields pulled from an `efetch` XML record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PubMedRecord {
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    pub journal: Option<String>,
}

impl PubMedRecord {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.abstract_text.is_none()
    }
}

/// Escaped inline markup (`&lt;i&gt;`) only turns into tags after the first decode.
fn clean_xml_text(raw: &str) -> String {
    fragment_text(&fragment_text(raw))
}

pub fn parse_efetch(xml: &str) -> PubMedRecord {
    let title = ARTICLE_TITLE_RE
        .captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| clean_xml_text(m.as_str()))
        .filter(|t| !t.is_empty());

    let sections: Vec<String> = ABSTRACT_RE
        .captures_iter(xml)
        .filter_map(|caps| {
            let body = clean_xml_text(caps.get(2)?.as_str());
            if body.is_empty() {
                return None;
            }
            Some(match caps.get(1) {
                Some(label) if !label.as_str().is_empty() => format!("{}: {}", label.as_str(), body),
                _ => body,
            })
        })
        .collect();

    let journal = JOURNAL_RE
        .captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| clean_xml_text(m.as_str()))
        .filter(|j| !j.is_empty());

    PubMedRecord {
        title,
        abstract_text: (!sections.is_empty()).then(|| sections.join("\n")),
        journal,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchIds {
    pub total: u64,
    pub ids: Vec<String>,
}

pub fn parse_esearch(value: &Value) -> Result<SearchIds> {
    let result = value
        .get("esearchresult")
        .ok_or_else(|| AppError::ParseError("esearch response has no esearchresult".to_string()))?;

    let ids = result
        .get("idlist")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(|id| id.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let total = match result.get("count") {
        Some(Value::String(raw)) => raw.parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        _ => 0,
    };

    Ok(SearchIds { total, ids })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRecord {
    pub pmid: String,
    pub title: String,
    pub authors: Vec<String>,
    pub journal: Option<String>,
    pub pub_date: Option<String>,
}

/// Reads an `esummary` JSON document, keeping the order of `result.uids`.
pub fn parse_esummary(value: &Value) -> Result<Vec<SummaryRecord>> {
    let result = value
        .get("result")
        .ok_or_else(|| AppError::ParseError("esummary response has no result".to_string()))?;

    let uids = result
        .get("uids")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut records = Vec::with_capacity(uids.len());
    for uid in uids.iter().filter_map(Value::as_str) {
        let Some(doc) = result.get(uid) else { continue };
        let title = doc.get("title").and_then(Value::as_str).map(clean_xml_text).unwrap_or_default();
        if title.is_empty() {
            continue;
        }
        let authors = doc
            .get("authors")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|a| a.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let journal = doc
            .get("fulljournalname")
            .or_else(|| doc.get("source"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let pub_date = doc
            .get("pubdate")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        records.push(SummaryRecord {
            pmid: uid.to_string(),
            title,
            authors,
            journal,
            pub_date,
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_pmid_in_pubmed_urls() {
        assert_eq!(detect_pmid("https://pubmed.ncbi.nlm.nih.gov/12345678/").as_deref(), Some("12345678"));
        assert_eq!(detect_pmid("https://www.ncbi.nlm.nih.gov/pubmed/987?dopt=Abstract").as_deref(), Some("987"));
        assert_eq!(detect_pmid("https://pubmed.ncbi.nlm.nih.gov/?term=sleep"), None);
        assert_eq!(detect_pmid("https://example.com/12345678/"), None);
    }

    #[test]
    fn builds_eutils_urls() {
        let eutils = EUtils::new("https://eutils.ncbi.nlm.nih.gov/entrez/eutils/", None);
        assert_eq!(
            eutils.efetch_url("12345678").unwrap(),
            "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi?db=pubmed&id=12345678&retmode=xml"
        );
        let search = EUtils::new("https://e.test", Some("k".into())).esearch_url("a OR b", 5).unwrap();
        assert!(search.contains("term=a+OR+b"));
        assert!(search.ends_with("&api_key=k"));
        assert_eq!(
            pmc_mirror_url("https://www.ncbi.nlm.nih.gov/pmc/articles/pmid", "12345678"),
            "https://www.ncbi.nlm.nih.gov/pmc/articles/pmid/12345678/"
        );
    }

    #[test]
    fn parses_structured_abstract() {
        let xml = r#"<PubmedArticle><Article><Journal><Title>Sleep Medicine</Title></Journal>
            <ArticleTitle>Melatonin and <i>shift</i> work.</ArticleTitle>
            <Abstract>
              <AbstractText Label="BACKGROUND" NlmCategory="BACKGROUND">Shift workers sleep less.</AbstractText>
              <AbstractText Label="RESULTS">Melatonin helped &amp; improved scores.</AbstractText>
            </Abstract></Article></PubmedArticle>"#;
        let record = parse_efetch(xml);
        assert_eq!(record.title.as_deref(), Some("Melatonin and shift work."));
        assert_eq!(
            record.abstract_text.as_deref(),
            Some("BACKGROUND: Shift workers sleep less.\nRESULTS: Melatonin helped & improved scores.")
        );
        assert_eq!(record.journal.as_deref(), Some("Sleep Medicine"));
        assert!(parse_efetch("<eFetchResult><ERROR>bad id</ERROR></eFetchResult>").is_empty());
    }

    #[test]
    fn decodes_numeric_entities_and_escaped_markup() {
        let record = parse_efetch(
            "<ArticleTitle>&#946;-blockers &lt;i&gt;in vivo&lt;/i&gt;</ArticleTitle>\
             <AbstractText>Caf&eacute; staff &#8211; 40 adults</AbstractText>",
        );
        assert_eq!(record.title.as_deref(), Some("β-blockers in vivo"));
        assert_eq!(record.abstract_text.as_deref(), Some("Café staff – 40 adults"));
    }

    #[test]
    fn parses_search_and_summary() {
        let ids = parse_esearch(&json!({"esearchresult": {"count": "42", "idlist": ["1", "2"]}})).unwrap();
        assert_eq!(ids, SearchIds { total: 42, ids: vec!["1".into(), "2".into()] });

        let summary = json!({"result": {
            "uids": ["2", "1"],
            "1": {"title": "First", "authors": [{"name": "Doe J"}], "source": "BMJ", "pubdate": "2020 Jan"},
            "2": {"title": "Second", "authors": [], "fulljournalname": "The Lancet", "pubdate": ""}
        }});
        let records = parse_esummary(&summary).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].pmid, "2");
        assert_eq!(records[0].journal.as_deref(), Some("The Lancet"));
        assert_eq!(records[0].pub_date, None);
        assert_eq!(records[1].authors, vec!["Doe J".to_string()]);
    }
}
