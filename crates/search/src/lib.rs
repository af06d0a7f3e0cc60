//! kforge search: fuzzy ranking over resource metadata.
//! Typed tokens (`g:`, `v:`, `src:`) filter exactly; the rest is fuzzy-matched.

#![forbid(unsafe_code)]

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use kforge_core::{normalize_group, ResourceMetadata};
use tracing::debug;

pub type DocId = u32;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Hit {
    pub doc: DocId,
    pub score: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct SearchOpts {
    pub limit: usize,
    pub min_score: Option<f32>,
}

impl Default for SearchOpts {
    fn default() -> Self {
        Self { limit: 20, min_score: None }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SearchDebugInfo {
    pub total: usize,
    pub after_group: usize,
    pub after_version: usize,
    pub after_source: usize,
    pub matched: usize,
}

/// Search view over a fixed set of metadata entries. Rebuild when the source
/// index is reloaded.
pub struct ResourceSearch {
    docs: Vec<ResourceMetadata>,
    // "<kind> <displayName> <group>" per doc
    texts: Vec<String>,
    groups: Vec<String>,
    versions: Vec<String>,
    sources: Vec<String>,
}

#[derive(Debug, Default)]
struct ParsedQuery<'q> {
    groups: Vec<&'q str>,
    versions: Vec<&'q str>,
    sources: Vec<&'q str>,
    free: Vec<&'q str>,
}

fn parse_query(q: &str) -> ParsedQuery<'_> {
    let mut out = ParsedQuery::default();
    for tok in q.split_whitespace() {
        if let Some(rest) = tok.strip_prefix("g:") {
            if !rest.is_empty() { out.groups.push(rest); continue; }
        }
        if let Some(rest) = tok.strip_prefix("v:") {
            if !rest.is_empty() { out.versions.push(rest); continue; }
        }
        if let Some(rest) = tok.strip_prefix("src:") {
            if !rest.is_empty() { out.sources.push(rest); continue; }
        }
        out.free.push(tok);
    }
    out
}

impl ResourceSearch {
    pub fn build<'a>(entries: impl IntoIterator<Item = &'a ResourceMetadata>) -> Self {
        let mut docs: Vec<ResourceMetadata> = entries.into_iter().cloned().collect();
        docs.sort_by(|a, b| a.key.cmp(&b.key));
        let texts = docs.iter().map(|m| format!("{} {} {}", m.kind, m.display_name, m.group)).collect();
        let groups = docs.iter().map(|m| m.group.to_ascii_lowercase()).collect();
        let versions = docs.iter().map(|m| m.version.to_ascii_lowercase()).collect();
        let sources = docs.iter().map(|m| m.source.as_deref().unwrap_or("").to_ascii_lowercase()).collect();
        metrics::gauge!("search_docs", docs.len() as f64);
        Self { docs, texts, groups, versions, sources }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn doc(&self, id: DocId) -> Option<&ResourceMetadata> {
        self.docs.get(id as usize)
    }

    pub fn search(&self, q: &str, opts: SearchOpts) -> Vec<Hit> {
        self.search_with_debug(q, opts).0
    }

    pub fn search_with_debug(&self, q: &str, opts: SearchOpts) -> (Vec<Hit>, SearchDebugInfo) {
        let started = std::time::Instant::now();
        let mut dbg = SearchDebugInfo { total: self.docs.len(), ..Default::default() };
        if q.trim().is_empty() {
            return (Vec::new(), dbg);
        }
        let parsed = parse_query(q);
        let matches_any = |values: &[&str], field: &str| {
            values.is_empty() || values.iter().any(|v| normalize_group(&v.to_ascii_lowercase()) == field)
        };

        let mut candidates: Vec<usize> = (0..self.docs.len()).filter(|&i| matches_any(&parsed.groups, &self.groups[i])).collect();
        dbg.after_group = candidates.len();
        candidates.retain(|&i| parsed.versions.is_empty() || parsed.versions.iter().any(|v| v.eq_ignore_ascii_case(&self.versions[i])));
        dbg.after_version = candidates.len();
        candidates.retain(|&i| parsed.sources.is_empty() || parsed.sources.iter().any(|s| s.eq_ignore_ascii_case(&self.sources[i])));
        dbg.after_source = candidates.len();

        let matcher = SkimMatcherV2::default().ignore_case();
        let free_q = parsed.free.join(" ");
        let mut hits: Vec<Hit> = Vec::new();
        for i in candidates {
            let score = if free_q.is_empty() {
                0.0
            } else {
                match matcher.fuzzy_match(&self.texts[i], &free_q) {
                    Some(s) => s as f32,
                    None => continue,
                }
            };
            if opts.min_score.map(|m| score >= m).unwrap_or(true) {
                hits.push(Hit { doc: i as DocId, score });
            }
        }
        dbg.matched = hits.len();

        // Stable ranking: score desc, display name asc, key asc
        hits.sort_by(|a, b| {
            b.score.total_cmp(&a.score).then_with(|| {
                let (am, bm) = (&self.docs[a.doc as usize], &self.docs[b.doc as usize]);
                am.display_name.cmp(&bm.display_name).then_with(|| am.key.cmp(&bm.key))
            })
        });
        hits.truncate(opts.limit);
        metrics::histogram!("search_eval_ms", started.elapsed().as_secs_f64() * 1_000.0);
        debug!(query = %q, hits = hits.len(), "fuzzy search");
        (hits, dbg)
    }
}
