use crate::persist::types::{MatchRecord, PersistResult, ResultRow};

/// Serialize a match and its results as one JSON document.
pub fn match_to_json(record: &MatchRecord, results: &[ResultRow]) -> PersistResult<String> {
    let doc = serde_json::json!({ "match": record, "results": results });
    Ok(serde_json::to_string(&doc)?)
}

/// Parse a document written by `match_to_json`.
pub fn match_from_json(s: &str) -> PersistResult<(MatchRecord, Vec<ResultRow>)> {
    #[derive(serde::Deserialize)]
    struct Doc {
        #[serde(rename = "match")]
        record: MatchRecord,
        results: Vec<ResultRow>,
    }
    let doc: Doc = serde_json::from_str(s)?;
    Ok((doc.record, doc.results))
}
