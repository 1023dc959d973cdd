//! Batch caption translation with index-based reconciliation.
//!
//! A clip's cues go out as one batch of `{index, text}` items. Whatever comes back is matched
//! to the source by `index`, so reordering, omissions, and garbage entries from the model never
//! shift a translation onto the wrong cue. Anything we cannot match keeps its source text.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::Result;
use crate::captions::CaptionCue;
use crate::moments::strip_code_fence;

/// One caption text tied to its position in the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationItem {
    pub index: usize,
    pub text: String,
}

/// External translation call.
///
/// Implementations receive the whole batch and return the raw response body; it is expected
/// to hold a JSON list of `{index, text}` items but is not trusted to.
pub trait Translator: Send + Sync {
    fn translate_batch(&self, items: &[TranslationItem], target_language: &str) -> Result<String>;
}

/// Build the batch for `cues`, indexed by position.
pub fn translation_items(cues: &[CaptionCue]) -> Vec<TranslationItem> {
    cues.iter()
        .enumerate()
        .map(|(index, cue)| TranslationItem {
            index,
            text: cue.text.clone(),
        })
        .collect()
}

/// Translate every cue's text, one output string per input cue in the same order.
///
/// Never fails: a failed call or unusable response yields the source texts, and each index
/// missing from the response keeps its own source text.
pub fn reconcile(
    cues: &[CaptionCue],
    target_language: &str,
    translator: &dyn Translator,
) -> Vec<String> {
    let source: Vec<String> = cues.iter().map(|cue| cue.text.clone()).collect();
    if cues.is_empty() {
        return source;
    }

    let items = translation_items(cues);
    let raw = match translator.translate_batch(&items, target_language) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(error = %err, language = target_language, "translation failed; keeping source text");
            return source;
        }
    };

    let Some(mut translated) = parse_translations(&raw) else {
        warn!(language = target_language, "translation response unusable; keeping source text");
        return source;
    };

    let matched = (0..cues.len())
        .filter(|idx| translated.contains_key(idx))
        .count();
    if matched < cues.len() {
        debug!(
            expected = cues.len(),
            matched,
            "translation response missing items; falling back per cue"
        );
    }

    source
        .into_iter()
        .enumerate()
        .map(|(idx, text)| translated.remove(&idx).unwrap_or(text))
        .collect()
}

/// Cues with the same timing and translated text.
pub fn translate_cues(
    cues: &[CaptionCue],
    target_language: &str,
    translator: &dyn Translator,
) -> Vec<CaptionCue> {
    reconcile(cues, target_language, translator)
        .into_iter()
        .zip(cues)
        .map(|(text, cue)| CaptionCue::new(cue.start_seconds, cue.end_seconds, text))
        .collect()
}

/// Pull `index -> text` out of a response.
///
/// Accepts a bare list or an object holding the list under `items` or `translations`.
/// Entries without a non-negative integer `index` and string `text` are skipped; the first
/// entry for an index wins. `None` means the top level was unusable.
pub fn parse_translations(raw: &str) -> Option<HashMap<usize, String>> {
    let value: Value = serde_json::from_str(strip_code_fence(raw)).ok()?;

    let list = match &value {
        Value::Array(list) => list,
        Value::Object(map) => match map.get("items").or_else(|| map.get("translations")) {
            Some(Value::Array(list)) => list,
            _ => return None,
        },
        _ => return None,
    };

    let mut out = HashMap::with_capacity(list.len());
    for entry in list {
        let Some(index) = entry.get("index").and_then(Value::as_u64) else {
            continue;
        };
        let Some(text) = entry.get("text").and_then(Value::as_str) else {
            continue;
        };
        let Ok(index) = usize::try_from(index) else {
            continue;
        };
        out.entry(index).or_insert_with(|| text.to_owned());
    }
    Some(out)
}
