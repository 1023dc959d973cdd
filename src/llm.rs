//! Generative-model collaborators and the prompts we send them.
//!
//! The traits return raw response text. Parsing lives next to the code that consumes it
//! (`moments::parse_moments`, `translate::parse_translations`, [`parse_metadata`]) so every
//! adapter gets the same tolerance for fenced or chatty output.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::Result;
use crate::moments::strip_code_fence;
use crate::transcript::Transcript;
use crate::translate::TranslationItem;

/// Proposes candidate clip windows for a whole transcript.
pub trait MomentSuggester: Send + Sync {
    fn suggest_moments(&self, transcript: &Transcript) -> Result<String>;
}

/// Writes social-media metadata for one clip's script.
pub trait MetadataGenerator: Send + Sync {
    fn generate_metadata(&self, script_text: &str, language: Option<&str>) -> Result<String>;
}

/// Title, description and hashtags for one uploaded clip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

impl ClipMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.description.is_empty() && self.hashtags.is_empty()
    }
}

/// Ask `generator` for metadata; any failure yields [`ClipMetadata::default`].
pub fn clip_metadata(
    script_text: &str,
    language: Option<&str>,
    generator: &dyn MetadataGenerator,
) -> ClipMetadata {
    if script_text.trim().is_empty() {
        return ClipMetadata::default();
    }

    match generator.generate_metadata(script_text, language) {
        Ok(raw) => parse_metadata(&raw).unwrap_or_else(|| {
            warn!("metadata response unusable; using empty metadata");
            ClipMetadata::default()
        }),
        Err(err) => {
            warn!(error = %err, "metadata generation failed; using empty metadata");
            ClipMetadata::default()
        }
    }
}

/// Read a metadata object, tolerating fences, a leading `#` on hashtags, and a
/// comma/space separated hashtag string instead of a list.
pub fn parse_metadata(raw: &str) -> Option<ClipMetadata> {
    let value: Value = serde_json::from_str(strip_code_fence(raw)).ok()?;
    let obj = value.as_object()?;

    let text = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_owned())
            .unwrap_or_default()
    };

    let hashtags = match obj.get("hashtags") {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).filter_map(hashtag).collect(),
        Some(Value::String(s)) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter_map(hashtag)
            .collect(),
        _ => Vec::new(),
    };

    Some(ClipMetadata {
        title: text("title"),
        description: text("description"),
        hashtags,
    })
}

fn hashtag(raw: &str) -> Option<String> {
    let tag = raw.trim().trim_start_matches('#');
    (!tag.is_empty()).then(|| tag.to_owned())
}

const MOMENTS_INSTRUCTIONS: &str = "\
This is a podcast video transcript consisting of words, along with each word's start and end time. \
I am looking to create clips between a minimum of 40 and maximum of 60 seconds long. The clip should never exceed 60 seconds.

Your task is to find and extract stories, or questions and their corresponding answers from the transcript.
Each clip should begin with the question and conclude with the answer.
It is acceptable for the clip to include a few additional sentences before a question if it aids in contextualizing the question.

# Please adhere to the following rules:
- Ensure that clips do not overlap with one another.
- Start and end timestamps of the clips should align perfectly with the sentence boundaries in the transcript.
- Only use the start and end timestamps provided in the input. Modifying timestamps is not allowed.
- Format the output as a list of JSON objects, each representing a clip with 'start' and 'end' timestamps: [{\"start\": seconds, \"end\": seconds}, ...clip2, clip3].
- Do not end a clip in the middle of a speaker's sentence.
- If the answer continues past 60 seconds, skip that candidate clip instead of trimming the speaker mid-sentence.

# Avoid including:
- Moments of greeting, thanking, or saying goodbye.
- Non-question and answer interactions.

If there are no valid clips to extract, the output should be an empty list [].
Transcript:
";

/// The moment-suggestion prompt: instructions followed by the token list as JSON.
pub fn moments_prompt(transcript: &Transcript) -> Result<String> {
    Ok(format!("{MOMENTS_INSTRUCTIONS}{}", transcript.to_json()?))
}

/// The caption translation prompt for one clip's batch.
pub fn translation_prompt(items: &[TranslationItem], target_language: &str) -> Result<String> {
    Ok(format!(
        "Translate the `text` of every item below into the language with code `{target_language}`.\n\
         These are short on-screen captions from one video clip, in order.\n\
         Return a JSON list with exactly one {{\"index\": number, \"text\": string}} object per input item, \
         keeping each item's index unchanged. Do not merge, split or drop items.\n\
         Items:\n{}",
        serde_json::to_string(items)?
    ))
}

/// The metadata prompt for one clip's script text.
pub fn metadata_prompt(script_text: &str, language: Option<&str>) -> String {
    let language_line = match language {
        Some(lang) => format!("Write the title, description and hashtags in the language with code `{lang}`.\n"),
        None => String::new(),
    };

    format!(
        "You write metadata for short vertical podcast clips posted to YouTube Shorts.\n\
         Given the clip's spoken script, return a JSON object \
         {{\"title\": string, \"description\": string, \"hashtags\": [string]}}.\n\
         Keep the title under 70 characters and use 3 to 6 hashtags without the leading '#'.\n\
         {language_line}\
         Script:\n{script_text}"
    )
}
