//! Model catalogue: reasoning allow-list, display names and ordering

use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "claude-opus-4-5-20250514";

/// Models accepting an extended reasoning budget
pub const EXTENDED_REASONING_MODELS: &[&str] = &[
  "claude-opus-4-5-20250514",
  "claude-opus-4-20250514",
  "claude-sonnet-4-20250514",
  "claude-sonnet-4-5-20250929",
];

/// Used when the provider model listing is unavailable
pub const FALLBACK_MODELS: &[(&str, &str)] = &[
  ("Claude Opus 4.5", "claude-opus-4-5-20250514"),
  ("Claude Opus 4", "claude-opus-4-20250514"),
  ("Claude Sonnet 4.5", "claude-sonnet-4-5-20250929"),
  ("Claude Sonnet 4", "claude-sonnet-4-20250514"),
  ("Claude Haiku 4.5", "claude-haiku-4-5-20251001"),
];

/// A model offered to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry
{   pub display_name: String
  , pub id: String
}

/// True when `model_id` contains an allow-listed identifier
pub fn supports_extended_reasoning(model_id: &str) -> bool
{   EXTENDED_REASONING_MODELS
      .iter()
      .any(|m| model_id.contains(m))
}

/// `claude-opus-4-5-20250514` becomes `Claude Opus 4.5`.
/// Non-Claude identifiers yield `None`.
pub fn display_name(model_id: &str) -> Option<String>
{   let rest = model_id.strip_prefix("claude-")?;
    let parts: Vec<&str> = rest.split('-').collect();
    if parts.len() < 2
    {   return None;
    }

    let family = capitalize(parts[0]);
    let is_number = |s: &str| {
      !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
    };

    let mut version = String::new();
    if is_number(parts[1])
    {   version.push_str(parts[1]);
        // a second short number is a minor version, not a date
        if parts.len() >= 3 && is_number(parts[2]) && parts[2].len() < 8
        {   version.push('.');
            version.push_str(parts[2]);
        }
    }

    if version.is_empty()
    {   Some(format!("Claude {}", family))
    } else
    {   Some(format!("Claude {} {}", family, version))
    }
}

fn capitalize(s: &str) -> String
{   let mut chars = s.chars();
    match chars.next()
    {   Some(first) => {
          first.to_uppercase().chain(chars).collect()
        }
      , None => String::new()
    }
}

fn family_rank(name: &str) -> u8
{   let lower = name.to_lowercase();
    if lower.contains("opus") { 0 }
    else if lower.contains("sonnet") { 1 }
    else if lower.contains("haiku") { 2 }
    else { 3 }
}

fn version_of(name: &str) -> f32
{   name.rsplit(' ')
      .next()
      .and_then(|v| v.parse::<f32>().ok())
      .unwrap_or(0.0)
}

/// Build the caller-facing catalogue from raw model identifiers:
/// Opus, Sonnet, Haiku, then others; newer versions first.
pub fn catalogue<I, S>(ids: I) -> Vec<ModelEntry>
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{   let mut entries: Vec<ModelEntry> = ids
      .into_iter()
      .filter_map(|id| {
        let id = id.as_ref();
        display_name(id).map(|display_name| ModelEntry
        {   display_name
          , id: id.to_string()
        })
      })
      .collect();

    entries.sort_by(|a, b| {
      family_rank(&a.display_name)
        .cmp(&family_rank(&b.display_name))
        .then_with(|| {
          version_of(&b.display_name)
            .total_cmp(&version_of(&a.display_name))
        })
        .then_with(|| a.display_name.cmp(&b.display_name))
    });
    entries
}

/// Static catalogue used when listing fails
pub fn fallback_catalogue() -> Vec<ModelEntry>
{   FALLBACK_MODELS
      .iter()
      .map(|(name, id)| ModelEntry
      {   display_name: name.to_string()
        , id: id.to_string()
      })
      .collect()
}
