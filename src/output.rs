use crate::backlog::{Backlog, BacklogItem};
use crate::cache::{CacheResult, CacheSource};

const NAME_WIDTH: usize = 60;

/// Items sorted by number
fn sorted(backlog: &Backlog) -> Vec<&BacklogItem> {
  let mut items: Vec<&BacklogItem> = backlog.values().collect();
  items.sort_by(|a, b| a.number.cmp(&b.number));
  items
}

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Plain-text table: number, name, tag
pub fn render_table(backlog: &Backlog) -> String {
  let items = sorted(backlog);
  let number_width = items
    .iter()
    .map(|i| i.number.chars().count())
    .chain(std::iter::once("NUMBER".len()))
    .max()
    .unwrap_or(0);

  let mut out = format!(
    "{:<nw$}  {:<w$}  TAG\n",
    "NUMBER",
    "NAME",
    nw = number_width,
    w = NAME_WIDTH
  );
  for item in items {
    let line = format!(
      "{:<nw$}  {:<w$}  {}",
      item.number,
      truncate(&item.name, NAME_WIDTH),
      item.tag.as_deref().unwrap_or("-"),
      nw = number_width,
      w = NAME_WIDTH
    );
    out.push_str(line.trim_end());
    out.push('\n');
  }
  out
}

/// JSON array of items sorted by number
pub fn render_json(backlog: &Backlog) -> serde_json::Result<String> {
  serde_json::to_string_pretty(&sorted(backlog))
}

/// One-line summary of where the data came from
pub fn render_status(result: &CacheResult<Backlog>) -> String {
  let source = match result.source {
    CacheSource::Network => "reloaded",
    CacheSource::CacheFresh => "unchanged",
    CacheSource::Offline => "offline",
  };
  let loaded = result
    .loaded_at
    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
    .unwrap_or_else(|| "never".to_string());

  match &result.error {
    Some(e) => format!(
      "{} items ({}, loaded {}): {}",
      result.data.len(),
      source,
      loaded,
      e
    ),
    None => format!("{} items ({}, loaded {})", result.data.len(), source, loaded),
  }
}
