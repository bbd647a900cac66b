//! ChunkPlanner: turns a decoded text body plus an extension hint into a
//! sequence of overlapping character windows with newline-snap bias.

/// Extensions that get a wider minimum window before overlap is taken into
/// account — structured formats read poorly when split mid-object.
const WIDE_WINDOW_EXTENSIONS: &[&str] = &["json", "xml"];

/// Derives `max_chars` for a coordinator from the configured ceiling and the
/// embedding model's token budget, per the sizing policy: the effective
/// ceiling never exceeds what ~4 chars/token says the model can hold.
pub fn max_chars_for_model(configured_max: usize, model_token_limit: usize) -> usize {
    let token_derived = ((0.8 * model_token_limit as f64) as usize).saturating_mul(4);
    configured_max.min(token_derived.max(500))
}

/// Derives `overlap` from `max_chars` and a configured ceiling:
/// `clamp(floor(0.05 * max_chars), 50, configured_overlap_max)`.
pub fn overlap_for_max_chars(max_chars: usize, configured_overlap_max: usize) -> usize {
    let proportional = (0.05 * max_chars as f64) as usize;
    proportional.clamp(50, configured_overlap_max.max(50))
}

fn effective_window(extension: &str, max_chars: usize, overlap: usize) -> (usize, usize) {
    let effective_max = if WIDE_WINDOW_EXTENSIONS.contains(&extension) {
        1500.max((0.75 * max_chars as f64) as usize)
    } else {
        max_chars
    };
    let effective_overlap = overlap.min(effective_max / 4);
    (effective_max, effective_overlap)
}

/// `plan(text, extension, max_chars, overlap) -> sequence of strings`.
///
/// Empty or all-whitespace input yields no chunks. Text shorter than the
/// effective window comes back as a single chunk.
pub fn plan(text: &str, extension: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let (effective_max, effective_overlap) = effective_window(extension, max_chars, overlap);

    if len <= effective_max {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let mut end = (start + effective_max).min(len);

        if end < len {
            let search_from = start + effective_max / 2;
            if let Some(nl_offset) = find_last_newline(&chars, search_from, end) {
                end = nl_offset + 1;
            }
        }
        end = end.max(start + 1);

        chunks.push(chars[start..end].iter().collect());

        if end >= len {
            break;
        }
        start = end.saturating_sub(effective_overlap).max(0);
        if start >= end {
            start = end;
        }
    }

    chunks
}

/// Finds the index of the last `\n` within `[search_from, end)`, if any.
fn find_last_newline(chars: &[char], search_from: usize, end: usize) -> Option<usize> {
    if search_from >= end {
        return None;
    }
    (search_from..end).rev().find(|&i| chars[i] == '\n')
}
