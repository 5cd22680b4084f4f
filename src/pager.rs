//! Frame packing for multi-line replies.
//!
//! Lines are greedily packed into frames bounded by the configured text
//! length. When more than one frame results, each gets an `(i/N) ` prefix
//! and the packing budget shrinks so prefixed frames still fit. Overlong
//! lines wrap on word boundaries; overlong words are cut hard.

use crate::types::clean_text;

fn chars(s: &str) -> usize {
    s.chars().count()
}

/// Pack `lines` into frames of at most `max_text` characters.
pub fn paginate(lines: &[String], max_text: usize) -> Vec<String> {
    let max_text = max_text.max(8);
    let frames = build(lines, max_text);
    if frames.len() <= 1 {
        return frames;
    }

    // Repack with room reserved for the page prefix, growing the reserve in
    // the rare case the page count needs more digits than expected.
    let mut reserve = 8; // "(xx/yy) "
    loop {
        let frames = build(lines, max_text.saturating_sub(reserve).max(1));
        let total = frames.len();
        let widest = format!("({}/{}) ", total, total).len();
        if widest <= reserve || total <= 1 {
            return frames
                .into_iter()
                .enumerate()
                .map(|(i, f)| {
                    if total > 1 {
                        format!("({}/{}) {}", i + 1, total, f)
                    } else {
                        f
                    }
                })
                .collect();
        }
        reserve = widest;
    }
}

/// Clean and wrap the lines at `budget`, then pack greedily.
fn build(lines: &[String], budget: usize) -> Vec<String> {
    let mut exploded: Vec<String> = Vec::new();
    for line in lines {
        let line = clean_text(line);
        if line.is_empty() {
            continue;
        }
        if chars(&line) <= budget {
            exploded.push(line);
        } else {
            exploded.extend(split_line(&line, budget));
        }
    }
    pack(&exploded, budget)
}

fn pack(lines: &[String], budget: usize) -> Vec<String> {
    let mut frames = Vec::new();
    let mut cur: Vec<&str> = Vec::new();
    let mut cur_len = 0;
    for line in lines {
        let added = if cur.is_empty() { chars(line) } else { cur_len + 1 + chars(line) };
        if !cur.is_empty() && added > budget {
            frames.push(cur.join("\n"));
            cur = vec![line];
            cur_len = chars(line);
        } else {
            cur.push(line);
            cur_len = added;
        }
    }
    if !cur.is_empty() {
        frames.push(cur.join("\n"));
    }
    frames
}

/// Wrap one overlong line at word boundaries; words longer than the width
/// are cut at the character level.
fn split_line(line: &str, width: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    for word in line.split(' ') {
        for piece in split_word(word, width) {
            let added = if cur.is_empty() { chars(&piece) } else { chars(&cur) + 1 + chars(&piece) };
            if !cur.is_empty() && added > width {
                out.push(std::mem::take(&mut cur));
            }
            if !cur.is_empty() {
                cur.push(' ');
            }
            cur.push_str(&piece);
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

fn split_word(word: &str, width: usize) -> Vec<String> {
    if chars(word) <= width {
        return vec![word.to_string()];
    }
    let cs: Vec<char> = word.chars().collect();
    cs.chunks(width).map(|c| c.iter().collect()).collect()
}
