//! 文字列類似度
//!
//! 存在しないコマンド名が呼ばれたときの「もしかして」候補の算出に使う。

/// 候補として提示する最低類似度
pub const SUGGESTION_THRESHOLD: f64 = 0.5;

/// Levenshtein距離（文字単位）
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // 1行分だけ保持する
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// 0.0〜1.0の類似度（1.0で完全一致）
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// 最も近い候補を返す
///
/// 類似度が [`SUGGESTION_THRESHOLD`] 未満の候補しかない場合は `None`。
/// 同率の場合は先に現れた候補を優先する。
pub fn suggest<'a, I>(target: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(&'a str, f64)> = None;

    for candidate in candidates {
        let score = similarity(target, candidate);
        if score < SUGGESTION_THRESHOLD {
            continue;
        }
        match best {
            Some((_, best_score)) if best_score >= score => {}
            _ => best = Some((candidate, score)),
        }
    }

    best.map(|(name, _)| name)
}
