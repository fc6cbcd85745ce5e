use serde::Serialize;

/// A limit/offset page, shaped like the list responses the data grid reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub count: usize,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Copy)]
pub struct PageParams {
    pub limit: usize,
    pub offset: usize,
}

impl PageParams {
    /// Clamp the requested window to `1..=max_limit`, defaulting to `default_limit`.
    pub fn new(limit: Option<usize>, offset: Option<usize>, default_limit: usize, max_limit: usize) -> Self {
        Self {
            limit: limit.unwrap_or(default_limit).clamp(1, max_limit.max(1)),
            offset: offset.unwrap_or(0),
        }
    }
}

/// Cut `items` to the window in `params`. `base` is the endpoint, with any
/// query string to preserve, that next/previous links point back to.
pub fn paginate<T>(items: Vec<T>, params: PageParams, base: &str) -> Page<T> {
    let count = items.len();
    let PageParams { limit, offset } = params;
    let separator = if base.contains('?') { '&' } else { '?' };

    let next_offset = offset.saturating_add(limit);

    let next = (next_offset < count)
        .then(|| format!("{}{}limit={}&offset={}", base, separator, limit, next_offset));
    let previous = (offset > 0)
        .then(|| format!("{}{}limit={}&offset={}", base, separator, limit, offset.saturating_sub(limit)));

    Page {
        count,
        next,
        previous,
        results: items.into_iter().skip(offset).take(limit).collect(),
    }
}
