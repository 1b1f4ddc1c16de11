use std::fmt::Display;

pub fn format_comma_delimited<I, T>(values: I) -> String
where
    I: IntoIterator<Item = T>,
    T: Display,
{
    values
        .into_iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Formats sorted indices as compressed ranges, e.g. `0-2,5,7-8`.
pub fn format_index_ranges<I: IntoIterator<Item = u32>>(indices: I) -> String {
    let mut ranges: Vec<(u32, u32)> = Vec::new();
    for index in indices {
        match ranges.last_mut() {
            Some((_, end)) if *end + 1 == index => *end = index,
            _ => ranges.push((index, index)),
        }
    }
    format_comma_delimited(ranges.into_iter().map(|(start, end)| {
        if start == end {
            start.to_string()
        } else {
            format!("{start}-{end}")
        }
    }))
}

/// Run-length encoding of adjacent equal values: `[2, 2, 1]` -> `[(2, 2), (1, 1)]`.
pub fn run_lengths<T: PartialEq + Copy>(values: impl IntoIterator<Item = T>) -> Vec<(T, usize)> {
    let mut runs: Vec<(T, usize)> = Vec::new();
    for value in values {
        match runs.last_mut() {
            Some((last, count)) if *last == value => *count += 1,
            _ => runs.push((value, 1)),
        }
    }
    runs
}
