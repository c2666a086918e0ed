use crate::model::TimeSpan;

// ── Free-slot computation ─────────────────────────────────────────

/// Free parts of `window` given the busy spans of one room-day.
pub fn free_within(window: &TimeSpan, busy: &[TimeSpan]) -> Vec<TimeSpan> {
    let mut clamped: Vec<TimeSpan> = busy
        .iter()
        .filter(|s| s.overlaps(window))
        .map(|s| TimeSpan::new(s.start.max(window.start), s.end.min(window.end)))
        .collect();
    clamped.sort_by_key(|s| s.start);
    subtract_spans(&[*window], &merge_overlapping(&clamped))
}

/// Merge sorted overlapping/adjacent spans into disjoint spans.
pub fn merge_overlapping(sorted: &[TimeSpan]) -> Vec<TimeSpan> {
    let mut merged: Vec<TimeSpan> = Vec::with_capacity(sorted.len());
    for span in sorted {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(*span),
        }
    }
    merged
}

/// Subtract sorted disjoint `remove` spans from sorted disjoint `base` spans.
pub fn subtract_spans(base: &[TimeSpan], remove: &[TimeSpan]) -> Vec<TimeSpan> {
    let mut result = Vec::new();
    let mut j = 0;
    for b in base {
        let mut cursor = b.start;
        while j < remove.len() && remove[j].end <= cursor {
            j += 1;
        }
        let mut k = j;
        while k < remove.len() && remove[k].start < b.end {
            let r = &remove[k];
            if r.start > cursor {
                result.push(TimeSpan::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
            k += 1;
        }
        if cursor < b.end {
            result.push(TimeSpan::new(cursor, b.end));
        }
    }
    result
}
