use std::collections::BTreeMap;

use super::{DiversificationMode, ProviderSettings, StreamCandidate, provider_config};

/// Interleave streams so consecutive entries come from different providers
///
/// Streams are grouped by provider with their relative order preserved, then
/// taken one per group per round. Provider-less streams follow in their
/// original relative order. With fewer than two streams or a single
/// provider the input is returned unchanged.
pub fn diversify_streams(
    streams: Vec<StreamCandidate>,
    mode: DiversificationMode,
    providers: &ProviderSettings,
) -> Vec<StreamCandidate> {
    if mode == DiversificationMode::Disabled || streams.len() <= 1 {
        return streams;
    }

    let mut groups: BTreeMap<i64, Vec<StreamCandidate>> = BTreeMap::new();
    let mut unassigned = Vec::new();
    for stream in streams.iter().cloned() {
        match stream.provider_id {
            Some(id) => groups.entry(id).or_default().push(stream),
            None => unassigned.push(stream),
        }
    }

    if groups.len() <= 1 {
        return streams;
    }

    // BTreeMap iteration already gives ascending provider id
    let mut ordered_groups: Vec<(i64, Vec<StreamCandidate>)> = groups.into_iter().collect();
    if mode == DiversificationMode::PriorityWeighted {
        let priority = |id: i64| {
            provider_config(providers, id)
                .and_then(|p| p.priority)
                .unwrap_or(0)
        };
        ordered_groups.sort_by(|(a, _), (b, _)| priority(*b).cmp(&priority(*a)).then(a.cmp(b)));
    }

    let rounds = ordered_groups
        .iter()
        .map(|(_, group)| group.len())
        .max()
        .unwrap_or(0);
    let mut queues: Vec<std::vec::IntoIter<StreamCandidate>> = ordered_groups
        .into_iter()
        .map(|(_, group)| group.into_iter())
        .collect();

    let mut result = Vec::with_capacity(streams.len());
    for _ in 0..rounds {
        for queue in queues.iter_mut() {
            if let Some(stream) = queue.next() {
                result.push(stream);
            }
        }
    }
    result.extend(unassigned);
    result
}
