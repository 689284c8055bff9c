use std::cmp::Ordering;

use super::{ProviderSettings, SortCriterion, StreamCandidate, provider_config};

/// Stable quality sort, best first
///
/// Criteria are compared in the given order and ties fall through to the
/// next one; streams equal on every criterion keep their relative order.
/// Missing values rank as 0. With `deprioritize_failed` set, black screen
/// and failed/timed out streams sink below every healthy stream regardless
/// of their metrics.
pub fn smart_sort_streams(
    streams: &[StreamCandidate],
    criteria: &[SortCriterion],
    deprioritize_failed: bool,
    providers: &ProviderSettings,
) -> Vec<StreamCandidate> {
    let mut sorted = streams.to_vec();
    sorted.sort_by(|a, b| {
        if deprioritize_failed {
            let demoted = a.is_unhealthy().cmp(&b.is_unhealthy());
            if demoted != Ordering::Equal {
                return demoted;
            }
        }
        criteria
            .iter()
            .map(|criterion| compare_desc(a, b, *criterion, providers))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
    sorted
}

fn compare_desc(
    a: &StreamCandidate,
    b: &StreamCandidate,
    criterion: SortCriterion,
    providers: &ProviderSettings,
) -> Ordering {
    match criterion {
        SortCriterion::Resolution => b
            .resolution_pixels
            .unwrap_or(0)
            .cmp(&a.resolution_pixels.unwrap_or(0)),
        SortCriterion::Bitrate => b.bitrate.unwrap_or(0).cmp(&a.bitrate.unwrap_or(0)),
        SortCriterion::Framerate => b.fps.unwrap_or(0.0).total_cmp(&a.fps.unwrap_or(0.0)),
        SortCriterion::ProviderPriority => {
            provider_priority(b, providers).cmp(&provider_priority(a, providers))
        }
        SortCriterion::AudioChannels => b
            .audio_channels
            .unwrap_or(0)
            .cmp(&a.audio_channels.unwrap_or(0)),
    }
}

fn provider_priority(stream: &StreamCandidate, providers: &ProviderSettings) -> i64 {
    stream
        .provider_id
        .and_then(|id| provider_config(providers, id))
        .and_then(|p| p.priority)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProbeStatus;
    use crate::ordering::ProviderConfig;

    const ALL: [SortCriterion; 5] = [
        SortCriterion::Resolution,
        SortCriterion::Bitrate,
        SortCriterion::Framerate,
        SortCriterion::ProviderPriority,
        SortCriterion::AudioChannels,
    ];

    fn candidate(id: i64, pixels: Option<u64>, bitrate: Option<u64>) -> StreamCandidate {
        StreamCandidate {
            stream_id: id,
            resolution_pixels: pixels,
            bitrate,
            probe_status: Some(ProbeStatus::Success),
            ..StreamCandidate::default()
        }
    }

    fn ids(streams: &[StreamCandidate]) -> Vec<i64> {
        streams.iter().map(|s| s.stream_id).collect()
    }

    #[test]
    fn test_ties_fall_through_to_next_criterion() {
        let streams = vec![
            candidate(1, Some(921_600), Some(3000)),
            candidate(2, Some(2_073_600), Some(2000)),
            candidate(3, Some(2_073_600), Some(6000)),
            candidate(4, None, Some(9000)),
        ];
        let sorted = smart_sort_streams(&streams, &ALL, false, &ProviderSettings::new());
        assert_eq!(ids(&sorted), vec![3, 2, 1, 4]);
    }

    #[test]
    fn test_criteria_order_matters() {
        let streams = vec![
            candidate(1, Some(2_073_600), Some(2000)),
            candidate(2, Some(921_600), Some(8000)),
        ];
        let sorted = smart_sort_streams(
            &streams,
            &[SortCriterion::Bitrate, SortCriterion::Resolution],
            false,
            &ProviderSettings::new(),
        );
        assert_eq!(ids(&sorted), vec![2, 1]);
    }

    #[test]
    fn test_equal_streams_keep_relative_order() {
        let streams: Vec<_> = (1..=5).map(|id| candidate(id, None, None)).collect();
        let sorted = smart_sort_streams(&streams, &ALL, true, &ProviderSettings::new());
        assert_eq!(ids(&sorted), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_provider_priority_uses_string_keyed_settings() {
        let mut providers = ProviderSettings::new();
        providers.insert(
            "9".to_string(),
            ProviderConfig {
                priority: Some(5),
                max_streams_per_channel: None,
            },
        );
        let mut low = candidate(1, None, None);
        low.provider_id = Some(3);
        let mut high = candidate(2, None, None);
        high.provider_id = Some(9);

        let sorted = smart_sort_streams(
            &[low, high],
            &[SortCriterion::ProviderPriority],
            false,
            &providers,
        );
        assert_eq!(ids(&sorted), vec![2, 1]);
    }

    #[test]
    fn test_black_and_failed_streams_sink_when_deprioritized() {
        let mut black = candidate(1, Some(8_294_400), Some(20000));
        black.is_black_screen = true;
        let mut failed = candidate(2, None, None);
        failed.probe_status = Some(ProbeStatus::Timeout);
        let healthy = candidate(3, Some(414_720), Some(1000));
        let streams = vec![black, failed, healthy];

        let sorted = smart_sort_streams(&streams, &ALL, true, &ProviderSettings::new());
        assert_eq!(ids(&sorted), vec![3, 1, 2]);

        let sorted = smart_sort_streams(&streams, &ALL, false, &ProviderSettings::new());
        assert_eq!(ids(&sorted), vec![1, 3, 2]);
    }

    #[test]
    fn test_sort_is_idempotent() {
        let mut streams = vec![
            candidate(1, Some(921_600), Some(3000)),
            candidate(2, Some(2_073_600), None),
            candidate(3, None, None),
            candidate(4, Some(921_600), Some(3000)),
        ];
        streams[2].is_black_screen = true;
        streams[1].fps = Some(50.0);

        let once = smart_sort_streams(&streams, &ALL, true, &ProviderSettings::new());
        let twice = smart_sort_streams(&once, &ALL, true, &ProviderSettings::new());
        assert_eq!(once, twice);
    }
}
