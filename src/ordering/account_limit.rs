use std::collections::HashMap;

use super::{AccountLimitConfig, ProviderSettings, StreamCandidate, provider_config};

/// Cap how many streams one provider contributes to a channel
///
/// Walks the streams in order and keeps each one while its provider is under
/// its limit: the per-account override when configured, else the default.
/// A limit of 0 means unlimited and provider-less streams are never limited.
/// Returns `(kept, excluded)`; kept streams stay in input order.
pub fn limit_streams_per_account(
    streams: Vec<StreamCandidate>,
    config: &AccountLimitConfig,
    providers: &ProviderSettings,
) -> (Vec<StreamCandidate>, Vec<StreamCandidate>) {
    if !config.enabled {
        return (streams, Vec::new());
    }

    let mut counts: HashMap<i64, u32> = HashMap::new();
    let mut kept = Vec::with_capacity(streams.len());
    let mut excluded = Vec::new();

    for stream in streams {
        let Some(provider_id) = stream.provider_id else {
            kept.push(stream);
            continue;
        };
        let limit = provider_config(providers, provider_id)
            .and_then(|p| p.max_streams_per_channel)
            .unwrap_or(config.default_limit);
        if limit == 0 {
            kept.push(stream);
            continue;
        }
        let count = counts.entry(provider_id).or_insert(0);
        if *count < limit {
            *count += 1;
            kept.push(stream);
        } else {
            excluded.push(stream);
        }
    }

    (kept, excluded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordering::ProviderConfig;

    fn from(provider: Option<i64>, id: i64) -> StreamCandidate {
        StreamCandidate {
            stream_id: id,
            provider_id: provider,
            ..StreamCandidate::default()
        }
    }

    fn ids(streams: &[StreamCandidate]) -> Vec<i64> {
        streams.iter().map(|s| s.stream_id).collect()
    }

    fn enabled(default_limit: u32) -> AccountLimitConfig {
        AccountLimitConfig {
            enabled: true,
            default_limit,
        }
    }

    #[test]
    fn test_default_limit_drops_without_reordering() {
        let streams = vec![
            from(Some(1), 1),
            from(Some(2), 2),
            from(Some(1), 3),
            from(Some(1), 4),
            from(Some(2), 5),
        ];
        let (kept, excluded) =
            limit_streams_per_account(streams, &enabled(1), &ProviderSettings::new());
        assert_eq!(ids(&kept), vec![1, 2]);
        assert_eq!(ids(&excluded), vec![3, 4, 5]);
    }

    #[test]
    fn test_override_and_zero_mean_unlimited() {
        let mut providers = ProviderSettings::new();
        providers.insert(
            "1".to_string(),
            ProviderConfig {
                priority: None,
                max_streams_per_channel: Some(2),
            },
        );
        let streams = vec![
            from(Some(1), 1),
            from(Some(1), 2),
            from(Some(1), 3),
            from(Some(2), 4),
            from(Some(2), 5),
        ];
        let (kept, excluded) = limit_streams_per_account(streams.clone(), &enabled(0), &providers);
        assert_eq!(ids(&kept), vec![1, 2, 4, 5]);
        assert_eq!(ids(&excluded), vec![3]);

        let (kept, excluded) = limit_streams_per_account(streams, &enabled(1), &providers);
        assert_eq!(ids(&kept), vec![1, 2, 4]);
        assert_eq!(ids(&excluded), vec![3, 5]);
    }

    #[test]
    fn test_provider_less_never_limited() {
        let streams: Vec<_> = (1..=4).map(|id| from(None, id)).collect();
        let (kept, excluded) =
            limit_streams_per_account(streams, &enabled(1), &ProviderSettings::new());
        assert_eq!(kept.len(), 4);
        assert!(excluded.is_empty());
    }

    #[test]
    fn test_disabled_passes_through() {
        let streams = vec![from(Some(1), 1), from(Some(1), 2)];
        let config = AccountLimitConfig {
            enabled: false,
            default_limit: 1,
        };
        let (kept, excluded) =
            limit_streams_per_account(streams, &config, &ProviderSettings::new());
        assert_eq!(ids(&kept), vec![1, 2]);
        assert!(excluded.is_empty());
    }
}
