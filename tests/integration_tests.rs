//! stratacache Integration Tests
//!
//! End-to-end coverage of the public cache contract:
//! - Multi-tier reads, writes, and promotion
//! - TTL expiry and tag/pattern/cascade invalidation
//! - Capacity enforcement and prefetch
//! - Metrics and reporting

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use stratacache::{
    BytesEstimator, CacheConfig, CacheManager, CacheManagerBuilder, GetOptions,
    InvalidateOptions, InvalidationTarget, MemoryStore, Priority, SetOptions, TierLevel,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn full_manager() -> CacheManager<Bytes> {
    init_tracing();
    CacheManagerBuilder::new(CacheConfig::default())
        .estimator(BytesEstimator)
        .local_store(Arc::new(MemoryStore::new()))
        .shared_store(Arc::new(MemoryStore::new()))
        .build()
        .unwrap()
}

fn payload(text: &str) -> Bytes {
    Bytes::copy_from_slice(text.as_bytes())
}

// =============================================================================
// TTL behavior
// =============================================================================

mod ttl_tests {
    use super::*;

    #[tokio::test]
    async fn test_scenario_a_short_ttl() {
        let cache = full_manager();

        cache
            .set_with(
                "u:1",
                payload("{\"n\":1}"),
                SetOptions {
                    ttl: Some(Duration::from_millis(50)),
                    ..SetOptions::default()
                },
            )
            .await
            .unwrap();

        // Immediately readable
        assert_eq!(cache.get("u:1").await, Some(payload("{\"n\":1}")));

        // Gone after the TTL elapses
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("u:1").await, None);
    }

    #[tokio::test]
    async fn test_valid_until_expiry_then_never_again() {
        let cache = full_manager();
        cache
            .set_with(
                "k",
                payload("v"),
                SetOptions {
                    ttl: Some(Duration::from_millis(80)),
                    ..SetOptions::default()
                },
            )
            .await
            .unwrap();

        for _ in 0..3 {
            assert!(cache.get("k").await.is_some());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tokio::time::sleep(Duration::from_millis(80)).await;
        for _ in 0..3 {
            assert!(cache.get("k").await.is_none());
        }
    }

    #[tokio::test]
    async fn test_optimize_sweeps_expired_from_every_tier() {
        let cache = full_manager();
        cache
            .set_with(
                "k",
                payload("v"),
                SetOptions {
                    ttl: Some(Duration::from_millis(10)),
                    priority: Priority::Critical,
                    ..SetOptions::default()
                },
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.optimize().await;

        for level in cache.active_levels() {
            assert!(cache
                .tier(level)
                .unwrap()
                .get("k")
                .await
                .unwrap()
                .is_none());
        }
    }
}

// =============================================================================
// Tier selection and promotion
// =============================================================================

mod tier_tests {
    use super::*;

    #[tokio::test]
    async fn test_low_priority_never_reaches_shared() {
        let cache = full_manager();
        cache
            .set_with(
                "low",
                payload("v"),
                SetOptions {
                    priority: Priority::Low,
                    ..SetOptions::default()
                },
            )
            .await
            .unwrap();

        assert!(cache
            .tier(TierLevel::Shared)
            .unwrap()
            .get("low")
            .await
            .unwrap()
            .is_none());
        assert!(cache
            .tier(TierLevel::Local)
            .unwrap()
            .get("low")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_critical_priority_populates_every_tier() {
        let cache = full_manager();
        cache
            .set_with(
                "crit",
                payload("v"),
                SetOptions {
                    priority: Priority::Critical,
                    ..SetOptions::default()
                },
            )
            .await
            .unwrap();

        for level in cache.active_levels() {
            assert!(
                cache
                    .tier(level)
                    .unwrap()
                    .get("crit")
                    .await
                    .unwrap()
                    .is_some(),
                "critical entry missing from {level}"
            );
        }
    }

    #[tokio::test]
    async fn test_promotion_survives_losing_the_slower_tier() {
        let cache = full_manager();

        // Resident only in the shared tier to begin with
        cache
            .set_with(
                "hot",
                payload("v"),
                SetOptions {
                    target_tiers: Some(vec![TierLevel::Shared]),
                    ..SetOptions::default()
                },
            )
            .await
            .unwrap();

        for _ in 0..6 {
            assert!(cache.get("hot").await.is_some());
        }

        // Slower tiers out of the picture: the promoted copy serves
        let opts = GetOptions {
            skip_tiers: vec![TierLevel::Local, TierLevel::Shared],
            ..GetOptions::default()
        };
        assert_eq!(cache.get_with("hot", &opts).await, Some(payload("v")));
    }

    #[tokio::test]
    async fn test_promotion_leaves_source_tier_untouched() {
        let cache = full_manager();
        cache
            .set_with(
                "hot",
                payload("v"),
                SetOptions {
                    target_tiers: Some(vec![TierLevel::Local]),
                    ..SetOptions::default()
                },
            )
            .await
            .unwrap();

        for _ in 0..7 {
            cache.get("hot").await.unwrap();
        }

        assert!(cache
            .tier(TierLevel::Local)
            .unwrap()
            .get("hot")
            .await
            .unwrap()
            .is_some());
        assert!(cache
            .tier(TierLevel::Ephemeral)
            .unwrap()
            .get("hot")
            .await
            .unwrap()
            .is_some());
    }
}

// =============================================================================
// Invalidation
// =============================================================================

mod invalidation_tests {
    use super::*;

    #[tokio::test]
    async fn test_scenario_b_tag_group_invalidation() {
        let cache = full_manager();

        for key in ["a", "b"] {
            cache
                .set_with(
                    key,
                    payload("v"),
                    SetOptions {
                        tags: vec!["g".to_string()],
                        ..SetOptions::default()
                    },
                )
                .await
                .unwrap();
        }

        cache
            .invalidate_with(
                InvalidationTarget::exact(""),
                InvalidateOptions {
                    by_tags: vec!["g".to_string()],
                    ..InvalidateOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, None);
    }

    #[tokio::test]
    async fn test_invalidation_is_idempotent() {
        let cache = full_manager();
        cache.set("k", payload("v")).await.unwrap();

        cache
            .invalidate(InvalidationTarget::exact("k"))
            .await
            .unwrap();
        let second = cache
            .invalidate(InvalidationTarget::exact("k"))
            .await
            .unwrap();

        assert_eq!(second, 0);
        assert_eq!(cache.get("k").await, None);

        // Absent key from the start: also a no-op
        let removed = cache
            .invalidate(InvalidationTarget::exact("never-existed"))
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn test_cascade_rule_removes_dependent_prefixes() {
        let cache = full_manager();
        cache
            .add_invalidation_rule("^user:", vec!["stats:".into(), "feed:".into()])
            .unwrap();

        cache
            .set_with(
                "user:7",
                payload("v"),
                SetOptions {
                    priority: Priority::Critical,
                    ..SetOptions::default()
                },
            )
            .await
            .unwrap();
        cache.set("stats:weekly", payload("v")).await.unwrap();
        cache.set("stats:monthly", payload("v")).await.unwrap();
        cache.set("feed:home", payload("v")).await.unwrap();
        cache.set("unrelated", payload("v")).await.unwrap();

        cache
            .invalidate_with(
                InvalidationTarget::pattern("^user:").unwrap(),
                InvalidateOptions {
                    cascade: true,
                    ..InvalidateOptions::default()
                },
            )
            .await
            .unwrap();

        for key in ["user:7", "stats:weekly", "stats:monthly", "feed:home"] {
            assert_eq!(cache.get(key).await, None, "{key} should be gone");
        }
        assert!(cache.get("unrelated").await.is_some());
    }

    #[tokio::test]
    async fn test_invalidation_scoped_to_target_tiers() {
        let cache = full_manager();
        cache
            .set_with(
                "k",
                payload("v"),
                SetOptions {
                    priority: Priority::Critical,
                    ..SetOptions::default()
                },
            )
            .await
            .unwrap();

        cache
            .invalidate_with(
                InvalidationTarget::exact("k"),
                InvalidateOptions {
                    target_tiers: Some(vec![TierLevel::Ephemeral]),
                    ..InvalidateOptions::default()
                },
            )
            .await
            .unwrap();

        // Still resident (and readable) below the ephemeral tier
        assert!(cache
            .tier(TierLevel::Ephemeral)
            .unwrap()
            .get("k")
            .await
            .unwrap()
            .is_none());
        assert_eq!(cache.get("k").await, Some(payload("v")));
    }
}

// =============================================================================
// Capacity
// =============================================================================

mod capacity_tests {
    use super::*;

    #[tokio::test]
    async fn test_tier_never_settles_above_max_size() {
        let mut config = CacheConfig::default();
        config.ephemeral.max_size = 500;
        let cache: CacheManager<Bytes> = CacheManagerBuilder::new(config)
            .estimator(BytesEstimator)
            .local_store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap();

        for i in 0..20 {
            cache
                .set_with(
                    &format!("k{i}"),
                    Bytes::from(vec![0u8; 100]),
                    SetOptions {
                        target_tiers: Some(vec![TierLevel::Ephemeral]),
                        ..SetOptions::default()
                    },
                )
                .await
                .unwrap();
        }

        cache.optimize().await;
        let used = cache
            .tier(TierLevel::Ephemeral)
            .unwrap()
            .used_bytes()
            .await
            .unwrap();
        assert!(used <= 500, "used {used} exceeds max_size");
    }

    #[tokio::test]
    async fn test_evictions_show_up_in_metrics() {
        let mut config = CacheConfig::default();
        config.ephemeral.max_size = 300;
        let cache: CacheManager<Bytes> = CacheManagerBuilder::new(config)
            .estimator(BytesEstimator)
            .local_store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap();

        for i in 0..6 {
            cache
                .set_with(
                    &format!("k{i}"),
                    Bytes::from(vec![0u8; 100]),
                    SetOptions {
                        target_tiers: Some(vec![TierLevel::Ephemeral]),
                        ..SetOptions::default()
                    },
                )
                .await
                .unwrap();
        }

        let snap = cache
            .metrics()
            .tier(TierLevel::Ephemeral)
            .unwrap()
            .snapshot();
        assert!(snap.evictions > 0);
    }
}

// =============================================================================
// Prefetch
// =============================================================================

mod prefetch_tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use stratacache::PrefetchOptions;

    #[tokio::test]
    async fn test_scenario_c_loader_called_once_per_key() {
        let cache = Arc::new(full_manager());
        let calls = Arc::new(AtomicU32::new(0));

        let loader_calls = Arc::clone(&calls);
        Arc::clone(&cache)
            .prefetch(vec!["x".to_string(), "y".to_string()], move |key| {
                let calls = Arc::clone(&loader_calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Bytes::from(format!("v:{key}")))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get("x").await, Some(payload("v:x")));
        assert_eq!(cache.get("y").await, Some(payload("v:y")));
    }

    #[tokio::test]
    async fn test_concurrency_stays_under_the_slot_pool() {
        let cache = Arc::new(full_manager());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let keys: Vec<String> = (0..12).map(|i| format!("k{i}")).collect();
        let flight = Arc::clone(&in_flight);
        let peak_seen = Arc::clone(&peak);

        Arc::clone(&cache)
            .prefetch_with(
                keys,
                move |key| {
                    let flight = Arc::clone(&flight);
                    let peak_seen = Arc::clone(&peak_seen);
                    async move {
                        let now = flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(Bytes::from(key))
                    }
                },
                PrefetchOptions {
                    max_concurrent: 3,
                    ..PrefetchOptions::default()
                },
            )
            .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_batch_settles_despite_failures() {
        let cache = Arc::new(full_manager());

        let keys: Vec<String> = (0..6).map(|i| format!("k{i}")).collect();
        Arc::clone(&cache)
            .prefetch(keys, |key| async move {
                if key == "k1" || key == "k3" {
                    Err(stratacache::Error::Internal("flaky source".into()))
                } else {
                    Ok(Bytes::from(format!("v:{key}")))
                }
            })
            .await;

        assert!(cache.get("k0").await.is_some());
        assert_eq!(cache.get("k1").await, None);
        assert!(cache.get("k2").await.is_some());
        assert_eq!(cache.get("k3").await, None);
    }
}

// =============================================================================
// Metrics and reporting
// =============================================================================

mod reporting_tests {
    use super::*;

    #[tokio::test]
    async fn test_scenario_d_per_tier_hit_rate() {
        let cache = full_manager();
        cache.set("k", payload("v")).await.unwrap();

        cache.get("k").await.unwrap();
        cache.get("absent").await;

        let m = cache.metrics().tier(TierLevel::Ephemeral).unwrap();
        assert_eq!(m.hit_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_report_top_keys_and_usage() {
        let cache = full_manager();

        cache.set("hot", payload("hot-value")).await.unwrap();
        cache.set("warm", payload("warm-value")).await.unwrap();
        for _ in 0..8 {
            cache.get("hot").await.unwrap();
        }
        cache.get("warm").await.unwrap();

        let report = cache.performance_report().await;

        assert_eq!(report.top_keys[0].key, "hot");
        assert!(report.top_keys[0].access_count > report.top_keys[1].access_count);
        assert!(report.total_used_bytes > 0);
        assert!(report.aggregate_hit_rate > 0.9);

        // Report serializes for export
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"hot\""));
    }

    #[tokio::test]
    async fn test_clear_wipes_tiers_and_metrics() {
        let cache = full_manager();
        cache.set("k", payload("v")).await.unwrap();
        cache.get("k").await.unwrap();

        cache.clear().await;

        let m = cache.metrics().tier(TierLevel::Ephemeral).unwrap();
        assert_eq!(m.hits(), 0);
        for level in cache.active_levels() {
            assert_eq!(cache.tier(level).unwrap().entry_count().await.unwrap(), 0);
        }
    }
}

// =============================================================================
// Concurrency and lifecycle
// =============================================================================

mod lifecycle_tests {
    use super::*;
    use tokio::task::JoinSet;

    #[tokio::test]
    async fn test_concurrent_readers_and_writers() {
        let cache = Arc::new(full_manager());
        let mut join_set = JoinSet::new();

        for t in 0..8 {
            let cache = Arc::clone(&cache);
            join_set.spawn(async move {
                for i in 0..50 {
                    let key = format!("k-{t}-{i}");
                    cache.set(&key, payload("v")).await.unwrap();
                    assert!(cache.get(&key).await.is_some());
                }
            });
        }
        while let Some(result) = join_set.join_next().await {
            result.unwrap();
        }
    }

    #[tokio::test]
    async fn test_set_racing_optimize_survives() {
        let cache = Arc::new(full_manager());
        let writer = Arc::clone(&cache);

        let write_task = tokio::spawn(async move {
            for i in 0..100 {
                writer.set(&format!("w{i}"), payload("v")).await.unwrap();
            }
        });
        let sweeper = Arc::clone(&cache);
        let optimize_task = tokio::spawn(async move {
            for _ in 0..10 {
                sweeper.optimize().await;
            }
        });

        write_task.await.unwrap();
        optimize_task.await.unwrap();

        // Nothing written during the sweeps was lost
        for i in 0..100 {
            assert!(cache.get(&format!("w{i}")).await.is_some(), "lost w{i}");
        }
    }

    #[tokio::test]
    async fn test_background_optimizer_runs() {
        let mut config = CacheConfig::default();
        config.optimization_interval = Duration::from_millis(20);
        let cache: Arc<CacheManager<Bytes>> = Arc::new(
            CacheManagerBuilder::new(config)
                .estimator(BytesEstimator)
                .local_store(Arc::new(MemoryStore::new()))
                .build()
                .unwrap(),
        );
        Arc::clone(&cache).spawn_optimizer();

        cache
            .set_with(
                "short",
                payload("v"),
                SetOptions {
                    ttl: Some(Duration::from_millis(10)),
                    ..SetOptions::default()
                },
            )
            .await
            .unwrap();

        // The periodic pass sweeps the expired entry out of the backend
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache
            .tier(TierLevel::Ephemeral)
            .unwrap()
            .get("short")
            .await
            .unwrap()
            .is_none());

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_runs_final_optimize() {
        let cache = Arc::new(full_manager());
        Arc::clone(&cache).spawn_optimizer();

        cache
            .set_with(
                "stale",
                payload("v"),
                SetOptions {
                    ttl: Some(Duration::from_millis(5)),
                    ..SetOptions::default()
                },
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        cache.shutdown().await;

        assert!(cache
            .tier(TierLevel::Ephemeral)
            .unwrap()
            .get("stale")
            .await
            .unwrap()
            .is_none());
    }
}
